// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The storage group model: file metadata and the load-callback seam.

use crate::{
    key::{FileKey, GroupKey, TypeKey},
    workqueue::WorkQueue,
};
use std::path::PathBuf;

/// Locates a file's bytes within its storage backend.
///
/// The handle is interpreted only by the owning group's load implementation:
/// directory groups store the full filesystem path, packed archives store an
/// offset into the archive.
#[derive(Clone, Debug)]
pub enum FileHandle {
    Path(PathBuf),
    Offset(u64),
}

/// Metadata for a single file within a storage group, captured at scan time.
#[derive(Clone, Debug)]
pub struct FileInfo {
    pub name: String,
    pub type_key: TypeKey,
    pub file_key: FileKey,
    pub size: u64,
    pub handle: FileHandle,
}

/// Decodes a raw file buffer into its in-memory representation.
///
/// The job is pushed onto the work queue designated by its request and runs
/// on a worker thread. `data` is a temporary buffer that expires when the
/// call returns; implementations must copy out whatever they keep. A
/// zero-length `data` signals that the load failed (open error or short
/// read); partial file contents are never delivered.
pub trait ParseJob: Send + 'static {
    fn parse(self: Box<Self>, data: &[u8]);
}

impl<F: FnOnce(&[u8]) + Send + 'static> ParseJob for F {
    #[inline]
    fn parse(self: Box<Self>, data: &[u8]) {
        (*self)(data)
    }
}

/// One pending file load, handed to [`StorageGroup::load`] as part of a
/// batch.
pub struct FileRequest {
    /// Index into the group's [`files`](StorageGroup::files) table.
    pub file: u32,
    /// Queue the parse job is pushed onto once the bytes are read.
    pub queue: WorkQueue,
    pub parse: Box<dyn ParseJob>,
}

impl core::fmt::Debug for FileRequest {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("FileRequest")
            .field("file", &self.file)
            .finish_non_exhaustive()
    }
}

/// A named container of files sharing a storage backend.
///
/// `load` executes on the storage scheduler's I/O thread and must fulfill
/// every request in the batch before returning; it may block on file I/O and
/// on buffer availability.
pub trait StorageGroup: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn group_key(&self) -> GroupKey;

    fn files(&self) -> &[FileInfo];

    fn load(&self, requests: Vec<FileRequest>);
}
