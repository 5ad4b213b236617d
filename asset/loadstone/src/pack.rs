// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! File tables for the streaming loader.
//!
//! A [`Pack`] names a set of files over one of two sources: loose files on
//! disk (each entry keeps its own path) or a packed archive (one shared
//! seekable handle, each entry an offset/size pair). The archive's table of
//! contents is the caller's problem — [`Pack::packed`] takes a prebuilt
//! entry table.

use crate::dir::ScanError;
use loadstone_core::key::{FileKey, GroupKey, TypeKey};
use parking_lot::Mutex;
use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};
use tracing::warn;

/// One file within a pack.
#[derive(Clone, Copy, Debug)]
pub struct PackEntry {
    pub file_key: FileKey,
    pub type_key: TypeKey,
    /// Byte offset within the archive; unused for loose packs.
    pub offset: u64,
    pub size: u64,
}

enum Source {
    /// Per-entry paths, parallel to the entry table.
    Loose(Vec<PathBuf>),
    /// A shared archive handle, seeked under its lock.
    Packed(Mutex<File>),
}

/// A named, sorted file table over a loose directory or packed archive.
pub struct Pack {
    name: String,
    key: GroupKey,
    entries: Vec<PackEntry>,
    source: Source,
}

impl Pack {
    /// Builds a loose pack by scanning `dir` (non-recursively).
    ///
    /// Entries are kept sorted by (file, type) key; files whose keys collide
    /// with an existing entry are skipped with a warning.
    pub fn scan(name: &str, dir: impl AsRef<Path>) -> Result<Self, ScanError> {
        let dir = dir.as_ref();
        let iter = std::fs::read_dir(dir).map_err(|source| ScanError::ReadDir {
            path: dir.into(),
            source,
        })?;

        let mut pack = Self {
            name: name.into(),
            key: GroupKey::new(name),
            entries: Vec::new(),
            source: Source::Loose(Vec::new()),
        };
        for entry in iter.flatten() {
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            pack.insert(
                PackEntry {
                    file_key: FileKey::new(&file_name),
                    type_key: TypeKey::new(&file_name),
                    offset: 0,
                    size: meta.len(),
                },
                entry.path(),
            );
        }
        Ok(pack)
    }

    /// Wraps a packed archive with a caller-supplied entry table.
    pub fn packed(name: &str, archive: File, entries: Vec<PackEntry>) -> Self {
        let mut pack = Self {
            name: name.into(),
            key: GroupKey::new(name),
            entries: Vec::with_capacity(entries.len()),
            source: Source::Packed(Mutex::new(archive)),
        };
        for entry in entries {
            pack.insert(entry, PathBuf::new());
        }
        pack
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn name_key(&self) -> GroupKey {
        self.key
    }

    #[inline]
    pub fn entries(&self) -> &[PackEntry] {
        &self.entries
    }

    /// Binary search for an entry by (file, type) key.
    #[inline]
    pub fn find(&self, type_key: TypeKey, file_key: FileKey) -> Option<usize> {
        let idx = self.lower_bound(file_key, type_key);
        (idx < self.entries.len()
            && self.entries[idx].file_key == file_key
            && self.entries[idx].type_key == type_key)
            .then_some(idx)
    }

    // first index whose (file, type) sorts >= the probe
    fn lower_bound(&self, file_key: FileKey, type_key: TypeKey) -> usize {
        self.entries
            .partition_point(|e| (e.file_key, e.type_key) < (file_key, type_key))
    }

    fn insert(&mut self, entry: PackEntry, path: PathBuf) {
        let idx = self.lower_bound(entry.file_key, entry.type_key);
        if idx < self.entries.len() {
            let existing = &self.entries[idx];
            if existing.file_key == entry.file_key && existing.type_key == entry.type_key {
                warn!(
                    pack = %self.name,
                    file = ?entry.file_key,
                    "duplicate file id in pack, skipping"
                );
                return;
            }
        }
        self.entries.insert(idx, entry);
        if let Source::Loose(paths) = &mut self.source {
            paths.insert(idx, path);
        }
    }

    /// Reads entry `index` into `buf` (replacing its contents). Used by the
    /// streaming thread; a short read is an error and `buf` is left cleared.
    pub(crate) fn read(&self, index: usize, buf: &mut Vec<u8>) -> io::Result<usize> {
        let entry = &self.entries[index];
        let size = entry.size as usize;
        buf.clear();
        buf.resize(size, 0);
        let result = match &self.source {
            Source::Loose(paths) => File::open(&paths[index]).and_then(|mut f| f.read_exact(buf)),
            Source::Packed(archive) => {
                let mut archive = archive.lock();
                archive
                    .seek(SeekFrom::Start(entry.offset))
                    .and_then(|_| archive.read_exact(buf))
            }
        };
        if let Err(err) = result {
            buf.clear();
            return Err(err);
        }
        Ok(size)
    }
}
