// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Directory-backed storage groups.
//!
//! A [`DirStorage`] owns a small pool of reusable I/O buffers shared by
//! every group scanned through it. The group's load callback (running on
//! the storage scheduler's I/O thread) rents a buffer, reads the file into
//! it, and posts the parse job to the request's work queue; the job returns
//! the buffer to the pool when the parser is done with it. Buffer
//! availability is the pipeline's backpressure: with every buffer out on
//! loan the I/O thread sleeps until a parse completes.

use loadstone_core::{
    group::{FileHandle, FileInfo, FileRequest, ParseJob, StorageGroup},
    key::{FileKey, GroupKey, TypeKey},
    sync::Semaphore,
};
use parking_lot::Mutex;
use std::{
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::trace;

// buffers grow to the next 64 KiB boundary
const BUFFER_CHUNK: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("failed to read directory {path:?}")]
    ReadDir {
        path: PathBuf,
        source: io::Error,
    },
}

#[derive(Debug)]
struct IoBuffer {
    /// Set while the buffer is rented out: claimed by the I/O thread during
    /// the read and released by the parse job on a worker thread.
    busy: AtomicBool,
    data: Mutex<Vec<u8>>,
}

#[derive(Debug)]
struct Shared {
    sem: Semaphore,
    buffers: Vec<Arc<IoBuffer>>,
}

impl Shared {
    /// Claims an idle buffer suited to a `size`-byte read.
    ///
    /// Prefers the smallest idle buffer whose capacity already fits the
    /// read; if none is large enough, takes the idle buffer with the most
    /// capacity (the caller grows it). Returns `None` when every buffer is
    /// rented out.
    ///
    /// Only the I/O thread claims buffers, so scanning flag-by-flag is
    /// race-free; workers only ever clear the flag.
    fn claim(&self, size: usize) -> Option<&Arc<IoBuffer>> {
        let mut best: Option<(&Arc<IoBuffer>, usize)> = None;
        for buffer in &self.buffers {
            if buffer.busy.load(Ordering::Acquire) {
                continue;
            }
            let capacity = buffer.data.lock().capacity();
            best = match best {
                None => Some((buffer, capacity)),
                // best is too small: any bigger buffer is an upgrade
                Some((_, cap)) if cap < size && capacity > cap => Some((buffer, capacity)),
                // both fit: prefer the tighter one
                Some((_, cap)) if cap >= size && capacity >= size && capacity < cap => {
                    Some((buffer, capacity))
                }
                best => best,
            };
        }
        let (buffer, _) = best?;
        buffer.busy.store(true, Ordering::Relaxed);
        Some(buffer)
    }
}

/// Returns the buffer to the pool once the parser is done with the bytes.
///
/// The return happens in `Drop`, so the buffer comes back even when the
/// work queue is closed and the job is discarded unrun.
struct BufferLease {
    buffer: Arc<IoBuffer>,
    shared: Arc<Shared>,
    len: usize,
    parse: Option<Box<dyn ParseJob>>,
}

impl BufferLease {
    fn run(mut self) {
        if let Some(parse) = self.parse.take() {
            let data = self.buffer.data.lock();
            parse.parse(&data[..self.len]);
        }
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        self.buffer.busy.store(false, Ordering::Release);
        self.shared.sem.post();
    }
}

/// Manager for directory-backed storage groups.
pub struct DirStorage {
    shared: Arc<Shared>,
}

impl DirStorage {
    /// Creates a manager servicing up to `max_requests` concurrent parses.
    pub fn new(max_requests: usize) -> Self {
        assert!(max_requests > 0, "need at least one i/o buffer");
        Self {
            shared: Arc::new(Shared {
                sem: Semaphore::new(),
                buffers: (0..max_requests)
                    .map(|_| {
                        Arc::new(IoBuffer {
                            busy: AtomicBool::new(false),
                            data: Mutex::new(Vec::new()),
                        })
                    })
                    .collect(),
            }),
        }
    }

    /// Scans `path` (non-recursively) into a storage group named `name`.
    ///
    /// Each regular file gets a descriptor with its basename key, extension
    /// key, and size captured at scan time; entries that cannot be stat'ed
    /// are skipped. The group stays bound to this manager's buffer pool.
    pub fn scan(&self, name: &str, path: impl AsRef<Path>) -> Result<Arc<DirGroup>, ScanError> {
        let path = path.as_ref();
        let dir = std::fs::read_dir(path).map_err(|source| ScanError::ReadDir {
            path: path.into(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in dir.flatten() {
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            files.push(FileInfo {
                type_key: TypeKey::new(&file_name),
                file_key: FileKey::new(&file_name),
                size: meta.len(),
                handle: FileHandle::Path(entry.path()),
                name: file_name,
            });
        }

        Ok(Arc::new(DirGroup {
            name: name.into(),
            key: GroupKey::new(name),
            files,
            shared: self.shared.clone(),
        }))
    }
}

/// A scanned directory acting as a storage group.
#[derive(Debug)]
pub struct DirGroup {
    name: String,
    key: GroupKey,
    files: Vec<FileInfo>,
    shared: Arc<Shared>,
}

impl StorageGroup for DirGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn group_key(&self) -> GroupKey {
        self.key
    }

    fn files(&self) -> &[FileInfo] {
        &self.files
    }

    fn load(&self, requests: Vec<FileRequest>) {
        for request in requests {
            let file = &self.files[request.file as usize];
            let size = file.size as usize;

            // rent a buffer, sleeping until a parse returns one
            let buffer = loop {
                match self.shared.claim(size) {
                    Some(buffer) => break buffer.clone(),
                    None => self.shared.sem.wait(),
                }
            };

            let mut data = buffer.data.lock();
            if data.capacity() < size {
                let target = (size + (BUFFER_CHUNK - 1)) & !(BUFFER_CHUNK - 1);
                data.clear();
                data.reserve_exact(target);
            }

            // a short read or open failure delivers an empty buffer; the
            // parser reports its own error
            let len = match read_into(&file.handle, size, &mut data) {
                Ok(()) => size,
                Err(err) => {
                    trace!(file = %file.name, %err, "read failed, delivering empty buffer");
                    data.clear();
                    0
                }
            };
            drop(data);

            let lease = BufferLease {
                buffer,
                shared: self.shared.clone(),
                len,
                parse: Some(request.parse),
            };
            request.queue.push(move || lease.run());
        }
    }
}

fn read_into(handle: &FileHandle, size: usize, data: &mut Vec<u8>) -> io::Result<()> {
    let FileHandle::Path(path) = handle else {
        debug_assert!(false, "directory groups only produce path handles");
        return Err(io::Error::from(io::ErrorKind::InvalidInput));
    };
    let mut file = File::open(path)?;
    data.resize(size, 0);
    file.read_exact(data)
}
