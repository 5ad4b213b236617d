// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Streaming loader: the callback-completion alternative to the storage
//! scheduler.
//!
//! Where the scheduler fires parse jobs at a worker pool and forgets them,
//! the streaming loader gives the caller explicit completion callbacks and
//! explicit buffer ownership. Pending requests and completions live on
//! LIFO stacks: the I/O thread always serves the most recently submitted
//! request, and [`update`](Stream::update) steals the completion stack in
//! one take and delivers it top-down. The stacks are mutex-protected
//! rather than lock-free — the loader's contract is the stack ordering,
//! not the synchronization mechanism.
//!
//! The I/O thread double-buffers reads so one file can be read while the
//! client still holds the previous one. A successful load hands the client
//! a [`StreamData`] guard that pins one of the two I/O buffers; dropping
//! it returns the buffer and wakes the I/O thread. Holding both guards
//! stalls streaming until one is released.

use crate::pack::Pack;
use loadstone_core::sync::Semaphore;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("stream read failed")]
    Io(#[from] io::Error),
    #[error("stream shut down before the request was serviced")]
    Aborted,
}

type Callback = Box<dyn FnOnce(Result<StreamData, StreamError>) + Send + 'static>;

struct LoadRequest {
    pack: Arc<Pack>,
    file: u32,
    callback: Callback,
}

struct Completion {
    callback: Callback,
    result: Result<StreamData, StreamError>,
}

struct StreamBuffer {
    /// Owned by the I/O thread while a read is in progress, then by the
    /// client holding the [`StreamData`] guard.
    locked: AtomicBool,
    data: Mutex<Vec<u8>>,
}

struct Shared {
    /// Pending requests, most recently submitted on top; the I/O thread
    /// pops the top.
    load_list: Mutex<Vec<LoadRequest>>,
    /// Completions awaiting delivery, stolen as one batch by `update`.
    completed: Mutex<Vec<Completion>>,
    buffers: [StreamBuffer; 2],
    sem: Semaphore,
    quit: AtomicBool,
}

impl Shared {
    fn claim(&self) -> Option<usize> {
        self.buffers
            .iter()
            .position(|buffer| !buffer.locked.swap(true, Ordering::Acquire))
    }
}

/// Loaded file bytes, pinning one of the stream's I/O buffers.
///
/// Dropping the guard releases the buffer for the next read.
pub struct StreamData {
    shared: Arc<Shared>,
    buffer: usize,
    len: usize,
}

impl StreamData {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The file contents.
    #[inline]
    pub fn bytes(&self) -> MappedMutexGuard<'_, [u8]> {
        let guard = self.shared.buffers[self.buffer].data.lock();
        MutexGuard::map(guard, |data| &mut data[..self.len])
    }
}

impl Drop for StreamData {
    fn drop(&mut self) {
        self.shared.buffers[self.buffer]
            .locked
            .store(false, Ordering::Release);
        // the i/o thread may be waiting for a buffer
        self.shared.sem.post();
    }
}

impl core::fmt::Debug for StreamData {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("StreamData")
            .field("buffer", &self.buffer)
            .field("len", &self.len)
            .finish()
    }
}

fn run(shared: &Arc<Shared>) {
    let mut request: Option<LoadRequest> = None;
    // reserve a buffer for the first read up front
    let mut buffer = shared.claim();

    while !shared.quit.load(Ordering::Acquire) {
        if request.is_none() {
            request = shared.load_list.lock().pop();
        }
        if buffer.is_none() {
            buffer = shared.claim();
        }

        if request.is_none() || buffer.is_none() {
            // nothing to do until a request arrives or a guard drops
            shared.sem.wait();
            continue;
        }
        let req = request.take().unwrap();
        let buf = buffer.unwrap();
        let mut data = shared.buffers[buf].data.lock();
        let outcome = req.pack.read(req.file as usize, &mut data);
        drop(data);

        let result = match outcome {
            Ok(len) => {
                // buffer ownership transfers to the client
                buffer = None;
                Ok(StreamData {
                    shared: shared.clone(),
                    buffer: buf,
                    len,
                })
            }
            // the read failed; keep the buffer for the next request
            Err(err) => Err(StreamError::Io(err)),
        };
        shared.completed.lock().push(Completion {
            callback: req.callback,
            result,
        });
    }

    // return the buffer reserved for the next read
    if let Some(buf) = buffer {
        shared.buffers[buf].locked.store(false, Ordering::Release);
    }
    // flush everything left in flight so a final update reports it
    let mut aborted = 0;
    while let Some(req) = request.take().or_else(|| shared.load_list.lock().pop()) {
        shared.completed.lock().push(Completion {
            callback: req.callback,
            result: Err(StreamError::Aborted),
        });
        aborted += 1;
    }
    if aborted > 0 {
        debug!(count = aborted, "stream aborted requests at shutdown");
    }
}

/// Handle to a streaming loader instance.
pub struct Stream {
    shared: Arc<Shared>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Stream {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            load_list: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
            buffers: [
                StreamBuffer {
                    locked: AtomicBool::new(false),
                    data: Mutex::new(Vec::new()),
                },
                StreamBuffer {
                    locked: AtomicBool::new(false),
                    data: Mutex::new(Vec::new()),
                },
            ],
            sem: Semaphore::new(),
            quit: AtomicBool::new(false),
        });
        let thread = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("loadstone-stream".into())
                .spawn(move || run(&shared))
                .expect("failed to spawn stream thread")
        };
        Self {
            shared,
            thread: Mutex::new(Some(thread)),
        }
    }

    /// Pushes a read of `pack`'s entry `file` onto the load stack.
    ///
    /// Pending requests are served most-recent-first. The callback fires
    /// from a later [`update`](Self::update) call with either the loaded
    /// bytes or the error. After [`stop`](Self::stop), unserviced requests
    /// report [`StreamError::Aborted`].
    pub fn load(
        &self,
        pack: &Arc<Pack>,
        file: u32,
        callback: impl FnOnce(Result<StreamData, StreamError>) + Send + 'static,
    ) {
        self.shared.load_list.lock().push(LoadRequest {
            pack: pack.clone(),
            file,
            callback: Box::new(callback),
        });
        self.shared.sem.post();
    }

    /// Delivers completed loads to their callbacks on the calling thread.
    ///
    /// The completion stack is stolen in one take and delivered top-down,
    /// most recent completion first; completions that land while the
    /// callbacks run wait for the next call.
    pub fn update(&self) {
        let mut batch = core::mem::take(&mut *self.shared.completed.lock());
        while let Some(completion) = batch.pop() {
            (completion.callback)(completion.result);
        }
    }

    /// Stops the I/O thread. The in-flight read completes; everything else
    /// is drained as [`StreamError::Aborted`] for the next
    /// [`update`](Self::update).
    pub fn stop(&self) {
        self.shared.quit.store(true, Ordering::Release);
        self.shared.sem.post();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.stop();
        // report aborted requests rather than dropping their callbacks
        self.update();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::init_tracing;
    use loadstone_core::key::{FileKey, TypeKey};
    use std::time::{Duration, Instant};

    fn fixture_pack(files: &[(&str, &[u8])]) -> (tempfile::TempDir, Arc<Pack>) {
        let dir = tempfile::tempdir().unwrap();
        for (name, contents) in files {
            std::fs::write(dir.path().join(name), contents).unwrap();
        }
        let pack = Arc::new(Pack::scan("fixtures", dir.path()).unwrap());
        (dir, pack)
    }

    fn pump(stream: &Stream, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "stream made no progress");
            stream.update();
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn load_delivers_bytes() {
        init_tracing();
        let (_dir, pack) = fixture_pack(&[("logo.tga", b"pixels")]);
        let file = pack.find(TypeKey::new("tga"), FileKey::new("logo")).unwrap();

        let stream = Stream::new();
        let result = Arc::new(Mutex::new(None));
        {
            let result = result.clone();
            stream.load(&pack, file as u32, move |data| {
                *result.lock() = Some(data);
            });
        }
        pump(&stream, || result.lock().is_some());

        let data = result.lock().take().unwrap().unwrap();
        assert_eq!(data.len(), 6);
        assert_eq!(&*data.bytes(), b"pixels");
        drop(data);
        stream.stop();
    }

    #[test]
    fn open_failure_reports_an_error() {
        init_tracing();
        let (dir, pack) = fixture_pack(&[("logo.tga", b"pixels")]);
        let file = pack.find(TypeKey::new("tga"), FileKey::new("logo")).unwrap();
        std::fs::remove_file(dir.path().join("logo.tga")).unwrap();

        let stream = Stream::new();
        let result = Arc::new(Mutex::new(None));
        {
            let result = result.clone();
            stream.load(&pack, file as u32, move |data| {
                *result.lock() = Some(data);
            });
        }
        pump(&stream, || result.lock().is_some());

        let err = result.lock().take().unwrap().unwrap_err();
        assert!(matches!(err, StreamError::Io(_)));
    }

    #[test]
    fn both_buffers_pinned_stalls_the_third_read() {
        init_tracing();
        let (_dir, pack) = fixture_pack(&[("a.bin", b"aa"), ("b.bin", b"bb"), ("c.bin", b"cc")]);
        let order: Vec<u32> = ["a", "b", "c"]
            .iter()
            .map(|name| {
                pack.find(TypeKey::new("bin"), FileKey::new(name)).unwrap() as u32
            })
            .collect();

        let stream = Stream::new();
        let results = Arc::new(Mutex::new(Vec::new()));
        for file in &order {
            let results = results.clone();
            stream.load(&pack, *file, move |data| {
                results.lock().push(data);
            });
        }

        // the first two loads complete and pin both buffers
        pump(&stream, || results.lock().len() == 2);
        thread::sleep(Duration::from_millis(100));
        stream.update();
        assert_eq!(results.lock().len(), 2);

        // releasing one buffer unblocks the third read
        let released = results.lock().remove(0);
        drop(released);
        pump(&stream, || results.lock().len() == 2);
        assert!(results.lock().iter().all(|r| r.is_ok()));
        stream.stop();
    }

    #[test]
    fn queued_requests_dispatch_most_recent_first() {
        init_tracing();
        let (_dir, pack) = fixture_pack(&[
            ("a.bin", b"aa"),
            ("b.bin", b"bb"),
            ("x.bin", b"xx"),
            ("y.bin", b"yy"),
            ("z.bin", b"zz"),
        ]);
        let idx =
            |name: &str| pack.find(TypeKey::new("bin"), FileKey::new(name)).unwrap() as u32;

        let stream = Stream::new();
        let held = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b"] {
            let held = held.clone();
            stream.load(&pack, idx(name), move |data| {
                held.lock().push(data.unwrap());
            });
        }
        // pin both buffers; everything submitted from here stays pending
        pump(&stream, || held.lock().len() == 2);

        let arrived: Arc<Mutex<Vec<(&str, StreamData)>>> = Arc::new(Mutex::new(Vec::new()));
        let submit = |name: &'static str| {
            let arrived = arrived.clone();
            stream.load(&pack, idx(name), move |data| {
                arrived.lock().push((name, data.unwrap()));
            });
        };
        submit("x");
        // let the thread take `x` in hand (it pops a request even while no
        // buffer is free) so the later submissions stack up behind it
        thread::sleep(Duration::from_millis(100));
        submit("y");
        submit("z");

        // each released buffer unblocks exactly one read: the in-hand
        // request first, then the stack top-down
        drop(held.lock().pop().unwrap());
        pump(&stream, || arrived.lock().len() == 1);
        drop(held.lock().pop().unwrap());
        pump(&stream, || arrived.lock().len() == 2);
        let first = arrived.lock().remove(0);
        assert_eq!(first.0, "x");
        drop(first);
        pump(&stream, || arrived.lock().len() == 2);

        let order: Vec<&str> = arrived.lock().iter().map(|(name, _)| *name).collect();
        assert_eq!(order, ["z", "y"]);
        stream.stop();
    }

    #[test]
    fn update_delivers_a_batch_most_recent_completion_first() {
        init_tracing();
        let (_dir, pack) = fixture_pack(&[
            ("a.bin", b"aa"),
            ("b.bin", b"bb"),
            ("x.bin", b"xx"),
            ("y.bin", b"yy"),
        ]);
        let idx =
            |name: &str| pack.find(TypeKey::new("bin"), FileKey::new(name)).unwrap() as u32;

        let stream = Stream::new();
        let held = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b"] {
            let held = held.clone();
            stream.load(&pack, idx(name), move |data| {
                held.lock().push(data.unwrap());
            });
        }
        pump(&stream, || held.lock().len() == 2);

        let delivered = Arc::new(Mutex::new(Vec::new()));
        let submit = |name: &'static str| {
            let delivered = delivered.clone();
            stream.load(&pack, idx(name), move |data| {
                delivered.lock().push((name, data.unwrap()));
            });
        };
        // complete x, then y, without draining in between; the sleeps give
        // each tiny read ample time to land on the completion stack
        submit("x");
        drop(held.lock().pop().unwrap());
        thread::sleep(Duration::from_millis(200));
        submit("y");
        drop(held.lock().pop().unwrap());
        thread::sleep(Duration::from_millis(200));

        // one update steals both completions and delivers the stack
        // top-down: the most recent completion comes back first
        stream.update();
        let order: Vec<&str> = delivered.lock().iter().map(|(name, _)| *name).collect();
        assert_eq!(order, ["y", "x"]);
        stream.stop();
    }

    #[test]
    fn stop_drains_unserviced_requests_as_aborted() {
        init_tracing();
        let (_dir, pack) = fixture_pack(&[("a.bin", b"aa"), ("b.bin", b"bb"), ("c.bin", b"cc")]);
        let order: Vec<u32> = ["a", "b", "c"]
            .iter()
            .map(|name| {
                pack.find(TypeKey::new("bin"), FileKey::new(name)).unwrap() as u32
            })
            .collect();

        let stream = Stream::new();
        let guards = Arc::new(Mutex::new(Vec::new()));
        for file in &order[..2] {
            let guards = guards.clone();
            stream.load(&pack, *file, move |data| {
                guards.lock().push(data.unwrap());
            });
        }
        // hold both buffers so the third request can never be serviced
        pump(&stream, || guards.lock().len() == 2);

        let aborted = Arc::new(Mutex::new(None));
        {
            let aborted = aborted.clone();
            stream.load(&pack, order[2], move |data| {
                *aborted.lock() = Some(data);
            });
        }
        stream.stop();
        stream.update();

        assert!(matches!(
            aborted.lock().take().unwrap(),
            Err(StreamError::Aborted)
        ));
    }
}
