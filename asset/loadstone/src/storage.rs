// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The storage scheduler: one dedicated I/O thread per storage instance.
//!
//! Requests are grouped by storage group under a lock, so a burst of
//! requests against one archive or directory is handed to that group's load
//! callback as a single batch. The I/O thread prefers the group it serviced
//! last (affinity), which lets a stream of same-group requests be serviced
//! together without other groups starving — their nodes stay queued and are
//! selected once the affinity chain runs dry.
//!
//! Bookkeeping records are drawn from fixed pools sized at construction;
//! when a pool runs out the scheduler falls back to overflow records, which
//! are tagged explicitly and released on consumption.

use loadstone_core::{
    group::{FileRequest, ParseJob, StorageGroup},
    sync::Semaphore,
    workqueue::WorkQueue,
};
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};
use tracing::{debug, warn};

/// Discriminates pool-backed records from heap overflow records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Origin {
    Pool,
    Overflow,
}

struct Request {
    inner: FileRequest,
    origin: Origin,
}

/// One pending batch: every queued request for a single group.
struct Node {
    group: Arc<dyn StorageGroup>,
    requests: Vec<Request>,
    origin: Origin,
}

struct Pending {
    /// Head-first list of groups awaiting service; new groups push at the
    /// head.
    nodes: VecDeque<Node>,
    node_credits: usize,
    request_credits: usize,
}

impl Pending {
    fn take_request_credit(&mut self) -> Origin {
        if self.request_credits > 0 {
            self.request_credits -= 1;
            Origin::Pool
        } else {
            warn!("storage request pool empty, allocating overflow record");
            Origin::Overflow
        }
    }

    fn take_node_credit(&mut self) -> Origin {
        if self.node_credits > 0 {
            self.node_credits -= 1;
            Origin::Pool
        } else {
            warn!("storage node pool empty, allocating overflow record");
            Origin::Overflow
        }
    }
}

struct Shared {
    pending: Mutex<Pending>,
    sem: Semaphore,
    quit: AtomicBool,
}

// group identity is the allocation, not the contents
#[inline]
fn same_group(a: &Arc<dyn StorageGroup>, b: &Arc<dyn StorageGroup>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl Shared {
    /// Detaches the next batch to service: the node matching the previously
    /// serviced group if one exists, otherwise the head node.
    fn select(&self, last: Option<&Arc<dyn StorageGroup>>) -> Option<Node> {
        let mut pending = self.pending.lock();
        let idx = last
            .and_then(|group| {
                pending
                    .nodes
                    .iter()
                    .position(|node| same_group(&node.group, group))
            })
            .unwrap_or(0);
        pending.nodes.remove(idx)
    }
}

fn run(shared: &Shared) {
    let mut last: Option<Arc<dyn StorageGroup>> = None;
    loop {
        // drain every queued batch before going back to sleep
        while !shared.quit.load(Ordering::Acquire) {
            let Some(node) = shared.select(last.as_ref()) else {
                break;
            };
            let Node {
                group,
                requests,
                origin,
            } = node;

            let mut pooled = 0;
            let mut overflow = 0;
            let batch: Vec<FileRequest> = requests
                .into_iter()
                .map(|request| {
                    match request.origin {
                        Origin::Pool => pooled += 1,
                        Origin::Overflow => overflow += 1,
                    }
                    request.inner
                })
                .collect();

            // the lock MUST be released here: the callback blocks on file
            // I/O and on buffer availability. Requests arriving for the same
            // group in this window queue a fresh node, which the affinity
            // rule selects next.
            group.load(batch);

            let mut pending = shared.pending.lock();
            pending.request_credits += pooled;
            if origin == Origin::Pool {
                pending.node_credits += 1;
            }
            drop(pending);
            if origin == Origin::Overflow {
                debug!("storage freed overflow node record");
            }
            if overflow > 0 {
                debug!(count = overflow, "storage freed overflow file requests");
            }

            last = Some(group);
            thread::yield_now();
        }
        if shared.quit.load(Ordering::Acquire) {
            break;
        }
        shared.sem.wait();
    }
}

/// Handle to a storage scheduler instance.
///
/// `storage_capacity` bounds the pooled per-group nodes (the number of
/// distinct groups that can be pending without overflow records);
/// `req_capacity` bounds the pooled file-request records. Both pools may be
/// zero — every record then overflows, with a diagnostic per allocation.
pub struct Storage {
    shared: Arc<Shared>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Storage {
    pub fn new(storage_capacity: usize, req_capacity: usize) -> Self {
        let shared = Arc::new(Shared {
            pending: Mutex::new(Pending {
                nodes: VecDeque::with_capacity(storage_capacity),
                node_credits: storage_capacity,
                request_credits: req_capacity,
            }),
            sem: Semaphore::new(),
            quit: AtomicBool::new(false),
        });
        let thread = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("loadstone-storage".into())
                .spawn(move || run(&shared))
                .expect("failed to spawn storage thread")
        };
        Self {
            shared,
            thread: Mutex::new(Some(thread)),
        }
    }

    /// Queues `file` of `group` for loading.
    ///
    /// The group's load callback eventually runs on the I/O thread, reads
    /// the file, and pushes `parse` onto `queue`; the job observes an empty
    /// buffer when the read fails. `parse` runs exactly once unless the
    /// scheduler is stopped before the request is dequeued.
    pub fn request_file(
        &self,
        group: &Arc<dyn StorageGroup>,
        file: u32,
        queue: &WorkQueue,
        parse: Box<dyn ParseJob>,
    ) {
        let mut pending = self.shared.pending.lock();
        let origin = pending.take_request_credit();
        let request = Request {
            inner: FileRequest {
                file,
                queue: queue.clone(),
                parse,
            },
            origin,
        };
        match pending
            .nodes
            .iter_mut()
            .find(|node| same_group(&node.group, group))
        {
            Some(node) => node.requests.push(request),
            None => {
                let origin = pending.take_node_credit();
                pending.nodes.push_front(Node {
                    group: group.clone(),
                    requests: vec![request],
                    origin,
                });
            }
        }
        drop(pending);
        self.shared.sem.post();
    }

    /// Stops the I/O thread and joins it.
    ///
    /// The in-flight batch (if any) completes; queued-but-unstarted requests
    /// are dropped without their parse jobs being invoked.
    pub fn stop(&self) {
        self.shared.quit.store(true, Ordering::Release);
        self.shared.sem.post();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        self.stop();
        let pending = self.shared.pending.lock();
        let dropped: usize = pending.nodes.iter().map(|node| node.requests.len()).sum();
        if dropped > 0 {
            debug!(count = dropped, "storage dropped unserviced requests at shutdown");
        }
    }
}
