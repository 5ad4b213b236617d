// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! FIFO work queue shared between the storage thread and a worker pool.
//!
//! The pipeline only produces into this queue; consuming it is the client's
//! job (typically a small pool of worker threads looping on [`pop`]). The
//! queue is unbounded — backpressure comes from the storage manager's fixed
//! set of I/O buffers, not from here.
//!
//! [`pop`]: WorkQueue::pop

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::Arc;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone)]
pub struct WorkQueue(Arc<Shared>);

struct Shared {
    sender: Mutex<Option<Sender<Job>>>,
    receiver: Receiver<Job>,
}

impl WorkQueue {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self(Arc::new(Shared {
            sender: Mutex::new(Some(sender)),
            receiver,
        }))
    }

    /// Enqueues a job. Jobs pushed after [`close`](Self::close) are dropped.
    #[inline]
    pub fn push<F: FnOnce() + Send + 'static>(&self, job: F) {
        if let Some(sender) = self.0.sender.lock().as_ref() {
            let _ = sender.send(Box::new(job));
        }
    }

    /// Blocks until a job is available. Returns `None` once the queue has
    /// been closed and drained.
    #[inline]
    pub fn pop(&self) -> Option<Job> {
        self.0.receiver.recv().ok()
    }

    /// Returns a job if one is immediately available.
    #[inline]
    pub fn try_pop(&self) -> Option<Job> {
        match self.0.receiver.try_recv() {
            Ok(job) => Some(job),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Aborts the queue: wakes every blocked [`pop`](Self::pop) once the
    /// remaining jobs drain.
    pub fn close(&self) {
        self.0.sender.lock().take();
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}
