// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use loadstone_core::workqueue::WorkQueue;
use std::thread;

pub fn init_tracing() {
    use std::sync::Once;

    static TRACING: Once = Once::new();

    // make sure this only gets initialized once
    TRACING.call_once(|| {
        let format = tracing_subscriber::fmt::format().compact();

        let env_filter = tracing_subscriber::EnvFilter::builder()
            .with_default_directive(tracing::Level::DEBUG.into())
            .with_env_var("LOADSTONE_LOG")
            .from_env()
            .unwrap();

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .event_format(format)
            .with_test_writer()
            .init();
    });
}

/// A worker pool draining a [`WorkQueue`], standing in for the host
/// application's job system. Dropping the pool closes the queue and joins
/// the workers.
pub struct WorkerPool {
    queue: WorkQueue,
    threads: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(queue: &WorkQueue, workers: usize) -> Self {
        let threads = (0..workers)
            .map(|i| {
                let queue = queue.clone();
                thread::Builder::new()
                    .name(format!("loadstone-worker-{i}"))
                    .spawn(move || {
                        while let Some(job) = queue.pop() {
                            job();
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Self {
            queue: queue.clone(),
            threads,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.queue.close();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}
