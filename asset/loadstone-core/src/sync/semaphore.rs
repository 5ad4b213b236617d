// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Counting semaphore for producer/consumer sleep-wake.

use parking_lot::{Condvar, Mutex};

/// A minimal counting semaphore.
///
/// Producers [`post`](Self::post) to hand out a permit; consumers
/// [`wait`](Self::wait) to take one, sleeping while none are available. The
/// pipeline uses these purely as wakeup signals, so spurious extra permits
/// are harmless — every waiter re-checks its own work condition after waking.
#[derive(Debug, Default)]
pub struct Semaphore {
    permits: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases one permit, waking a single waiter if any are blocked.
    #[inline]
    pub fn post(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        drop(permits);
        self.cond.notify_one();
    }

    /// Blocks until a permit is available and takes it.
    #[inline]
    pub fn wait(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.cond.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Takes a permit if one is immediately available.
    #[inline]
    pub fn try_wait(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }
}
