// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Asset load-state machine.
//!
//! ```text
//! Unloaded ──▶ Loading ──▶ Loaded
//!                  │
//!                  └─────▶ Error
//! ```
//!
//! `Loaded` and `Error` are terminal for the lifetime of a cache slot
//! assignment; a slot reassignment resets the state to `Loading` for the new
//! key.

use core::sync::atomic::{AtomicU8, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AssetState {
    Unloaded = 0,
    Loading = 1,
    Loaded = 2,
    Error = 3,
}

impl AssetState {
    /// Returns `true` once the load has finished, successfully or not.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Loaded | Self::Error)
    }

    #[inline]
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unloaded,
            1 => Self::Loading,
            2 => Self::Loaded,
            _ => Self::Error,
        }
    }
}

/// Cross-thread cell for [`AssetState`].
///
/// Stores use `Release` and loads use `Acquire`: a worker that publishes a
/// decoded resource and then stores `Loaded` guarantees that any thread
/// observing `Loaded` also observes the resource.
#[derive(Debug)]
pub struct AtomicState(AtomicU8);

impl AtomicState {
    #[inline]
    pub fn new(state: AssetState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn load(&self) -> AssetState {
        AssetState::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, state: AssetState) {
        self.0.store(state as u8, Ordering::Release);
    }
}
