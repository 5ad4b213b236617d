// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Asynchronous asset pipeline for interactive real-time applications.
//!
//! The pipeline sits between persistent storage (loose files, packed
//! archives) and in-memory client data. Clients address assets by a stable
//! two-part key and receive a handle whose backing bytes are read on a
//! dedicated storage thread, decoded on a worker pool, and held in a
//! fixed-size cache that reclaims unused entries under pressure.
//!
//! The building blocks compose bottom-up:
//!
//! - [`storage`] — the scheduler that serializes reads per storage group
//!   onto one I/O thread and dispatches parsing to a work queue.
//! - [`dir`] — directory-backed storage groups with a reusable buffer pool.
//! - [`pack`] + [`stream`] — file tables over loose/packed sources and the
//!   stack-based streaming loader with explicit completion callbacks.
//! - [`client`] — the per-asset-type adapter tying registry, cache, storage,
//!   and reference counting into one acquire/poll interface.
//! - [`image`] — a TGA asset type, the canonical adapter instantiation.

pub mod client;
pub mod dir;
pub mod image;
pub mod pack;
pub mod storage;
pub mod stream;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use loadstone_core::{
    key::{AssetKey, FileKey, GroupKey, TypeKey},
    state::AssetState,
    workqueue::WorkQueue,
};
