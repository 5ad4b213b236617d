// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Core data structures for the loadstone asset pipeline.
//!
//! This crate holds the passive pieces: asset keys, the file/group model,
//! the sorted asset registry, the fixed-slot cache, and the small
//! synchronization primitives the threaded crates build on. Nothing in
//! here spawns a thread or touches the filesystem.

pub mod cache;
pub mod group;
pub mod key;
pub mod registry;
pub mod state;
pub mod sync;
pub mod workqueue;
