// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-asset-type client adapter.
//!
//! [`AssetManager`] glues the registry, the slot cache, the storage
//! scheduler, and reference counting into a single acquire/poll interface
//! for one asset type. The cache holds one preallocated asset entry per
//! slot; under pressure the manager falls back to heap "overflow" entries
//! that live only as long as their handles.
//!
//! A cache slot and the registry stay consistent through a pair of weak
//! links: the registry-side binding table points at the entry currently
//! representing each key, and the entry records the key it is bound to.
//! Both sides are checked before either is trusted, because an unpinned
//! slot can be reassigned to another key at any time.

use crate::storage::Storage;
use loadstone_core::{
    cache::SlotCache,
    group::{ParseJob, StorageGroup},
    key::AssetKey,
    registry::Registry,
    state::{AssetState, AtomicState},
    workqueue::WorkQueue,
};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};
use tracing::debug;

/// A decodable asset type.
///
/// The parse hook runs on a worker thread; an empty buffer means the load
/// itself failed and should decode to an error.
pub trait AssetType: 'static {
    type Resource: Send + Sync + 'static;
    type Error: core::fmt::Display + Send + 'static;

    /// Extension filter applied when registering storage groups.
    fn type_key() -> loadstone_core::key::TypeKey;

    fn parse(data: &[u8]) -> Result<Self::Resource, Self::Error>;
}

pub(crate) struct AssetEntry<R> {
    state: AtomicState,
    refs: AtomicU32,
    /// `None` for overflow entries.
    slot: Option<usize>,
    /// The key this entry currently represents; cleared when the slot is
    /// reassigned. Guarded by the manager lock.
    bound: Mutex<Option<AssetKey>>,
    /// Written by the parse worker, read by `poll`. Publication order is
    /// resource first, then state.
    resource: Mutex<Option<Arc<R>>>,
}

impl<R> AssetEntry<R> {
    fn new(slot: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicState::new(AssetState::Unloaded),
            refs: AtomicU32::new(0),
            slot,
            bound: Mutex::new(None),
            resource: Mutex::new(None),
        })
    }
}

struct Inner<T: AssetType> {
    registry: Registry,
    /// Owns the per-slot entries through their slot associations.
    cache: SlotCache<Arc<AssetEntry<T::Resource>>>,
    /// Entry currently bound to each registry index; parallel to the
    /// registry and rebuilt on registration.
    bindings: Vec<Option<Arc<AssetEntry<T::Resource>>>>,
}

struct Managed<T: AssetType> {
    storage: Arc<Storage>,
    queue: WorkQueue,
    inner: Mutex<Inner<T>>,
}

impl<T: AssetType> Managed<T> {
    /// Drops one reference. On the transition to zero the entry is either
    /// returned to the cache's free list (pooled) or unbound and destroyed
    /// (overflow).
    fn release(&self, entry: &Arc<AssetEntry<T::Resource>>) {
        let prev = entry.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev != 0, "asset refcount underflow");
        if prev != 1 {
            return;
        }

        let mut destroy = None;
        let mut inner = self.inner.lock();
        // another thread may have reacquired between the decrement and the
        // lock; only the observer of a still-zero count reclaims
        if entry.refs.load(Ordering::Acquire) == 0 {
            // overflow entries always unbind; pooled entries unbind only on
            // a failed load, so the next acquire of the key retries from
            // scratch instead of repinning the error
            let unbind = entry.slot.is_none() || entry.state.load() == AssetState::Error;
            if unbind {
                if let Some(key) = entry.bound.lock().take() {
                    if let Some(idx) = inner.registry.find(key) {
                        destroy = inner.bindings[idx].take();
                    }
                }
            }
            if let Some(slot) = entry.slot {
                inner.cache.unpin(slot);
            }
        }
        drop(inner);
        // the overflow resource is freed outside the lock
        drop(destroy);
    }
}

/// The parse work item: decodes into the entry, publishes the state, then
/// drops the in-flight-load reference.
struct ParseTask<T: AssetType> {
    managed: Arc<Managed<T>>,
    entry: Arc<AssetEntry<T::Resource>>,
}

impl<T: AssetType> ParseJob for ParseTask<T> {
    fn parse(self: Box<Self>, data: &[u8]) {
        match T::parse(data) {
            Ok(resource) => {
                *self.entry.resource.lock() = Some(Arc::new(resource));
                // state is published after the resource: an acquire that
                // observes Loaded also observes the resource
                self.entry.state.store(AssetState::Loaded);
            }
            Err(err) => {
                debug!(%err, "asset parse failed");
                self.entry.state.store(AssetState::Error);
            }
        }
        self.managed.release(&self.entry);
    }
}

/// Cached, reference-counted access to one asset type.
pub struct AssetManager<T: AssetType> {
    managed: Arc<Managed<T>>,
}

impl<T: AssetType> AssetManager<T> {
    /// Creates a manager with a registry sized for `total_capacity` entries
    /// and `cache_size` resident asset slots.
    pub fn new(
        storage: Arc<Storage>,
        queue: WorkQueue,
        total_capacity: usize,
        cache_size: usize,
    ) -> Self {
        let mut cache = SlotCache::new(cache_size);
        for slot in 0..cache_size {
            cache.set_entry(slot, AssetEntry::new(Some(slot)));
        }
        Self {
            managed: Arc::new(Managed {
                storage,
                queue,
                inner: Mutex::new(Inner {
                    registry: Registry::with_capacity(total_capacity),
                    cache,
                    bindings: Vec::new(),
                }),
            }),
        }
    }

    /// Registers a storage group's matching files.
    ///
    /// Startup-time only: the manager must be quiescent (no loads in
    /// flight), like [`Registry::register_group`] itself.
    pub fn register_group(&self, group: &Arc<dyn StorageGroup>) {
        let mut inner = self.managed.inner.lock();

        // registration shifts registry indices, so rebind by key afterwards
        let bound: Vec<(AssetKey, Arc<AssetEntry<T::Resource>>)> = inner
            .bindings
            .iter()
            .enumerate()
            .filter_map(|(idx, binding)| {
                binding.clone().map(|entry| (inner.registry.key(idx), entry))
            })
            .collect();

        inner.registry.register_group(group.clone(), T::type_key());

        let len = inner.registry.len();
        inner.bindings.clear();
        inner.bindings.resize(len, None);
        for (key, entry) in bound {
            let idx = inner
                .registry
                .find(key)
                .expect("registration never removes keys");
            inner.bindings[idx] = Some(entry);
        }
    }

    /// Looks up `key` and returns a handle to its asset, starting a load if
    /// the key is not resident.
    ///
    /// Returns `None` for unregistered keys. The returned handle may still
    /// be loading; [`AssetHandle::poll`] reports progress.
    pub fn acquire(&self, key: AssetKey) -> Option<AssetHandle<T>> {
        let managed = &self.managed;
        let mut inner = managed.inner.lock();
        let idx = inner.registry.find(key)?;

        // the binding is trusted only if the entry still points back at
        // this key; the slot may have been reassigned since
        if let Some(entry) = inner.bindings[idx].clone() {
            if *entry.bound.lock() == Some(key) {
                if entry.refs.load(Ordering::Acquire) == 0 {
                    if let Some(slot) = entry.slot {
                        // a racing release may sit between its decrement and
                        // the lock, in which case the slot is not on the free
                        // list yet; the release re-checks the count and will
                        // leave the slot pinned for us
                        let _ = inner.cache.repin(slot);
                    }
                }
                entry.refs.fetch_add(1, Ordering::AcqRel);
                drop(inner);
                return Some(AssetHandle {
                    managed: managed.clone(),
                    entry,
                });
            }
        }

        // miss or stale binding: take a slot, or fall back to the heap
        let entry = match inner.cache.pin() {
            Some((slot, payload)) => {
                let entry = payload.expect("cache slots are populated at construction");
                debug_assert_eq!(entry.slot, Some(slot));
                // sever the slot's previous key before reuse
                if let Some(stale) = entry.bound.lock().take() {
                    if let Some(stale_idx) = inner.registry.find(stale) {
                        inner.bindings[stale_idx] = None;
                    }
                }
                *entry.resource.lock() = None;
                entry
            }
            None => {
                debug!("asset cache exhausted, allocating overflow entry");
                AssetEntry::new(None)
            }
        };

        *entry.bound.lock() = Some(key);
        entry.state.store(AssetState::Loading);
        // one reference for the caller, one for the in-flight load
        entry.refs.store(2, Ordering::Release);
        inner.bindings[idx] = Some(entry.clone());
        let map_entry = inner.registry.entry(idx);
        let (group, file) = (map_entry.group.clone(), map_entry.file);
        // the request is submitted outside the lock to avoid stalls
        drop(inner);

        managed.storage.request_file(
            &group,
            file,
            &managed.queue,
            Box::new(ParseTask {
                managed: managed.clone(),
                entry: entry.clone(),
            }),
        );
        Some(AssetHandle {
            managed: managed.clone(),
            entry,
        })
    }
}

/// A reference-counted handle to a (possibly still loading) asset.
///
/// Cloning retains the asset; dropping the last handle lets the cache
/// reclaim its slot (or destroys the entry, if it overflowed the cache).
pub struct AssetHandle<T: AssetType> {
    managed: Arc<Managed<T>>,
    entry: Arc<AssetEntry<T::Resource>>,
}

impl<T: AssetType> AssetHandle<T> {
    /// Non-blocking progress check.
    ///
    /// Yields the decoded resource once the state reaches
    /// [`AssetState::Loaded`]; a failed load parks the state at
    /// [`AssetState::Error`] until the last handle drops.
    pub fn poll(&self) -> (AssetState, Option<Arc<T::Resource>>) {
        let state = self.entry.state.load();
        let resource = if state == AssetState::Loaded {
            self.entry.resource.lock().clone()
        } else {
            None
        };
        (state, resource)
    }

    #[inline]
    pub fn state(&self) -> AssetState {
        self.entry.state.load()
    }

    #[cfg(test)]
    pub(crate) fn ref_count(&self) -> u32 {
        self.entry.refs.load(Ordering::Acquire)
    }
}

impl<T: AssetType> Clone for AssetHandle<T> {
    fn clone(&self) -> Self {
        self.entry.refs.fetch_add(1, Ordering::AcqRel);
        Self {
            managed: self.managed.clone(),
            entry: self.entry.clone(),
        }
    }
}

impl<T: AssetType> Drop for AssetHandle<T> {
    fn drop(&mut self) {
        self.managed.release(&self.entry);
    }
}

impl<T: AssetType> core::fmt::Debug for AssetHandle<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("AssetHandle")
            .field("state", &self.state())
            .field("slot", &self.entry.slot)
            .finish()
    }
}
