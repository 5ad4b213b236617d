// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Fixed-slot asset cache.
//!
//! The cache manages the assignment of a fixed number of reusable asset
//! containers. It knows nothing about the payloads it hands out or the keys
//! they are associated with; owners pair it with a registry and do their own
//! bookkeeping.
//!
//! Unpinned slots sit on a free list in release order: [`pin`](SlotCache::pin)
//! reclaims the least-recently released slot, [`unpin`](SlotCache::unpin)
//! pushes to the tail, so a slot enjoys a full trip through the list before
//! it can be reassigned. [`repin`](SlotCache::repin) lets an owner take back
//! a slot it released, provided nothing else pinned it in the meantime.

/// Link index marking a slot that is pinned (not on the free list).
const DETACHED: u32 = u32::MAX;

#[derive(Clone, Copy, Debug)]
struct Link {
    prev: u32,
    next: u32,
}

/// Fixed-size cache of reusable slots with an index-linked free list.
///
/// The free list is a doubly linked circular list threaded through a
/// sentinel at index `N`; membership in the list is what distinguishes a
/// free slot from a pinned one.
#[derive(Debug)]
pub struct SlotCache<T> {
    entries: Vec<Option<T>>,
    links: Vec<Link>,
}

impl<T: Clone> SlotCache<T> {
    /// Creates a cache with `size` slots, all initially free in index order.
    pub fn new(size: usize) -> Self {
        assert!(size < DETACHED as usize, "cache size out of range");
        let anchor = size as u32;
        let mut cache = Self {
            entries: vec![None; size],
            links: vec![Link { prev: DETACHED, next: DETACHED }; size + 1],
        };
        cache.links[size] = Link { prev: anchor, next: anchor };
        for slot in 0..anchor {
            cache.attach_tail(slot);
        }
        cache
    }

    /// Number of slots managed by the cache.
    #[inline]
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Pins the least-recently released free slot.
    ///
    /// Returns the slot index and the payload last associated with it (which
    /// is `None` until [`set_entry`](Self::set_entry) is called for the
    /// slot), or `None` when every slot is pinned.
    #[inline]
    pub fn pin(&mut self) -> Option<(usize, Option<T>)> {
        let anchor = self.anchor();
        let head = self.links[anchor as usize].next;
        if head == anchor {
            return None;
        }
        self.detach(head);
        Some((head as usize, self.entries[head as usize].clone()))
    }

    /// Attempts to reclaim a previously released slot.
    ///
    /// Succeeds iff the slot is still on the free list — i.e. no other
    /// consumer pinned it since the owner unpinned it. On success the slot is
    /// pinned again and its associated payload is returned.
    #[inline]
    pub fn repin(&mut self, slot: usize) -> Option<Option<T>> {
        assert!(slot < self.size(), "slot index out of range");
        if self.links[slot].next == DETACHED {
            return None;
        }
        self.detach(slot as u32);
        Some(self.entries[slot].clone())
    }

    /// Releases a pinned slot to the tail of the free list.
    ///
    /// Callers guarantee balanced pin/unpin; releasing a slot that is
    /// already free is a caller bug.
    #[inline]
    pub fn unpin(&mut self, slot: usize) {
        assert!(slot < self.size(), "slot index out of range");
        debug_assert!(self.links[slot].next == DETACHED, "slot is already free");
        self.attach_tail(slot as u32);
    }

    /// Associates a payload with a slot.
    ///
    /// The association persists across free/repin cycles until overwritten;
    /// it is reported by every subsequent [`pin`](Self::pin) or
    /// [`repin`](Self::repin) that yields the slot.
    #[inline]
    pub fn set_entry(&mut self, slot: usize, payload: T) {
        assert!(slot < self.size(), "slot index out of range");
        self.entries[slot] = Some(payload);
    }

    #[inline]
    fn anchor(&self) -> u32 {
        self.entries.len() as u32
    }

    fn detach(&mut self, slot: u32) {
        let Link { prev, next } = self.links[slot as usize];
        self.links[prev as usize].next = next;
        self.links[next as usize].prev = prev;
        self.links[slot as usize] = Link {
            prev: DETACHED,
            next: DETACHED,
        };
    }

    fn attach_tail(&mut self, slot: u32) {
        let anchor = self.anchor();
        let tail = self.links[anchor as usize].prev;
        self.links[slot as usize] = Link { prev: tail, next: anchor };
        self.links[tail as usize].next = slot;
        self.links[anchor as usize].prev = slot;
    }
}
