// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Sorted map from asset keys to file metadata.
//!
//! The registry is two parallel arrays (keys and values) kept in strictly
//! ascending key order, which makes lookup a binary search and registration
//! a bulk gap insertion. Registration is a startup-time operation: callers
//! serialize [`register_group`](Registry::register_group) against
//! [`find`](Registry::find), and indices returned by `find` are stable only
//! until the next registration.

use crate::{
    group::{FileInfo, StorageGroup},
    key::{AssetKey, TypeKey},
};
use std::sync::Arc;

// capacity grows in multiples of 16 entries
const CAPACITY_ALIGN: usize = 16;

#[inline]
fn round_up_capacity(capacity: usize) -> usize {
    (capacity + (CAPACITY_ALIGN - 1)) & !(CAPACITY_ALIGN - 1)
}

/// Resolved registry value: the owning group and the file's index within it.
#[derive(Clone)]
pub struct MapEntry {
    pub group: Arc<dyn StorageGroup>,
    pub file: u32,
}

impl MapEntry {
    /// The file metadata this entry resolves to.
    #[inline]
    pub fn file_info(&self) -> &FileInfo {
        &self.group.files()[self.file as usize]
    }
}

impl core::fmt::Debug for MapEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("MapEntry")
            .field("group", &self.group.name())
            .field("file", &self.file)
            .finish()
    }
}

pub struct Registry {
    keys: Vec<AssetKey>,
    entries: Vec<MapEntry>,
    initial_capacity: usize,
}

impl Registry {
    /// Creates a registry sized for `capacity` entries.
    ///
    /// The capacity is a soft limit: registrations beyond it reallocate and
    /// log a warning, so a correctly sized capacity keeps startup
    /// allocation-stable.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = round_up_capacity(capacity);
        Self {
            keys: Vec::with_capacity(capacity),
            entries: Vec::with_capacity(capacity),
            initial_capacity: capacity,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Binary search for `key`. The returned index is stable until the next
    /// [`register_group`](Self::register_group).
    #[inline]
    pub fn find(&self, key: AssetKey) -> Option<usize> {
        let idx = self.keys.partition_point(|k| *k < key);
        (idx < self.keys.len() && self.keys[idx] == key).then_some(idx)
    }

    #[inline]
    pub fn key(&self, idx: usize) -> AssetKey {
        self.keys[idx]
    }

    #[inline]
    pub fn entry(&self, idx: usize) -> &MapEntry {
        &self.entries[idx]
    }

    /// Bulk-inserts every file in `group` whose type matches `type_key`.
    ///
    /// Two phases: count the matching files, then open a gap at the group's
    /// sorted position and insert them in ascending (group, file) order,
    /// leaving the whole array strictly ascending. Each group may be
    /// registered at most once per registry.
    ///
    /// Not concurrent with [`find`](Self::find); callers register at startup
    /// while the owning adapter is quiescent.
    pub fn register_group(&mut self, group: Arc<dyn StorageGroup>, type_key: TypeKey) {
        let group_key = group.group_key();
        debug_assert!(
            !self.keys.iter().any(|k| k.group == group_key),
            "group {:?} is already registered",
            group.name(),
        );

        // phase 1: count the matching files
        let mut added: Vec<(AssetKey, u32)> = group
            .files()
            .iter()
            .enumerate()
            .filter(|(_, file)| file.type_key == type_key)
            .map(|(idx, file)| (AssetKey::from_parts(group_key, file.file_key), idx as u32))
            .collect();
        if added.is_empty() {
            return;
        }
        added.sort_unstable_by_key(|(key, _)| *key);

        // phase 2: grow, then splice the sorted block into the gap
        self.ensure_capacity(self.keys.len() + added.len());
        let gap = self.keys.partition_point(|k| k.group < group_key);
        self.keys
            .splice(gap..gap, added.iter().map(|(key, _)| *key));
        self.entries.splice(
            gap..gap,
            added.iter().map(|(_, file)| MapEntry {
                group: group.clone(),
                file: *file,
            }),
        );

        debug_assert!(
            self.keys.windows(2).all(|w| w[0] < w[1]),
            "registry keys must be strictly ascending; colliding hashes?"
        );
    }

    fn ensure_capacity(&mut self, len: usize) {
        if len <= self.keys.capacity() {
            return;
        }
        let target = round_up_capacity(len);
        if target > self.initial_capacity {
            tracing::warn!(
                capacity = self.initial_capacity,
                required = len,
                "registry grew past its initial capacity"
            );
        }
        self.keys.reserve_exact(target - self.keys.len());
        self.entries.reserve_exact(target - self.entries.len());
    }
}

impl core::fmt::Debug for Registry {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Registry")
            .field("len", &self.len())
            .field("capacity", &self.keys.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        group::{FileHandle, FileRequest},
        key::{FileKey, GroupKey},
    };
    use bolero::{check, TypeGenerator};
    use std::collections::BTreeMap;

    struct TestGroup {
        name: String,
        key: GroupKey,
        files: Vec<FileInfo>,
    }

    impl TestGroup {
        fn new(name: &str, files: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                key: GroupKey::new(name),
                files: files
                    .iter()
                    .map(|(file, ext)| FileInfo {
                        name: format!("{file}.{ext}"),
                        type_key: TypeKey::new(ext),
                        file_key: FileKey::new(file),
                        size: 0,
                        handle: FileHandle::Offset(0),
                    })
                    .collect(),
            })
        }
    }

    impl StorageGroup for TestGroup {
        fn name(&self) -> &str {
            &self.name
        }

        fn group_key(&self) -> GroupKey {
            self.key
        }

        fn files(&self) -> &[FileInfo] {
            &self.files
        }

        fn load(&self, _requests: Vec<FileRequest>) {
            unimplemented!("registry tests never load")
        }
    }

    #[test]
    fn registered_files_resolve_and_others_miss() {
        let mut registry = Registry::with_capacity(8);
        let group = TestGroup::new(
            "ui",
            &[("logo", "tga"), ("click", "wav"), ("icon", "tga")],
        );
        registry.register_group(group.clone(), TypeKey::new("tga"));

        for file in ["logo", "icon"] {
            let idx = registry.find(AssetKey::new("ui", file)).unwrap();
            let entry = registry.entry(idx);
            assert_eq!(entry.file_info().file_key, FileKey::new(file));
            assert_eq!(entry.group.group_key(), group.group_key());
            assert_eq!(entry.file_info().type_key, TypeKey::new("tga"));
        }
        // type filter excludes the wav
        assert!(registry.find(AssetKey::new("ui", "click")).is_none());
        assert!(registry.find(AssetKey::new("world", "logo")).is_none());
    }

    #[test]
    fn keys_stay_sorted_across_groups() {
        let mut registry = Registry::with_capacity(4);
        for name in ["zebra", "alpha", "mango"] {
            let group = TestGroup::new(name, &[("b", "tga"), ("a", "tga"), ("c", "tga")]);
            registry.register_group(group, TypeKey::new("tga"));
        }
        assert_eq!(registry.len(), 9);
        for i in 1..registry.len() {
            assert!(registry.key(i - 1) < registry.key(i));
        }
    }

    #[test]
    fn growth_past_initial_capacity() {
        let mut registry = Registry::with_capacity(0);
        // rounded capacity is 0, so any registration reallocates
        let files: Vec<(String, &str)> = (0..20).map(|i| (format!("file{i}"), "tga")).collect();
        let refs: Vec<(&str, &str)> = files.iter().map(|(f, e)| (f.as_str(), *e)).collect();
        registry.register_group(TestGroup::new("big", &refs), TypeKey::new("tga"));
        assert_eq!(registry.len(), 20);
        assert!(registry.find(AssetKey::new("big", "file7")).is_some());
    }

    #[test]
    fn empty_match_is_a_noop() {
        let mut registry = Registry::with_capacity(4);
        let group = TestGroup::new("ui", &[("click", "wav")]);
        registry.register_group(group, TypeKey::new("tga"));
        assert!(registry.is_empty());
    }

    #[derive(TypeGenerator, Debug)]
    struct GroupSpec {
        name_seed: u8,
        files: Vec<(u8, bool)>,
    }

    #[test]
    fn model_against_btreemap() {
        let type_key = TypeKey::new("tga");
        check!().with_type::<Vec<GroupSpec>>().for_each(|specs| {
            let mut registry = Registry::with_capacity(16);
            let mut oracle = BTreeMap::new();
            let mut seen = Vec::new();

            for spec in specs {
                let name = format!("group{}", spec.name_seed);
                if seen.contains(&name) {
                    continue;
                }
                seen.push(name.clone());

                let files: Vec<(String, &str)> = spec
                    .files
                    .iter()
                    .enumerate()
                    .map(|(i, (seed, matching))| {
                        // unique basename per (seed, index) to avoid collisions
                        let ext = if *matching { "tga" } else { "wav" };
                        (format!("file{seed}x{i}"), ext)
                    })
                    .collect();
                let refs: Vec<(&str, &str)> =
                    files.iter().map(|(f, e)| (f.as_str(), *e)).collect();
                let group = TestGroup::new(&name, &refs);

                registry.register_group(group.clone(), type_key);
                for (file, ext) in &files {
                    if *ext == "tga" {
                        oracle.insert(AssetKey::new(&name, file), name.clone());
                    }
                }
            }

            assert_eq!(registry.len(), oracle.len());
            for (key, group_name) in &oracle {
                let idx = registry.find(*key).expect("registered key must resolve");
                assert_eq!(registry.key(idx), *key);
                assert_eq!(registry.entry(idx).group.name(), group_name);
            }
        });
    }
}
