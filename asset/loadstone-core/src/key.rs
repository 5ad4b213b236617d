// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Key derivation for asset lookup.
//!
//! Assets are addressed by a 64-bit key composed of two 32-bit halves: the
//! hash of the storage group's name and the hash of the file's basename
//! (without its extension). Type keys hash a file extension and are used to
//! filter registry insertions. All hashing is performed over ASCII-lowercased
//! input, so `Logo.TGA` and `logo.tga` address the same asset.

use core::fmt;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

// FNV-1a over the lowercased bytes. The key contract only requires a
// deterministic 32-bit string hash; collisions are assumed rare and are not
// defended against here.
#[inline]
fn hash_lower(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= byte.to_ascii_lowercase() as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Identifies a storage group (a directory or packed archive) by name.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey(u32);

impl GroupKey {
    /// Hashes a group name. The entire name participates; only case is
    /// canonicalized.
    #[inline]
    pub fn new(name: &str) -> Self {
        Self(hash_lower(name.as_bytes()))
    }

    #[inline]
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// Identifies a file within a group by its basename.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileKey(u32);

impl FileKey {
    /// Hashes a file path. Directory components and the extension are
    /// stripped before hashing: `assets/ui/logo.tga` hashes as `logo`.
    #[inline]
    pub fn new(path: &str) -> Self {
        let base = match path.rfind(['/', '\\']) {
            Some(idx) => &path[idx + 1..],
            None => path,
        };
        let stem = match base.find('.') {
            Some(idx) => &base[..idx],
            None => base,
        };
        Self(hash_lower(stem.as_bytes()))
    }

    #[inline]
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// Identifies a file format by extension.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeKey(u32);

impl TypeKey {
    /// Hashes an extension. Everything through the final dot is stripped, so
    /// `"tga"`, `".tga"`, and `"logo.tga"` all produce the same key.
    #[inline]
    pub fn new(ext: &str) -> Self {
        let ext = match ext.rfind('.') {
            Some(idx) => &ext[idx + 1..],
            None => ext,
        };
        Self(hash_lower(ext.as_bytes()))
    }

    #[inline]
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// The composite (group, file) asset address.
///
/// Ordering is lexicographic by (group, file), which matches the numeric
/// ordering of [`as_u64`](Self::as_u64).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetKey {
    pub group: GroupKey,
    pub file: FileKey,
}

impl AssetKey {
    /// Derives the key for `file` within the group named `group`.
    #[inline]
    pub fn new(group: &str, file: &str) -> Self {
        Self {
            group: GroupKey::new(group),
            file: FileKey::new(file),
        }
    }

    #[inline]
    pub const fn from_parts(group: GroupKey, file: FileKey) -> Self {
        Self { group, file }
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        ((self.group.as_u32() as u64) << 32) | self.file.as_u32() as u64
    }

    #[inline]
    pub const fn from_u64(value: u64) -> Self {
        Self {
            group: GroupKey::from_raw((value >> 32) as u32),
            file: FileKey::from_raw(value as u32),
        }
    }
}

impl fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "GroupKey({:#010x})", self.0)
    }
}

impl fmt::Debug for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FileKey({:#010x})", self.0)
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TypeKey({:#010x})", self.0)
    }
}

impl fmt::Debug for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "AssetKey({:#018x})", self.as_u64())
    }
}
