// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Qid synthesis: deterministic hashes of identifying tuples so inodes stay
//! stable across reconnects without a persisted inode table.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub const QTDIR: u8 = 0x80;
pub const QTFILE: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Qid {
    pub qtype: u8,
    pub version: u32,
    pub path: u64,
}

/// Hash an identifying tuple (already flattened to one string by the
/// caller, e.g. `"session:<id>:state"`) into a stable 64-bit qid path.
/// `DefaultHasher::new()` is seeded with fixed keys, so this is a pure
/// function of `key` for the life of the binary.
fn stable_path(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

pub fn dir_qid(key: &str) -> Qid {
    Qid { qtype: QTDIR, version: 0, path: stable_path(key) }
}

pub fn file_qid(key: &str) -> Qid {
    Qid { qtype: QTFILE, version: 0, path: stable_path(key) }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[path = "qid_tests.rs"]
mod tests;
