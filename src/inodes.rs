//! Bridges the FUSE low-level ABI's inode numbers to the logical paths the
//! path resolver wants. The teacher's own `examples/xmp.rs` keeps the same
//! two directions of lookup (`inode_to_physical_path` /
//! `mounted_path_to_inode`) for the same reason: the low-level ABI hands
//! back an inode, not a path, on every call after the initial `lookup`.
//!
//! This table stores logical paths only. It never stores a resolved
//! backing path, a stat result, or an ownership-check outcome, so it does
//! not weaken the ownership-pinning guarantee the resolver enforces fresh
//! on every call.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

pub const ROOT_INO: u64 = 1;

struct Entry {
    path: PathBuf,
    lookups: u64,
}

struct Tables {
    by_ino: HashMap<u64, Entry>,
    by_path: HashMap<PathBuf, u64>,
}

pub struct InodeTable {
    next_ino: AtomicU64,
    tables: RwLock<Tables>,
}

impl InodeTable {
    pub fn new() -> InodeTable {
        let root_path = PathBuf::from("/");
        let mut by_ino = HashMap::new();
        by_ino.insert(
            ROOT_INO,
            Entry {
                path: root_path.clone(),
                lookups: 1,
            },
        );
        let mut by_path = HashMap::new();
        by_path.insert(root_path, ROOT_INO);
        InodeTable {
            next_ino: AtomicU64::new(ROOT_INO + 1),
            tables: RwLock::new(Tables { by_ino, by_path }),
        }
    }

    pub fn path(&self, ino: u64) -> Option<PathBuf> {
        self.tables.read().by_ino.get(&ino).map(|e| e.path.clone())
    }

    pub fn child_path(&self, parent: u64, name: &OsStr) -> Option<PathBuf> {
        self.path(parent).map(|mut p| {
            p.push(name);
            p
        })
    }

    /// Registers `path` as having been looked up, returning its inode
    /// number: an existing one with its lookup count bumped, or a freshly
    /// allocated one.
    pub fn remember(&self, path: PathBuf) -> u64 {
        let mut tables = self.tables.write();
        if let Some(&ino) = tables.by_path.get(&path) {
            tables.by_ino.get_mut(&ino).unwrap().lookups += 1;
            return ino;
        }
        let ino = self.next_ino.fetch_add(1, Ordering::Relaxed);
        tables.by_path.insert(path.clone(), ino);
        tables.by_ino.insert(ino, Entry { path, lookups: 1 });
        ino
    }

    /// Drops `count` lookup references from `ino`, forgetting it entirely
    /// once the count reaches zero. The root inode is never forgotten.
    pub fn forget(&self, ino: u64, count: u64) {
        if ino == ROOT_INO {
            return;
        }
        let mut tables = self.tables.write();
        let remove = match tables.by_ino.get_mut(&ino) {
            Some(entry) => {
                entry.lookups = entry.lookups.saturating_sub(count);
                entry.lookups == 0
            }
            None => false,
        };
        if remove {
            if let Some(entry) = tables.by_ino.remove(&ino) {
                tables.by_path.remove(&entry.path);
            }
        }
    }

    /// Updates every entry rooted at `old_path` to `new_path`, following a
    /// successful host-side rename of a file or a directory subtree.
    pub fn rename(&self, old_path: &Path, new_path: &Path) {
        let mut tables = self.tables.write();
        let affected: Vec<(u64, PathBuf)> = tables
            .by_ino
            .iter()
            .filter(|(_, entry)| entry.path == old_path || entry.path.starts_with(old_path))
            .map(|(&ino, entry)| (ino, entry.path.clone()))
            .collect();
        for (ino, old_entry_path) in affected {
            let rebased = new_path.join(old_entry_path.strip_prefix(old_path).unwrap());
            tables.by_path.remove(&old_entry_path);
            tables.by_path.insert(rebased.clone(), ino);
            tables.by_ino.get_mut(&ino).unwrap().path = rebased;
        }
    }

    /// Drops any remembered entry for `path` outright, following a
    /// successful host-side `unlink`/`rmdir`. The kernel will still send a
    /// matching `forget` later; removing the reverse-lookup entry here just
    /// prevents a new `lookup` of the same name from resurrecting a stale
    /// inode number before that `forget` arrives.
    pub fn drop_path(&self, path: &Path) {
        let mut tables = self.tables.write();
        if let Some(ino) = tables.by_path.remove(path) {
            tables.by_ino.remove(&ino);
        }
    }
}
