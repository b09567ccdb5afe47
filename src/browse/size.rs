//! Recursive size aggregation over either backend
//!
//! Directory sizes are the sum of every file below them, taken from the
//! backend's own listings rather than the directory-only tree. The walk uses an
//! explicit stack so deep hierarchies cannot exhaust the call stack.

use std::collections::HashMap;

use super::backend::{check_backend, Backend, BrowseError};
use super::entry::{EntryKind, Locator, PathEntry};

/// Total bytes under `entry`; a file's own length if it is a file
///
/// Nothing is memoized: every call walks the whole subtree again.
pub fn size_of<B: Backend + ?Sized>(backend: &mut B, entry: &PathEntry) -> Result<u64, BrowseError> {
    walk(backend, entry, None)
}

/// Optional memo of directory aggregates
///
/// Owned by a session and discarded with it, so a rebuilt tree always starts
/// from an empty cache.
#[derive(Debug, Default)]
pub struct SizeCache {
    sizes: HashMap<Locator, u64>,
}

impl SizeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Like [`size_of`], reusing and recording directory aggregates
    pub fn size_of<B: Backend + ?Sized>(&mut self, backend: &mut B, entry: &PathEntry) -> Result<u64, BrowseError> {
        if let Some(&size) = self.sizes.get(&entry.locator) {
            return Ok(size);
        }

        let size = walk(backend, entry, Some(&self.sizes))?;
        if entry.is_directory() {
            self.sizes.insert(entry.locator.clone(), size);
        }
        Ok(size)
    }

    /// Cached aggregate for a locator, if any
    pub fn get(&self, locator: &Locator) -> Option<u64> {
        self.sizes.get(locator).copied()
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    pub fn clear(&mut self) {
        self.sizes.clear();
    }
}

fn walk<B: Backend + ?Sized>(
    backend: &mut B,
    entry: &PathEntry,
    known: Option<&HashMap<Locator, u64>>,
) -> Result<u64, BrowseError> {
    check_backend(backend.kind(), entry)?;

    if entry.is_file() {
        return backend.file_len(entry);
    }

    let mut total: u64 = 0;
    let mut stack = vec![entry.clone()];

    while let Some(dir) = stack.pop() {
        for child in backend.list(&dir)? {
            match child.entry.kind {
                EntryKind::File => total = total.saturating_add(child.len),
                EntryKind::Directory => {
                    match known.and_then(|k| k.get(&child.entry.locator)) {
                        Some(&cached) => total = total.saturating_add(cached),
                        None => stack.push(child.entry),
                    }
                }
            }
        }
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browse::backend::LocalBackend;
    use std::fs;
    use std::path::Path;

    /// root/
    ///   a.bin (100)
    ///   l1/ b.bin (200)
    ///       l2/ c.bin (300)
    ///           l3/ d.bin (400), e.bin (0)
    ///   empty/
    fn synthetic_tree(root: &Path) {
        fs::create_dir_all(root.join("l1/l2/l3")).unwrap();
        fs::create_dir(root.join("empty")).unwrap();
        fs::write(root.join("a.bin"), vec![0u8; 100]).unwrap();
        fs::write(root.join("l1/b.bin"), vec![0u8; 200]).unwrap();
        fs::write(root.join("l1/l2/c.bin"), vec![0u8; 300]).unwrap();
        fs::write(root.join("l1/l2/l3/d.bin"), vec![0u8; 400]).unwrap();
        fs::write(root.join("l1/l2/l3/e.bin"), b"").unwrap();
    }

    #[test]
    fn test_root_size_is_sum_of_all_files() {
        let dir = tempfile::tempdir().unwrap();
        synthetic_tree(dir.path());

        let mut backend = LocalBackend::new(dir.path());
        let root = backend.root();
        assert_eq!(size_of(&mut backend, &root).unwrap(), 1000);
    }

    #[test]
    fn test_root_size_is_sum_of_children() {
        let dir = tempfile::tempdir().unwrap();
        synthetic_tree(dir.path());

        let mut backend = LocalBackend::new(dir.path());
        let root = backend.root();
        let children = backend.list(&root).unwrap();

        let mut sum = 0;
        for child in &children {
            sum += size_of(&mut backend, &child.entry).unwrap();
        }
        assert_eq!(sum, size_of(&mut backend, &root).unwrap());
    }

    #[test]
    fn test_empty_directory_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = LocalBackend::new(dir.path());
        let root = backend.root();
        assert_eq!(size_of(&mut backend, &root).unwrap(), 0);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = LocalBackend::new(dir.path().join("gone"));
        let root = backend.root();
        assert!(size_of(&mut backend, &root).is_err());
    }

    #[test]
    fn test_cache_reuses_subdirectory_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        synthetic_tree(dir.path());

        let mut backend = LocalBackend::new(dir.path());
        let root = backend.root();
        let l1 = PathEntry::classify(Locator::Local(dir.path().join("l1")), EntryKind::Directory);

        let mut cache = SizeCache::new();
        assert_eq!(cache.size_of(&mut backend, &l1).unwrap(), 900);
        assert_eq!(cache.size_of(&mut backend, &root).unwrap(), 1000);
        assert_eq!(cache.len(), 2);

        // The cache is not invalidated by changes on disk, only by clearing
        fs::write(dir.path().join("l1/new.bin"), vec![0u8; 50]).unwrap();
        assert_eq!(cache.size_of(&mut backend, &l1).unwrap(), 900);
        cache.clear();
        assert_eq!(cache.size_of(&mut backend, &l1).unwrap(), 950);
    }
}
