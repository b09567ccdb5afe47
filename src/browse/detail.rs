//! Detail listing of a selected directory
//!
//! The only place files surface as selectable rows. Directories come first,
//! then files, each group in case-insensitive name order.

use super::backend::{check_backend, Backend, BrowseError};
use super::entry::{compare_names, EntryKind, Locator, PathEntry};
use super::size::{size_of, SizeCache};
use crate::capacity::format_size;

/// One row of the detail listing
#[derive(Debug, Clone)]
pub struct DetailRow {
    pub entry: PathEntry,
    /// File length, or the recursive aggregate for a directory
    pub size: u64,
    pub formatted_size: String,
}

impl DetailRow {
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn kind(&self) -> EntryKind {
        self.entry.kind
    }

    pub fn locator(&self) -> &Locator {
        &self.entry.locator
    }
}

/// List a directory's children with sizes, recomputing every aggregate
pub fn list_children<B: Backend + ?Sized>(backend: &mut B, dir: &PathEntry) -> Result<Vec<DetailRow>, BrowseError> {
    list_with(backend, dir, None)
}

/// List a directory's children, reusing aggregates from `cache`
pub fn list_children_cached<B: Backend + ?Sized>(
    backend: &mut B,
    dir: &PathEntry,
    cache: &mut SizeCache,
) -> Result<Vec<DetailRow>, BrowseError> {
    list_with(backend, dir, Some(cache))
}

fn list_with<B: Backend + ?Sized>(
    backend: &mut B,
    dir: &PathEntry,
    mut cache: Option<&mut SizeCache>,
) -> Result<Vec<DetailRow>, BrowseError> {
    check_backend(backend.kind(), dir)?;
    if !dir.is_directory() {
        return Err(BrowseError::NotADirectory(dir.locator.to_string()));
    }

    let (mut dirs, mut files): (Vec<_>, Vec<_>) = backend
        .list(dir)?
        .into_iter()
        .partition(|child| child.entry.is_directory());

    dirs.sort_by(|a, b| compare_names(&a.entry.name, &b.entry.name));
    files.sort_by(|a, b| compare_names(&a.entry.name, &b.entry.name));

    let mut rows = Vec::with_capacity(dirs.len() + files.len());
    for child in dirs.into_iter().chain(files) {
        let size = match child.entry.kind {
            EntryKind::File => child.len,
            EntryKind::Directory => match cache.as_deref_mut() {
                Some(cache) => cache.size_of(backend, &child.entry)?,
                None => size_of(backend, &child.entry)?,
            },
        };
        rows.push(DetailRow {
            formatted_size: format_size(size),
            entry: child.entry,
            size,
        });
    }

    Ok(rows)
}
