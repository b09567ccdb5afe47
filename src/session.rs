//! The browsing session for one selected source
//!
//! A session is created when the user picks a folder or an image and is
//! replaced wholesale by the next pick. It owns the tree and the size cache;
//! image handles are opened per action and closed when the action returns.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Local};

use crate::browse::{
    build_tree, list_children_cached, Backend, BrowseError, DetailRow, DirTree, ImageBackend, LocalBackend, Locator,
    PathEntry, SizeCache,
};
use crate::capacity::{evaluate, CapacityReading};
use crate::disc::DiscImage;
use crate::extract::{extract, ExtractError};

/// What the session is browsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A local folder staged for a build
    LocalFolder(PathBuf),
    /// An existing image file opened read-only
    Image(PathBuf),
}

impl Source {
    pub fn path(&self) -> &Path {
        match self {
            Self::LocalFolder(path) | Self::Image(path) => path,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image(_))
    }
}

/// Root label for a local folder: the session timestamp
pub fn session_label(now: &DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M").to_string()
}

/// Root label for an image: its file name
pub fn image_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Run `action` against a freshly opened backend for `source`
fn with_backend<T>(
    source: &Source,
    action: impl FnOnce(&mut dyn Backend) -> Result<T, BrowseError>,
) -> Result<T, BrowseError> {
    match source {
        Source::LocalFolder(path) => action(&mut LocalBackend::new(path.clone())),
        Source::Image(path) => {
            let image = DiscImage::open(path)?;
            action(&mut ImageBackend::new(image))
        }
    }
}

fn lock(sizes: &Mutex<SizeCache>) -> MutexGuard<'_, SizeCache> {
    sizes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// An opened source with its directory tree
pub struct Session {
    source: Source,
    tree: DirTree,
    sizes: Arc<Mutex<SizeCache>>,
}

impl Session {
    /// Open a local folder, labelling the root with the current time
    pub fn open_folder(path: impl Into<PathBuf>) -> Result<Self, BrowseError> {
        Self::open(Source::LocalFolder(path.into()), session_label(&Local::now()))
    }

    /// Open an image file, labelling the root with its file name
    pub fn open_image(path: impl Into<PathBuf>) -> Result<Self, BrowseError> {
        let path = path.into();
        let label = image_label(&path);
        Self::open(Source::Image(path), label)
    }

    fn open(source: Source, label: String) -> Result<Self, BrowseError> {
        let tree = with_backend(&source, |backend| build_tree(backend, label))?;
        log::info!(
            "Opened {} ({} directories)",
            source.path().display(),
            tree.len()
        );

        Ok(Self {
            source,
            tree,
            sizes: Arc::new(Mutex::new(SizeCache::new())),
        })
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn tree(&self) -> &DirTree {
        &self.tree
    }

    pub fn label(&self) -> &str {
        self.tree.label()
    }

    /// The entry of the tree root
    pub fn root_entry(&self) -> Option<&PathEntry> {
        self.tree.node(self.tree.root()).map(|n| &n.entry)
    }

    /// Number of cached directory aggregates
    pub fn cached_sizes(&self) -> usize {
        lock(&self.sizes).len()
    }

    /// Run an action against this session's backend
    pub fn with_backend<T>(
        &self,
        action: impl FnOnce(&mut dyn Backend) -> Result<T, BrowseError>,
    ) -> Result<T, BrowseError> {
        with_backend(&self.source, action)
    }

    /// Sorted detail rows of a directory
    pub fn details(&self, dir: &PathEntry) -> Result<Vec<DetailRow>, BrowseError> {
        let mut sizes = lock(&self.sizes);
        self.with_backend(|backend| list_children_cached(backend, dir, &mut sizes))
    }

    /// Recursive size of an entry
    pub fn size_of(&self, entry: &PathEntry) -> Result<u64, BrowseError> {
        let mut sizes = lock(&self.sizes);
        self.with_backend(|backend| sizes.size_of(backend, entry))
    }

    /// Capacity reading of an entry's aggregate against `reference_bytes`
    ///
    /// An over-capacity result is warned about once here, not per directory
    /// visited while summing.
    pub fn capacity(&self, entry: &PathEntry, reference_bytes: u64) -> Result<CapacityReading, BrowseError> {
        let reading = evaluate(self.size_of(entry)?, reference_bytes);
        if reading.exceeds_capacity() {
            log::warn!(
                "{} is {} ({}), more than the disc can hold",
                entry.locator,
                reading.formatted_size,
                reading.percent_text()
            );
        }
        Ok(reading)
    }

    /// Copy a file out of the opened image into `staging_dir`
    pub fn extract(&self, entry: &PathEntry, staging_dir: &Path) -> Result<PathBuf, ExtractError> {
        extract_from(&self.source, entry, staging_dir)
    }

    /// An extraction that can run on another thread
    pub fn extract_job(&self, entry: PathEntry) -> ExtractJob {
        ExtractJob {
            source: self.source.clone(),
            entry,
        }
    }

    /// A detail listing that can run on another thread
    pub fn listing_job(&self, dir: PathEntry) -> ListingJob {
        ListingJob {
            source: self.source.clone(),
            dir,
            sizes: Arc::clone(&self.sizes),
        }
    }
}

fn extract_from(source: &Source, entry: &PathEntry, staging_dir: &Path) -> Result<PathBuf, ExtractError> {
    let (Source::Image(image_path), Locator::Image(internal)) = (source, &entry.locator) else {
        return Err(ExtractError::NotInImage(entry.locator.to_string()));
    };
    if !entry.is_file() {
        return Err(ExtractError::NotAFile(entry.locator.to_string()));
    }

    let mut image = DiscImage::open(image_path)?;
    extract(&mut image, internal, staging_dir)
}

/// Extraction detached from the session
pub struct ExtractJob {
    source: Source,
    entry: PathEntry,
}

impl ExtractJob {
    pub fn entry(&self) -> &PathEntry {
        &self.entry
    }

    pub fn run(self, staging_dir: &Path) -> Result<PathBuf, ExtractError> {
        extract_from(&self.source, &self.entry, staging_dir)
    }
}

/// Detail listing detached from the session, shares its size cache
pub struct ListingJob {
    source: Source,
    dir: PathEntry,
    sizes: Arc<Mutex<SizeCache>>,
}

impl ListingJob {
    pub fn dir(&self) -> &PathEntry {
        &self.dir
    }

    pub fn run(self) -> Result<Vec<DetailRow>, BrowseError> {
        let mut sizes = lock(&self.sizes);
        with_backend(&self.source, |backend| list_children_cached(backend, &self.dir, &mut sizes))
    }
}
