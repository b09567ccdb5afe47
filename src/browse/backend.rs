//! Backends that enumerate nodes: the local filesystem and an opened image

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::entry::{BackendKind, EntryKind, Locator, PathEntry};
use crate::disc::{ImageDecoder, ImageError};

/// Errors that can occur while browsing either backend
#[derive(Debug, Error)]
pub enum BrowseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    #[error("{locator} belongs to the {found}, not the {expected}")]
    BackendMismatch {
        expected: BackendKind,
        found: BackendKind,
        locator: String,
    },

    #[error("Not a directory: {0}")]
    NotADirectory(String),
}

/// A child returned by a backend listing
#[derive(Debug, Clone)]
pub struct Listed {
    pub entry: PathEntry,
    /// Byte length for files, 0 for directories
    pub len: u64,
}

/// Uniform enumeration over local folders and disc images
pub trait Backend {
    /// Which locators this backend accepts
    fn kind(&self) -> BackendKind;

    /// The backend's root directory
    fn root(&self) -> PathEntry;

    /// Immediate children of a directory, files included, in backend order
    fn list(&mut self, dir: &PathEntry) -> Result<Vec<Listed>, BrowseError>;

    /// Byte length of a single file
    fn file_len(&mut self, file: &PathEntry) -> Result<u64, BrowseError>;
}

/// Reject an entry created for the other backend
pub(crate) fn check_backend(expected: BackendKind, entry: &PathEntry) -> Result<(), BrowseError> {
    if entry.backend() == expected {
        Ok(())
    } else {
        Err(mismatch(expected, entry))
    }
}

fn mismatch(expected: BackendKind, entry: &PathEntry) -> BrowseError {
    BrowseError::BackendMismatch {
        expected,
        found: entry.backend(),
        locator: entry.locator.to_string(),
    }
}

/// Local filesystem rooted at a chosen folder
///
/// Symlinks are followed. A linked directory whose target is one of the
/// link's own parents is left out with a warning, so a link cycle cannot make
/// a walk run forever.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn local_path<'a>(&self, entry: &'a PathEntry) -> Result<&'a Path, BrowseError> {
        match &entry.locator {
            Locator::Local(path) => Ok(path.as_path()),
            Locator::Image(_) => Err(mismatch(BackendKind::LocalFilesystem, entry)),
        }
    }

    /// The parent of `link` (up to the root) that the link resolves to, if any
    fn loop_ancestor(&self, link: &Path) -> io::Result<Option<PathBuf>> {
        let target = fs::canonicalize(link)?;
        for ancestor in link.ancestors().skip(1) {
            if fs::canonicalize(ancestor).is_ok_and(|path| path == target) {
                return Ok(Some(ancestor.to_path_buf()));
            }
            if ancestor == self.root {
                break;
            }
        }
        Ok(None)
    }
}

impl Backend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalFilesystem
    }

    fn root(&self) -> PathEntry {
        PathEntry::classify(Locator::Local(self.root.clone()), EntryKind::Directory)
    }

    fn list(&mut self, dir: &PathEntry) -> Result<Vec<Listed>, BrowseError> {
        let path = self.local_path(dir)?;
        if !path.is_dir() {
            return Err(BrowseError::NotADirectory(path.display().to_string()));
        }

        let mut children = Vec::new();
        for item in fs::read_dir(path)? {
            let item = item?;
            let child_path = item.path();
            let file_type = item.file_type()?;

            let (kind, len) = if file_type.is_dir() {
                (EntryKind::Directory, 0)
            } else if file_type.is_file() {
                (EntryKind::File, item.metadata()?.len())
            } else {
                match fs::metadata(&child_path) {
                    Ok(meta) if meta.is_file() => (EntryKind::File, meta.len()),
                    Ok(meta) if meta.is_dir() => match self.loop_ancestor(&child_path)? {
                        None => (EntryKind::Directory, 0),
                        Some(ancestor) => {
                            log::warn!(
                                "Skipping {}: link loops back to {}",
                                child_path.display(),
                                ancestor.display()
                            );
                            continue;
                        }
                    },
                    Ok(_) => {
                        log::warn!("Skipping {}: not a regular file", child_path.display());
                        continue;
                    }
                    Err(e) => {
                        log::warn!("Skipping unreadable link {}: {}", child_path.display(), e);
                        continue;
                    }
                }
            };

            children.push(Listed {
                entry: PathEntry::classify(Locator::Local(child_path), kind),
                len,
            });
        }

        Ok(children)
    }

    fn file_len(&mut self, file: &PathEntry) -> Result<u64, BrowseError> {
        let path = self.local_path(file)?;
        Ok(fs::metadata(path)?.len())
    }
}

/// Browsing view over an opened disc image
pub struct ImageBackend<D> {
    decoder: D,
}

impl<D: ImageDecoder> ImageBackend<D> {
    pub fn new(decoder: D) -> Self {
        Self { decoder }
    }

    /// Access the decoder for streaming reads
    pub fn decoder_mut(&mut self) -> &mut D {
        &mut self.decoder
    }

    pub fn volume_name(&self) -> Option<&str> {
        self.decoder.volume_name()
    }

    fn image_path<'a>(&self, entry: &'a PathEntry) -> Result<&'a str, BrowseError> {
        match &entry.locator {
            Locator::Image(path) => Ok(path.as_str()),
            Locator::Local(_) => Err(mismatch(BackendKind::DiscImage, entry)),
        }
    }
}

impl<D: ImageDecoder> Backend for ImageBackend<D> {
    fn kind(&self) -> BackendKind {
        BackendKind::DiscImage
    }

    fn root(&self) -> PathEntry {
        PathEntry::classify(Locator::Image(String::new()), EntryKind::Directory)
    }

    fn list(&mut self, dir: &PathEntry) -> Result<Vec<Listed>, BrowseError> {
        let path = self.image_path(dir)?;
        let entries = self.decoder.list_entries(path)?;

        Ok(entries
            .into_iter()
            .map(|item| {
                let kind = if item.is_directory {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                };
                Listed {
                    entry: PathEntry::classify(Locator::Image(item.path), kind),
                    len: item.size,
                }
            })
            .collect())
    }

    fn file_len(&mut self, file: &PathEntry) -> Result<u64, BrowseError> {
        let path = self.image_path(file)?;
        Ok(self.decoder.attributes(path)?.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browse::entry::classify;

    #[test]
    fn test_local_listing_includes_files_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.txt"), b"12345").unwrap();

        let mut backend = LocalBackend::new(dir.path());
        let root = backend.root();
        let mut children = backend.list(&root).unwrap();
        children.sort_by(|a, b| a.entry.name.cmp(&b.entry.name));

        assert_eq!(children.len(), 2);
        assert_eq!(children[0].entry.name, "a.txt");
        assert_eq!(children[0].len, 5);
        assert_eq!(children[1].entry.kind, EntryKind::Directory);
    }

    #[test]
    fn test_mixing_backends_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = LocalBackend::new(dir.path());
        let foreign = classify("DOCS", BackendKind::DiscImage, EntryKind::Directory);

        assert!(matches!(
            backend.list(&foreign),
            Err(BrowseError::BackendMismatch { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_linked_directory_is_listed_and_loops_are_skipped() {
        use std::os::unix::fs::symlink;

        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("big.bin"), vec![0u8; 4096]).unwrap();

        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        symlink(outside.path(), dir.path().join("linked")).unwrap();
        symlink(dir.path(), dir.path().join("sub/back")).unwrap();

        let mut backend = LocalBackend::new(dir.path());
        let root = backend.root();
        let mut children = backend.list(&root).unwrap();
        children.sort_by(|a, b| a.entry.name.cmp(&b.entry.name));
        let names: Vec<&str> = children.iter().map(|c| c.entry.name.as_str()).collect();
        assert_eq!(names, vec!["linked", "sub"]);
        assert_eq!(children[0].entry.kind, EntryKind::Directory);

        let inside = backend.list(&children[0].entry).unwrap();
        assert_eq!(inside.len(), 1);
        assert_eq!(inside[0].len, 4096);

        assert!(backend.list(&children[1].entry).unwrap().is_empty());
    }

    #[test]
    fn test_listing_a_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.bin");
        fs::write(&file, b"x").unwrap();

        let mut backend = LocalBackend::new(dir.path());
        let entry = PathEntry::classify(Locator::Local(file), EntryKind::Directory);
        assert!(matches!(backend.list(&entry), Err(BrowseError::NotADirectory(_))));
    }
}
