//! Capability interfaces for reading and writing disc images
//!
//! The browsing and build layers only talk to images through these traits, so
//! the concrete ISO9660 codec in [`super::reader`] and [`super::writer`] can be
//! swapped for test doubles.

use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

/// Errors raised by disc image readers and writers
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("Image format error: {0}")]
    Parse(String),

    #[error("File too large for a single ISO9660 extent: {path} ({size} bytes)")]
    FileTooLarge { path: String, size: u64 },

    #[error("Invalid image path: {0}")]
    InvalidPath(String),
}

/// One entry as reported by an image decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEntry {
    /// Internal path, unrooted and `/`-separated, with the raw identifier
    /// (version suffix included)
    pub path: String,
    /// Whether the entry is a directory
    pub is_directory: bool,
    /// Data length in bytes (0 for directories)
    pub size: u64,
}

impl ImageEntry {
    /// Last path component, still carrying any version suffix
    pub fn raw_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Read-only access to the contents of a disc image
pub trait ImageDecoder {
    /// List the immediate children of a directory (`""` is the root)
    fn list_entries(&mut self, path: &str) -> Result<Vec<ImageEntry>, ImageError>;

    /// Look up a single entry
    fn attributes(&mut self, path: &str) -> Result<ImageEntry, ImageError>;

    /// Open a file for streaming; the reader borrows the decoder
    fn open_file(&mut self, path: &str) -> Result<Box<dyn Read + '_>, ImageError>;

    /// Volume label, if the image carries one
    fn volume_name(&self) -> Option<&str>;
}

impl<T: ImageDecoder + ?Sized> ImageDecoder for &mut T {
    fn list_entries(&mut self, path: &str) -> Result<Vec<ImageEntry>, ImageError> {
        (**self).list_entries(path)
    }

    fn attributes(&mut self, path: &str) -> Result<ImageEntry, ImageError> {
        (**self).attributes(path)
    }

    fn open_file(&mut self, path: &str) -> Result<Box<dyn Read + '_>, ImageError> {
        (**self).open_file(path)
    }

    fn volume_name(&self) -> Option<&str> {
        (**self).volume_name()
    }
}

/// Options passed to an encoder when it is created
#[derive(Debug, Clone)]
pub struct EncoderOptions {
    /// Write a Joliet hierarchy with long Unicode names
    pub use_joliet: bool,
    /// Volume identifier
    pub volume_label: String,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            use_joliet: true,
            volume_label: "CDROM".to_string(),
        }
    }
}

/// Write-side capability used by the build orchestrator
///
/// Directories must be declared before any file placed inside them.
pub trait ImageEncoder {
    /// Declare a directory inside the image
    fn add_directory(&mut self, iso_path: &str) -> Result<(), ImageError>;

    /// Register a local file to be stored at `iso_path`
    fn add_file(&mut self, iso_path: &str, source: &Path) -> Result<(), ImageError>;

    /// Encode everything registered so far into `output`
    fn build(&mut self, output: &mut dyn Write) -> Result<(), ImageError>;
}

/// Split an internal path into its non-empty components
pub(crate) fn path_components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

/// Join a parent internal path and a child identifier
pub(crate) fn join_path(parent: &str, name: &str) -> String {
    let parent = parent.trim_matches('/');
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}
