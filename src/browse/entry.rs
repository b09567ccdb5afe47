//! Backend-agnostic description of directory and file nodes

use std::fmt;
use std::path::{Path, PathBuf};

/// Which backend an identity resolves against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// The local filesystem
    LocalFilesystem,
    /// The inside of an opened disc image
    DiscImage,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalFilesystem => write!(f, "local filesystem"),
            Self::DiscImage => write!(f, "disc image"),
        }
    }
}

/// Type of node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Directory,
    File,
}

impl EntryKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Directory => "Folder",
            Self::File => "File",
        }
    }
}

/// Backend-tagged identity of a node
///
/// The tag is set when the locator is created and is never inferred from the
/// shape of the path string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// Absolute path on the local filesystem
    Local(PathBuf),
    /// Unrooted internal image path (`""` is the image root)
    Image(String),
}

impl Locator {
    pub fn backend(&self) -> BackendKind {
        match self {
            Self::Local(_) => BackendKind::LocalFilesystem,
            Self::Image(_) => BackendKind::DiscImage,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Image(path) => write!(f, "/{}", path),
        }
    }
}

/// Coarse file type derived from the extension, used for icons and labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Text,
    Document,
    Spreadsheet,
    Pdf,
    Image,
    Archive,
    DiscImage,
    Other,
}

impl FileCategory {
    /// Classify a file name by extension (case-insensitive)
    pub fn from_name(name: &str) -> Self {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "txt" => Self::Text,
            "doc" | "docx" => Self::Document,
            "xls" | "xlsx" => Self::Spreadsheet,
            "pdf" => Self::Pdf,
            "jpg" | "jpeg" | "bmp" | "tif" | "tiff" => Self::Image,
            "rar" | "zip" => Self::Archive,
            "iso" => Self::DiscImage,
            _ => Self::Other,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Text => "Text",
            Self::Document => "Document",
            Self::Spreadsheet => "Spreadsheet",
            Self::Pdf => "PDF",
            Self::Image => "Image",
            Self::Archive => "Archive",
            Self::DiscImage => "Disc image",
            Self::Other => "File",
        }
    }
}

/// A single directory or file node on either backend
///
/// Sizes are never stored; see [`super::size::size_of`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathEntry {
    /// Display name (last path segment, version suffix stripped)
    pub name: String,
    pub kind: EntryKind,
    pub locator: Locator,
}

impl PathEntry {
    /// Build an entry from a backend-tagged locator
    pub fn classify(locator: Locator, kind: EntryKind) -> Self {
        let name = match &locator {
            Locator::Local(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string()),
            Locator::Image(path) => {
                let last = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
                strip_version_suffix(last).to_string()
            }
        };

        Self { name, kind, locator }
    }

    pub fn backend(&self) -> BackendKind {
        self.locator.backend()
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// File category; `None` for directories
    pub fn category(&self) -> Option<FileCategory> {
        match self.kind {
            EntryKind::Directory => None,
            EntryKind::File => Some(FileCategory::from_name(&self.name)),
        }
    }
}

/// Build an entry from a raw path string and the backend it belongs to
pub fn classify(raw_path: &str, backend: BackendKind, kind: EntryKind) -> PathEntry {
    let locator = match backend {
        BackendKind::LocalFilesystem => Locator::Local(PathBuf::from(raw_path)),
        BackendKind::DiscImage => Locator::Image(raw_path.trim_matches('/').to_string()),
    };
    PathEntry::classify(locator, kind)
}

/// Remove an ISO 9660 version suffix (`;1`) from an identifier
///
/// A trailing separator dot left behind by an extensionless name
/// (`MAKEFILE.;1`) goes with it.
pub fn strip_version_suffix(name: &str) -> &str {
    match name.rfind(';') {
        Some(idx) if name[idx + 1..].chars().all(|c| c.is_ascii_digit()) => {
            let base = &name[..idx];
            match base.strip_suffix('.') {
                Some(stem) if !stem.is_empty() => stem,
                _ => base,
            }
        }
        _ => name,
    }
}

/// Case-insensitive name order with a case-sensitive tie break
pub fn compare_names(a: &str, b: &str) -> std::cmp::Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}
