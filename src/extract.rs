//! Copy single files out of an opened image into a staging directory
//!
//! Staged files are never overwritten. A name already taken in the staging
//! directory gets a random token between its stem and extension.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::browse::strip_version_suffix;
use crate::disc::{ImageDecoder, ImageError};

/// Errors that can occur while extracting a file
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("Not inside an opened image: {0}")]
    NotInImage(String),
}

/// Copy `internal_path` out of the image into `staging_dir`
///
/// Returns the local path of the staged copy.
pub fn extract<D: ImageDecoder + ?Sized>(
    decoder: &mut D,
    internal_path: &str,
    staging_dir: &Path,
) -> Result<PathBuf, ExtractError> {
    let attributes = decoder.attributes(internal_path)?;
    if attributes.is_directory {
        return Err(ExtractError::NotAFile(internal_path.to_string()));
    }

    fs::create_dir_all(staging_dir)?;
    let (file, path) = create_unique(staging_dir, &display_name(attributes.raw_name()))?;

    let copied = decoder
        .open_file(internal_path)
        .map_err(ExtractError::from)
        .and_then(|mut reader| {
            let mut writer = BufWriter::new(file);
            let copied = io::copy(&mut reader, &mut writer)?;
            writer.flush()?;
            if copied != attributes.size {
                return Err(ExtractError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("read {} of {} bytes", copied, attributes.size),
                )));
            }
            Ok(copied)
        });

    match copied {
        Ok(bytes) => {
            log::info!("Extracted /{} to {} ({} bytes)", internal_path, path.display(), bytes);
            Ok(path)
        }
        Err(e) => {
            if let Err(remove) = fs::remove_file(&path) {
                log::warn!("Could not remove partial file {}: {}", path.display(), remove);
            }
            Err(e)
        }
    }
}

/// Local file name for an image identifier
fn display_name(raw: &str) -> String {
    let name: String = strip_version_suffix(raw)
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();

    match name.trim() {
        "" | "." | ".." => "extracted".to_string(),
        _ => name,
    }
}

/// Claim `dir/name`, or a fresh `dir/<stem>_<token>.<ext>` if it is taken
fn create_unique(dir: &Path, name: &str) -> io::Result<(File, PathBuf)> {
    let candidate = dir.join(name);
    match OpenOptions::new().write(true).create_new(true).open(&candidate) {
        Ok(file) => return Ok((file, candidate)),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e),
    }

    let (stem, ext) = match name.rfind('.') {
        Some(index) if index > 0 => (&name[..index], &name[index..]),
        _ => (name, ""),
    };

    let staged = tempfile::Builder::new()
        .prefix(&format!("{}_", stem))
        .suffix(ext)
        .tempfile_in(dir)?;
    staged.keep().map_err(|e| e.error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disc::{DiscImage, EncoderOptions, ImageEncoder, ImageEntry, IsoWriter};
    use std::cell::Cell;
    use std::io::{Cursor, Read};
    use std::rc::Rc;

    fn image_with(files: &[(&str, &str)]) -> DiscImage<Cursor<Vec<u8>>> {
        let src = tempfile::tempdir().unwrap();
        let mut writer = IsoWriter::new(EncoderOptions::default());
        writer.add_directory("docs").unwrap();
        for (path, data) in files {
            let local = src.path().join(path.replace('/', "_"));
            fs::write(&local, data).unwrap();
            writer.add_file(path, &local).unwrap();
        }
        let mut out = Vec::new();
        writer.build(&mut out).unwrap();
        DiscImage::new(Cursor::new(out)).unwrap()
    }

    #[test]
    fn test_extract_strips_version_suffix() {
        let staging = tempfile::tempdir().unwrap();
        let mut image = image_with(&[("docs/report.txt", "quarterly")]);

        let path = extract(&mut image, "docs/report.txt;1", staging.path()).unwrap();
        assert_eq!(path, staging.path().join("report.txt"));
        assert_eq!(fs::read(&path).unwrap(), b"quarterly");
    }

    #[test]
    fn test_second_extraction_never_overwrites() {
        let staging = tempfile::tempdir().unwrap();
        let mut image = image_with(&[("docs/report.txt", "quarterly")]);

        let first = extract(&mut image, "docs/report.txt;1", staging.path()).unwrap();
        fs::write(&first, b"edited by user").unwrap();
        let second = extract(&mut image, "docs/report.txt;1", staging.path()).unwrap();

        assert_ne!(first, second);
        assert_eq!(fs::read(&first).unwrap(), b"edited by user");
        assert_eq!(fs::read(&second).unwrap(), b"quarterly");

        let name = second.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("report_"));
        assert!(name.ends_with(".txt"));
    }

    #[test]
    fn test_directory_is_rejected() {
        let staging = tempfile::tempdir().unwrap();
        let mut image = image_with(&[]);
        assert!(matches!(
            extract(&mut image, "docs", staging.path()),
            Err(ExtractError::NotAFile(_))
        ));
    }

    #[test]
    fn test_missing_entry_is_an_error() {
        let staging = tempfile::tempdir().unwrap();
        let mut image = image_with(&[]);
        assert!(matches!(
            extract(&mut image, "docs/none.txt;1", staging.path()),
            Err(ExtractError::Image(_))
        ));
    }

    #[test]
    fn test_staging_dir_is_created() {
        let root = tempfile::tempdir().unwrap();
        let staging = root.path().join("IsoExtract");
        let mut image = image_with(&[("notes", "n")]);

        let path = extract(&mut image, "notes;1", &staging).unwrap();
        assert!(path.starts_with(&staging));
        assert_eq!(path.file_name().unwrap(), "notes");
    }

    /// Serves a few bytes, then fails like a bad sector
    struct FailingReader {
        served: usize,
        dropped: Rc<Cell<bool>>,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served >= 8 {
                return Err(io::Error::other("sector read failed"));
            }
            let n = buf.len().min(8 - self.served);
            buf[..n].fill(b'x');
            self.served += n;
            Ok(n)
        }
    }

    impl Drop for FailingReader {
        fn drop(&mut self) {
            self.dropped.set(true);
        }
    }

    struct DamagedImage {
        dropped: Rc<Cell<bool>>,
    }

    impl ImageDecoder for DamagedImage {
        fn list_entries(&mut self, _path: &str) -> Result<Vec<ImageEntry>, ImageError> {
            Ok(Vec::new())
        }

        fn attributes(&mut self, path: &str) -> Result<ImageEntry, ImageError> {
            Ok(ImageEntry {
                path: path.to_string(),
                is_directory: false,
                size: 64,
            })
        }

        fn open_file(&mut self, _path: &str) -> Result<Box<dyn Read + '_>, ImageError> {
            Ok(Box::new(FailingReader {
                served: 0,
                dropped: Rc::clone(&self.dropped),
            }))
        }

        fn volume_name(&self) -> Option<&str> {
            None
        }
    }

    #[test]
    fn test_read_failure_removes_partial_file_and_releases_reader() {
        let staging = tempfile::tempdir().unwrap();
        let dropped = Rc::new(Cell::new(false));
        let mut image = DamagedImage {
            dropped: Rc::clone(&dropped),
        };

        let result = extract(&mut image, "docs/broken.bin;1", staging.path());
        assert!(matches!(result, Err(ExtractError::Io(_))));
        assert!(dropped.get());
        assert_eq!(fs::read_dir(staging.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("REPORT.TXT;1"), "REPORT.TXT");
        assert_eq!(display_name("a:b"), "a_b");
        assert_eq!(display_name(".."), "extracted");
    }
}
