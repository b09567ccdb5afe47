//! ISO 9660 image reader
//!
//! Walks the directory hierarchy of an ISO 9660 image, preferring the Joliet
//! tree when the image has one. Entries are addressed by unrooted internal
//! paths built from the raw identifiers stored on disc.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use super::descriptor::{
    decode_ucs2, read_le_u32, Hierarchy, VolumeDescriptor, FIRST_DESCRIPTOR_SECTOR,
    FLAG_DIRECTORY, ISO9660_IDENTIFIER, SECTOR_SIZE, TYPE_TERMINATOR,
};
use super::image::{join_path, path_components, ImageDecoder, ImageEntry, ImageError};

/// Give up scanning the descriptor set after this many sectors
const MAX_DESCRIPTORS: u64 = 64;

/// Largest directory extent we are willing to load
const MAX_DIRECTORY_SIZE: u32 = 64 * 1024 * 1024;

/// Deepest directory nesting we follow
const MAX_DEPTH: usize = 255;

/// An opened ISO 9660 image
pub struct DiscImage<R> {
    inner: R,
    descriptor: VolumeDescriptor,
}

/// ISO 9660 Directory Record
#[derive(Debug, Clone)]
struct DirectoryRecord {
    /// Location of extent (LBA)
    extent_location: u32,
    /// Data length (file size)
    data_length: u32,
    /// File flags
    file_flags: u8,
    /// Raw identifier bytes
    identifier: Vec<u8>,
}

impl DirectoryRecord {
    fn is_directory(&self) -> bool {
        (self.file_flags & FLAG_DIRECTORY) != 0
    }

    /// "." and ".." records carry a single 0x00 / 0x01 byte
    fn is_self_or_parent(&self) -> bool {
        matches!(self.identifier.as_slice(), [0] | [1] | [])
    }

    fn name(&self, hierarchy: Hierarchy) -> String {
        match hierarchy {
            Hierarchy::Primary => String::from_utf8_lossy(&self.identifier).to_string(),
            Hierarchy::Joliet => decode_ucs2(&self.identifier),
        }
    }
}

impl DiscImage<BufReader<File>> {
    /// Open an image file from disk
    pub fn open(path: &Path) -> Result<Self, ImageError> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> DiscImage<R> {
    /// Read the volume descriptor set and pick the hierarchy to browse
    pub fn new(mut inner: R) -> Result<Self, ImageError> {
        let mut primary = None;
        let mut joliet = None;

        for index in 0..MAX_DESCRIPTORS {
            let sector = read_sectors(&mut inner, FIRST_DESCRIPTOR_SECTOR + index, 1)?;

            if &sector[1..6] != ISO9660_IDENTIFIER {
                return Err(ImageError::Parse(format!(
                    "Invalid volume descriptor at sector {}",
                    FIRST_DESCRIPTOR_SECTOR + index
                )));
            }
            if sector[0] == TYPE_TERMINATOR {
                break;
            }

            match VolumeDescriptor::parse(&sector)? {
                Some(vd) if vd.hierarchy == Hierarchy::Joliet && joliet.is_none() => {
                    joliet = Some(vd)
                }
                Some(vd) if vd.hierarchy == Hierarchy::Primary && primary.is_none() => {
                    primary = Some(vd)
                }
                _ => {}
            }
        }

        let descriptor = match (joliet, primary) {
            (Some(joliet), primary) => {
                // Joliet volume ids are limited to 16 chars; keep the longer label
                let mut joliet = joliet;
                if let Some(primary) = primary {
                    if joliet.volume_id.is_empty() {
                        joliet.volume_id = primary.volume_id;
                    }
                }
                joliet
            }
            (None, Some(primary)) => primary,
            (None, None) => {
                return Err(ImageError::Parse(
                    "No primary volume descriptor found".to_string(),
                ))
            }
        };

        log::debug!(
            "Opened image volume '{}' ({:?} hierarchy, root at LBA {})",
            descriptor.volume_id,
            descriptor.hierarchy,
            descriptor.root_location
        );

        Ok(Self { inner, descriptor })
    }

    /// Which naming hierarchy is being browsed
    pub fn hierarchy(&self) -> Hierarchy {
        self.descriptor.hierarchy
    }

    /// Consume the image and hand back the underlying reader
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn root_record(&self) -> DirectoryRecord {
        DirectoryRecord {
            extent_location: self.descriptor.root_location,
            data_length: self.descriptor.root_size,
            file_flags: FLAG_DIRECTORY,
            identifier: vec![0],
        }
    }

    /// Read all records of a directory extent, skipping "." and ".."
    fn read_directory(&mut self, dir: &DirectoryRecord) -> Result<Vec<DirectoryRecord>, ImageError> {
        if dir.data_length > MAX_DIRECTORY_SIZE {
            return Err(ImageError::Parse(format!(
                "Directory extent too large: {} bytes",
                dir.data_length
            )));
        }

        let sector_count = (dir.data_length as u64).div_ceil(SECTOR_SIZE);
        let data = read_sectors(&mut self.inner, dir.extent_location as u64, sector_count)?;
        let data = &data[..dir.data_length as usize];

        let mut records = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            let record_length = data[offset] as usize;

            // Length 0 means end of sector, skip to next sector boundary
            if record_length == 0 {
                let next_sector = ((offset / SECTOR_SIZE as usize) + 1) * SECTOR_SIZE as usize;
                if next_sector >= data.len() {
                    break;
                }
                offset = next_sector;
                continue;
            }

            if offset + record_length > data.len() {
                break;
            }

            if let Some(record) = parse_directory_record(&data[offset..offset + record_length]) {
                if !record.is_self_or_parent() {
                    records.push(record);
                }
            }

            offset += record_length;
        }

        Ok(records)
    }

    /// Walk from the root to the record addressed by `path`
    ///
    /// A directory whose extent repeats one of its ancestors is rejected, so a
    /// corrupt image cannot lead a walk around in circles.
    fn resolve(&mut self, path: &str) -> Result<DirectoryRecord, ImageError> {
        let hierarchy = self.descriptor.hierarchy;
        let mut current = self.root_record();
        let mut ancestors = vec![current.extent_location];

        for component in path_components(path) {
            if !current.is_directory() {
                return Err(ImageError::NotADirectory(path.to_string()));
            }

            let children = self.read_directory(&current)?;
            let exact = children
                .iter()
                .position(|child| child.name(hierarchy) == component);
            // Tolerate lookups without the version suffix or in another case
            let index = exact.or_else(|| {
                children.iter().position(|child| {
                    let name = child.name(hierarchy);
                    let bare = name.split(';').next().unwrap_or(&name);
                    bare.eq_ignore_ascii_case(component.split(';').next().unwrap_or(component))
                })
            });

            current = match index {
                Some(index) => children[index].clone(),
                None => return Err(ImageError::NotFound(path.to_string())),
            };

            if current.is_directory() {
                if ancestors.contains(&current.extent_location) {
                    return Err(ImageError::Parse(format!(
                        "Directory {} loops back to LBA {}",
                        path, current.extent_location
                    )));
                }
                if ancestors.len() > MAX_DEPTH {
                    return Err(ImageError::Parse(format!(
                        "Directory nesting deeper than {} levels: {}",
                        MAX_DEPTH, path
                    )));
                }
                ancestors.push(current.extent_location);
            }
        }

        Ok(current)
    }

    fn to_entry(&self, parent: &str, record: &DirectoryRecord) -> ImageEntry {
        ImageEntry {
            path: join_path(parent, &record.name(self.descriptor.hierarchy)),
            is_directory: record.is_directory(),
            size: if record.is_directory() {
                0
            } else {
                record.data_length as u64
            },
        }
    }
}

impl<R: Read + Seek> ImageDecoder for DiscImage<R> {
    fn list_entries(&mut self, path: &str) -> Result<Vec<ImageEntry>, ImageError> {
        let dir = self.resolve(path)?;
        if !dir.is_directory() {
            return Err(ImageError::NotADirectory(path.to_string()));
        }

        let parent = path.trim_matches('/');
        let records = self.read_directory(&dir)?;
        Ok(records
            .iter()
            .map(|record| self.to_entry(parent, record))
            .collect())
    }

    fn attributes(&mut self, path: &str) -> Result<ImageEntry, ImageError> {
        let record = self.resolve(path)?;
        let trimmed = path.trim_matches('/');
        let parent = trimmed.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
        if trimmed.is_empty() {
            return Ok(ImageEntry {
                path: String::new(),
                is_directory: true,
                size: 0,
            });
        }
        Ok(self.to_entry(parent, &record))
    }

    fn open_file(&mut self, path: &str) -> Result<Box<dyn Read + '_>, ImageError> {
        let record = self.resolve(path)?;
        if record.is_directory() {
            return Err(ImageError::NotAFile(path.to_string()));
        }

        self.inner
            .seek(SeekFrom::Start(record.extent_location as u64 * SECTOR_SIZE))?;
        Ok(Box::new((&mut self.inner).take(record.data_length as u64)))
    }

    fn volume_name(&self) -> Option<&str> {
        if self.descriptor.volume_id.is_empty() {
            None
        } else {
            Some(&self.descriptor.volume_id)
        }
    }
}

fn read_sectors<R: Read + Seek>(inner: &mut R, start_lba: u64, count: u64) -> Result<Vec<u8>, ImageError> {
    inner.seek(SeekFrom::Start(start_lba * SECTOR_SIZE))?;
    let mut buffer = vec![0u8; (count * SECTOR_SIZE) as usize];
    inner.read_exact(&mut buffer)?;
    Ok(buffer)
}

/// Parse a single directory record
fn parse_directory_record(data: &[u8]) -> Option<DirectoryRecord> {
    if data.len() < 34 || data[0] == 0 {
        return None;
    }

    let extent_location = read_le_u32(&data[2..6]);
    let data_length = read_le_u32(&data[10..14]);
    let file_flags = data[25];
    let identifier_length = data[32] as usize;

    if data.len() < 33 + identifier_length {
        return None;
    }

    Some(DirectoryRecord {
        extent_location,
        data_length,
        file_flags,
        identifier: data[33..33 + identifier_length].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disc::descriptor::put_both_u32;
    use crate::disc::image::{EncoderOptions, ImageEncoder};
    use crate::disc::writer::IsoWriter;
    use std::fs;
    use std::io::Cursor;

    fn sample_image(use_joliet: bool) -> Cursor<Vec<u8>> {
        let dir = tempfile::tempdir().unwrap();
        let readme = dir.path().join("readme.txt");
        let report = dir.path().join("Quarterly Report 2024.txt");
        fs::write(&readme, b"hello disc").unwrap();
        fs::write(&report, vec![7u8; 5000]).unwrap();

        let mut writer = IsoWriter::new(EncoderOptions {
            use_joliet,
            volume_label: "SAMPLE".to_string(),
        });
        writer.add_directory("docs").unwrap();
        writer.add_directory("docs/empty").unwrap();
        writer.add_file("readme.txt", &readme).unwrap();
        writer.add_file("docs/Quarterly Report 2024.txt", &report).unwrap();

        let mut out = Vec::new();
        writer.build(&mut out).unwrap();
        Cursor::new(out)
    }

    #[test]
    fn test_joliet_listing_keeps_long_names() {
        let mut image = DiscImage::new(sample_image(true)).unwrap();
        assert_eq!(image.hierarchy(), Hierarchy::Joliet);
        assert_eq!(image.volume_name(), Some("SAMPLE"));

        let root = image.list_entries("").unwrap();
        let names: Vec<&str> = root.iter().map(|e| e.raw_name()).collect();
        assert!(names.contains(&"docs"));
        assert!(names.contains(&"readme.txt;1"));

        let docs = image.list_entries("docs").unwrap();
        let report = docs
            .iter()
            .find(|e| e.raw_name() == "Quarterly Report 2024.txt;1")
            .unwrap();
        assert_eq!(report.size, 5000);
        assert_eq!(report.path, "docs/Quarterly Report 2024.txt;1");
    }

    #[test]
    fn test_primary_hierarchy_uses_dchars() {
        let mut image = DiscImage::new(sample_image(false)).unwrap();
        assert_eq!(image.hierarchy(), Hierarchy::Primary);

        let root = image.list_entries("").unwrap();
        let names: Vec<&str> = root.iter().map(|e| e.raw_name()).collect();
        assert!(names.contains(&"DOCS"));
        assert!(names.contains(&"README.TXT;1"));
    }

    #[test]
    fn test_open_file_reads_exact_bytes() {
        let mut image = DiscImage::new(sample_image(true)).unwrap();
        let mut data = Vec::new();
        image
            .open_file("readme.txt;1")
            .unwrap()
            .read_to_end(&mut data)
            .unwrap();
        assert_eq!(data, b"hello disc");
    }

    #[test]
    fn test_resolve_without_version_suffix() {
        let mut image = DiscImage::new(sample_image(true)).unwrap();
        let entry = image.attributes("README.TXT").unwrap();
        assert!(!entry.is_directory);
        assert_eq!(entry.size, 10);
    }

    #[test]
    fn test_empty_directory_lists_nothing() {
        let mut image = DiscImage::new(sample_image(true)).unwrap();
        assert!(image.list_entries("docs/empty").unwrap().is_empty());
    }

    #[test]
    fn test_errors() {
        let mut image = DiscImage::new(sample_image(true)).unwrap();
        assert!(matches!(
            image.list_entries("missing"),
            Err(ImageError::NotFound(_))
        ));
        assert!(matches!(
            image.list_entries("readme.txt;1"),
            Err(ImageError::NotADirectory(_))
        ));
        assert!(matches!(image.open_file("docs"), Err(ImageError::NotAFile(_))));
    }

    /// Primary-only image whose directory `A` points back at the root extent
    fn looping_image() -> Cursor<Vec<u8>> {
        let mut writer = IsoWriter::new(EncoderOptions {
            use_joliet: false,
            volume_label: "LOOP".to_string(),
        });
        writer.add_directory("A").unwrap();
        let mut out = Vec::new();
        writer.build(&mut out).unwrap();

        let root_record = FIRST_DESCRIPTOR_SECTOR as usize * 2048 + 156;
        let root_lba = read_le_u32(&out[root_record + 2..root_record + 6]);
        // ".", ".." then "A"
        let a_record = root_lba as usize * 2048 + 68;
        assert_eq!(&out[a_record + 33..a_record + 34], b"A");
        put_both_u32(&mut out, a_record + 2, root_lba);
        Cursor::new(out)
    }

    #[test]
    fn test_directory_looping_to_ancestor_is_an_error() {
        let mut image = DiscImage::new(looping_image()).unwrap();
        assert_eq!(image.list_entries("").unwrap().len(), 1);
        assert!(matches!(image.list_entries("A"), Err(ImageError::Parse(_))));
        assert!(matches!(image.attributes("A/A"), Err(ImageError::Parse(_))));
    }

    #[test]
    fn test_not_an_image() {
        let data = Cursor::new(vec![0u8; 40 * 2048]);
        assert!(DiscImage::new(data).is_err());
    }
}
