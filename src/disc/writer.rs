//! ISO 9660 image writer
//!
//! Collects directories and files, then lays out and streams a complete image:
//! system area, volume descriptors, path tables, directory extents and file
//! data. With Joliet enabled a second directory hierarchy with UCS-2 names is
//! written; both hierarchies point at the same file extents.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use super::descriptor::{
    descriptor_timestamp, directory_timestamp, encode_ucs2, put_ascii_field, put_both_u16,
    put_both_u32, put_ucs2_field, unspecified_timestamp, Hierarchy, FIRST_DESCRIPTOR_SECTOR,
    FLAG_DIRECTORY, ISO9660_IDENTIFIER, ROOT_RECORD_OFFSET, SECTOR_SIZE, TYPE_PRIMARY,
    TYPE_SUPPLEMENTARY, TYPE_TERMINATOR,
};
use super::image::{path_components, EncoderOptions, ImageEncoder, ImageError};

const SECTOR: usize = SECTOR_SIZE as usize;

/// Longest primary file identifier before the `;1` version
const PRIMARY_NAME_LEN: usize = 30;

/// Longest primary directory identifier
const PRIMARY_DIR_LEN: usize = 31;

/// Longest primary extension kept
const PRIMARY_EXT_LEN: usize = 8;

/// Longest Joliet identifier in UTF-16 units
const JOLIET_NAME_UNITS: usize = 64;

/// Extensions longer than this are folded into the stem for Joliet names
const JOLIET_EXT_UNITS: usize = 16;

const APPLICATION_ID: &str = "ISO-STAGER";

/// Writes ISO 9660 images, optionally with a Joliet hierarchy
pub struct IsoWriter {
    options: EncoderOptions,
    root: SourceDir,
    /// Local source of every registered file, indexed by registration order
    sources: Vec<PathBuf>,
}

#[derive(Default)]
struct SourceDir {
    dirs: BTreeMap<String, SourceDir>,
    files: BTreeMap<String, usize>,
}

impl SourceDir {
    fn dir_mut(&mut self, components: &[&str]) -> Option<&mut SourceDir> {
        let mut current = self;
        for component in components {
            current = current.dirs.get_mut(*component)?;
        }
        Some(current)
    }

    fn contains(&self, name: &str) -> bool {
        self.dirs.contains_key(name) || self.files.contains_key(name)
    }
}

/// Where a directory record points
#[derive(Debug, Clone, Copy)]
enum Target {
    Dir(usize),
    File(usize),
}

#[derive(Debug)]
struct RecordRef {
    identifier: Vec<u8>,
    target: Target,
}

/// A directory as laid out in one hierarchy
#[derive(Debug)]
struct DirLayout {
    identifier: Vec<u8>,
    parent: usize,
    entries: Vec<RecordRef>,
    size: u32,
    lba: u32,
}

/// One complete directory hierarchy, in path table order
#[derive(Debug)]
struct HierarchyLayout {
    kind: Hierarchy,
    dirs: Vec<DirLayout>,
    path_table_size: u32,
    l_table_lba: u32,
    m_table_lba: u32,
}

#[derive(Debug, Clone, Copy)]
struct FileExtent {
    lba: u32,
    size: u32,
}

impl IsoWriter {
    /// Create an empty writer
    pub fn new(options: EncoderOptions) -> Self {
        Self {
            options,
            root: SourceDir::default(),
            sources: Vec::new(),
        }
    }

    /// Number of files registered so far
    pub fn file_count(&self) -> usize {
        self.sources.len()
    }

    /// Stat every registered file, rejecting sizes a single extent cannot hold
    fn file_sizes(&self) -> Result<Vec<u32>, ImageError> {
        self.sources
            .iter()
            .map(|source| {
                let size = std::fs::metadata(source)?.len();
                u32::try_from(size).map_err(|_| ImageError::FileTooLarge {
                    path: source.display().to_string(),
                    size,
                })
            })
            .collect()
    }
}

impl ImageEncoder for IsoWriter {
    fn add_directory(&mut self, iso_path: &str) -> Result<(), ImageError> {
        let components = validate_path(iso_path)?;

        let mut current = &mut self.root;
        for component in components {
            if current.files.contains_key(component) {
                return Err(ImageError::InvalidPath(format!(
                    "{} collides with a file",
                    iso_path
                )));
            }
            current = current.dirs.entry(component.to_string()).or_default();
        }
        Ok(())
    }

    fn add_file(&mut self, iso_path: &str, source: &Path) -> Result<(), ImageError> {
        let components = validate_path(iso_path)?;
        let (name, parents) = components
            .split_last()
            .ok_or_else(|| ImageError::InvalidPath(iso_path.to_string()))?;

        let index = self.sources.len();
        let parent = self.root.dir_mut(parents).ok_or_else(|| {
            ImageError::NotFound(format!("parent directory '{}' not declared", parents.join("/")))
        })?;

        if parent.contains(name) {
            return Err(ImageError::InvalidPath(format!("{} already exists", iso_path)));
        }

        parent.files.insert(name.to_string(), index);
        self.sources.push(source.to_path_buf());
        Ok(())
    }

    fn build(&mut self, output: &mut dyn Write) -> Result<(), ImageError> {
        let now = Local::now();
        let sizes = self.file_sizes()?;

        let mut hierarchies = vec![lay_out(&self.root, Hierarchy::Primary)];
        if self.options.use_joliet {
            hierarchies.push(lay_out(&self.root, Hierarchy::Joliet));
        }
        check_directory_count(hierarchies[0].dirs.len())?;

        // Descriptors: primary, optional Joliet, terminator
        let mut next_lba = FIRST_DESCRIPTOR_SECTOR + hierarchies.len() as u64 + 1;

        for layout in hierarchies.iter_mut() {
            let sectors = sectors_for(layout.path_table_size as u64);
            layout.l_table_lba = to_lba(next_lba)?;
            next_lba += sectors;
            layout.m_table_lba = to_lba(next_lba)?;
            next_lba += sectors;
        }

        for layout in hierarchies.iter_mut() {
            for dir in layout.dirs.iter_mut() {
                dir.lba = to_lba(next_lba)?;
                next_lba += sectors_for(dir.size as u64);
            }
        }

        let mut extents = Vec::with_capacity(sizes.len());
        for &size in &sizes {
            extents.push(FileExtent {
                lba: to_lba(next_lba)?,
                size,
            });
            next_lba += sectors_for(size as u64);
        }

        let volume_space = to_lba(next_lba)?;
        log::info!(
            "Encoding '{}': {} directories, {} files, {} sectors",
            self.options.volume_label,
            hierarchies[0].dirs.len(),
            self.sources.len(),
            volume_space
        );

        let mut out = SectorWriter::new(output);
        out.write_zeros(FIRST_DESCRIPTOR_SECTOR as usize * SECTOR)?;

        for layout in &hierarchies {
            let descriptor = volume_descriptor(layout, volume_space, &self.options.volume_label, &now);
            out.write_all(&descriptor)?;
        }
        out.write_all(&terminator())?;

        for layout in &hierarchies {
            out.write_all(&path_table(layout, false))?;
            out.pad_to_sector()?;
            out.write_all(&path_table(layout, true))?;
            out.pad_to_sector()?;
        }

        let stamp = directory_timestamp(&now);
        for layout in &hierarchies {
            for index in 0..layout.dirs.len() {
                debug_assert_eq!(out.lba(), layout.dirs[index].lba as u64);
                out.write_all(&directory_extent(layout, index, &extents, &stamp))?;
            }
        }

        for (source, extent) in self.sources.iter().zip(&extents) {
            debug_assert!(extent.size == 0 || out.lba() == extent.lba as u64);
            let file = File::open(source)?;
            let copied = io::copy(&mut file.take(extent.size as u64), &mut out)?;
            if copied != extent.size as u64 {
                return Err(ImageError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{} shrank while building the image", source.display()),
                )));
            }
            out.pad_to_sector()?;
        }

        out.flush()?;
        Ok(())
    }
}

/// Split and check an internal path
fn validate_path(iso_path: &str) -> Result<Vec<&str>, ImageError> {
    let components: Vec<&str> = path_components(iso_path).collect();
    if components.is_empty() || components.iter().any(|c| *c == "." || *c == "..") {
        return Err(ImageError::InvalidPath(iso_path.to_string()));
    }
    Ok(components)
}

/// Path table directory numbers are 16-bit
fn check_directory_count(count: usize) -> Result<(), ImageError> {
    if count > u16::MAX as usize {
        return Err(ImageError::Parse(format!(
            "{} directories exceed the path table limit of {}",
            count,
            u16::MAX
        )));
    }
    Ok(())
}

fn sectors_for(bytes: u64) -> u64 {
    bytes.div_ceil(SECTOR_SIZE)
}

fn to_lba(sector: u64) -> Result<u32, ImageError> {
    u32::try_from(sector)
        .map_err(|_| ImageError::Parse("image exceeds the ISO 9660 volume size limit".to_string()))
}

/// Breadth-first layout so directory numbers follow path table order
fn lay_out(root: &SourceDir, kind: Hierarchy) -> HierarchyLayout {
    let mut dirs = vec![DirLayout {
        identifier: vec![0],
        parent: 0,
        entries: Vec::new(),
        size: 0,
        lba: 0,
    }];

    let mut queue = VecDeque::from([(root, 0usize)]);
    while let Some((source, index)) = queue.pop_front() {
        let mut used = HashSet::new();
        let mut entries = Vec::new();

        let mut child_dirs: Vec<(Vec<u8>, &SourceDir)> = source
            .dirs
            .iter()
            .map(|(name, child)| (unique_identifier(name, true, kind, &mut used), child))
            .collect();
        child_dirs.sort_by(|a, b| a.0.cmp(&b.0));

        for (identifier, child) in child_dirs {
            let child_index = dirs.len();
            dirs.push(DirLayout {
                identifier: identifier.clone(),
                parent: index,
                entries: Vec::new(),
                size: 0,
                lba: 0,
            });
            entries.push(RecordRef {
                identifier,
                target: Target::Dir(child_index),
            });
            queue.push_back((child, child_index));
        }

        for (name, &file) in &source.files {
            entries.push(RecordRef {
                identifier: unique_identifier(name, false, kind, &mut used),
                target: Target::File(file),
            });
        }

        entries.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        dirs[index].size = directory_size(&entries);
        dirs[index].entries = entries;
    }

    let path_table_size = dirs
        .iter()
        .map(|d| 8 + d.identifier.len() as u32 + (d.identifier.len() as u32 % 2))
        .sum();

    HierarchyLayout {
        kind,
        dirs,
        path_table_size,
        l_table_lba: 0,
        m_table_lba: 0,
    }
}

fn record_len(identifier_len: usize) -> usize {
    33 + identifier_len + usize::from(identifier_len % 2 == 0)
}

/// Records never straddle a sector boundary
fn place_record(offset: usize, len: usize) -> usize {
    if offset % SECTOR + len > SECTOR {
        offset.next_multiple_of(SECTOR)
    } else {
        offset
    }
}

fn directory_size(entries: &[RecordRef]) -> u32 {
    let mut offset = 2 * record_len(1);
    for entry in entries {
        let len = record_len(entry.identifier.len());
        offset = place_record(offset, len) + len;
    }
    offset.next_multiple_of(SECTOR) as u32
}

fn directory_record(identifier: &[u8], lba: u32, size: u32, is_dir: bool, stamp: &[u8; 7]) -> Vec<u8> {
    let len = record_len(identifier.len());
    let mut record = vec![0u8; len];
    record[0] = len as u8;
    put_both_u32(&mut record, 2, lba);
    put_both_u32(&mut record, 10, size);
    record[18..25].copy_from_slice(stamp);
    record[25] = if is_dir { FLAG_DIRECTORY } else { 0 };
    put_both_u16(&mut record, 28, 1);
    record[32] = identifier.len() as u8;
    record[33..33 + identifier.len()].copy_from_slice(identifier);
    record
}

fn directory_extent(layout: &HierarchyLayout, index: usize, files: &[FileExtent], stamp: &[u8; 7]) -> Vec<u8> {
    let dir = &layout.dirs[index];
    let parent = &layout.dirs[dir.parent];
    let mut data = vec![0u8; dir.size as usize];

    let mut records = vec![
        directory_record(&[0], dir.lba, dir.size, true, stamp),
        directory_record(&[1], parent.lba, parent.size, true, stamp),
    ];
    for entry in &dir.entries {
        let record = match entry.target {
            Target::Dir(child) => {
                let child = &layout.dirs[child];
                directory_record(&entry.identifier, child.lba, child.size, true, stamp)
            }
            Target::File(file) => {
                let extent = files[file];
                directory_record(&entry.identifier, extent.lba, extent.size, false, stamp)
            }
        };
        records.push(record);
    }

    let mut offset = 0;
    for record in records {
        offset = place_record(offset, record.len());
        data[offset..offset + record.len()].copy_from_slice(&record);
        offset += record.len();
    }
    data
}

fn path_table(layout: &HierarchyLayout, big_endian: bool) -> Vec<u8> {
    let mut table = Vec::with_capacity(layout.path_table_size as usize);
    for dir in &layout.dirs {
        // Directory numbers are 1-based; the root is its own parent. The
        // count was checked before layout was written.
        let parent_number = (dir.parent + 1) as u16;
        table.push(dir.identifier.len() as u8);
        table.push(0);
        if big_endian {
            table.extend_from_slice(&dir.lba.to_be_bytes());
            table.extend_from_slice(&parent_number.to_be_bytes());
        } else {
            table.extend_from_slice(&dir.lba.to_le_bytes());
            table.extend_from_slice(&parent_number.to_le_bytes());
        }
        table.extend_from_slice(&dir.identifier);
        if dir.identifier.len() % 2 == 1 {
            table.push(0);
        }
    }
    table
}

fn volume_descriptor(layout: &HierarchyLayout, volume_space: u32, label: &str, now: &DateTime<Local>) -> Vec<u8> {
    let mut sector = vec![0u8; SECTOR];
    let joliet = layout.kind == Hierarchy::Joliet;

    sector[0] = if joliet { TYPE_SUPPLEMENTARY } else { TYPE_PRIMARY };
    sector[1..6].copy_from_slice(ISO9660_IDENTIFIER);
    sector[6] = 1;

    let text_field = |field: &mut [u8], text: &str| {
        if joliet {
            put_ucs2_field(field, text)
        } else {
            put_ascii_field(field, text)
        }
    };

    text_field(&mut sector[8..40], "");
    if joliet {
        put_ucs2_field(&mut sector[40..72], &truncate_chars(label, 16));
        sector[88..91].copy_from_slice(b"%/E");
    } else {
        put_ascii_field(&mut sector[40..72], &d_chars(label));
    }

    put_both_u32(&mut sector, 80, volume_space);
    put_both_u16(&mut sector, 120, 1);
    put_both_u16(&mut sector, 124, 1);
    put_both_u16(&mut sector, 128, SECTOR as u16);
    put_both_u32(&mut sector, 132, layout.path_table_size);
    sector[140..144].copy_from_slice(&layout.l_table_lba.to_le_bytes());
    sector[148..152].copy_from_slice(&layout.m_table_lba.to_be_bytes());

    let root = &layout.dirs[0];
    let stamp = directory_timestamp(now);
    let root_record = directory_record(&[0], root.lba, root.size, true, &stamp);
    sector[ROOT_RECORD_OFFSET..ROOT_RECORD_OFFSET + root_record.len()].copy_from_slice(&root_record);

    text_field(&mut sector[190..318], "");
    text_field(&mut sector[318..446], "");
    text_field(&mut sector[446..574], "");
    text_field(&mut sector[574..702], APPLICATION_ID);
    text_field(&mut sector[702..739], "");
    text_field(&mut sector[739..776], "");
    text_field(&mut sector[776..813], "");

    let created = descriptor_timestamp(now);
    sector[813..830].copy_from_slice(&created);
    sector[830..847].copy_from_slice(&created);
    sector[847..864].copy_from_slice(&unspecified_timestamp());
    sector[864..881].copy_from_slice(&unspecified_timestamp());
    sector[881] = 1;

    sector
}

fn terminator() -> Vec<u8> {
    let mut sector = vec![0u8; SECTOR];
    sector[0] = TYPE_TERMINATOR;
    sector[1..6].copy_from_slice(ISO9660_IDENTIFIER);
    sector[6] = 1;
    sector
}

/// Pick an identifier not yet used in the directory, adding `~N` on collision
fn unique_identifier(name: &str, is_dir: bool, kind: Hierarchy, used: &mut HashSet<Vec<u8>>) -> Vec<u8> {
    let mut attempt = 0u32;
    loop {
        let suffix = if attempt == 0 {
            String::new()
        } else {
            format!("~{}", attempt)
        };
        let identifier = match kind {
            Hierarchy::Primary => primary_identifier(name, is_dir, &suffix).into_bytes(),
            Hierarchy::Joliet => encode_ucs2(&joliet_identifier(name, is_dir, &suffix)),
        };
        if used.insert(identifier.clone()) {
            return identifier;
        }
        attempt += 1;
    }
}

/// Map to upper-case d-characters (A-Z, 0-9, _)
fn d_chars(text: &str) -> String {
    text.chars()
        .map(|c| {
            let c = c.to_ascii_uppercase();
            if c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(index) if index > 0 => (&name[..index], &name[index + 1..]),
        _ => (name, ""),
    }
}

fn primary_identifier(name: &str, is_dir: bool, suffix: &str) -> String {
    if is_dir {
        let room = PRIMARY_DIR_LEN.saturating_sub(suffix.len());
        return format!("{}{}", truncate_chars(&d_chars(name), room), suffix);
    }

    let (stem, ext) = split_extension(name);
    let ext = truncate_chars(&d_chars(ext), PRIMARY_EXT_LEN);
    let room = PRIMARY_NAME_LEN.saturating_sub(1 + ext.len() + suffix.len());
    format!("{}{}.{};1", truncate_chars(&d_chars(stem), room), suffix, ext)
}

fn truncate_utf16(text: &str, max_units: usize) -> String {
    let mut units = 0;
    text.chars()
        .take_while(|c| {
            units += c.len_utf16();
            units <= max_units
        })
        .collect()
}

fn joliet_identifier(name: &str, is_dir: bool, suffix: &str) -> String {
    let clean: String = name
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '*' | '/' | ':' | ';' | '?' | '\\') {
                '_'
            } else {
                c
            }
        })
        .collect();

    let version = if is_dir { "" } else { ";1" };
    let (stem, ext) = if is_dir {
        (clean.as_str(), "")
    } else {
        let (stem, ext) = split_extension(&clean);
        if ext.is_empty() || ext.encode_utf16().count() > JOLIET_EXT_UNITS {
            (clean.as_str(), "")
        } else {
            (stem, ext)
        }
    };
    let dot = if ext.is_empty() { "" } else { "." };

    let reserved = suffix.len() + version.len() + dot.len() + ext.encode_utf16().count();
    let room = JOLIET_NAME_UNITS.saturating_sub(reserved);
    format!("{}{}{}{}{}", truncate_utf16(stem, room), suffix, dot, ext, version)
}

/// Output wrapper that tracks the current sector position
struct SectorWriter<'a> {
    inner: &'a mut dyn Write,
    written: u64,
}

impl<'a> SectorWriter<'a> {
    fn new(inner: &'a mut dyn Write) -> Self {
        Self { inner, written: 0 }
    }

    fn lba(&self) -> u64 {
        self.written / SECTOR_SIZE
    }

    fn write_zeros(&mut self, count: usize) -> io::Result<()> {
        let zeros = [0u8; SECTOR];
        let mut remaining = count;
        while remaining > 0 {
            let chunk = remaining.min(SECTOR);
            self.write_all(&zeros[..chunk])?;
            remaining -= chunk;
        }
        Ok(())
    }

    fn pad_to_sector(&mut self) -> io::Result<()> {
        let rem = (self.written % SECTOR_SIZE) as usize;
        if rem != 0 {
            self.write_zeros(SECTOR - rem)?;
        }
        Ok(())
    }
}

impl Write for SectorWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_identifiers() {
        assert_eq!(primary_identifier("readme.txt", false, ""), "README.TXT;1");
        assert_eq!(primary_identifier("My Docs", true, ""), "MY_DOCS");
        assert_eq!(primary_identifier("Makefile", false, ""), "MAKEFILE.;1");
        assert_eq!(primary_identifier("a.tar.gz", false, "~1"), "A_TAR~1.GZ;1");

        let long = primary_identifier(&"x".repeat(80), false, "");
        assert!(long.len() <= PRIMARY_NAME_LEN + 2);
    }

    #[test]
    fn test_joliet_identifiers() {
        assert_eq!(joliet_identifier("Résumé.pdf", false, ""), "Résumé.pdf;1");
        assert_eq!(joliet_identifier("a:b", true, ""), "a_b");
        assert_eq!(joliet_identifier("report.txt", false, "~2"), "report~2.txt;1");

        let long = joliet_identifier(&"y".repeat(200), false, "");
        assert_eq!(long.encode_utf16().count(), JOLIET_NAME_UNITS);
        assert!(long.ends_with(";1"));
    }

    #[test]
    fn test_collisions_get_distinct_identifiers() {
        let mut used = HashSet::new();
        let a = unique_identifier("a b.txt", false, Hierarchy::Primary, &mut used);
        let b = unique_identifier("a_b.txt", false, Hierarchy::Primary, &mut used);
        assert_eq!(a, b"A_B.TXT;1".to_vec());
        assert_eq!(b, b"A_B~1.TXT;1".to_vec());
    }

    #[test]
    fn test_records_do_not_straddle_sectors() {
        assert_eq!(place_record(2040, 34), SECTOR);
        assert_eq!(place_record(100, 34), 100);
        assert_eq!(record_len(1), 34);
        assert_eq!(record_len(12), 46);
    }

    #[test]
    fn test_file_requires_declared_parent() {
        let mut writer = IsoWriter::new(EncoderOptions::default());
        let err = writer.add_file("missing/a.txt", Path::new("/tmp/a.txt"));
        assert!(matches!(err, Err(ImageError::NotFound(_))));

        writer.add_directory("present").unwrap();
        writer.add_file("present/a.txt", Path::new("/tmp/a.txt")).unwrap();
        assert_eq!(writer.file_count(), 1);
    }

    #[test]
    fn test_invalid_paths_rejected() {
        let mut writer = IsoWriter::new(EncoderOptions::default());
        assert!(writer.add_directory("").is_err());
        assert!(writer.add_directory("a/../b").is_err());

        writer.add_directory("a").unwrap();
        writer.add_file("a/f", Path::new("/tmp/f")).unwrap();
        assert!(writer.add_file("a/f", Path::new("/tmp/f")).is_err());
        assert!(writer.add_directory("a/f").is_err());
    }

    #[test]
    fn test_directory_count_limited_by_path_table() {
        assert!(check_directory_count(u16::MAX as usize).is_ok());
        assert!(matches!(
            check_directory_count(u16::MAX as usize + 1),
            Err(ImageError::Parse(_))
        ));
    }

    #[test]
    fn test_empty_image_layout() {
        let mut writer = IsoWriter::new(EncoderOptions {
            use_joliet: true,
            volume_label: "EMPTY".to_string(),
        });
        let mut out = Vec::new();
        writer.build(&mut out).unwrap();

        // 16 system sectors, PVD, SVD, terminator, 4 path table sectors, 2 root extents
        assert_eq!(out.len(), 25 * SECTOR);
        assert_eq!(&out[16 * SECTOR + 1..16 * SECTOR + 6], ISO9660_IDENTIFIER);
        assert_eq!(out[17 * SECTOR], TYPE_SUPPLEMENTARY);
        assert_eq!(out[18 * SECTOR], TYPE_TERMINATOR);
    }
}
