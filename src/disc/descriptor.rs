//! ISO 9660 volume descriptors
//!
//! Parsing of the primary and Joliet supplementary volume descriptors, plus the
//! field encoders shared with the image writer. Layouts follow ECMA-119.

use chrono::{DateTime, Datelike, Local, Timelike};

use super::image::ImageError;

/// ISO 9660 logical sector size in bytes
pub const SECTOR_SIZE: u64 = 2048;

/// Sector number of the first volume descriptor
pub const FIRST_DESCRIPTOR_SECTOR: u64 = 16;

/// Standard identifier present in every volume descriptor
pub const ISO9660_IDENTIFIER: &[u8; 5] = b"CD001";

pub const TYPE_PRIMARY: u8 = 1;
pub const TYPE_SUPPLEMENTARY: u8 = 2;
pub const TYPE_TERMINATOR: u8 = 255;

/// Joliet escape sequences for UCS-2 levels 1, 2 and 3
pub const JOLIET_ESCAPES: [&[u8; 3]; 3] = [b"%/@", b"%/C", b"%/E"];

/// Offset of the root directory record inside a descriptor
pub const ROOT_RECORD_OFFSET: usize = 156;

/// File flag bit marking a directory record
pub const FLAG_DIRECTORY: u8 = 0x02;

/// Which naming scheme a descriptor's hierarchy uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hierarchy {
    /// Plain ISO 9660 d-character names
    Primary,
    /// Joliet UCS-2 big-endian names
    Joliet,
}

/// The parts of a volume descriptor needed to walk its hierarchy
#[derive(Debug, Clone)]
pub struct VolumeDescriptor {
    pub hierarchy: Hierarchy,
    /// Volume identifier, trimmed
    pub volume_id: String,
    /// Root directory extent (LBA)
    pub root_location: u32,
    /// Root directory size in bytes
    pub root_size: u32,
}

impl VolumeDescriptor {
    /// Parse a primary or Joliet supplementary descriptor from a raw sector
    ///
    /// Returns `Ok(None)` for descriptor types that carry no hierarchy we
    /// browse (boot records, non-Joliet supplementary descriptors, partitions).
    pub fn parse(sector: &[u8]) -> Result<Option<Self>, ImageError> {
        if sector.len() < SECTOR_SIZE as usize {
            return Err(ImageError::Parse(format!(
                "Sector too small: {} bytes (expected {})",
                sector.len(),
                SECTOR_SIZE
            )));
        }

        if &sector[1..6] != ISO9660_IDENTIFIER {
            return Err(ImageError::Parse(
                "Invalid ISO 9660 identifier (expected 'CD001')".to_string(),
            ));
        }

        let hierarchy = match sector[0] {
            TYPE_PRIMARY => Hierarchy::Primary,
            TYPE_SUPPLEMENTARY if is_joliet_escape(&sector[88..91]) => Hierarchy::Joliet,
            _ => return Ok(None),
        };

        let volume_id = match hierarchy {
            Hierarchy::Primary => extract_string(&sector[40..72]),
            Hierarchy::Joliet => decode_ucs2(&sector[40..72])
                .trim_end_matches([' ', '\0'])
                .to_string(),
        };

        let root = &sector[ROOT_RECORD_OFFSET..ROOT_RECORD_OFFSET + 34];

        Ok(Some(Self {
            hierarchy,
            volume_id,
            root_location: read_le_u32(&root[2..6]),
            root_size: read_le_u32(&root[10..14]),
        }))
    }
}

fn is_joliet_escape(bytes: &[u8]) -> bool {
    JOLIET_ESCAPES.iter().any(|esc| bytes == &esc[..])
}

/// Extract a string from a byte slice, trimming trailing spaces and nulls
pub fn extract_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches([' ', '\0'])
        .to_string()
}

/// Decode big-endian UCS-2 bytes; unpaired surrogates become U+FFFD
pub fn decode_ucs2(bytes: &[u8]) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Encode a string as big-endian UCS-2 (UTF-16 code units)
pub fn encode_ucs2(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|unit| unit.to_be_bytes()).collect()
}

pub fn read_le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Write a both-byte-order 32-bit field (8 bytes)
pub fn put_both_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    buf[offset + 4..offset + 8].copy_from_slice(&value.to_be_bytes());
}

/// Write a both-byte-order 16-bit field (4 bytes)
pub fn put_both_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    buf[offset + 2..offset + 4].copy_from_slice(&value.to_be_bytes());
}

/// Fill `field` with `text` padded by ASCII spaces
pub fn put_ascii_field(field: &mut [u8], text: &str) {
    field.fill(b' ');
    let bytes = text.as_bytes();
    let len = bytes.len().min(field.len());
    field[..len].copy_from_slice(&bytes[..len]);
}

/// Fill `field` with UCS-2 `text` padded by UCS-2 spaces
pub fn put_ucs2_field(field: &mut [u8], text: &str) {
    for pair in field.chunks_exact_mut(2) {
        pair.copy_from_slice(&[0x00, 0x20]);
    }
    let encoded = encode_ucs2(text);
    let len = encoded.len().min(field.len()) & !1;
    field[..len].copy_from_slice(&encoded[..len]);
}

/// 7-byte recording timestamp used in directory records
pub fn directory_timestamp(time: &DateTime<Local>) -> [u8; 7] {
    let offset_quarters = time.offset().local_minus_utc() / 900;
    [
        (time.year() - 1900).clamp(0, 255) as u8,
        time.month() as u8,
        time.day() as u8,
        time.hour() as u8,
        time.minute() as u8,
        time.second() as u8,
        offset_quarters as i8 as u8,
    ]
}

/// 17-byte decimal timestamp used in volume descriptors
pub fn descriptor_timestamp(time: &DateTime<Local>) -> [u8; 17] {
    let mut out = [0u8; 17];
    let digits = format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}00",
        time.year().clamp(0, 9999),
        time.month(),
        time.day(),
        time.hour(),
        time.minute(),
        time.second()
    );
    out[..16].copy_from_slice(&digits.as_bytes()[..16]);
    out[16] = (time.offset().local_minus_utc() / 900) as i8 as u8;
    out
}

/// Descriptor timestamp meaning "not specified"
pub fn unspecified_timestamp() -> [u8; 17] {
    let mut out = [b'0'; 17];
    out[16] = 0;
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_descriptor(kind: u8) -> Vec<u8> {
        let mut sector = vec![0u8; SECTOR_SIZE as usize];
        sector[0] = kind;
        sector[1..6].copy_from_slice(ISO9660_IDENTIFIER);
        sector[6] = 1;

        // Root directory record: extent 20, size 2048
        let root = &mut sector[ROOT_RECORD_OFFSET..ROOT_RECORD_OFFSET + 34];
        root[0] = 34;
        put_both_u32(root, 2, 20);
        put_both_u32(root, 10, 2048);
        root[25] = FLAG_DIRECTORY;
        root[32] = 1;

        sector
    }

    #[test]
    fn test_parse_primary() {
        let mut sector = create_test_descriptor(TYPE_PRIMARY);
        put_ascii_field(&mut sector[40..72], "TEST_VOLUME");

        let vd = VolumeDescriptor::parse(&sector).unwrap().unwrap();
        assert_eq!(vd.hierarchy, Hierarchy::Primary);
        assert_eq!(vd.volume_id, "TEST_VOLUME");
        assert_eq!(vd.root_location, 20);
        assert_eq!(vd.root_size, 2048);
    }

    #[test]
    fn test_parse_joliet() {
        let mut sector = create_test_descriptor(TYPE_SUPPLEMENTARY);
        sector[88..91].copy_from_slice(b"%/E");
        put_ucs2_field(&mut sector[40..72], "Backup");

        let vd = VolumeDescriptor::parse(&sector).unwrap().unwrap();
        assert_eq!(vd.hierarchy, Hierarchy::Joliet);
        assert_eq!(vd.volume_id, "Backup");
    }

    #[test]
    fn test_supplementary_without_escape_is_skipped() {
        let sector = create_test_descriptor(TYPE_SUPPLEMENTARY);
        assert!(VolumeDescriptor::parse(&sector).unwrap().is_none());
    }

    #[test]
    fn test_invalid_identifier() {
        let mut sector = create_test_descriptor(TYPE_PRIMARY);
        sector[1..6].copy_from_slice(b"XXXXX");
        assert!(VolumeDescriptor::parse(&sector).is_err());
    }

    #[test]
    fn test_ucs2_roundtrip_non_ascii() {
        let encoded = encode_ucs2("Résumé");
        assert_eq!(decode_ucs2(&encoded), "Résumé");
    }

    #[test]
    fn test_both_endian_fields() {
        let mut buf = [0u8; 8];
        put_both_u32(&mut buf, 0, 0x0102_0304);
        assert_eq!(buf, [4, 3, 2, 1, 1, 2, 3, 4]);

        let mut buf = [0u8; 4];
        put_both_u16(&mut buf, 0, 0x0102);
        assert_eq!(buf, [2, 1, 1, 2]);
    }
}
