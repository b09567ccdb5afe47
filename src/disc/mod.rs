//! Disc image handling module
//!
//! ISO 9660 reading and writing behind the [`ImageDecoder`] and
//! [`ImageEncoder`] capability traits.

mod descriptor;
mod image;
mod reader;
mod writer;

pub use descriptor::{Hierarchy, VolumeDescriptor, SECTOR_SIZE};
pub use image::{EncoderOptions, ImageDecoder, ImageEncoder, ImageEntry, ImageError};
pub use reader::DiscImage;
pub use writer::IsoWriter;
