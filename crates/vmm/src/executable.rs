//! Executable image header.
//!
//! User programs are stored in a fixed-format image: a 40-byte header made of a magic word
//! and three segment descriptors (code, initialized data, uninitialized data), followed by
//! the bytes of the code and initialized-data segments at the offsets the descriptors name.
//!
//! ```text
//! offset  field
//!      0  magic
//!      4  code.size         8  code.virtual_addr         12  code.in_file_addr
//!     16  init_data.size   20  init_data.virtual_addr    24  init_data.in_file_addr
//!     28  uninit_data.size 32  uninit_data.virtual_addr  36  uninit_data.in_file_addr
//! ```
//!
//! Every field is a 32-bit word. Images are written little-endian, but an image produced
//! on a big-endian host is accepted too: the byte order is chosen by whichever reading of
//! the first word yields [`NOFF_MAGIC`].

use core::fmt;

use alloc::vec;
use alloc::vec::Vec;

use crate::{BackingStore, IoError};

/// Magic word identifying an executable image.
pub const NOFF_MAGIC: u32 = 0x00ba_dfad;

/// Size of the image header in bytes.
pub const HEADER_SIZE: usize = 40;

/// Errors that can occur while reading an executable header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// The image is shorter than a header.
    Truncated { length: usize },
    /// The first word is not the magic number in either byte order.
    BadMagic(u32),
    /// Reading the header from the backing store failed.
    Io(IoError),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { length } => {
                write!(f, "image of {} bytes is too short for a header", length)
            }
            Self::BadMagic(magic) => write!(f, "bad executable magic {:#010x}", magic),
            Self::Io(err) => write!(f, "failed to read executable header: {}", err),
        }
    }
}

impl core::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<IoError> for LoadError {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

/// A segment descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Segment {
    /// Length of the segment in bytes.
    pub size: u32,
    /// Virtual address of the first byte of the segment.
    pub virtual_addr: u32,
    /// Offset of the segment's bytes in the image. Meaningless for uninitialized data.
    pub in_file_addr: u32,
}

impl Segment {
    pub const fn new(size: u32, virtual_addr: u32, in_file_addr: u32) -> Self {
        Self {
            size,
            virtual_addr,
            in_file_addr,
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Byte order of the words in an image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn read(self, bytes: &[u8], index: usize) -> u32 {
        let start = index * 4;
        let word = [
            bytes[start],
            bytes[start + 1],
            bytes[start + 2],
            bytes[start + 3],
        ];
        match self {
            Self::Little => u32::from_le_bytes(word),
            Self::Big => u32::from_be_bytes(word),
        }
    }
}

/// The header of an executable image, normalized to host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NoffHeader {
    pub code: Segment,
    pub init_data: Segment,
    pub uninit_data: Segment,
}

impl NoffHeader {
    /// Parses a header from the start of `data`.
    ///
    /// Validates the magic number, trying both byte orders, and returns every field in
    /// host order.
    pub fn from_bytes(data: &[u8]) -> Result<Self, LoadError> {
        if data.len() < HEADER_SIZE {
            return Err(LoadError::Truncated { length: data.len() });
        }

        let order = if ByteOrder::Little.read(data, 0) == NOFF_MAGIC {
            ByteOrder::Little
        } else if ByteOrder::Big.read(data, 0) == NOFF_MAGIC {
            ByteOrder::Big
        } else {
            return Err(LoadError::BadMagic(ByteOrder::Little.read(data, 0)));
        };

        let segment = |first: usize| {
            Segment::new(
                order.read(data, first),
                order.read(data, first + 1),
                order.read(data, first + 2),
            )
        };

        Ok(Self {
            code: segment(1),
            init_data: segment(4),
            uninit_data: segment(7),
        })
    }

    /// Reads and parses the header at offset zero of `store`.
    pub fn read_from(store: &dyn BackingStore) -> Result<Self, LoadError> {
        let mut buffer = [0u8; HEADER_SIZE];
        let read = store.read_at(&mut buffer, 0)?;
        Self::from_bytes(&buffer[..read])
    }

    /// Serializes the header in little-endian order.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let words = [
            NOFF_MAGIC,
            self.code.size,
            self.code.virtual_addr,
            self.code.in_file_addr,
            self.init_data.size,
            self.init_data.virtual_addr,
            self.init_data.in_file_addr,
            self.uninit_data.size,
            self.uninit_data.virtual_addr,
            self.uninit_data.in_file_addr,
        ];

        let mut bytes = [0u8; HEADER_SIZE];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    /// Bytes of the program image proper: all three segments, without the stack.
    pub fn segments_size(&self) -> usize {
        self.code.size as usize + self.init_data.size as usize + self.uninit_data.size as usize
    }
}

/// Lays out an executable image from segment contents.
///
/// Code is placed at virtual address zero, initialized data directly after it, and
/// uninitialized data directly after that. Segment bytes follow the header in the same
/// order, so file offsets and virtual addresses differ by [`HEADER_SIZE`].
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    code: Vec<u8>,
    init_data: Vec<u8>,
    uninit_size: u32,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn code(mut self, bytes: &[u8]) -> Self {
        self.code = bytes.to_vec();
        self
    }

    pub fn init_data(mut self, bytes: &[u8]) -> Self {
        self.init_data = bytes.to_vec();
        self
    }

    pub fn uninit_data(mut self, size: u32) -> Self {
        self.uninit_size = size;
        self
    }

    /// Returns the header the image will carry.
    pub fn header(&self) -> NoffHeader {
        let code_size = self.code.len() as u32;
        let data_size = self.init_data.len() as u32;
        let header_size = HEADER_SIZE as u32;

        NoffHeader {
            code: Segment::new(code_size, 0, header_size),
            init_data: Segment::new(data_size, code_size, header_size + code_size),
            uninit_data: Segment::new(self.uninit_size, code_size + data_size, 0),
        }
    }

    /// Produces the complete image.
    pub fn build(&self) -> Vec<u8> {
        let mut image = vec![0u8; HEADER_SIZE];
        image.copy_from_slice(&self.header().to_bytes());
        image.extend_from_slice(&self.code);
        image.extend_from_slice(&self.init_data);
        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NoffHeader {
        NoffHeader {
            code: Segment::new(300, 0, 40),
            init_data: Segment::new(64, 384, 340),
            uninit_data: Segment::new(100, 448, 0),
        }
    }

    #[test]
    fn parses_little_endian_header() {
        let header = sample();
        assert_eq!(NoffHeader::from_bytes(&header.to_bytes()), Ok(header));
    }

    #[test]
    fn normalizes_big_endian_header() {
        let header = sample();
        let mut bytes = header.to_bytes();
        for word in bytes.chunks_exact_mut(4) {
            word.reverse();
        }
        assert_eq!(NoffHeader::from_bytes(&bytes), Ok(header));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = sample().to_bytes();
        bytes[0..4].copy_from_slice(&0xdead_beefu32.to_le_bytes());
        assert_eq!(
            NoffHeader::from_bytes(&bytes),
            Err(LoadError::BadMagic(0xdead_beef))
        );
    }

    #[test]
    fn rejects_truncated_header() {
        let bytes = sample().to_bytes();
        assert_eq!(
            NoffHeader::from_bytes(&bytes[..12]),
            Err(LoadError::Truncated { length: 12 })
        );
    }

    #[test]
    fn field_order_is_size_address_offset() {
        let bytes = sample().to_bytes();
        assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), NOFF_MAGIC);
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 300);
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), 0);
        assert_eq!(u32::from_le_bytes(bytes[12..16].try_into().unwrap()), 40);
    }

    #[test]
    fn builder_lays_out_segments_after_header() {
        let builder = ImageBuilder::new()
            .code(&[1, 2, 3])
            .init_data(&[4, 5])
            .uninit_data(10);
        let image = builder.build();
        let header = NoffHeader::from_bytes(&image).unwrap();

        assert_eq!(header, builder.header());
        assert_eq!(header.code, Segment::new(3, 0, 40));
        assert_eq!(header.init_data, Segment::new(2, 3, 43));
        assert_eq!(header.uninit_data, Segment::new(10, 5, 0));
        assert_eq!(&image[HEADER_SIZE..], &[1, 2, 3, 4, 5]);
        assert_eq!(header.segments_size(), 15);
    }
}
