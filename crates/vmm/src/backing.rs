//! Backing-store interface.
//!
//! The memory manager never touches disk sectors. It reads and writes named, byte-addressed
//! stores through [`BackingStore`], and opens or creates them through [`FileSystem`]. Offsets
//! are absolute; there is no cursor.

use core::fmt;

use alloc::sync::Arc;

use crate::PageNumber;

/// Errors reported by backing-store operations and the paths that use them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    /// Every swap slot is occupied.
    NoSwapSpace,
    /// A read returned fewer bytes than a full page.
    ShortRead { expected: usize, actual: usize },
    /// A write stored fewer bytes than a full page.
    ShortWrite { expected: usize, actual: usize },
    /// A file-backed page has no known offset in the executable.
    Unbacked(PageNumber),
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSwapSpace => write!(f, "no free swap slots"),
            Self::ShortRead { expected, actual } => {
                write!(f, "short read: expected {} bytes, got {}", expected, actual)
            }
            Self::ShortWrite { expected, actual } => {
                write!(f, "short write: expected {} bytes, wrote {}", expected, actual)
            }
            Self::Unbacked(page) => write!(f, "page {} has no backing offset", page),
        }
    }
}

impl core::error::Error for IoError {}

/// A byte-addressed store with positional reads and writes.
///
/// Reads and writes may transfer fewer bytes than requested when they reach the end of the
/// store; they never extend it.
pub trait BackingStore: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at `offset` and returns how many were read.
    fn read_at(&self, buf: &mut [u8], offset: usize) -> Result<usize, IoError>;

    /// Writes up to `buf.len()` bytes starting at `offset` and returns how many were written.
    fn write_at(&self, buf: &[u8], offset: usize) -> Result<usize, IoError>;

    /// Returns the size of the store in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Named stores, such as the executable and the swap file.
pub trait FileSystem: Send + Sync {
    /// Opens an existing store.
    fn open(&self, name: &str) -> Option<Arc<dyn BackingStore>>;

    /// Creates (or truncates) a zero-filled store of `size` bytes and opens it.
    fn create(&self, name: &str, size: usize) -> Result<Arc<dyn BackingStore>, IoError>;
}
