//! Translation entries.
//!
//! One [`TranslationEntry`] describes one virtual page: where it lives right now (a frame,
//! or nowhere), how it has been touched since it was made resident, what kind of segment it
//! belongs to, and where its bytes can be found when it is not resident.

use core::fmt;

use crate::{FrameNumber, PageNumber};

/// The segment a virtual page belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    /// Program text, loaded from the executable.
    Code,
    /// Initialized data, loaded from the executable.
    InitializedData,
    /// Zero-initialized data, materialized on first touch.
    UninitializedData,
    /// The user stack, materialized on first touch.
    Stack,
}

impl PageKind {
    /// Returns the store that holds this page's bytes while it is not resident.
    pub const fn backing(self) -> Backing {
        match self {
            Self::Code | Self::InitializedData => Backing::Executable,
            Self::UninitializedData | Self::Stack => Backing::Swap,
        }
    }

    /// Short name used in page-table dumps.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::InitializedData => "data",
            Self::UninitializedData => "bss",
            Self::Stack => "stack",
        }
    }
}

/// Where an evicted page's bytes are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backing {
    /// The page has a fixed home in the executable file; write-back updates it in place.
    Executable,
    /// The page has no durable origin; write-back borrows a slot in the swap store.
    Swap,
}

/// The part of a partially file-backed page that comes from the executable.
///
/// A page that mixes file contents with zero-filled bytes cannot be written back to the
/// executable, whose image ends where the file-backed segments do. Such a page is kept in
/// swap once dirty, and only its first load reads `len` bytes at `file_offset` into the
/// page at `page_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageExtent {
    pub page_offset: usize,
    pub file_offset: usize,
    pub len: usize,
}

/// Status flags of a translation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryFlags(u8);

impl EntryFlags {
    /// The entry maps a frame.
    const VALID: u8 = 1 << 0;

    /// The page was accessed since it was made resident.
    const USED: u8 = 1 << 1;

    /// The frame differs from the page's last persisted copy.
    const DIRTY: u8 = 1 << 2;

    /// Writes are forbidden. Never set by this manager.
    const READ_ONLY: u8 = 1 << 3;

    /// Creates empty flags (entry not valid).
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn is_valid(self) -> bool {
        self.0 & Self::VALID != 0
    }

    pub const fn is_used(self) -> bool {
        self.0 & Self::USED != 0
    }

    pub const fn is_dirty(self) -> bool {
        self.0 & Self::DIRTY != 0
    }

    pub const fn is_read_only(self) -> bool {
        self.0 & Self::READ_ONLY != 0
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.set(Self::VALID, valid);
    }

    pub fn set_used(&mut self, used: bool) {
        self.set(Self::USED, used);
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.set(Self::DIRTY, dirty);
    }

    fn set(&mut self, mask: u8, on: bool) {
        if on {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }
}

/// Translation state of a single virtual page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    virtual_page: PageNumber,
    frame: Option<FrameNumber>,
    flags: EntryFlags,
    kind: PageKind,
    backing_offset: Option<usize>,
    image_extent: Option<ImageExtent>,
}

impl TranslationEntry {
    /// Creates a non-resident entry for `page`.
    pub const fn new(page: PageNumber, kind: PageKind, backing_offset: Option<usize>) -> Self {
        Self {
            virtual_page: page,
            frame: None,
            flags: EntryFlags::empty(),
            kind,
            backing_offset,
            image_extent: None,
        }
    }

    pub const fn virtual_page(&self) -> PageNumber {
        self.virtual_page
    }

    /// Returns the frame backing this page, or `None` if it is not resident.
    pub const fn frame(&self) -> Option<FrameNumber> {
        self.frame
    }

    pub const fn flags(&self) -> EntryFlags {
        self.flags
    }

    pub const fn kind(&self) -> PageKind {
        self.kind
    }

    /// Byte offset of the page's persisted copy in its backing store, if it has one.
    pub const fn backing_offset(&self) -> Option<usize> {
        self.backing_offset
    }

    /// File contents of a page that is only partly covered by the executable.
    pub const fn image_extent(&self) -> Option<ImageExtent> {
        self.image_extent
    }

    /// Returns the store that holds this page's bytes while it is not resident.
    ///
    /// Partially file-backed pages go to swap whatever their kind.
    pub const fn backing(&self) -> Backing {
        match self.image_extent {
            Some(_) => Backing::Swap,
            None => self.kind.backing(),
        }
    }

    pub const fn is_valid(&self) -> bool {
        self.flags.is_valid()
    }

    pub const fn is_used(&self) -> bool {
        self.flags.is_used()
    }

    pub const fn is_dirty(&self) -> bool {
        self.flags.is_dirty()
    }

    pub const fn is_read_only(&self) -> bool {
        self.flags.is_read_only()
    }

    /// Makes the page resident in `frame` with clean, freshly-used flags.
    pub fn map(&mut self, frame: FrameNumber) {
        self.frame = Some(frame);
        self.flags.set_valid(true);
        self.flags.set_used(true);
        self.flags.set_dirty(false);
    }

    /// Removes the page from its frame, returning the frame it occupied.
    pub fn unmap(&mut self) -> Option<FrameNumber> {
        self.flags.set_valid(false);
        self.flags.set_used(false);
        self.frame.take()
    }

    pub fn set_used(&mut self, used: bool) {
        self.flags.set_used(used);
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.flags.set_dirty(dirty);
    }

    pub fn set_kind(&mut self, kind: PageKind) {
        self.kind = kind;
    }

    pub fn set_backing_offset(&mut self, offset: Option<usize>) {
        self.backing_offset = offset;
    }

    pub fn set_image_extent(&mut self, extent: Option<ImageExtent>) {
        self.image_extent = extent;
    }
}

impl fmt::Display for TranslationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>5}  ", self.virtual_page.as_usize())?;
        match self.frame {
            Some(frame) => write!(f, "{:>5}  ", frame.as_usize())?,
            None => write!(f, "{:>5}  ", "-")?,
        }
        write!(
            f,
            "{:>5}  {:>4}  {:>5}  {:<5}  ",
            self.is_valid() as u8,
            self.is_used() as u8,
            self.is_dirty() as u8,
            self.kind.name()
        )?;
        match self.backing_offset {
            Some(offset) => write!(f, "{:#x}", offset),
            None => write!(f, "-"),
        }
    }
}
