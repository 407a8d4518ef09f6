//! Page, frame and swap-slot number types.
//!
//! Translation entries refer to frames and swap slots by index, never by pointer, so
//! handing a frame from one page to another is a plain value copy.

use crate::{VirtualAddress, config::PAGE_SIZE};
use core::{
    fmt,
    ops::{Add, Sub},
};

/// Macro to define common page/frame/slot number functionality.
macro_rules! impl_page_number_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new number.
            #[inline]
            pub const fn new(number: usize) -> Self {
                Self(number)
            }

            /// Returns the raw number.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Returns the byte offset of the first byte covered by this number.
            #[inline]
            pub const fn byte_offset(self) -> usize {
                self.0 * PAGE_SIZE
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_page_number_common!(
    FrameNumber,
    "A physical frame number.\n\n\
     Frames are numbered globally across every address space; a frame number is an index\n\
     into the [`FramePool`](crate::FramePool)."
);

impl_page_number_common!(
    PageNumber,
    "A virtual page number.\n\n\
     Page numbers index an address space's [`PageTable`](crate::PageTable) directly."
);

impl PageNumber {
    /// Returns the virtual address at the start of this page.
    #[inline]
    pub const fn start(self) -> VirtualAddress {
        VirtualAddress::new(self.0 * PAGE_SIZE)
    }
}

impl From<VirtualAddress> for PageNumber {
    #[inline]
    fn from(addr: VirtualAddress) -> Self {
        Self::new(addr.as_usize() / PAGE_SIZE)
    }
}

impl_page_number_common!(
    SwapSlot,
    "A page-sized slot in the swap store.\n\n\
     Slot `n` occupies bytes `n * PAGE_SIZE .. (n + 1) * PAGE_SIZE` of the swap file."
);

impl SwapSlot {
    /// Returns the slot that starts at the given byte offset of the swap store.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is not slot-aligned.
    #[inline]
    pub const fn from_byte_offset(offset: usize) -> Self {
        assert!(offset % PAGE_SIZE == 0, "swap offset must be slot-aligned");
        Self(offset / PAGE_SIZE)
    }
}
