//! Linear per-process page table.
//!
//! The table is a contiguous array indexed by virtual page number. It is the single source
//! of truth for residency, but it enforces nothing beyond array bounds: the fault handler
//! and the replacement engine keep the entries consistent with the frame pool and the swap
//! store.

use core::fmt;
use core::ops::Index;

use alloc::vec::Vec;

use crate::{PageNumber, TranslationEntry, VirtualAddress};

/// An address space's array of translation entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTable {
    entries: Vec<TranslationEntry>,
}

impl PageTable {
    /// Creates a table from entries ordered by virtual page number.
    ///
    /// # Panics
    ///
    /// Panics if an entry's virtual page does not match its position.
    pub fn from_entries(entries: Vec<TranslationEntry>) -> Self {
        for (index, entry) in entries.iter().enumerate() {
            assert_eq!(
                entry.virtual_page().as_usize(),
                index,
                "translation entries must be ordered by virtual page"
            );
        }
        Self { entries }
    }

    /// Splits a virtual address into its page number and offset within the page.
    ///
    /// Any address is representable; whether the page exists is a separate question
    /// answered by [`PageTable::contains`].
    #[inline]
    pub const fn translate(&self, addr: VirtualAddress) -> (PageNumber, usize) {
        addr.translate()
    }

    /// Returns true if `page` is inside this address space.
    #[inline]
    pub fn contains(&self, page: PageNumber) -> bool {
        page.as_usize() < self.entries.len()
    }

    /// Returns the number of virtual pages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table has no pages.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the entry for `page`.
    ///
    /// # Panics
    ///
    /// Panics if `page` is outside the address space.
    pub fn entry(&self, page: PageNumber) -> &TranslationEntry {
        assert!(self.contains(page), "page {} out of range", page);
        &self.entries[page.as_usize()]
    }

    /// Returns a mutable reference to the entry for `page`.
    ///
    /// # Panics
    ///
    /// Panics if `page` is outside the address space.
    pub fn entry_mut(&mut self, page: PageNumber) -> &mut TranslationEntry {
        assert!(self.contains(page), "page {} out of range", page);
        &mut self.entries[page.as_usize()]
    }

    /// Returns the entry for `page`, or `None` if it is outside the address space.
    pub fn get(&self, page: PageNumber) -> Option<&TranslationEntry> {
        self.entries.get(page.as_usize())
    }

    /// Returns an iterator over all entries in page order.
    pub fn iter(&self) -> impl Iterator<Item = &TranslationEntry> {
        self.entries.iter()
    }

    /// Returns an iterator over the entries currently mapped to a frame.
    pub fn resident(&self) -> impl Iterator<Item = &TranslationEntry> {
        self.entries.iter().filter(|entry| entry.is_valid())
    }
}

impl Index<PageNumber> for PageTable {
    type Output = TranslationEntry;

    fn index(&self, page: PageNumber) -> &Self::Output {
        self.entry(page)
    }
}

impl fmt::Display for PageTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, " page  frame  valid  used  dirty  kind   offset")?;
        for entry in &self.entries {
            writeln!(f, "{}", entry)?;
        }
        Ok(())
    }
}
