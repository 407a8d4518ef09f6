//! Swap store.
//!
//! Pages with no durable origin (stack and uninitialized data) are written to page-sized
//! slots of a private swap file when they are evicted dirty. A slot is occupied only while
//! its page is evicted: loading the page back frees the slot, so the slot map reflects
//! "currently evicted", never a cache of old contents.

use core::fmt;

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

use crate::{BackingStore, IoError, SwapSlot, config::PAGE_SIZE};

const BITS_PER_WORD: usize = u64::BITS as usize;

/// Allocation bitmap over the slots of the swap store.
#[derive(Clone, PartialEq, Eq)]
pub struct SwapSlotMap {
    words: Vec<u64>,
    slot_count: usize,
}

impl SwapSlotMap {
    /// Creates a map with `slot_count` free slots.
    pub fn new(slot_count: usize) -> Self {
        Self {
            words: vec![0; slot_count.div_ceil(BITS_PER_WORD)],
            slot_count,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slot_count
    }

    /// Marks the lowest-numbered free slot as used and returns it.
    pub fn allocate(&mut self) -> Option<SwapSlot> {
        let (index, word) = self
            .words
            .iter_mut()
            .enumerate()
            .find(|(_, word)| **word != u64::MAX)?;

        let bit = word.trailing_ones() as usize;
        let slot = index * BITS_PER_WORD + bit;
        if slot >= self.slot_count {
            return None;
        }

        *word |= 1 << bit;
        Some(SwapSlot::new(slot))
    }

    /// Marks `slot` as free.
    ///
    /// # Panics
    ///
    /// Panics if the slot is out of range or already free.
    pub fn free(&mut self, slot: SwapSlot) {
        assert!(self.is_allocated(slot), "double free of swap slot {}", slot);
        let (index, bit) = Self::position(slot);
        self.words[index] &= !(1 << bit);
    }

    /// Returns true if `slot` is in use.
    ///
    /// # Panics
    ///
    /// Panics if the slot is out of range.
    pub fn is_allocated(&self, slot: SwapSlot) -> bool {
        assert!(
            slot.as_usize() < self.slot_count,
            "swap slot {} out of range",
            slot
        );
        let (index, bit) = Self::position(slot);
        self.words[index] & (1 << bit) != 0
    }

    /// Returns the number of free slots.
    pub fn free_count(&self) -> usize {
        let used: usize = self.words.iter().map(|w| w.count_ones() as usize).sum();
        self.slot_count - used
    }

    fn position(slot: SwapSlot) -> (usize, usize) {
        (
            slot.as_usize() / BITS_PER_WORD,
            slot.as_usize() % BITS_PER_WORD,
        )
    }
}

impl fmt::Debug for SwapSlotMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwapSlotMap")
            .field("capacity", &self.slot_count)
            .field("free", &self.free_count())
            .finish()
    }
}

/// The swap file together with its slot map, shared by every address space.
pub struct SwapStore {
    slots: Mutex<SwapSlotMap>,
    store: Arc<dyn BackingStore>,
}

impl SwapStore {
    /// Wraps `store`, managing its first `slot_count` page-sized slots.
    ///
    /// # Panics
    ///
    /// Panics if the store is too small to hold `slot_count` pages.
    pub fn new(store: Arc<dyn BackingStore>, slot_count: usize) -> Self {
        assert!(
            store.len() >= slot_count * PAGE_SIZE,
            "swap store of {} bytes cannot hold {} slots",
            store.len(),
            slot_count
        );
        Self {
            slots: Mutex::new(SwapSlotMap::new(slot_count)),
            store,
        }
    }

    /// Allocates the lowest free slot.
    pub fn allocate(&self) -> Result<SwapSlot, IoError> {
        let slot = self.slots.lock().allocate().ok_or(IoError::NoSwapSpace)?;
        log::debug!("swap slot {} allocated", slot);
        Ok(slot)
    }

    /// Returns `slot` to the free pool.
    ///
    /// # Panics
    ///
    /// Panics if the slot is already free.
    pub fn free(&self, slot: SwapSlot) {
        self.slots.lock().free(slot);
        log::debug!("swap slot {} freed", slot);
    }

    /// Writes one page to `slot`.
    pub fn write_slot(&self, slot: SwapSlot, page: &[u8]) -> Result<(), IoError> {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        let written = self.store.write_at(page, slot.byte_offset())?;
        if written != page.len() {
            return Err(IoError::ShortWrite {
                expected: page.len(),
                actual: written,
            });
        }
        Ok(())
    }

    /// Reads one page from `slot`.
    pub fn read_slot(&self, slot: SwapSlot, page: &mut [u8]) -> Result<(), IoError> {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        let read = self.store.read_at(page, slot.byte_offset())?;
        if read != page.len() {
            return Err(IoError::ShortRead {
                expected: page.len(),
                actual: read,
            });
        }
        Ok(())
    }

    pub fn is_allocated(&self, slot: SwapSlot) -> bool {
        self.slots.lock().is_allocated(slot)
    }

    pub fn free_slots(&self) -> usize {
        self.slots.lock().free_count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().capacity()
    }
}

impl fmt::Debug for SwapStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwapStore")
            .field("slots", &*self.slots.lock())
            .field("bytes", &self.store.len())
            .finish()
    }
}
