//! Fixed-capacity FIFO of resident pages.
//!
//! Each address space owns one [`ResidencyRing`] whose capacity is its resident-set limit.
//! While the ring is filling up, pages are appended in arrival order. Once it is full,
//! every new arrival overwrites the oldest slot and the cursor advances by one, so
//! eviction order is strict arrival order regardless of how the pages are accessed.

use alloc::vec::Vec;

use crate::PageNumber;

/// Circular record of which page occupies each resident slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResidencyRing {
    slots: Vec<PageNumber>,
    capacity: usize,
    cursor: usize,
}

impl ResidencyRing {
    /// Creates an empty ring with room for `capacity` pages.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "residency ring needs at least one slot");
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns true once every slot has been assigned.
    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }

    /// Appends `page` to the next unused slot and returns that slot's position.
    ///
    /// # Panics
    ///
    /// Panics if the ring is already full.
    pub fn push(&mut self, page: PageNumber) -> usize {
        assert!(!self.is_full(), "residency ring is full");
        self.slots.push(page);
        self.slots.len() - 1
    }

    /// Returns the page that would be replaced next, if the ring is full.
    pub fn oldest(&self) -> Option<PageNumber> {
        if self.is_full() {
            Some(self.slots[self.cursor])
        } else {
            None
        }
    }

    /// Overwrites the oldest slot with `page` and advances the cursor.
    ///
    /// Returns the slot position and the page that previously occupied it.
    ///
    /// # Panics
    ///
    /// Panics if the ring is not yet full.
    pub fn replace_oldest(&mut self, page: PageNumber) -> (usize, PageNumber) {
        assert!(self.is_full(), "no eviction candidate until the ring is full");
        let slot = self.cursor;
        let victim = core::mem::replace(&mut self.slots[slot], page);
        self.cursor = (self.cursor + 1) % self.capacity;
        (slot, victim)
    }

    /// Drops `page` from the ring, keeping the arrival order of the others.
    ///
    /// The ring is no longer full afterwards, so the next arrival is appended rather than
    /// replacing anything. Returns false if `page` was not in the ring.
    pub fn remove(&mut self, page: PageNumber) -> bool {
        self.slots.rotate_left(self.cursor);
        self.cursor = 0;
        match self.slots.iter().position(|&slot| slot == page) {
            Some(index) => {
                self.slots.remove(index);
                true
            }
            None => false,
        }
    }

    /// Returns true if `page` occupies some slot.
    pub fn contains(&self, page: PageNumber) -> bool {
        self.slots.contains(&page)
    }

    /// Returns the occupied slots from oldest to newest arrival.
    pub fn iter(&self) -> impl Iterator<Item = PageNumber> + '_ {
        let (newer, older) = self.slots.split_at(self.cursor);
        older.iter().chain(newer.iter()).copied()
    }

    /// Returns the page in each slot position, in slot order.
    pub fn slots(&self) -> &[PageNumber] {
        &self.slots
    }
}
