//! Per-frame bookkeeping.

use core::fmt;

use crate::{PageNumber, SpaceId};

/// The translation entry that a frame currently backs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameOwner {
    /// The address space holding the frame.
    pub space: SpaceId,
    /// The virtual page mapped onto the frame.
    pub page: PageNumber,
}

impl FrameOwner {
    pub const fn new(space: SpaceId, page: PageNumber) -> Self {
        Self { space, page }
    }
}

impl fmt::Display for FrameOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "space {} page {}", self.space, self.page)
    }
}

/// Holds the metadata for a physical frame.
///
/// A frame is allocated exactly when it has an owner. Ownership moves between entries
/// only through [`Frame::transfer`], which checks that the hand-over starts from the entry
/// that really holds the frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct Frame {
    owner: Option<FrameOwner>,
}

impl Frame {
    /// Creates metadata for a free frame.
    pub const fn new() -> Self {
        Self { owner: None }
    }

    /// Returns true if some translation entry holds this frame.
    pub const fn is_allocated(&self) -> bool {
        self.owner.is_some()
    }

    /// Returns the entry holding this frame, if any.
    pub const fn owner(&self) -> Option<FrameOwner> {
        self.owner
    }

    /// Hands a free frame to `owner`.
    ///
    /// # Panics
    ///
    /// Panics if the frame is already allocated.
    pub fn claim(&mut self, owner: FrameOwner) {
        assert!(
            self.owner.is_none(),
            "frame already held by {:?}",
            self.owner
        );
        self.owner = Some(owner);
    }

    /// Moves the frame from `from` to `to`.
    ///
    /// # Panics
    ///
    /// Panics if `from` does not hold the frame.
    pub fn transfer(&mut self, from: FrameOwner, to: FrameOwner) {
        assert_eq!(
            self.owner,
            Some(from),
            "frame transfer must start from its current owner"
        );
        self.owner = Some(to);
    }

    /// Returns the frame to the free state, yielding the previous owner.
    pub fn release(&mut self) -> Option<FrameOwner> {
        self.owner.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(space: u32, page: usize) -> FrameOwner {
        FrameOwner::new(SpaceId::new(space), PageNumber::new(page))
    }

    #[test]
    fn new_frame_is_free() {
        let frame = Frame::new();
        assert!(!frame.is_allocated());
        assert_eq!(frame.owner(), None);
    }

    #[test]
    fn claim_and_release() {
        let mut frame = Frame::new();
        frame.claim(owner(1, 4));
        assert!(frame.is_allocated());
        assert_eq!(frame.release(), Some(owner(1, 4)));
        assert!(!frame.is_allocated());
    }

    #[test]
    fn transfer_moves_ownership() {
        let mut frame = Frame::new();
        frame.claim(owner(1, 0));
        frame.transfer(owner(1, 0), owner(1, 2));
        assert_eq!(frame.owner(), Some(owner(1, 2)));
    }

    #[test]
    #[should_panic(expected = "already held")]
    fn double_claim_panics() {
        let mut frame = Frame::new();
        frame.claim(owner(1, 0));
        frame.claim(owner(2, 0));
    }

    #[test]
    #[should_panic(expected = "current owner")]
    fn transfer_from_wrong_owner_panics() {
        let mut frame = Frame::new();
        frame.claim(owner(1, 0));
        frame.transfer(owner(2, 0), owner(2, 1));
    }
}
