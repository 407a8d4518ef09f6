//! Physical frame pool shared by every address space.
//!
//! The pool owns the emulated physical memory (one page-sized buffer per frame) and the
//! allocation table recording which translation entry holds each frame. It is shared
//! between address spaces through an `Arc`; the allocation table and each frame buffer sit
//! behind their own `spin::Mutex`, so a fault in one address space never observes a
//! half-updated table from another.

use core::fmt;

use alloc::boxed::Box;
use alloc::vec::Vec;
use spin::Mutex;

use crate::{Frame, FrameNumber, FrameOwner, config::PAGE_SIZE};

/// Errors that can occur during frame allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Every frame in the pool is held by some translation entry.
    OutOfFrames,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfFrames => write!(f, "no free physical frames"),
        }
    }
}

impl core::error::Error for AllocError {}

/// Contents of a single frame.
type FrameBytes = Box<[u8; PAGE_SIZE]>;

/// A fixed-size pool of physical frames.
pub struct FramePool {
    table: Mutex<Box<[Frame]>>,
    memory: Box<[Mutex<FrameBytes>]>,
}

impl FramePool {
    /// Creates a pool of `frame_count` zeroed, unallocated frames.
    pub fn new(frame_count: usize) -> Self {
        let table: Vec<Frame> = (0..frame_count).map(|_| Frame::new()).collect();
        let memory: Vec<Mutex<FrameBytes>> = (0..frame_count)
            .map(|_| Mutex::new(Box::new([0u8; PAGE_SIZE])))
            .collect();

        Self {
            table: Mutex::new(table.into_boxed_slice()),
            memory: memory.into_boxed_slice(),
        }
    }

    /// Allocates the lowest-numbered free frame to `owner`.
    pub fn allocate(&self, owner: FrameOwner) -> Result<FrameNumber, AllocError> {
        let mut table = self.table.lock();
        let index = table
            .iter()
            .position(|frame| !frame.is_allocated())
            .ok_or(AllocError::OutOfFrames)?;

        table[index].claim(owner);
        log::trace!("frame {} allocated to {}", index, owner);
        Ok(FrameNumber::new(index))
    }

    /// Hands `frame` from one translation entry to another without freeing it.
    ///
    /// # Panics
    ///
    /// Panics if `from` does not currently hold `frame`.
    pub fn transfer(&self, frame: FrameNumber, from: FrameOwner, to: FrameOwner) {
        let mut table = self.table.lock();
        table[frame.as_usize()].transfer(from, to);
    }

    /// Returns `frame` to the pool.
    pub fn release(&self, frame: FrameNumber) {
        let mut table = self.table.lock();
        if let Some(owner) = table[frame.as_usize()].release() {
            log::trace!("frame {} released by {}", frame, owner);
        }
    }

    /// Returns the translation entry currently holding `frame`.
    pub fn owner(&self, frame: FrameNumber) -> Option<FrameOwner> {
        self.table.lock().get(frame.as_usize())?.owner()
    }

    /// Returns the total number of frames managed by this pool.
    pub fn total_frames(&self) -> usize {
        self.memory.len()
    }

    /// Returns the number of unallocated frames.
    pub fn free_frames(&self) -> usize {
        self.table
            .lock()
            .iter()
            .filter(|frame| !frame.is_allocated())
            .count()
    }

    /// Runs `f` with read access to the contents of `frame`.
    ///
    /// # Panics
    ///
    /// Panics if `frame` is outside the pool.
    pub fn with_frame<R>(&self, frame: FrameNumber, f: impl FnOnce(&[u8]) -> R) -> R {
        let bytes = self.memory[frame.as_usize()].lock();
        f(&bytes[..])
    }

    /// Runs `f` with write access to the contents of `frame`.
    ///
    /// # Panics
    ///
    /// Panics if `frame` is outside the pool.
    pub fn with_frame_mut<R>(&self, frame: FrameNumber, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut bytes = self.memory[frame.as_usize()].lock();
        f(&mut bytes[..])
    }
}

impl fmt::Debug for FramePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramePool")
            .field("total_frames", &self.total_frames())
            .field("free_frames", &self.free_frames())
            .finish()
    }
}
