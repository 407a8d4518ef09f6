//! Paging constants and per-manager configuration.
//!
//! The page size is fixed at compile time and equals the sector size of the backing store,
//! so every page transfer is a whole number of blocks. Everything else that shapes the
//! behavior of the manager (how many frames exist, how many a single process may hold,
//! how big the swap area is) lives in [`VmConfig`].

use core::fmt;

/// Size of a backing-store block in bytes.
pub const SECTOR_SIZE: usize = 128;

/// Size of a page (and of a frame) in bytes.
pub const PAGE_SIZE: usize = SECTOR_SIZE;

/// Bytes reserved at the top of every address space for the user stack.
pub const USER_STACK_SIZE: usize = 1024;

/// Number of pages reserved for the user stack.
pub const STACK_PAGES: usize = USER_STACK_SIZE / PAGE_SIZE;

/// Default number of frames a single address space may keep resident.
pub const DEFAULT_RESIDENT_LIMIT: usize = 5;

/// Default number of physical frames shared by all address spaces.
pub const DEFAULT_PHYSICAL_FRAMES: usize = 32;

/// Default number of page-sized slots in the swap store.
pub const DEFAULT_SWAP_SLOTS: usize = 32;

/// Name of the swap store on the file system.
pub const SWAP_FILE_NAME: &str = "SWAP0";

/// Distance kept between the initial stack pointer and the end of the address space.
pub const STACK_POINTER_SLACK: usize = 16;

/// Errors reported by [`VmConfig::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The resident-set limit is zero.
    ZeroResidentLimit,
    /// There are no physical frames.
    ZeroFrames,
    /// The swap store has no slots.
    ZeroSwapSlots,
    /// No stack pages are reserved.
    ZeroStackPages,
    /// A single process could never fill its resident set.
    ResidentLimitExceedsFrames { limit: usize, frames: usize },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroResidentLimit => write!(f, "resident-set limit must be at least one frame"),
            Self::ZeroFrames => write!(f, "at least one physical frame is required"),
            Self::ZeroSwapSlots => write!(f, "the swap store needs at least one slot"),
            Self::ZeroStackPages => write!(f, "at least one stack page must be reserved"),
            Self::ResidentLimitExceedsFrames { limit, frames } => write!(
                f,
                "resident-set limit {} exceeds the {} available frames",
                limit, frames
            ),
        }
    }
}

impl core::error::Error for ConfigError {}

/// Tunables for a [`MemoryManager`](crate::MemoryManager) and the address spaces it creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    resident_limit: usize,
    physical_frames: usize,
    swap_slots: usize,
    stack_pages: usize,
    swap_file: &'static str,
}

impl VmConfig {
    /// Creates a configuration populated with the default constants.
    pub const fn new() -> Self {
        Self {
            resident_limit: DEFAULT_RESIDENT_LIMIT,
            physical_frames: DEFAULT_PHYSICAL_FRAMES,
            swap_slots: DEFAULT_SWAP_SLOTS,
            stack_pages: STACK_PAGES,
            swap_file: SWAP_FILE_NAME,
        }
    }

    /// Sets the number of frames a single address space may keep resident.
    pub const fn with_resident_limit(mut self, limit: usize) -> Self {
        self.resident_limit = limit;
        self
    }

    /// Sets the number of physical frames shared by all address spaces.
    pub const fn with_physical_frames(mut self, frames: usize) -> Self {
        self.physical_frames = frames;
        self
    }

    /// Sets the number of slots in the swap store.
    pub const fn with_swap_slots(mut self, slots: usize) -> Self {
        self.swap_slots = slots;
        self
    }

    /// Sets the number of pages reserved for the stack.
    pub const fn with_stack_pages(mut self, pages: usize) -> Self {
        self.stack_pages = pages;
        self
    }

    /// Sets the name of the swap store on the file system.
    pub const fn with_swap_file(mut self, name: &'static str) -> Self {
        self.swap_file = name;
        self
    }

    pub const fn resident_limit(&self) -> usize {
        self.resident_limit
    }

    pub const fn physical_frames(&self) -> usize {
        self.physical_frames
    }

    pub const fn swap_slots(&self) -> usize {
        self.swap_slots
    }

    pub const fn stack_pages(&self) -> usize {
        self.stack_pages
    }

    pub const fn swap_file(&self) -> &'static str {
        self.swap_file
    }

    /// Size of the swap store in bytes.
    pub const fn swap_size(&self) -> usize {
        self.swap_slots * PAGE_SIZE
    }

    /// Checks that the configuration describes a usable system.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resident_limit == 0 {
            return Err(ConfigError::ZeroResidentLimit);
        }
        if self.physical_frames == 0 {
            return Err(ConfigError::ZeroFrames);
        }
        if self.swap_slots == 0 {
            return Err(ConfigError::ZeroSwapSlots);
        }
        if self.stack_pages == 0 {
            return Err(ConfigError::ZeroStackPages);
        }
        if self.resident_limit > self.physical_frames {
            return Err(ConfigError::ResidentLimitExceedsFrames {
                limit: self.resident_limit,
                frames: self.physical_frames,
            });
        }
        Ok(())
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self::new()
    }
}
