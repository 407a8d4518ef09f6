#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # Virtual Memory Manager (VMM)
//!
//! A demand-paged virtual memory manager for user processes. It provides:
//!
//! - Page tables built from an executable's segment layout.
//! - A physical frame pool shared by every address space.
//! - FIFO page replacement over a bounded resident set per process.
//! - A swap store for pages with no durable origin (stack and uninitialized data).
//! - Software emulation of the backing stores for testing in non-kernel environments.

extern crate alloc;

mod address;
mod address_space;
mod backing;
pub mod config;
#[cfg(any(test, feature = "software-emulation"))]
mod emulated;
mod entry;
mod executable;
mod frame;
mod frame_pool;
pub mod loader;
mod manager;
mod numbers;
mod page_table;
mod ring;
mod swap;

pub use address::VirtualAddress;
pub use address_space::{AccessError, AddressSpace, FaultError, PagingStats, SpaceId};
pub use backing::{BackingStore, FileSystem, IoError};
pub use config::{ConfigError, PAGE_SIZE, VmConfig};
#[cfg(any(test, feature = "software-emulation"))]
pub use emulated::{MemoryFile, MemoryFileSystem};
pub use entry::{Backing, EntryFlags, ImageExtent, PageKind, TranslationEntry};
pub use executable::{HEADER_SIZE, ImageBuilder, LoadError, NOFF_MAGIC, NoffHeader, Segment};
pub use frame::{Frame, FrameOwner};
pub use frame_pool::{AllocError, FramePool};
pub use manager::{MemoryManager, SpawnError};
pub use numbers::{FrameNumber, PageNumber, SwapSlot};
pub use page_table::PageTable;
pub use ring::ResidencyRing;
pub use swap::{SwapSlotMap, SwapStore};
