//! Address space management.
//!
//! An [`AddressSpace`] is one process's view of memory: its page table, the FIFO ring of
//! resident pages, and handles to the shared frame pool, the swap store and the executable
//! it was loaded from. Page faults are resolved here:
//!
//! - While the ring still has room (warm-up), the faulting page takes the lowest free
//!   frame of the shared pool.
//! - Once the ring is full (steady state), the oldest resident page is evicted and the new
//!   page takes over its frame. A dirty victim is written back before the frame is reloaded.
//!
//! Where a page's bytes live while it is not resident depends on its [`Backing`]. Code and
//! initialized data pages that the executable covers completely go back to it. Every other
//! page borrows a swap slot that is released as soon as the page is read back in.

use core::fmt;

use alloc::sync::Arc;

use crate::{
    AllocError, Backing, BackingStore, FrameNumber, FrameOwner, FramePool, IoError, PageNumber,
    PageTable, ResidencyRing, SwapSlot, SwapStore, VirtualAddress,
    config::{PAGE_SIZE, STACK_POINTER_SLACK},
};

/// Identifies an address space. Assigned monotonically by the memory manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpaceId(u32);

impl SpaceId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur while resolving a page fault.
///
/// Every variant is fatal to the faulting process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// The address lies beyond the last page of the address space.
    OutOfRange {
        address: VirtualAddress,
        page: PageNumber,
    },
    /// No physical frame was free for a warm-up fault.
    OutOfFrames,
    /// Writing back the victim or loading the new page failed.
    Io(IoError),
}

impl fmt::Display for FaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange { address, page } => {
                write!(f, "address {} (page {}) is out of range", address, page)
            }
            Self::OutOfFrames => write!(f, "no free physical frames"),
            Self::Io(err) => write!(f, "paging I/O failed: {}", err),
        }
    }
}

impl core::error::Error for FaultError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<IoError> for FaultError {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl From<AllocError> for FaultError {
    fn from(err: AllocError) -> Self {
        match err {
            AllocError::OutOfFrames => Self::OutOfFrames,
        }
    }
}

/// Errors reported by the memory access path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessError {
    /// The page is not resident. Resolve with [`AddressSpace::handle_fault`] and retry.
    PageFault(VirtualAddress),
    /// The address is misaligned or outside the address space.
    AddressError(VirtualAddress),
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PageFault(addr) => write!(f, "page fault at {}", addr),
            Self::AddressError(addr) => write!(f, "address error at {}", addr),
        }
    }
}

impl core::error::Error for AccessError {}

/// Paging activity of one address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PagingStats {
    /// Faults that made a page resident.
    pub faults: usize,
    /// Pages evicted to make room for another.
    pub evictions: usize,
    /// Dirty code or data pages written back to the executable.
    pub executable_write_backs: usize,
    /// Dirty stack or uninitialized-data pages written to swap.
    pub swap_write_backs: usize,
    /// Pages read back from swap.
    pub swap_ins: usize,
    /// Pages filled with zeros on first touch.
    pub demand_zero_fills: usize,
}

impl fmt::Display for PagingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "faults:                 {}", self.faults)?;
        writeln!(f, "evictions:              {}", self.evictions)?;
        writeln!(f, "executable write-backs: {}", self.executable_write_backs)?;
        writeln!(f, "swap write-backs:       {}", self.swap_write_backs)?;
        writeln!(f, "swap-ins:               {}", self.swap_ins)?;
        write!(f, "demand-zero fills:      {}", self.demand_zero_fills)
    }
}

/// A demand-paged process address space.
pub struct AddressSpace {
    id: SpaceId,
    page_table: PageTable,
    residency: ResidencyRing,
    fault_count: usize,
    stats: PagingStats,
    executable: Arc<dyn BackingStore>,
    frames: Arc<FramePool>,
    swap: Arc<SwapStore>,
}

impl AddressSpace {
    /// Creates an address space with no resident pages.
    ///
    /// # Panics
    ///
    /// Panics if `resident_limit` is zero.
    pub fn new(
        id: SpaceId,
        page_table: PageTable,
        resident_limit: usize,
        executable: Arc<dyn BackingStore>,
        frames: Arc<FramePool>,
        swap: Arc<SwapStore>,
    ) -> Self {
        log::info!(
            "address space {} created: {} pages, resident limit {}",
            id,
            page_table.len(),
            resident_limit
        );
        Self {
            id,
            page_table,
            residency: ResidencyRing::new(resident_limit),
            fault_count: 0,
            stats: PagingStats::default(),
            executable,
            frames,
            swap,
        }
    }

    pub fn id(&self) -> SpaceId {
        self.id
    }

    /// Returns the number of virtual pages.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn resident_limit(&self) -> usize {
        self.residency.capacity()
    }

    /// Returns the number of faults taken on non-resident pages, failed ones included.
    ///
    /// Faults on pages that are already resident are not counted. [`PagingStats::faults`]
    /// counts only the faults that made a page resident.
    pub fn fault_count(&self) -> usize {
        self.fault_count
    }

    pub fn stats(&self) -> &PagingStats {
        &self.stats
    }

    pub fn residency(&self) -> &ResidencyRing {
        &self.residency
    }

    /// Returns the resident pages and their frames, oldest arrival first.
    pub fn resident_pages(&self) -> impl Iterator<Item = (PageNumber, FrameNumber)> + '_ {
        self.residency.iter().filter_map(|page| {
            let entry = &self.page_table[page];
            entry.frame().filter(|_| entry.is_valid()).map(|frame| (page, frame))
        })
    }

    /// Initial user stack pointer, just below the top of the address space.
    pub fn initial_stack_pointer(&self) -> VirtualAddress {
        VirtualAddress::new(
            (self.page_count() * PAGE_SIZE).saturating_sub(STACK_POINTER_SLACK),
        )
    }

    /// Resolves a translation miss at `addr`.
    ///
    /// On success the page holding `addr` is resident and the faulting access can be
    /// retried. Faulting on a page that is already resident does nothing.
    pub fn handle_fault(&mut self, addr: VirtualAddress) -> Result<(), FaultError> {
        let (page, _) = self.page_table.translate(addr);
        if !self.page_table.contains(page) {
            log::warn!(
                "space {}: fault at {} beyond last page {}",
                self.id,
                addr,
                self.page_count()
            );
            return Err(FaultError::OutOfRange {
                address: addr,
                page,
            });
        }

        if self.page_table[page].is_valid() {
            log::trace!("space {}: page {} already resident", self.id, page);
            return Ok(());
        }

        self.fault_count += 1;
        let result = if self.residency.is_full() {
            self.replace(page)
        } else {
            self.admit(page)
        };

        match result {
            Ok(()) => {
                self.stats.faults += 1;
                if let Some(frame) = self.page_table[page].frame() {
                    log::debug!("space {}: page {} in(frame {})", self.id, page, frame);
                }
                log::trace!("space {} page table:\n{}", self.id, self.page_table);
                Ok(())
            }
            Err(err) => {
                log::warn!("space {}: fault on page {} failed: {}", self.id, page, err);
                Err(err)
            }
        }
    }

    /// Warm-up: gives `page` a fresh frame and the next ring slot.
    fn admit(&mut self, page: PageNumber) -> Result<(), FaultError> {
        let frame = self.frames.allocate(self.owner(page))?;
        self.page_table.entry_mut(page).map(frame);
        self.residency.push(page);
        self.fill(page)?;
        Ok(())
    }

    /// Steady state: evicts the oldest resident page in favor of `page`.
    fn replace(&mut self, page: PageNumber) -> Result<(), FaultError> {
        let Some(victim) = self.residency.oldest() else {
            panic!("replacement with a residency ring that is not full");
        };
        self.evict_and_refill(victim, page)?;
        Ok(())
    }

    /// Hands the victim's frame to `new_page`.
    ///
    /// A dirty victim is written back before the frame is reloaded. If the write-back
    /// fails, the victim stays resident and the ring is left untouched.
    fn evict_and_refill(
        &mut self,
        victim: PageNumber,
        new_page: PageNumber,
    ) -> Result<(), IoError> {
        let Some(frame) = self.resident_frame(victim) else {
            panic!("eviction victim page {} is not resident", victim);
        };

        if self.page_table[victim].is_dirty() {
            self.write_back(victim)?;
        }

        log::debug!(
            "space {}: evicting page {} from frame {} for page {}",
            self.id,
            victim,
            frame,
            new_page
        );
        self.stats.evictions += 1;

        if victim != new_page {
            self.page_table.entry_mut(victim).unmap();
            self.frames
                .transfer(frame, self.owner(victim), self.owner(new_page));
        }

        self.page_table.entry_mut(new_page).map(frame);
        self.residency.replace_oldest(new_page);
        self.fill(new_page)
    }

    /// Loads a freshly mapped page.
    ///
    /// If the load fails the page is unmapped again, its frame returns to the pool and its
    /// ring slot is vacated, so the next fault starts from a consistent state.
    fn fill(&mut self, page: PageNumber) -> Result<(), IoError> {
        let result = self.load(page);
        if result.is_err() {
            if let Some(frame) = self.page_table.entry_mut(page).unmap() {
                self.frames.release(frame);
            }
            self.residency.remove(page);
        }
        result
    }

    /// Persists the frame contents of a dirty resident page.
    fn write_back(&mut self, page: PageNumber) -> Result<(), IoError> {
        let entry = self.page_table[page];
        let Some(frame) = self.resident_frame(page) else {
            panic!("write-back of non-resident page {}", page);
        };

        match entry.backing() {
            Backing::Executable => {
                let offset = entry.backing_offset().ok_or(IoError::Unbacked(page))?;
                let executable = &self.executable;
                let written = self
                    .frames
                    .with_frame(frame, |bytes| executable.write_at(bytes, offset))?;
                log::debug!(
                    "space {}: page {} written back to executable at {:#x} ({} bytes)",
                    self.id,
                    page,
                    offset,
                    written
                );
                self.stats.executable_write_backs += 1;
            }
            Backing::Swap => {
                let recorded = entry.backing_offset().map(SwapSlot::from_byte_offset);
                let slot = match recorded {
                    Some(slot) => slot,
                    None => self.swap.allocate()?,
                };

                let swap = &self.swap;
                let written = self
                    .frames
                    .with_frame(frame, |bytes| swap.write_slot(slot, bytes));
                if let Err(err) = written {
                    if recorded.is_none() {
                        self.swap.free(slot);
                    }
                    return Err(err);
                }

                self.page_table
                    .entry_mut(page)
                    .set_backing_offset(Some(slot.byte_offset()));
                log::debug!("space {}: page {} swapped out to slot {}", self.id, page, slot);
                self.stats.swap_write_backs += 1;
            }
        }

        self.page_table.entry_mut(page).set_dirty(false);
        Ok(())
    }

    /// Fills the frame of a freshly mapped page with its contents.
    fn load(&mut self, page: PageNumber) -> Result<(), IoError> {
        let entry = self.page_table[page];
        let Some(frame) = self.resident_frame(page) else {
            panic!("load into non-resident page {}", page);
        };

        match (entry.backing(), entry.backing_offset()) {
            (Backing::Executable, None) => return Err(IoError::Unbacked(page)),
            (Backing::Executable, Some(offset)) => {
                let executable = &self.executable;
                let read = self.frames.with_frame_mut(frame, |bytes| {
                    let read = executable.read_at(bytes, offset)?;
                    bytes[read..].fill(0);
                    Ok::<usize, IoError>(read)
                })?;
                log::trace!(
                    "space {}: page {} read from executable at {:#x} ({} bytes)",
                    self.id,
                    page,
                    offset,
                    read
                );
            }
            (Backing::Swap, None) => {
                self.frames.with_frame_mut(frame, |bytes| bytes.fill(0));
                match entry.image_extent() {
                    Some(extent) => {
                        let executable = &self.executable;
                        let read = self.frames.with_frame_mut(frame, |bytes| {
                            let window =
                                &mut bytes[extent.page_offset..extent.page_offset + extent.len];
                            executable.read_at(window, extent.file_offset)
                        })?;
                        log::trace!(
                            "space {}: page {} read {} bytes from executable at {:#x}",
                            self.id,
                            page,
                            read,
                            extent.file_offset
                        );
                    }
                    None => self.stats.demand_zero_fills += 1,
                }
            }
            (Backing::Swap, Some(offset)) => {
                let slot = SwapSlot::from_byte_offset(offset);
                let swap = &self.swap;
                self.frames
                    .with_frame_mut(frame, |bytes| swap.read_slot(slot, bytes))?;
                self.swap.free(slot);

                // The frame now holds the only copy, so the next eviction must save it.
                let entry = self.page_table.entry_mut(page);
                entry.set_backing_offset(None);
                entry.set_dirty(true);

                log::debug!("space {}: page {} swapped in from slot {}", self.id, page, slot);
                self.stats.swap_ins += 1;
            }
        }
        Ok(())
    }

    /// Reads the byte at `addr`.
    pub fn read_u8(&mut self, addr: VirtualAddress) -> Result<u8, AccessError> {
        let (frame, offset) = self.access(addr, 1, false)?;
        Ok(self.frames.with_frame(frame, |bytes| bytes[offset]))
    }

    /// Writes the byte at `addr`.
    pub fn write_u8(&mut self, addr: VirtualAddress, value: u8) -> Result<(), AccessError> {
        let (frame, offset) = self.access(addr, 1, true)?;
        self.frames
            .with_frame_mut(frame, |bytes| bytes[offset] = value);
        Ok(())
    }

    /// Reads the little-endian word at `addr`, which must be 4-byte aligned.
    pub fn read_u32(&mut self, addr: VirtualAddress) -> Result<u32, AccessError> {
        let (frame, offset) = self.access(addr, 4, false)?;
        Ok(self.frames.with_frame(frame, |bytes| {
            let mut word = [0u8; 4];
            word.copy_from_slice(&bytes[offset..offset + 4]);
            u32::from_le_bytes(word)
        }))
    }

    /// Writes the little-endian word at `addr`, which must be 4-byte aligned.
    pub fn write_u32(&mut self, addr: VirtualAddress, value: u32) -> Result<(), AccessError> {
        let (frame, offset) = self.access(addr, 4, true)?;
        self.frames.with_frame_mut(frame, |bytes| {
            bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes())
        });
        Ok(())
    }

    /// Translates `addr` for an access of `size` bytes and updates the entry's flags.
    fn access(
        &mut self,
        addr: VirtualAddress,
        size: usize,
        write: bool,
    ) -> Result<(FrameNumber, usize), AccessError> {
        if !addr.is_aligned(size) {
            return Err(AccessError::AddressError(addr));
        }

        let (page, offset) = self.page_table.translate(addr);
        if !self.page_table.contains(page) {
            return Err(AccessError::AddressError(addr));
        }
        let frame = self
            .resident_frame(page)
            .ok_or(AccessError::PageFault(addr))?;

        let entry = self.page_table.entry_mut(page);
        entry.set_used(true);
        if write {
            entry.set_dirty(true);
        }

        log::trace!(
            "space {}: {} {} -> frame {} offset {}",
            self.id,
            if write { "write" } else { "read" },
            addr,
            frame,
            offset
        );
        Ok((frame, offset))
    }

    fn resident_frame(&self, page: PageNumber) -> Option<FrameNumber> {
        let entry = self.page_table.get(page)?;
        entry.frame().filter(|_| entry.is_valid())
    }

    fn owner(&self, page: PageNumber) -> FrameOwner {
        FrameOwner::new(self.id, page)
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        let mut frames = 0;
        let mut slots = 0;

        for entry in self.page_table.iter() {
            if let Some(frame) = entry.frame().filter(|_| entry.is_valid()) {
                self.frames.release(frame);
                frames += 1;
            }
            if entry.backing() == Backing::Swap {
                if let Some(offset) = entry.backing_offset() {
                    self.swap.free(SwapSlot::from_byte_offset(offset));
                    slots += 1;
                }
            }
        }

        log::info!(
            "address space {} destroyed: released {} frames and {} swap slots",
            self.id,
            frames,
            slots
        );
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("id", &self.id)
            .field("pages", &self.page_count())
            .field("residency", &self.residency)
            .field("fault_count", &self.fault_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ImageBuilder, MemoryFile, NoffHeader, config::PAGE_SIZE, loader};
    use alloc::vec::Vec;

    /// Code whose page `n` is filled with the byte `n + 1`.
    fn code(pages: usize) -> Vec<u8> {
        (0..pages * PAGE_SIZE)
            .map(|i| (i / PAGE_SIZE + 1) as u8)
            .collect()
    }

    fn addr(page: usize) -> VirtualAddress {
        PageNumber::new(page).start()
    }

    fn pool(frames: usize) -> Arc<FramePool> {
        Arc::new(FramePool::new(frames))
    }

    fn swap(slots: usize) -> Arc<SwapStore> {
        Arc::new(SwapStore::new(
            Arc::new(MemoryFile::new(slots * PAGE_SIZE)),
            slots,
        ))
    }

    fn spawn(
        id: u32,
        image: &[u8],
        stack_pages: usize,
        limit: usize,
        frames: &Arc<FramePool>,
        swap: &Arc<SwapStore>,
    ) -> (AddressSpace, Arc<MemoryFile>) {
        let file = Arc::new(MemoryFile::from_bytes(image.to_vec()));
        let header = NoffHeader::from_bytes(image).unwrap();
        let table = loader::build_page_table(&header, stack_pages);
        let space = AddressSpace::new(
            SpaceId::new(id),
            table,
            limit,
            file.clone(),
            frames.clone(),
            swap.clone(),
        );
        (space, file)
    }

    /// A space with no segments: every page is stack.
    fn stack_only(stack_pages: usize, limit: usize, slots: usize) -> AddressSpace {
        let image = ImageBuilder::new().build();
        spawn(0, &image, stack_pages, limit, &pool(8), &swap(slots)).0
    }

    fn residents(space: &AddressSpace) -> Vec<(usize, usize)> {
        space
            .resident_pages()
            .map(|(page, frame)| (page.as_usize(), frame.as_usize()))
            .collect()
    }

    mod fault {
        use super::*;

        #[test]
        fn four_code_pages_with_two_resident() {
            let image = ImageBuilder::new().code(&code(4)).build();
            let (mut space, _) = spawn(0, &image, 1, 2, &pool(4), &swap(4));

            space.handle_fault(addr(0)).unwrap();
            space.handle_fault(addr(1)).unwrap();
            assert_eq!(residents(&space), [(0, 0), (1, 1)]);

            space.handle_fault(addr(2)).unwrap();
            assert_eq!(residents(&space), [(1, 1), (2, 0)]);
            assert!(!space.page_table()[PageNumber::new(0)].is_valid());
            assert_eq!(space.page_table()[PageNumber::new(0)].frame(), None);

            space.handle_fault(addr(3)).unwrap();
            assert_eq!(residents(&space), [(2, 0), (3, 1)]);
            assert!(!space.page_table()[PageNumber::new(1)].is_valid());

            assert_eq!(space.read_u8(addr(2)), Ok(3));
            assert_eq!(space.read_u8(addr(3) + 7), Ok(4));
            assert_eq!(space.stats().evictions, 2);
            assert_eq!(space.fault_count(), 4);
        }

        #[test]
        fn eviction_follows_arrival_not_access() {
            let image = ImageBuilder::new().code(&code(6)).build();
            let (mut space, _) = spawn(0, &image, 1, 3, &pool(4), &swap(4));

            for page in 0..3 {
                space.handle_fault(addr(page)).unwrap();
            }
            for _ in 0..10 {
                space.read_u8(addr(0)).unwrap();
            }

            let mut evicted = Vec::new();
            for page in 3..6 {
                let victim = space.residency().oldest().unwrap();
                space.handle_fault(addr(page)).unwrap();
                assert!(!space.page_table()[victim].is_valid());
                evicted.push(victim.as_usize());
            }
            assert_eq!(evicted, [0, 1, 2]);
        }

        #[test]
        fn resident_page_refault_is_a_no_op() {
            let image = ImageBuilder::new().code(&code(2)).build();
            let (mut space, _) = spawn(0, &image, 1, 2, &pool(4), &swap(4));

            space.handle_fault(addr(0)).unwrap();
            space.handle_fault(addr(0) + 5).unwrap();

            assert_eq!(space.fault_count(), 1);
            assert_eq!(space.residency().len(), 1);
            assert_eq!(residents(&space), [(0, 0)]);
        }

        #[test]
        fn out_of_range_is_reported() {
            let mut space = stack_only(2, 1, 2);
            let beyond = addr(2);

            assert_eq!(
                space.handle_fault(beyond),
                Err(FaultError::OutOfRange {
                    address: beyond,
                    page: PageNumber::new(2)
                })
            );
            assert_eq!(space.fault_count(), 0);
        }

        #[test]
        fn warm_up_reports_exhausted_pool() {
            let frames = pool(1);
            let swap = swap(2);
            let image = ImageBuilder::new().code(&code(1)).build();
            let (mut first, _) = spawn(0, &image, 1, 1, &frames, &swap);
            let (mut second, _) = spawn(1, &image, 1, 1, &frames, &swap);

            first.handle_fault(addr(0)).unwrap();
            assert_eq!(second.handle_fault(addr(0)), Err(FaultError::OutOfFrames));
            assert_eq!(second.fault_count(), 1);
            assert_eq!(second.stats().faults, 0);
            assert!(second.residency().is_empty());
        }

        #[test]
        fn fault_after_failed_write_back_keeps_the_victim() {
            let mut space = stack_only(3, 1, 1);

            space.handle_fault(addr(0)).unwrap();
            space.write_u8(addr(0), 1).unwrap();
            space.handle_fault(addr(1)).unwrap();
            space.write_u8(addr(1), 2).unwrap();

            assert_eq!(
                space.handle_fault(addr(2)),
                Err(FaultError::Io(IoError::NoSwapSpace))
            );
            assert_eq!(residents(&space), [(1, 0)]);
            assert_eq!(space.residency().slots(), [PageNumber::new(1)]);
            assert!(!space.page_table()[PageNumber::new(2)].is_valid());

            assert_eq!(
                space.handle_fault(addr(0)),
                Err(FaultError::Io(IoError::NoSwapSpace))
            );
            assert_eq!(space.read_u8(addr(1)), Ok(2));
            assert_eq!(space.stats().evictions, 1);
        }

        /// An executable whose reads always fail.
        struct Unreadable;

        impl BackingStore for Unreadable {
            fn read_at(&self, buf: &mut [u8], _offset: usize) -> Result<usize, IoError> {
                Err(IoError::ShortRead {
                    expected: buf.len(),
                    actual: 0,
                })
            }

            fn write_at(&self, buf: &[u8], _offset: usize) -> Result<usize, IoError> {
                Ok(buf.len())
            }

            fn len(&self) -> usize {
                0
            }
        }

        #[test]
        fn failed_load_gives_the_frame_back() {
            let frames = pool(2);
            let image = ImageBuilder::new().code(&code(2)).build();
            let header = NoffHeader::from_bytes(&image).unwrap();
            let mut space = AddressSpace::new(
                SpaceId::new(0),
                loader::build_page_table(&header, 1),
                2,
                Arc::new(Unreadable),
                frames.clone(),
                swap(1),
            );

            assert!(matches!(
                space.handle_fault(addr(0)),
                Err(FaultError::Io(IoError::ShortRead { .. }))
            ));
            assert_eq!(frames.free_frames(), 2);
            assert!(space.residency().is_empty());
            assert!(!space.page_table()[PageNumber::new(0)].is_valid());

            // Stack pages never touch the executable.
            space.handle_fault(addr(2)).unwrap();
            assert_eq!(residents(&space), [(2, 0)]);
        }
    }

    mod write_back {
        use super::*;

        #[test]
        fn dirty_code_page_is_saved_before_reload() {
            let image = ImageBuilder::new().code(&code(2)).build();
            let (mut space, file) = spawn(0, &image, 1, 1, &pool(2), &swap(2));

            space.handle_fault(addr(0)).unwrap();
            space.write_u8(addr(0) + 3, 0xEE).unwrap();
            space.handle_fault(addr(1)).unwrap();

            let offset = space.page_table()[PageNumber::new(0)]
                .backing_offset()
                .unwrap();
            let contents = file.contents();
            assert_eq!(contents[offset + 3], 0xEE);
            assert_eq!(contents[offset + 4], 1);
            assert_eq!(space.read_u8(addr(1) + 3), Ok(2));
            assert_eq!(space.stats().executable_write_backs, 1);

            space.handle_fault(addr(0)).unwrap();
            assert_eq!(space.read_u8(addr(0) + 3), Ok(0xEE));
        }

        #[test]
        fn clean_victims_are_not_written() {
            let image = ImageBuilder::new().code(&code(3)).build();
            let (mut space, file) = spawn(0, &image, 1, 1, &pool(2), &swap(2));

            for page in 0..3 {
                space.handle_fault(addr(page)).unwrap();
                space.read_u8(addr(page)).unwrap();
            }
            assert_eq!(file.contents(), image);
            assert_eq!(space.stats().executable_write_backs, 0);
            assert_eq!(space.stats().swap_write_backs, 0);
        }

        #[test]
        fn shared_page_keeps_uninitialized_writes() {
            let image = ImageBuilder::new().code(&[9; 10]).uninit_data(20).build();
            let (mut space, file) = spawn(0, &image, 1, 1, &pool(1), &swap(2));

            space.handle_fault(addr(0) + 15).unwrap();
            assert_eq!(space.read_u8(addr(0) + 15), Ok(0));
            space.write_u8(addr(0) + 15, 0x77).unwrap();

            space.handle_fault(addr(1)).unwrap();
            assert!(!space.page_table()[PageNumber::new(0)].is_valid());
            assert_eq!(space.stats().swap_write_backs, 1);
            assert_eq!(space.stats().executable_write_backs, 0);

            space.handle_fault(addr(0)).unwrap();
            assert_eq!(space.read_u8(addr(0) + 15), Ok(0x77));
            assert_eq!(space.read_u8(addr(0) + 9), Ok(9));
            assert_eq!(space.read_u8(addr(0) + 10), Ok(0));
            assert_eq!(file.contents(), image);
        }

        #[test]
        fn clean_shared_page_rereads_the_image() {
            let image = ImageBuilder::new().code(&[5; 10]).uninit_data(20).build();
            let (mut space, _) = spawn(0, &image, 1, 1, &pool(1), &swap(1));
            let swap = space.swap.clone();

            space.handle_fault(addr(0)).unwrap();
            space.handle_fault(addr(1)).unwrap();
            space.handle_fault(addr(0)).unwrap();

            assert_eq!(space.read_u8(addr(0) + 4), Ok(5));
            assert_eq!(swap.free_slots(), 1);
            assert_eq!(space.stats().demand_zero_fills, 1);
        }

        #[test]
        fn partial_last_page_reads_zero_tail() {
            let image = ImageBuilder::new().code(&[9; 10]).build();
            let (mut space, _) = spawn(0, &image, 1, 1, &pool(1), &swap(1));

            space.handle_fault(addr(0)).unwrap();
            assert_eq!(space.read_u8(addr(0) + 9), Ok(9));
            assert_eq!(space.read_u8(addr(0) + 10), Ok(0));
        }
    }

    mod swap_paths {
        use super::*;

        #[test]
        fn first_touch_is_demand_zero() {
            let mut space = stack_only(2, 1, 2);

            space.handle_fault(addr(0)).unwrap();
            space.write_u32(addr(0), 0xFFFF_FFFF).unwrap();
            space.handle_fault(addr(1)).unwrap();

            // Same frame, fresh page.
            assert_eq!(residents(&space), [(1, 0)]);
            assert_eq!(space.read_u32(addr(1)), Ok(0));
            assert_eq!(space.stats().demand_zero_fills, 2);
        }

        #[test]
        fn evicted_stack_page_round_trips_through_swap() {
            let mut space = stack_only(2, 1, 4);
            let swap = space.swap.clone();

            space.handle_fault(addr(0)).unwrap();
            for i in 0..(PAGE_SIZE / 4) {
                space
                    .write_u32(addr(0) + i * 4, 0xC0DE_0000 + i as u32)
                    .unwrap();
            }

            space.handle_fault(addr(1)).unwrap();
            assert_eq!(space.page_table()[PageNumber::new(0)].backing_offset(), Some(0));
            assert!(swap.is_allocated(SwapSlot::new(0)));

            space.handle_fault(addr(0)).unwrap();
            for i in 0..(PAGE_SIZE / 4) {
                assert_eq!(space.read_u32(addr(0) + i * 4), Ok(0xC0DE_0000 + i as u32));
            }
            assert_eq!(space.page_table()[PageNumber::new(0)].backing_offset(), None);
            assert_eq!(swap.free_slots(), 4);
            assert_eq!(space.stats().swap_ins, 1);
        }

        #[test]
        fn second_eviction_reuses_the_same_slot() {
            let mut space = stack_only(3, 1, 4);
            let swap = space.swap.clone();

            space.handle_fault(addr(0)).unwrap();
            space.write_u8(addr(0), 42).unwrap();
            space.handle_fault(addr(1)).unwrap();
            let first = space.page_table()[PageNumber::new(0)].backing_offset();
            assert!(first.is_some());

            space.handle_fault(addr(0)).unwrap();
            space.handle_fault(addr(2)).unwrap();
            let second = space.page_table()[PageNumber::new(0)].backing_offset();

            assert_eq!(first, second);
            assert_eq!(swap.free_slots(), 3);

            space.handle_fault(addr(0)).unwrap();
            assert_eq!(space.read_u8(addr(0)), Ok(42));
        }

        #[test]
        fn exhausted_swap_fails_the_fault() {
            let mut space = stack_only(3, 1, 1);

            space.handle_fault(addr(0)).unwrap();
            space.write_u8(addr(0), 1).unwrap();
            space.handle_fault(addr(1)).unwrap();
            space.write_u8(addr(1), 2).unwrap();

            assert_eq!(
                space.handle_fault(addr(2)),
                Err(FaultError::Io(IoError::NoSwapSpace))
            );
        }
    }

    mod access {
        use super::*;

        #[test]
        fn non_resident_page_faults() {
            let mut space = stack_only(2, 1, 2);
            assert_eq!(
                space.read_u8(addr(1)),
                Err(AccessError::PageFault(addr(1)))
            );
        }

        #[test]
        fn misaligned_and_out_of_range_are_address_errors() {
            let mut space = stack_only(2, 1, 2);
            space.handle_fault(addr(0)).unwrap();

            assert_eq!(
                space.read_u32(addr(0) + 2),
                Err(AccessError::AddressError(addr(0) + 2))
            );
            assert_eq!(
                space.write_u8(addr(5), 0),
                Err(AccessError::AddressError(addr(5)))
            );
        }

        #[test]
        fn writes_mark_the_page_dirty() {
            let mut space = stack_only(1, 1, 1);
            space.handle_fault(addr(0)).unwrap();
            assert!(!space.page_table()[PageNumber::new(0)].is_dirty());

            space.write_u32(addr(0) + 8, 0x0403_0201).unwrap();
            let entry = space.page_table()[PageNumber::new(0)];
            assert!(entry.is_dirty());
            assert!(entry.is_used());
            assert_eq!(space.read_u8(addr(0) + 8), Ok(0x01));
            assert_eq!(space.read_u8(addr(0) + 11), Ok(0x04));
        }

        #[test]
        fn stack_pointer_sits_below_the_top() {
            let space = stack_only(8, 1, 1);
            assert_eq!(
                space.initial_stack_pointer(),
                VirtualAddress::new(8 * PAGE_SIZE - STACK_POINTER_SLACK)
            );
        }
    }

    mod shared {
        use super::*;

        #[test]
        fn frames_are_never_shared_between_spaces() {
            let frames = pool(4);
            let swap = swap(8);
            let image = ImageBuilder::new().code(&code(4)).build();
            let (mut a, _) = spawn(1, &image, 2, 2, &frames, &swap);
            let (mut b, _) = spawn(2, &image, 2, 2, &frames, &swap);

            for page in [0, 1, 2, 3, 4, 5, 0, 3] {
                a.handle_fault(addr(page)).unwrap();
                b.handle_fault(addr((page + 1) % 6)).unwrap();

                let mut held: Vec<(SpaceId, PageNumber, FrameNumber)> = Vec::new();
                for space in [&a, &b] {
                    for (page, frame) in space.resident_pages() {
                        held.push((space.id(), page, frame));
                    }
                }
                for (i, (space, page, frame)) in held.iter().enumerate() {
                    assert!(held[i + 1..].iter().all(|(_, _, other)| other != frame));
                    assert_eq!(frames.owner(*frame), Some(FrameOwner::new(*space, *page)));
                }
            }
            assert_eq!(frames.free_frames(), 0);
        }

        #[test]
        fn drop_releases_frames_and_swap_slots() {
            let frames = pool(2);
            let swap = swap(2);
            let image = ImageBuilder::new().build();
            let (mut space, _) = spawn(0, &image, 2, 1, &frames, &swap);

            space.handle_fault(addr(0)).unwrap();
            space.write_u8(addr(0), 1).unwrap();
            space.handle_fault(addr(1)).unwrap();
            assert_eq!(swap.free_slots(), 1);
            assert_eq!(frames.free_frames(), 1);

            drop(space);
            assert_eq!(swap.free_slots(), 2);
            assert_eq!(frames.free_frames(), 2);
        }
    }
}
