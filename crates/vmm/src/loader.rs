//! Segment loader.
//!
//! Turns an executable header into the initial page table of an address space. Nothing is
//! read or allocated here: every entry starts invalid, and only the static fields (kind and,
//! for file-backed pages, the executable offset) are filled in.

use alloc::vec::Vec;

use crate::{
    Backing, ImageExtent, NoffHeader, PageKind, PageNumber, PageTable, Segment,
    TranslationEntry, config::PAGE_SIZE,
};

/// Number of virtual pages needed for the segments of `header` plus `stack_pages` of stack.
pub fn page_count(header: &NoffHeader, stack_pages: usize) -> usize {
    (header.segments_size() + stack_pages * PAGE_SIZE).div_ceil(PAGE_SIZE)
}

/// Builds the page table for an executable.
///
/// The last `stack_pages` pages are stack; anything else not covered by a segment is
/// treated as uninitialized data. Segments are then laid over the table in the order
/// uninitialized data, initialized data, code, so a page shared between a file-backed
/// segment and a zero-filled one keeps the file-backed kind.
///
/// A page that the file covers completely is paged to and from the executable. A page it
/// covers only in part records an [`ImageExtent`] instead: the file bytes are read on
/// first touch and the page goes to swap like any other zero-filled page.
pub fn build_page_table(header: &NoffHeader, stack_pages: usize) -> PageTable {
    let count = page_count(header, stack_pages);
    let stack_start = count.saturating_sub(stack_pages);

    let mut entries: Vec<TranslationEntry> = (0..count)
        .map(|index| {
            let kind = if index >= stack_start {
                PageKind::Stack
            } else {
                PageKind::UninitializedData
            };
            TranslationEntry::new(PageNumber::new(index), kind, None)
        })
        .collect();

    overlay(&mut entries, &header.uninit_data, PageKind::UninitializedData);
    overlay(&mut entries, &header.init_data, PageKind::InitializedData);
    overlay(&mut entries, &header.code, PageKind::Code);

    let mut partial = 0;
    for entry in entries
        .iter_mut()
        .filter(|entry| entry.kind().backing() == Backing::Executable)
    {
        let Some(extent) = file_extent(header, entry.virtual_page()) else {
            continue;
        };
        if extent.page_offset == 0 && extent.len == PAGE_SIZE {
            entry.set_backing_offset(Some(extent.file_offset));
        } else {
            entry.set_image_extent(Some(extent));
            partial += 1;
        }
    }

    log::trace!(
        "laid out {} pages ({} stack, {} partly file-backed) for {} bytes of segments",
        count,
        count - stack_start,
        partial,
        header.segments_size()
    );
    PageTable::from_entries(entries)
}

fn overlay(entries: &mut [TranslationEntry], segment: &Segment, kind: PageKind) {
    if segment.is_empty() {
        return;
    }

    let start = segment.virtual_addr as usize;
    let end = start + segment.size as usize;
    let first = start / PAGE_SIZE;
    let last = end.div_ceil(PAGE_SIZE).min(entries.len());

    for entry in entries.iter_mut().take(last).skip(first) {
        entry.set_kind(kind);
    }
}

/// Returns the bytes of `page` that the file-backed segments provide.
///
/// The segments are laid out contiguously in the file, so the covered bytes form a single
/// run.
fn file_extent(header: &NoffHeader, page: PageNumber) -> Option<ImageExtent> {
    let page_start = page.byte_offset();
    let page_end = page_start + PAGE_SIZE;

    let mut extent: Option<(usize, usize, usize)> = None;
    for segment in [&header.code, &header.init_data] {
        let start = segment.virtual_addr as usize;
        let low = start.max(page_start);
        let high = (start + segment.size as usize).min(page_end);
        if low >= high {
            continue;
        }

        let file_offset = segment.in_file_addr as usize + (low - start);
        extent = Some(match extent {
            Some((lo, hi, offset)) if lo <= low => (lo, hi.max(high), offset),
            Some((_, hi, _)) => (low, hi.max(high), file_offset),
            None => (low, high, file_offset),
        });
    }

    extent.map(|(low, high, file_offset)| ImageExtent {
        page_offset: low - page_start,
        file_offset,
        len: high - low,
    })
}
