//! # Virtual Memory Support
//!
//! Four-level x86-64 page-table plumbing for the kernel's memory core.
//!
//! ## What you get
//! - An [`address space`](address_space) handle with the page-table walker.
//! - The shared [`PageTableEntry`] format, its [`PageFlags`] and a tagged
//!   [`EntryKind`] view.
//! - A 4 KiB-aligned [`PageTable`] with [`Level`]/[`TableIndex`] helpers.
//! - The seams the walker needs from its environment: [`PhysMapper`] to reach
//!   physical frames, [`TableFrameSource`] to obtain new tables, and
//!   [`TranslationCache`] for TLB invalidation.
//!
//! ## Virtual Address → Physical Address Walk
//!
//! ```text
//!  Root  →  Upper  →  Middle  →  Leaf  →  Data frame
//!   │         │          │         │
//!   │         │          │         └───► leaf entry maps 4 KiB
//!   │         │          └─────────────► links a leaf table (2 MiB of VA)
//!   │         └────────────────────────► links a middle table (1 GiB of VA)
//!   └──────────────────────────────────► links an upper table (512 GiB of VA)
//! ```
//!
//! Every level uses the same entry format and huge pages are never created,
//! so every valid directory entry links a table and every valid leaf entry
//! maps exactly one frame.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod address_space;
pub mod entry;
pub mod page_table;
pub mod tlb;

pub use crate::address_space::{AddressSpace, LeafSlot, WalkError};
pub use crate::entry::{EntryKind, PageFlags, PageTableEntry};
pub use crate::page_table::{Level, PageTable, TableIndex};
pub use crate::tlb::TranslationCache;
use kernel_memory_addresses::{FRAME_SIZE, FrameNumber, PhysicalAddress};

/// Supplier of frames for new page tables during a creating walk.
///
/// The boot allocator and the frame allocator both implement this; the walker
/// does not care which one it is talking to.
pub trait TableFrameSource {
    /// Hand out one zero-filled frame that is accounted for as a live table.
    ///
    /// Returns `None` on out-of-memory.
    fn table_frame(&mut self) -> Option<FrameNumber>;
}

impl<S: TableFrameSource + ?Sized> TableFrameSource for &mut S {
    #[inline]
    fn table_frame(&mut self) -> Option<FrameNumber> {
        (**self).table_frame()
    }
}

/// Converts physical addresses to *temporarily* usable pointers in the current
/// virtual address space (e.g., via identity map or a higher-half direct map, HHDM).
///
/// Typical patterns:
/// - **Boot**: low memory is identity mapped; returns direct pointers.
/// - **Kernel**: uses HHDM; adds a constant offset before returning a pointer.
/// - **Tests**: a heap buffer stands in for physical memory.
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// - `pa` must be mapped writable in the current address space for `&mut T`.
    /// - Lifetime `'a` is not tied to anything; the mapping must remain valid
    ///   for `'a`.
    /// - `T` must match the bytes at `pa` and no other live reference may
    ///   alias them mutably.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// View `len` elements of `T` starting at `pa`.
    ///
    /// # Safety
    /// As [`phys_to_mut`](Self::phys_to_mut), for the whole range.
    unsafe fn phys_to_slice_mut<'a, T>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [T] {
        let first: &'a mut T = unsafe { self.phys_to_mut(pa) };
        unsafe { core::slice::from_raw_parts_mut(core::ptr::from_mut(first), len) }
    }

    /// Fill `len` bytes starting at `pa` with zero.
    ///
    /// # Safety
    /// The range must be mapped writable and not referenced elsewhere.
    unsafe fn zero_bytes(&self, pa: PhysicalAddress, len: usize) {
        if len == 0 {
            return;
        }
        let bytes: &mut [u8] = unsafe { self.phys_to_slice_mut(pa, len) };
        bytes.fill(0);
    }

    /// Fill one frame with zero.
    ///
    /// # Safety
    /// As [`zero_bytes`](Self::zero_bytes).
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn zero_frame(&self, frame: FrameNumber) {
        unsafe { self.zero_bytes(frame.base(), FRAME_SIZE as usize) }
    }
}

impl<M: PhysMapper + ?Sized> PhysMapper for &M {
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { (**self).phys_to_mut(pa) }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::TestPhys;
    use super::*;

    #[test]
    fn zero_bytes_clears_only_the_range() {
        let phys = TestPhys::with_frames(2);
        let bytes: &mut [u8] = unsafe { phys.phys_to_slice_mut(PhysicalAddress::new(0), 8192) };
        bytes.fill(0xAA);

        unsafe { phys.zero_bytes(PhysicalAddress::new(0x10), 0x20) };
        let bytes: &mut [u8] = unsafe { phys.phys_to_slice_mut(PhysicalAddress::new(0), 8192) };
        assert_eq!(bytes[0x0f], 0xAA);
        assert!(bytes[0x10..0x30].iter().all(|&b| b == 0));
        assert_eq!(bytes[0x30], 0xAA);

        unsafe { phys.zero_frame(FrameNumber::from_index(1)) };
        let bytes: &mut [u8] = unsafe { phys.phys_to_slice_mut(PhysicalAddress::new(0), 8192) };
        assert!(bytes[4096..].iter().all(|&b| b == 0));
    }
}
