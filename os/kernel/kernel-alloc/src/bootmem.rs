//! # Boot Watermark Allocator
//!
//! The only allocator that exists before the frame descriptor table does.
//! It hands out memory by bumping a watermark from the end of the kernel image
//! towards the physical ceiling and never frees anything. Everything it hands
//! out stays reserved for the lifetime of the kernel: once boot is over the
//! final watermark is passed to
//! [`FrameAllocator::init`](crate::frame_alloc::FrameAllocator::init), which
//! marks every frame below it as reserved.
//!
//! Exhaustion is fatal. Nothing exists yet that could give memory back, so
//! [`BootAllocator::allocate`] panics instead of returning an error.

use kernel_info::memory::MemoryLayout;
use kernel_memory_addresses::{FRAME_SIZE, FrameNumber, PhysicalAddress, VirtualAddress};
use kernel_vmem::{AddressSpace, PageFlags, PageTableEntry, PhysMapper, TableFrameSource};
use log::{debug, trace};

/// Watermark allocator for single-threaded boot.
pub struct BootAllocator<'m, M: PhysMapper> {
    mapper: &'m M,
    watermark: PhysicalAddress,
    max_pa: PhysicalAddress,
}

impl<'m, M: PhysMapper> BootAllocator<'m, M> {
    /// Start allocating at the layout's `free_start`.
    #[must_use]
    pub const fn new(mapper: &'m M, layout: &MemoryLayout) -> Self {
        Self {
            mapper,
            watermark: layout.free_start(),
            max_pa: layout.max_pa(),
        }
    }

    /// Current watermark: the first byte not yet handed out.
    #[inline]
    #[must_use]
    pub const fn watermark(&self) -> PhysicalAddress {
        self.watermark
    }

    /// Reserve `size` bytes aligned to `align`, optionally zero-filled.
    ///
    /// # Panics
    /// If `align` is not a power of two, or if the reservation would end past
    /// the physical memory ceiling.
    pub fn allocate(&mut self, size: u64, align: u64, zero: bool) -> PhysicalAddress {
        assert!(
            align.is_power_of_two(),
            "alignment {align:#x} is not a power of two"
        );

        let start = self.watermark.align_up(align);
        let end = match start.checked_add(size) {
            Some(end) if end <= self.max_pa => end,
            _ => panic!(
                "out of memory during boot: {size:#x} bytes at {start} exceed {}",
                self.max_pa
            ),
        };

        if zero {
            #[allow(clippy::cast_possible_truncation)]
            let len = size as usize;
            // SAFETY: [start, end) lies below the ceiling and was never handed out.
            unsafe { self.mapper.zero_bytes(start, len) };
        }

        self.watermark = end;
        trace!("Boot allocation {start}..{end}");
        start
    }

    /// Reserve one zero-filled frame.
    pub fn allocate_frame(&mut self) -> FrameNumber {
        self.allocate(FRAME_SIZE, FRAME_SIZE, true).frame()
    }

    /// Reserve a zero-filled, frame-aligned array of `count` elements.
    ///
    /// Returns the physical base together with the array.
    ///
    /// # Safety
    /// The all-zero bit pattern must be a valid `T`.
    pub unsafe fn allocate_array<T>(&mut self, count: usize) -> (PhysicalAddress, &'m mut [T]) {
        debug_assert!(align_of::<T>() as u64 <= FRAME_SIZE);
        let bytes = size_of::<T>() as u64 * count as u64;
        let pa = self.allocate(bytes, FRAME_SIZE, true);
        // SAFETY: freshly reserved and zeroed; validity of zero is the caller's promise.
        let array = unsafe { self.mapper.phys_to_slice_mut(pa, count) };
        (pa, array)
    }

    /// Map `[va, va + size)` to `[pa, pa + size)` in the hierarchy at `root`,
    /// creating tables from boot memory as needed.
    ///
    /// Only meant for static mappings set up before the frame allocator exists:
    /// the mapped frames' reference counts are not touched.
    ///
    /// # Panics
    /// If `size` is not a multiple of the frame size, or if boot memory runs out.
    pub fn boot_map_segment(
        &mut self,
        root: FrameNumber,
        va: VirtualAddress,
        size: u64,
        pa: PhysicalAddress,
        perm: PageFlags,
    ) {
        assert!(
            size.is_multiple_of(FRAME_SIZE),
            "boot segment size {size:#x} is not a multiple of the frame size"
        );

        let mapper = self.mapper;
        let aspace = AddressSpace::from_root(mapper, root);
        let mut offset = 0;
        while offset < size {
            let slot = match aspace.ensure_leaf(va + offset, &mut *self) {
                Ok(slot) => slot,
                Err(e) => panic!("boot mapping of {} failed: {e}", va + offset),
            };
            aspace.set_entry(slot, PageTableEntry::make((pa + offset).frame(), perm));
            offset += FRAME_SIZE;
        }

        debug!("Boot mapped {va}..{} to {pa} ({perm:?})", va + size);
    }

    /// End of boot: give up the allocator and return the final watermark.
    #[must_use]
    pub const fn into_watermark(self) -> PhysicalAddress {
        self.watermark
    }
}

/// The boot walker's frame source: boot memory, fatal on exhaustion.
impl<M: PhysMapper> TableFrameSource for BootAllocator<'_, M> {
    fn table_frame(&mut self) -> Option<FrameNumber> {
        Some(self.allocate_frame())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::SimRam;

    fn layout(frames: u64, free_start: u64) -> MemoryLayout {
        MemoryLayout::new(frames * FRAME_SIZE, free_start, 0).unwrap()
    }

    #[test]
    fn allocations_are_aligned_and_monotonic() {
        let ram = SimRam::new(16);
        let mapper = ram.mapper();
        let layout = layout(16, 0x1003);
        let mut boot = BootAllocator::new(&mapper, &layout);

        let a = boot.allocate(10, 8, false);
        assert_eq!(a, PhysicalAddress::new(0x1008));
        let b = boot.allocate(0x100, 0x1000, true);
        assert_eq!(b, PhysicalAddress::new(0x2000));
        assert_eq!(boot.watermark(), PhysicalAddress::new(0x2100));

        let f = boot.allocate_frame();
        assert_eq!(f, FrameNumber::from_index(3));
        assert_eq!(boot.into_watermark(), PhysicalAddress::new(0x4000));
    }

    #[test]
    fn zero_fill_clears_stale_bytes() {
        let ram = SimRam::new(4);
        ram.fill(0xAB);
        let mapper = ram.mapper();
        let layout = layout(4, 0x1000);
        let mut boot = BootAllocator::new(&mapper, &layout);

        let pa = boot.allocate(0x20, 0x10, true);
        assert!(ram.bytes(pa, 0x20).iter().all(|&b| b == 0));
        assert_eq!(ram.bytes(pa + 0x20, 1), [0xAB]);

        let pa = boot.allocate(0x10, 0x10, false);
        assert!(ram.bytes(pa, 0x10).iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn array_is_frame_aligned_and_zeroed() {
        let ram = SimRam::new(8);
        ram.fill(0xFF);
        let mapper = ram.mapper();
        let layout = layout(8, 0x10);
        let mut boot = BootAllocator::new(&mapper, &layout);

        let (pa, array) = unsafe { boot.allocate_array::<u64>(600) };
        assert_eq!(pa, PhysicalAddress::new(0x1000));
        assert_eq!(array.len(), 600);
        assert!(array.iter().all(|&v| v == 0));
        assert_eq!(boot.watermark(), PhysicalAddress::new(0x1000 + 600 * 8));
    }

    #[test]
    #[should_panic(expected = "out of memory during boot")]
    fn exhaustion_is_fatal() {
        let ram = SimRam::new(4);
        let mapper = ram.mapper();
        let layout = layout(4, 0x3000);
        let mut boot = BootAllocator::new(&mapper, &layout);
        let _ = boot.allocate_frame();
        let _ = boot.allocate(1, 1, false);
    }

    #[test]
    fn allocation_may_end_exactly_at_the_ceiling() {
        let ram = SimRam::new(4);
        let mapper = ram.mapper();
        let layout = layout(4, 0x3000);
        let mut boot = BootAllocator::new(&mapper, &layout);
        assert_eq!(boot.allocate_frame(), FrameNumber::from_index(3));
    }

    #[test]
    fn boot_map_segment_identity_maps() {
        let ram = SimRam::new(16);
        let mapper = ram.mapper();
        let layout = layout(16, 0x1000);
        let mut boot = BootAllocator::new(&mapper, &layout);
        let root = boot.allocate_frame();

        boot.boot_map_segment(
            root,
            VirtualAddress::new(0x1000),
            0x3000,
            PhysicalAddress::new(0x1000),
            PageFlags::WRITABLE,
        );

        // Root, then three tables for one leaf table.
        assert_eq!(boot.watermark(), PhysicalAddress::new(0x5000));
        let aspace = AddressSpace::from_root(&mapper, root);
        for off in [0x1000, 0x2000, 0x3abc] {
            assert_eq!(
                aspace.translate(VirtualAddress::new(off)),
                Some(PhysicalAddress::new(off))
            );
        }
        assert_eq!(aspace.translate(VirtualAddress::new(0)), None);
        assert_eq!(aspace.translate(VirtualAddress::new(0x4000)), None);
    }

    #[test]
    #[should_panic(expected = "not a multiple of the frame size")]
    fn boot_map_segment_rejects_partial_frames() {
        let ram = SimRam::new(8);
        let mapper = ram.mapper();
        let layout = layout(8, 0x1000);
        let mut boot = BootAllocator::new(&mapper, &layout);
        let root = boot.allocate_frame();
        boot.boot_map_segment(
            root,
            VirtualAddress::zero(),
            0x1800,
            PhysicalAddress::zero(),
            PageFlags::WRITABLE,
        );
    }
}
