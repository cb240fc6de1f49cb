//! # Virtual Memory Bootstrap
//!
//! Brings the memory core from "nothing but a watermark" to a running
//! [`Vmm`]:
//!
//! 1. Boot-allocate the kernel root table.
//! 2. Boot-allocate the frame descriptor table, one entry per frame.
//! 3. Identity map `[0, identity_map_bytes)` read/write.
//! 4. Map the descriptor table read-only at
//!    [`FRAME_TABLE_BASE`](kernel_info::memory::FRAME_TABLE_BASE) for
//!    diagnostic readers.
//! 5. Hand the final watermark to the frame allocator, which reserves
//!    everything below it.

use crate::bootmem::BootAllocator;
use crate::frame_alloc::{FrameAllocator, FrameDescriptor};
use crate::vmm::Vmm;
use kernel_info::memory::{FRAME_TABLE_BASE, MemoryLayout};
use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress, VirtualAddress, align_up};
use kernel_vmem::{PageFlags, PhysMapper, TranslationCache};
use log::info;

/// Build the kernel hierarchy and the frame allocator for `layout`.
///
/// # Panics
/// If boot memory runs out before the frame allocator exists.
#[must_use]
pub fn bootstrap<'m, M: PhysMapper, T: TranslationCache>(
    mapper: &'m M,
    layout: &MemoryLayout,
    tlb: T,
) -> Vmm<'m, M, T> {
    info!(
        "Physical memory: {} KiB available ({} frames)",
        layout.memory_kib(),
        layout.frame_count()
    );

    let mut boot = BootAllocator::new(mapper, layout);

    let root = boot.allocate_frame();
    info!("Kernel root table at {}", root.base());

    // SAFETY: an all-zero descriptor is a valid (if meaningless) descriptor;
    // `FrameAllocator::init` overwrites every entry.
    let (table_pa, descriptors) =
        unsafe { boot.allocate_array::<FrameDescriptor>(layout.frame_count()) };
    let table_bytes = align_up(size_of_val(descriptors) as u64, FRAME_SIZE);
    info!(
        "Frame descriptor table at {table_pa} ({} KiB)",
        table_bytes / 1024
    );

    boot.boot_map_segment(
        root,
        VirtualAddress::zero(),
        layout.identity_map_bytes(),
        PhysicalAddress::zero(),
        PageFlags::WRITABLE,
    );
    boot.boot_map_segment(
        root,
        VirtualAddress::new(FRAME_TABLE_BASE),
        table_bytes,
        table_pa,
        PageFlags::NO_EXECUTE,
    );

    let watermark = boot.into_watermark();
    info!("Boot allocations end at {watermark}");

    let frames = FrameAllocator::init(mapper, descriptors, watermark);
    Vmm::new(mapper, frames, tlb, root)
}
