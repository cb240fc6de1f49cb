//! Simulated machine for the integration tests.

#![allow(dead_code)]

use kernel_alloc::boot::bootstrap;
use kernel_alloc::phys_mapper::OffsetPhysMapper;
use kernel_alloc::vmm::Vmm;
use kernel_info::memory::MemoryLayout;
use kernel_memory_addresses::{FRAME_SIZE, FrameNumber, VirtualAddress};
use kernel_vmem::TranslationCache;

/// A 4 KiB-aligned raw frame.
#[repr(align(4096))]
#[derive(Clone)]
struct Aligned4K([u8; 4096]);

/// Translation cache that remembers what it was asked to forget.
#[derive(Default, Debug)]
pub struct Recorder(Vec<VirtualAddress>);

impl Recorder {
    pub fn invalidated(&self) -> &[VirtualAddress] {
        &self.0
    }
}

impl TranslationCache for Recorder {
    fn invalidate(&mut self, va: VirtualAddress) {
        self.0.push(va);
    }
}

/// Physical memory as a heap buffer plus the layout describing it.
///
/// Frame 0 is the "kernel image" and the first two frames are identity mapped,
/// so every address in `[2 MiB, 1 GiB)` has its upper levels in place.
pub struct Machine {
    _ram: Vec<Aligned4K>,
    mapper: OffsetPhysMapper,
    layout: MemoryLayout,
}

impl Machine {
    pub fn new(frames: usize) -> Self {
        let mut ram = vec![Aligned4K([0; 4096]); frames];
        let mapper = OffsetPhysMapper::new(ram.as_mut_ptr() as u64);
        let layout = MemoryLayout::new(frames as u64 * FRAME_SIZE, FRAME_SIZE, 2 * FRAME_SIZE)
            .expect("valid test layout");
        Self {
            _ram: ram,
            mapper,
            layout,
        }
    }

    pub fn mapper(&self) -> OffsetPhysMapper {
        self.mapper
    }

    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    pub fn boot(&self) -> Vmm<'_, OffsetPhysMapper, Recorder> {
        bootstrap(&self.mapper, &self.layout, Recorder::default())
    }
}

/// Take every remaining frame off the free list.
pub fn drain<T: TranslationCache>(vmm: &mut Vmm<'_, OffsetPhysMapper, T>) -> Vec<FrameNumber> {
    let mut frames = Vec::new();
    while let Ok(f) = vmm.allocate_frame() {
        frames.push(f);
    }
    frames
}

/// Check the free-list/refcount duality and the conservation law over the
/// whole descriptor table.
pub fn assert_consistent<T: TranslationCache>(vmm: &Vmm<'_, OffsetPhysMapper, T>) {
    let frames = vmm.frames();
    let mut free = 0;
    let mut reserved = 0;
    for d in frames.descriptors() {
        if d.is_reserved() {
            reserved += 1;
            assert!(!d.is_free());
        } else if d.is_free() {
            free += 1;
            assert_eq!(d.ref_count(), 0);
        }
    }

    let s = frames.stats();
    assert_eq!(s.free, free);
    assert_eq!(s.reserved, reserved);
    assert_eq!(
        s.allocated_total - s.freed_total,
        (s.total - s.reserved - s.free) as u64
    );
}
