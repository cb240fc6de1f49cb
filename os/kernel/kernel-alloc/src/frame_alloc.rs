//! # Physical Frame Allocator
//!
//! One [`FrameDescriptor`] per physical frame, stored in a table the boot
//! allocator placed in physical memory. Free frames are chained through the
//! descriptors by index into a LIFO free list.
//!
//! ## Reference counts
//!
//! - [`FrameAllocator::allocate`] returns a zero-filled frame whose count is
//!   still **0**. Whoever links the frame somewhere calls
//!   [`FrameAllocator::mark_referenced`] right away: the walker for a new page
//!   table, the mapping layer for a new leaf entry.
//! - [`FrameAllocator::free`] only ever takes back frames whose count is 0.
//! - Frames below the boot watermark carry [`RESERVED`] and never move.
//!
//! ## Invariants
//!
//! - A frame is on a free list iff its `next_free` link is not `IN_USE`.
//! - Every frame on the free list has a count of 0.
//! - `allocated_total - freed_total == total - reserved - free` while no list
//!   is detached.

use kernel_memory_addresses::{FRAME_SIZE, FrameNumber, PhysicalAddress};
use kernel_vmem::{PhysMapper, TableFrameSource};
use log::{info, trace, warn};

/// Reference count of frames that are permanently in use.
pub const RESERVED: u32 = u32::MAX;

/// End of the free list.
const NIL: u32 = u32::MAX;

/// `next_free` of a frame that is not on any free list.
const IN_USE: u32 = u32::MAX - 1;

/// Per-frame metadata.
#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameDescriptor {
    ref_count: u32,
    next_free: u32,
}

impl FrameDescriptor {
    /// Number of live references, or [`RESERVED`].
    #[inline]
    #[must_use]
    pub const fn ref_count(self) -> u32 {
        self.ref_count
    }

    #[inline]
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        self.ref_count == RESERVED
    }

    /// Whether the frame sits on a free list (the active one or a detached one).
    #[inline]
    #[must_use]
    pub const fn is_free(self) -> bool {
        self.next_free != IN_USE
    }
}

/// The free list is empty.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("no free physical frame")]
pub struct OutOfFrames;

/// Counters for diagnostics and conservation checks.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct FrameStats {
    /// Frames described by the table.
    pub total: usize,
    /// Frames below the boot watermark.
    pub reserved: usize,
    /// Frames on the active free list.
    pub free: usize,
    /// Successful [`FrameAllocator::allocate`] calls.
    pub allocated_total: u64,
    /// Frames pushed back by [`FrameAllocator::free`].
    pub freed_total: u64,
}

/// A free list taken out of the allocator with
/// [`FrameAllocator::detach_free_list`].
#[derive(Debug)]
#[must_use = "a detached free list leaks its frames unless reattached"]
pub struct DetachedFreeList {
    head: u32,
    len: usize,
}

/// Reference-counting frame allocator.
pub struct FrameAllocator<'m, M: PhysMapper> {
    mapper: &'m M,
    descriptors: &'m mut [FrameDescriptor],
    head: u32,
    stats: FrameStats,
}

impl<'m, M: PhysMapper> FrameAllocator<'m, M> {
    /// Take over `descriptors` (one per frame) once boot allocation is done.
    ///
    /// Frames below `watermark` (rounded up to a frame boundary) become
    /// [`RESERVED`]; all others go on the free list so that the highest frame
    /// is handed out first.
    pub fn init(
        mapper: &'m M,
        descriptors: &'m mut [FrameDescriptor],
        watermark: PhysicalAddress,
    ) -> Self {
        let first_free = watermark.align_up(FRAME_SIZE).frame().as_usize();
        let total = descriptors.len();

        let mut this = Self {
            mapper,
            descriptors,
            head: NIL,
            stats: FrameStats {
                total,
                ..FrameStats::default()
            },
        };

        for index in 0..total {
            if index < first_free {
                this.descriptors[index] = FrameDescriptor {
                    ref_count: RESERVED,
                    next_free: IN_USE,
                };
                this.stats.reserved += 1;
            } else {
                this.descriptors[index].ref_count = 0;
                this.push(index);
            }
        }

        info!(
            "Frame allocator ready: {} free, {} reserved of {} frames",
            this.stats.free, this.stats.reserved, total
        );
        this
    }

    /// Pop a frame off the free list and zero it. Its count stays 0.
    ///
    /// # Errors
    /// [`OutOfFrames`] when the free list is empty.
    pub fn allocate(&mut self) -> Result<FrameNumber, OutOfFrames> {
        if self.head == NIL {
            return Err(OutOfFrames);
        }

        let index = self.head as usize;
        let d = &mut self.descriptors[index];
        debug_assert_eq!(d.ref_count, 0, "free frame #{index} is referenced");
        self.head = d.next_free;
        d.next_free = IN_USE;
        self.stats.free -= 1;
        self.stats.allocated_total += 1;

        let frame = FrameNumber::from_index(index);
        // SAFETY: the frame was free, so nothing references its memory.
        unsafe { self.mapper.zero_frame(frame) };
        trace!("Allocated frame {frame}");
        Ok(frame)
    }

    /// Record one more reference to `frame`.
    ///
    /// Reserved frames, frames on a free list and saturated counts are left
    /// alone.
    pub fn mark_referenced(&mut self, frame: FrameNumber) {
        let d = &mut self.descriptors[frame.as_usize()];
        if d.is_reserved() {
            warn!("Ignoring reference to reserved frame {frame}");
            return;
        }
        if d.is_free() {
            warn!("Ignoring reference to free frame {frame}");
            return;
        }
        match d.ref_count.checked_add(1) {
            Some(count) if count != RESERVED => d.ref_count = count,
            _ => warn!("Reference count of frame {frame} is saturated"),
        }
    }

    /// Drop one reference to `frame` and return the remaining count.
    ///
    /// Does not free the frame; see [`Vmm::decrement`](crate::vmm::Vmm::decrement).
    pub fn drop_reference(&mut self, frame: FrameNumber) -> u32 {
        let d = &mut self.descriptors[frame.as_usize()];
        if d.is_reserved() {
            warn!("Ignoring release of reserved frame {frame}");
            return RESERVED;
        }
        if d.ref_count == 0 {
            warn!("Releasing unreferenced frame {frame}");
            return 0;
        }
        d.ref_count -= 1;
        d.ref_count
    }

    /// Return `frame` to the free list if nothing references it.
    ///
    /// Referenced, reserved and already free frames are left alone.
    pub fn free(&mut self, frame: FrameNumber) {
        let index = frame.as_usize();
        let d = self.descriptors[index];
        if d.is_reserved() {
            warn!("Ignoring free of reserved frame {frame}");
            return;
        }
        if d.ref_count > 0 {
            warn!("Not freeing frame {frame}: {} references left", d.ref_count);
            return;
        }
        if d.is_free() {
            warn!("Frame {frame} is already free");
            return;
        }

        self.push(index);
        self.stats.freed_total += 1;
        trace!("Freed frame {frame}");
    }

    /// Take the whole free list out of circulation.
    ///
    /// Subsequent allocations fail until frames are freed or the list is
    /// reattached.
    pub fn detach_free_list(&mut self) -> DetachedFreeList {
        let list = DetachedFreeList {
            head: self.head,
            len: self.stats.free,
        };
        self.head = NIL;
        self.stats.free = 0;
        list
    }

    /// Put a detached list back. Frames freed in the meantime are kept.
    pub fn reattach_free_list(&mut self, list: DetachedFreeList) {
        let mut pending = self.head;
        self.head = list.head;
        self.stats.free = list.len;
        while pending != NIL {
            let index = pending as usize;
            pending = self.descriptors[index].next_free;
            self.push(index);
        }
    }

    #[inline]
    #[must_use]
    pub fn ref_count(&self, frame: FrameNumber) -> u32 {
        self.descriptors[frame.as_usize()].ref_count
    }

    #[inline]
    #[must_use]
    pub fn is_free(&self, frame: FrameNumber) -> bool {
        self.descriptors[frame.as_usize()].is_free()
    }

    #[inline]
    #[must_use]
    pub fn is_reserved(&self, frame: FrameNumber) -> bool {
        self.descriptors[frame.as_usize()].is_reserved()
    }

    #[inline]
    #[must_use]
    pub const fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Number of frames described by the table.
    #[inline]
    #[must_use]
    pub const fn frame_count(&self) -> usize {
        self.descriptors.len()
    }

    /// Read-only view of the descriptor table.
    #[inline]
    #[must_use]
    pub fn descriptors(&self) -> &[FrameDescriptor] {
        self.descriptors
    }

    #[allow(clippy::cast_possible_truncation)]
    fn push(&mut self, index: usize) {
        self.descriptors[index].next_free = self.head;
        self.head = index as u32;
        self.stats.free += 1;
    }
}

/// The runtime walker's frame source: every new table starts with one reference.
impl<M: PhysMapper> TableFrameSource for FrameAllocator<'_, M> {
    fn table_frame(&mut self) -> Option<FrameNumber> {
        let frame = self.allocate().ok()?;
        self.mark_referenced(frame);
        Some(frame)
    }
}
