//! # Virtual Memory Manager (VMM)
//!
//! The mapping layer: binds virtual addresses to frames in a hierarchy and
//! keeps frame reference counts and the translation cache consistent.
//!
//! [`Vmm`] is the explicit context for all of it: the frame allocator, the
//! physical mapper, the translation cache and the kernel's root table. Every
//! mutating operation takes `&mut self`; that borrow is the single exclusion
//! domain the whole read-modify-write sequence of `insert` and `remove` needs.
//! There is no internal locking.
//!
//! Each `(root, va)` slot moves only between
//! **unmapped** and **mapped(frame, perm)**:
//!
//! ```text
//!            insert(f)                 insert(f, perm')
//! unmapped ───────────► mapped(f) ◄─────────────────┐
//!    ▲                    │  │                       │
//!    └────── remove ──────┘  └───────────────────────┘
//!                         insert(g): remove, then insert(g)
//! ```
//!
//! Intermediate tables are never reclaimed by `remove`. A caller that has
//! emptied a leaf table may hand it back with [`Vmm::reclaim_leaf_table`].

use crate::frame_alloc::{FrameAllocator, OutOfFrames};
use kernel_memory_addresses::{FRAME_SIZE, FrameNumber, PhysicalAddress, VirtualAddress};
use kernel_vmem::{
    AddressSpace, EntryKind, LeafSlot, Level, PageFlags, PageTableEntry, PhysMapper,
    TranslationCache, WalkError,
};
use log::{debug, trace, warn};

/// Virtual span of one leaf table.
const LEAF_TABLE_SPAN: u64 = Level::Leaf.table_span();

/// Address-space manager context.
pub struct Vmm<'m, M: PhysMapper, T: TranslationCache> {
    mapper: &'m M,
    frames: FrameAllocator<'m, M>,
    tlb: T,
    kernel_root: FrameNumber,
}

impl<'m, M: PhysMapper, T: TranslationCache> Vmm<'m, M, T> {
    #[must_use]
    pub const fn new(
        mapper: &'m M,
        frames: FrameAllocator<'m, M>,
        tlb: T,
        kernel_root: FrameNumber,
    ) -> Self {
        Self {
            mapper,
            frames,
            tlb,
            kernel_root,
        }
    }

    /// Root table built at boot.
    #[inline]
    #[must_use]
    pub const fn kernel_root(&self) -> FrameNumber {
        self.kernel_root
    }

    /// Handle on the hierarchy rooted at `root`.
    #[inline]
    #[must_use]
    pub const fn space(&self, root: FrameNumber) -> AddressSpace<'m, M> {
        AddressSpace::from_root(self.mapper, root)
    }

    #[inline]
    #[must_use]
    pub const fn frames(&self) -> &FrameAllocator<'m, M> {
        &self.frames
    }

    #[inline]
    pub const fn frames_mut(&mut self) -> &mut FrameAllocator<'m, M> {
        &mut self.frames
    }

    #[inline]
    #[must_use]
    pub const fn tlb(&self) -> &T {
        &self.tlb
    }

    /// Drop one reference to `frame`, freeing it when none remain.
    pub fn decrement(&mut self, frame: FrameNumber) {
        if self.frames.drop_reference(frame) == 0 {
            self.frames.free(frame);
        }
    }

    /// Map `va` to `frame` with `perm` in the hierarchy at `root`.
    ///
    /// - An existing mapping of a different frame is removed first.
    /// - Re-inserting the mapped frame only rewrites the permissions; its
    ///   reference count is unchanged.
    /// - Otherwise missing tables are created, the entry is written and
    ///   `frame` gains one reference.
    ///
    /// # Errors
    /// [`VmmError::OutOfMemory`] if a table was needed and no frame was free.
    /// No entry is written in that case, though a displaced mapping stays
    /// removed.
    pub fn insert(
        &mut self,
        root: FrameNumber,
        frame: FrameNumber,
        va: VirtualAddress,
        perm: PageFlags,
    ) -> Result<(), VmmError> {
        if let Some((old, slot)) = self.lookup(root, va) {
            if old == frame {
                self.invalidate(va);
                let aspace = self.space(root);
                aspace.set_entry(slot, PageTableEntry::make(frame, perm));
                debug!("Updated permissions of {va} -> {frame} to {perm:?}");
                return Ok(());
            }
            debug!("Replacing mapping {va} -> {old} with {frame}");
            self.remove(root, va);
        }

        self.invalidate(va);
        let aspace = self.space(root);
        let slot = aspace.ensure_leaf(va, &mut self.frames)?;
        aspace.set_entry(slot, PageTableEntry::make(frame, perm));
        self.frames.mark_referenced(frame);
        debug!("Mapped {va} -> {frame} ({perm:?})");
        Ok(())
    }

    /// The frame mapped at `va` and the location of its leaf entry.
    #[must_use]
    pub fn lookup(&self, root: FrameNumber, va: VirtualAddress) -> Option<(FrameNumber, LeafSlot)> {
        let aspace = self.space(root);
        let slot = aspace.find_leaf(va)?;
        match aspace.entry(slot).kind() {
            EntryKind::Valid { frame, .. } => Some((frame, slot)),
            EntryKind::Invalid => None,
        }
    }

    /// Unmap `va`. Does nothing if it is not mapped.
    pub fn remove(&mut self, root: FrameNumber, va: VirtualAddress) {
        let Some((frame, slot)) = self.lookup(root, va) else {
            return;
        };
        self.decrement(frame);
        self.space(root).set_entry(slot, PageTableEntry::zero());
        self.invalidate(va);
        debug!("Unmapped {va} (was {frame})");
    }

    /// Translate `va` in the hierarchy at `root`.
    #[must_use]
    pub fn translate(&self, root: FrameNumber, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.space(root).translate(va)
    }

    /// Allocate a zero-filled frame with no references.
    ///
    /// # Errors
    /// [`VmmError::OutOfMemory`] when no frame is free.
    pub fn allocate_frame(&mut self) -> Result<FrameNumber, VmmError> {
        Ok(self.frames.allocate()?)
    }

    /// Give back a frame obtained from [`allocate_frame`](Self::allocate_frame)
    /// that was never mapped. Ignored while the frame is referenced.
    pub fn free_frame(&mut self, frame: FrameNumber) {
        self.frames.free(frame);
    }

    #[inline]
    #[must_use]
    pub fn ref_count(&self, frame: FrameNumber) -> u32 {
        self.frames.ref_count(frame)
    }

    /// Detach the empty leaf table covering `va` and drop the reference that
    /// marked it as a live table.
    ///
    /// Returns the table's frame, or `None` if there is no leaf table, if it
    /// still maps something, or if it was built at boot. Every page of the
    /// 2 MiB range is invalidated.
    pub fn reclaim_leaf_table(
        &mut self,
        root: FrameNumber,
        va: VirtualAddress,
    ) -> Option<FrameNumber> {
        let aspace = self.space(root);
        let table = aspace.leaf_table(va)?;
        if self.frames.is_reserved(table) {
            warn!("Not reclaiming boot leaf table {table} covering {va}");
            return None;
        }
        let Some(table) = aspace.unlink_leaf_table(va) else {
            warn!("Leaf table {table} covering {va} is still in use");
            return None;
        };

        let base = va.align_down(LEAF_TABLE_SPAN);
        let mut offset = 0;
        while offset < LEAF_TABLE_SPAN {
            self.invalidate(base + offset);
            offset += FRAME_SIZE;
        }
        self.decrement(table);
        debug!("Reclaimed leaf table {table} covering {va}");
        Some(table)
    }

    fn invalidate(&mut self, va: VirtualAddress) {
        trace!("Invalidating cached translation of {va}");
        self.tlb.invalidate(va);
    }
}

/// Mapping-layer failure.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmmError {
    #[error("out of memory")]
    OutOfMemory,
}

impl From<WalkError> for VmmError {
    fn from(e: WalkError) -> Self {
        match e {
            WalkError::OutOfMemory(level) => {
                trace!("No frame for a {level} table");
                Self::OutOfMemory
            }
        }
    }
}

impl From<OutOfFrames> for VmmError {
    fn from(_: OutOfFrames) -> Self {
        Self::OutOfMemory
    }
}
