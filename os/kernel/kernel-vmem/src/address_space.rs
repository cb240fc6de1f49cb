//! # Address Space (x86-64, four-level)
//!
//! A handle on a single translation hierarchy: the frame of its root table plus
//! the [`PhysMapper`] used to reach table frames.
//!
//! ## Highlights
//!
//! - [`AddressSpace::walk`]: locate the leaf slot for a virtual address,
//!   optionally creating the three directory levels on the way.
//! - [`AddressSpace::translate`]: virtual to physical, if mapped.
//! - [`AddressSpace::leaf_table`] / [`AddressSpace::unlink_leaf_table`]:
//!   inspect or detach the leaf table covering an address.
//! - [`AddressSpace::activate`]: load CR3 with this space's root.
//!
//! ## Design
//!
//! - Directory entries are created valid + writable; what a mapping may do is
//!   decided by its leaf entry alone.
//! - New tables come from a [`TableFrameSource`], which hands out zero-filled
//!   frames already accounted for as live tables.
//! - A walk that fails part way keeps the tables it already linked in. They are
//!   empty, and the next walk through the same range reuses them.
//!
//! ## Safety
//!
//! - Mutating active mappings requires TLB maintenance by the caller.
//! - The provided `PhysMapper` must yield writable references to table frames.

use crate::entry::{PageFlags, PageTableEntry};
use crate::page_table::{Level, PageTable, TableIndex};
use crate::{PhysMapper, TableFrameSource};
use kernel_memory_addresses::{FrameNumber, PhysicalAddress, VirtualAddress};
#[cfg(target_arch = "x86_64")]
use kernel_registers::{Cr3, LoadRegisterUnsafe, StoreRegisterUnsafe};
use log::trace;

/// Flags of directory entries created by a walk.
const DIRECTORY_FLAGS: PageFlags = PageFlags::WRITABLE;

/// Failure of a creating walk.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum WalkError {
    /// No frame was available for a missing table at the given level.
    #[error("out of memory allocating a {0} table")]
    OutOfMemory(Level),
}

/// Location of the leaf entry for a virtual address.
///
/// The slot stays meaningful as long as the leaf table is linked into the
/// hierarchy; tables are never moved.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct LeafSlot {
    table: FrameNumber,
    index: TableIndex,
}

impl LeafSlot {
    #[inline]
    #[must_use]
    pub const fn new(table: FrameNumber, index: TableIndex) -> Self {
        Self { table, index }
    }

    /// Frame of the leaf table holding the entry.
    #[inline]
    #[must_use]
    pub const fn table(&self) -> FrameNumber {
        self.table
    }

    #[inline]
    #[must_use]
    pub const fn index(&self) -> TableIndex {
        self.index
    }
}

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: FrameNumber,
    mapper: &'m M,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// View the **currently active** address space by reading CR3.
    ///
    /// # Safety
    /// - Must run at CPL0 with paging enabled.
    /// - Assumes CR3 points at a valid root table frame.
    #[cfg(target_arch = "x86_64")]
    #[inline]
    pub unsafe fn from_current(mapper: &'m M) -> Self {
        let cr3 = unsafe { Cr3::load_unsafe() };
        Self::from_root(mapper, cr3.root())
    }

    /// Handle on the hierarchy rooted at `root`.
    #[inline]
    pub const fn from_root(mapper: &'m M, root: FrameNumber) -> Self {
        Self { root, mapper }
    }

    /// Load CR3 with this address space's root.
    ///
    /// # Safety
    /// The code and data being executed must be mapped in the target space.
    #[cfg(target_arch = "x86_64")]
    #[inline]
    pub unsafe fn activate(&self) {
        unsafe { Cr3::from_root(self.root).store_unsafe() }
    }

    /// Frame of the root table.
    #[inline]
    #[must_use]
    pub const fn root(&self) -> FrameNumber {
        self.root
    }

    /// Borrow the table living in `frame`.
    #[inline]
    pub(crate) fn table_mut(&self, frame: FrameNumber) -> &mut PageTable {
        // SAFETY: every frame reachable from the root holds a table, and the
        // mapper contract makes it writable.
        unsafe { self.mapper.phys_to_mut::<PageTable>(frame.base()) }
    }

    /// Locate the leaf slot for `va`, optionally creating missing tables.
    ///
    /// - `create = None`: returns `Ok(None)` as soon as a directory entry is
    ///   invalid; nothing is modified.
    /// - `create = Some(source)`: missing tables are taken from `source` and
    ///   linked in; the result is always `Ok(Some(_))` unless `source` runs dry.
    ///
    /// # Errors
    /// [`WalkError::OutOfMemory`] when `source` has no frame left. Tables linked
    /// before the failure stay in place.
    pub fn walk(
        &self,
        va: VirtualAddress,
        create: Option<&mut dyn TableFrameSource>,
    ) -> Result<Option<LeafSlot>, WalkError> {
        create.map_or_else(
            || Ok(self.find_leaf(va)),
            |source| self.ensure_leaf(va, source).map(Some),
        )
    }

    /// Non-creating walk.
    #[must_use]
    pub fn find_leaf(&self, va: VirtualAddress) -> Option<LeafSlot> {
        let mut table = self.root;
        for level in Level::DIRECTORIES {
            table = self.table_mut(table).get(level.index_of(va)).next_table()?;
        }
        Some(LeafSlot::new(table, Level::Leaf.index_of(va)))
    }

    /// Creating walk.
    ///
    /// # Errors
    /// [`WalkError::OutOfMemory`] when `source` has no frame left.
    pub fn ensure_leaf(
        &self,
        va: VirtualAddress,
        source: &mut dyn TableFrameSource,
    ) -> Result<LeafSlot, WalkError> {
        let mut table = self.root;
        for level in Level::DIRECTORIES {
            let t = self.table_mut(table);
            let i = level.index_of(va);
            if let Some(next) = t.get(i).next_table() {
                table = next;
                continue;
            }

            let child = level.child().unwrap_or(Level::Leaf);
            let next = source.table_frame().ok_or(WalkError::OutOfMemory(child))?;
            t.set(i, PageTableEntry::make(next, DIRECTORY_FLAGS));
            trace!("Linked new {child} table {next} for {va}");
            table = next;
        }
        Ok(LeafSlot::new(table, Level::Leaf.index_of(va)))
    }

    /// Read the leaf entry at `slot`.
    #[inline]
    #[must_use]
    pub fn entry(&self, slot: LeafSlot) -> PageTableEntry {
        self.table_mut(slot.table).get(slot.index)
    }

    /// Overwrite the leaf entry at `slot`.
    ///
    /// No TLB maintenance is done here.
    #[inline]
    pub fn set_entry(&self, slot: LeafSlot, e: PageTableEntry) {
        self.table_mut(slot.table).set(slot.index, e);
    }

    /// Translate a `VirtualAddress` to `PhysicalAddress` if mapped.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let slot = self.find_leaf(va)?;
        let frame = self.entry(slot).next_table()?;
        Some(frame.base() + va.page_offset())
    }

    /// Frame of the `level` table covering `va`, if the walk reaches it.
    #[must_use]
    pub fn table_for(&self, va: VirtualAddress, level: Level) -> Option<FrameNumber> {
        let mut table = self.root;
        for l in Level::DIRECTORIES {
            if l == level {
                break;
            }
            table = self.table_mut(table).get(l.index_of(va)).next_table()?;
        }
        Some(table)
    }

    /// Frame of the leaf table covering `va`, if one is linked in.
    #[inline]
    #[must_use]
    pub fn leaf_table(&self, va: VirtualAddress) -> Option<FrameNumber> {
        self.table_for(va, Level::Leaf)
    }

    /// Number of valid entries in the leaf table covering `va`, if one is
    /// linked in.
    #[must_use]
    pub fn leaf_table_entries(&self, va: VirtualAddress) -> Option<usize> {
        let leaf = self.leaf_table(va)?;
        Some(self.table_mut(leaf).valid_entries())
    }

    /// Clear the middle-level entry covering `va` and return the empty leaf
    /// table it pointed at.
    ///
    /// Returns `None` without touching anything if no leaf table is linked in
    /// or if it still holds a valid entry. Reclaiming the frame is the
    /// caller's business, and so is flushing the TLB for the 2 MiB range.
    #[must_use]
    pub fn unlink_leaf_table(&self, va: VirtualAddress) -> Option<FrameNumber> {
        let middle = self.table_for(va, Level::Middle)?;
        let i = Level::Middle.index_of(va);
        let leaf = self.table_mut(middle).get(i).next_table()?;
        let live = self.table_mut(leaf).valid_entries();
        if live != 0 {
            trace!("Leaf table {leaf} covering {va} still holds {live} entries");
            return None;
        }

        self.table_mut(middle).set(i, PageTableEntry::zero());
        trace!("Unlinked leaf table {leaf} covering {va}");
        Some(leaf)
    }
}
