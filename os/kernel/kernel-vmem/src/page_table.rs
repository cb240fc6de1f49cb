//! # Page Tables
//!
//! - [`Level`]: the four levels of the hierarchy, root first.
//! - [`TableIndex`]: a 9-bit index into one table, derived from a virtual address.
//! - [`PageTable`]: a 4 KiB-aligned array of 512 [`PageTableEntry`] values.
//!
//! A canonical 48-bit virtual address splits into
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  Root | Upper | Middle|  Leaf | Offset |
//! ```
//!
//! Every table occupies exactly one frame, so tables are addressed by
//! [`FrameNumber`](kernel_memory_addresses::FrameNumber) and entries by index.

use crate::entry::PageTableEntry;
use kernel_memory_addresses::{FRAME_SHIFT, VirtualAddress};

/// Number of entries in one table.
pub const ENTRIES_PER_TABLE: usize = 512;

/// Bits of virtual address consumed per level.
const INDEX_BITS: u32 = 9;

/// One level of the four-level hierarchy.
///
/// Discriminants count up from the leaf, so `level as u32` is the number of
/// tables below it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Level {
    /// Level-1 table: entries map data frames.
    Leaf = 0,
    /// Level-2 table: entries point at leaf tables.
    Middle = 1,
    /// Level-3 table: entries point at middle tables.
    Upper = 2,
    /// Level-4 table: the root of an address space.
    Root = 3,
}

impl Level {
    /// The levels that hold links to other tables, in walk order.
    pub const DIRECTORIES: [Self; 3] = [Self::Root, Self::Upper, Self::Middle];

    /// Position of this level's index field in a virtual address.
    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        FRAME_SHIFT + INDEX_BITS * self as u32
    }

    /// Bytes of virtual address space covered by one entry at this level.
    #[inline]
    #[must_use]
    pub const fn entry_span(self) -> u64 {
        1 << self.shift()
    }

    /// Bytes of virtual address space covered by one whole table at this level.
    #[inline]
    #[must_use]
    pub const fn table_span(self) -> u64 {
        1 << (self.shift() + INDEX_BITS)
    }

    /// The level one step closer to the leaves.
    #[inline]
    #[must_use]
    pub const fn child(self) -> Option<Self> {
        match self {
            Self::Root => Some(Self::Upper),
            Self::Upper => Some(Self::Middle),
            Self::Middle => Some(Self::Leaf),
            Self::Leaf => None,
        }
    }

    /// Index into a table of this level selected by `va`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn index_of(self, va: VirtualAddress) -> TableIndex {
        TableIndex::new(((va.as_u64() >> self.shift()) & 0x1FF) as u16)
    }
}

impl core::fmt::Display for Level {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Root => "root",
            Self::Upper => "upper",
            Self::Middle => "middle",
            Self::Leaf => "leaf",
        })
    }
}

/// Index into a single table.
///
/// Range is `0..512` (checked in debug builds).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

impl TableIndex {
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < ENTRIES_PER_TABLE);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// A page table of any level: 512 entries, 4 KiB-aligned.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES_PER_TABLE],
}

const _: () = assert!(size_of::<PageTable>() == 4096);

impl PageTable {
    /// Create a fully zeroed table (all entries invalid).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageTableEntry::zero(); ENTRIES_PER_TABLE],
        }
    }

    /// Read the entry at `i`.
    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> PageTableEntry {
        self.entries[i.as_usize()]
    }

    /// Write the entry at `i`.
    ///
    /// Caller must handle any required TLB invalidation when changing active mappings.
    #[inline]
    pub const fn set(&mut self, i: TableIndex, e: PageTableEntry) {
        self.entries[i.as_usize()] = e;
    }

    /// Invalidate every entry.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PageTableEntry::zero());
    }

    /// Number of valid entries.
    #[must_use]
    pub fn valid_entries(&self) -> usize {
        self.entries.iter().filter(|e| e.is_valid()).count()
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::zeroed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::PageFlags;
    use kernel_memory_addresses::FrameNumber;

    #[test]
    fn indices_ok() {
        let va = VirtualAddress::new(0xFFFF_8888_0123_4567);
        assert_eq!(Level::Root.index_of(va).as_usize(), 0x111);
        assert_eq!(Level::Upper.index_of(va).as_usize(), 0x020);
        assert_eq!(Level::Middle.index_of(va).as_usize(), 0x009);
        assert_eq!(Level::Leaf.index_of(va).as_usize(), 0x034);
    }

    #[test]
    fn spans_match_the_hierarchy() {
        assert_eq!(Level::Leaf.entry_span(), 4096);
        assert_eq!(Level::Leaf.table_span(), 2 * 1024 * 1024);
        assert_eq!(Level::Middle.table_span(), 1024 * 1024 * 1024);
        assert_eq!(Level::Root.shift(), 39);
        assert_eq!(Level::Root.child(), Some(Level::Upper));
        assert_eq!(Level::Leaf.child(), None);
    }

    #[test]
    fn set_get_and_count() {
        let mut t = PageTable::zeroed();
        assert_eq!(t.valid_entries(), 0);

        let e = PageTableEntry::make(FrameNumber::from_index(7), PageFlags::WRITABLE);
        t.set(TableIndex::new(3), e);
        t.set(TableIndex::new(511), e);
        assert_eq!(t.get(TableIndex::new(3)), e);
        assert_eq!(t.valid_entries(), 2);
        assert_eq!(t.get(TableIndex::new(4)), PageTableEntry::zero());

        t.zero();
        assert_eq!(t.valid_entries(), 0);
    }
}
