//! # Page-Table Entries
//!
//! One entry format is shared by all four levels. An entry is either
//!
//! - **invalid**: the valid bit is clear; every other bit is meaningless, or
//! - **valid**: it holds the frame number of the next-level table (or, at the
//!   leaf level, of the mapped data frame) plus a permission bit-field.
//!
//! [`PageTableEntry`] is the hardware bit layout; [`EntryKind`] is the tagged
//! view callers should match on.
//!
//! ### Bit layout
//!
//! | Bits  | Name          | Meaning |
//! |-------|---------------|---------|
//! | 0     | `V`           | Valid entry if set |
//! | 1     | `RW`          | Writable if set |
//! | 2     | `US`          | User-mode accessible if set |
//! | 3     | `PWT`         | Write-through caching |
//! | 4     | `PCD`         | Disable caching |
//! | 5     | `A`           | Accessed (set by hardware) |
//! | 6     | `D`           | Dirty (set by hardware) |
//! | 7     | `PS`          | Must be 0: huge pages are not supported |
//! | 8     | `G`           | Global |
//! | 9–11  | OS avail low  | Not interpreted by hardware |
//! | 12–51 | frame         | Frame number of the target |
//! | 52–62 | OS avail high | Not interpreted by hardware |
//! | 63    | `NX`          | Execute disable |

use bitfield_struct::bitfield;
use kernel_memory_addresses::FrameNumber;

bitflags::bitflags! {
    /// Permission and flag bits of an entry.
    ///
    /// The memory core never interprets these for policy decisions: they are
    /// copied verbatim into entries. The only exception is [`VALID`](Self::VALID),
    /// whose absence always means "not a real mapping" and which the writer of
    /// an entry always adds.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct PageFlags: u64 {
        /// Entry is valid.
        const VALID = 1 << 0;

        /// Writes are allowed.
        const WRITABLE = 1 << 1;

        /// User mode may access the page.
        const USER = 1 << 2;

        /// Write-through caching.
        const WRITE_THROUGH = 1 << 3;

        /// Caching disabled (MMIO).
        const CACHE_DISABLE = 1 << 4;

        /// Set by hardware on first access.
        const ACCESSED = 1 << 5;

        /// Set by hardware on first write.
        const DIRTY = 1 << 6;

        /// Translation survives root switches.
        const GLOBAL = 1 << 8;

        /// Bits 9..11, free for the kernel's own bookkeeping.
        const OS_AVAILABLE_LOW = 0b111 << 9;

        /// Bits 52..62, free for the kernel's own bookkeeping.
        const OS_AVAILABLE_HIGH = 0x7ff << 52;

        /// Instruction fetches fault.
        const NO_EXECUTE = 1 << 63;
    }
}

/// A single page-table entry in hardware format.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageTableEntry {
    /// Valid (bit 0).
    pub valid: bool,

    /// Writable (bit 1).
    pub writable: bool,

    /// User/Supervisor (bit 2).
    pub user: bool,

    /// Write-through (bit 3).
    pub write_through: bool,

    /// Cache disable (bit 4).
    pub cache_disable: bool,

    /// Accessed (bit 5).
    pub accessed: bool,

    /// Dirty (bit 6).
    pub dirty: bool,

    /// Page size (bit 7): always 0.
    #[bits(1)]
    __ps_must_be_0: u8,

    /// Global (bit 8).
    pub global: bool,

    /// OS-available low (bits 9..11).
    #[bits(3)]
    pub os_available_low: u8,

    /// Target frame number (bits 12..51).
    #[bits(40)]
    frame_number: u64,

    /// OS-available high (bits 52..62).
    #[bits(11)]
    pub os_available_high: u16,

    /// No-execute (bit 63).
    pub no_execute: bool,
}

/// Tagged view of a [`PageTableEntry`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EntryKind {
    /// No mapping; the remaining bits carry no information.
    Invalid,
    /// Points at `frame` with `flags` (always containing [`PageFlags::VALID`]).
    Valid {
        frame: FrameNumber,
        flags: PageFlags,
    },
}

impl PageTableEntry {
    /// The invalid entry with all bits cleared.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new()
    }

    /// Valid entry pointing at `frame` with `flags`.
    ///
    /// [`PageFlags::VALID`] is added regardless of `flags`; frame-number and
    /// page-size bits in `flags` are impossible by construction.
    #[inline]
    #[must_use]
    pub const fn make(frame: FrameNumber, flags: PageFlags) -> Self {
        let bits = flags.bits() | PageFlags::VALID.bits();
        Self::from_bits(bits).with_frame_number(frame.as_u64())
    }

    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.valid()
    }

    /// Target frame. Meaningless unless [`is_valid`](Self::is_valid).
    #[inline]
    #[must_use]
    pub const fn frame(self) -> FrameNumber {
        FrameNumber::from_raw(self.frame_number())
    }

    /// The permission and flag bits, without the frame number.
    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.into_bits())
    }

    /// If valid, the frame of the next-level table this entry links to.
    #[inline]
    #[must_use]
    pub const fn next_table(self) -> Option<FrameNumber> {
        if self.is_valid() {
            Some(self.frame())
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn kind(self) -> EntryKind {
        if self.is_valid() {
            EntryKind::Valid {
                frame: self.frame(),
                flags: self.flags(),
            }
        } else {
            EntryKind::Invalid
        }
    }
}
