#[cfg(all(feature = "asm", target_arch = "x86_64"))]
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;
use kernel_memory_addresses::FrameNumber;

/// CR3: the root page-table pointer (IA-32e, PCID disabled).
///
/// Holds the frame of the root table and the cache-control flags for root
/// walks. Context switching swaps this value; the memory core only reads it
/// to learn which hierarchy is active.
#[bitfield(u64)]
pub struct Cr3 {
    /// Bits 0–2: reserved (must be 0).
    #[bits(3)]
    __reserved0: u8,

    /// Bit 3: PWT, write-through caching for root-table accesses.
    pub pwt: bool,

    /// Bit 4: PCD, cache disable for root-table accesses.
    pub pcd: bool,

    /// Bits 5–11: reserved (must be 0 when written).
    #[bits(7)]
    __reserved1: u8,

    /// Bits 12–51: frame number of the root table.
    #[bits(40)]
    root_frame_number: u64,

    /// Bits 52–63: reserved.
    #[bits(12)]
    __reserved2: u16,
}

impl Cr3 {
    /// CR3 value selecting the hierarchy rooted at `root`, default caching.
    #[inline]
    #[must_use]
    pub const fn from_root(root: FrameNumber) -> Self {
        Self::new().with_root_frame_number(root.as_u64())
    }

    /// Frame of the root table this value points at.
    #[inline]
    #[must_use]
    pub const fn root(&self) -> FrameNumber {
        FrameNumber::from_raw(self.root_frame_number())
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        let cr3: u64;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl StoreRegisterUnsafe for Cr3 {
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}
