//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw memory addresses and physical frame numbers
//! used by the paging and frame-allocation code.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`VirtualAddress`] | An address translated by the page tables. |
//! | [`PhysicalAddress`] | An address in the flat physical address space `[0, max_pa)`. |
//! | [`FrameNumber`] | The index of a [`FRAME_SIZE`] physical frame, i.e. `pa >> FRAME_SHIFT`. |
//!
//! All three are `#[repr(transparent)]` zero-cost wrappers. Keeping them apart
//! at the type level prevents the classic mistakes of page-table code:
//! writing a virtual address into an entry, or indexing the frame table with
//! a byte address.
//!
//! ## Frames
//!
//! The physical address space is partitioned into fixed-size frames of
//! [`FRAME_SIZE`] bytes. There is exactly one frame size; huge pages are not
//! modelled.
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0030_2042);
//! let frame = FrameNumber::containing(pa);
//! assert_eq!(frame.as_usize(), 0x302);
//! assert_eq!(frame.base().as_u64(), 0x0030_2000);
//! assert_eq!(pa.frame_offset(), 0x42);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod frame_number;
mod physical_address;
mod virtual_address;

pub use crate::frame_number::FrameNumber;
pub use crate::physical_address::PhysicalAddress;
pub use crate::virtual_address::VirtualAddress;

/// log2 of [`FRAME_SIZE`].
pub const FRAME_SHIFT: u32 = 12;

/// Size of one physical frame (and of one virtual page) in bytes.
pub const FRAME_SIZE: u64 = 1 << FRAME_SHIFT;

/// Align `x` down to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(0,    4096), 0);
/// assert_eq!(align_down(4095, 4096), 0);
/// assert_eq!(align_down(8191, 4096), 4096);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    debug_assert!(a.is_power_of_two());
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two and `x + (a - 1)` must not overflow.
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(0,    4096), 0);
/// assert_eq!(align_up(1,    4096), 4096);
/// assert_eq!(align_up(4096, 4096), 4096);
/// assert_eq!(align_up(0x12345, 16), 0x12350);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    debug_assert!(a.is_power_of_two());
    (x + a - 1) & !(a - 1)
}
