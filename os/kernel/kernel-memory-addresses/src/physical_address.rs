use crate::{FRAME_SIZE, FrameNumber};
use core::fmt;
use core::ops::{Add, AddAssign};

/// Physical memory address.
///
/// Denotes a byte address in the flat physical address space. Like
/// [`VirtualAddress`](super::VirtualAddress), this type only carries intent;
/// it does not check the value against the amount of installed memory.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let pa = PhysicalAddress::new(0x1234);
/// assert_eq!(pa.align_down(FRAME_SIZE).as_u64(), 0x1000);
/// assert_eq!(pa.align_up(FRAME_SIZE).as_u64(), 0x2000);
/// assert_eq!(pa.frame(), FrameNumber::from_index(1));
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0)
    }

    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Round up to a multiple of `align` (power of two).
    #[inline]
    #[must_use]
    pub const fn align_up(self, align: u64) -> Self {
        Self(crate::align_up(self.0, align))
    }

    /// Round down to a multiple of `align` (power of two).
    #[inline]
    #[must_use]
    pub const fn align_down(self, align: u64) -> Self {
        Self(crate::align_down(self.0, align))
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned(self, align: u64) -> bool {
        self.0 & (align - 1) == 0
    }

    /// The frame containing this address.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> FrameNumber {
        FrameNumber::containing(self)
    }

    /// Byte offset within the containing frame.
    #[inline]
    #[must_use]
    pub const fn frame_offset(self) -> u64 {
        self.0 & (FRAME_SIZE - 1)
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:016X})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for PhysicalAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl From<FrameNumber> for PhysicalAddress {
    #[inline]
    fn from(frame: FrameNumber) -> Self {
        frame.base()
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for PhysicalAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}
