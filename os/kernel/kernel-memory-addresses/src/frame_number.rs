use crate::{FRAME_SHIFT, PhysicalAddress};
use core::fmt;
use core::ops::Add;

/// Physical frame number.
///
/// The index of a [`FRAME_SIZE`](crate::FRAME_SIZE) frame in the physical
/// address space. Frame `n` covers `[n << FRAME_SHIFT, (n + 1) << FRAME_SHIFT)`.
/// This is the handle used by the frame allocator and stored (shifted) in
/// page-table entries.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let f = FrameNumber::from_index(3);
/// assert_eq!(f.base(), PhysicalAddress::new(0x3000));
/// assert_eq!(FrameNumber::containing(PhysicalAddress::new(0x3fff)), f);
/// assert_eq!((f + 1).as_usize(), 4);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FrameNumber(u64);

impl FrameNumber {
    #[inline]
    #[must_use]
    pub const fn from_index(index: usize) -> Self {
        Self(index as u64)
    }

    /// Frame containing `pa` (the in-frame offset is discarded).
    #[inline]
    #[must_use]
    pub const fn containing(pa: PhysicalAddress) -> Self {
        Self(pa.as_u64() >> FRAME_SHIFT)
    }

    /// Frame number encoded in the frame-number field of a page-table entry.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Index into the frame descriptor table.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// First byte of the frame.
    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << FRAME_SHIFT)
    }
}

impl fmt::Debug for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame(#{} @ 0x{:X})", self.0, self.base().as_u64())
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl Add<usize> for FrameNumber {
    type Output = Self;
    #[inline]
    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FRAME_SIZE;

    #[test]
    fn frame_round_trips_through_its_base() {
        let f = FrameNumber::from_index(0x1234);
        assert_eq!(FrameNumber::containing(f.base()), f);
        assert_eq!(FrameNumber::containing(f.base() + (FRAME_SIZE - 1)), f);
        assert_eq!(FrameNumber::containing(f.base() + FRAME_SIZE), f + 1);
    }
}
