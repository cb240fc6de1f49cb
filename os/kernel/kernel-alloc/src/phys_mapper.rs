//! # Offset-based `PhysMapper`s
//!
//! The kernel reaches physical memory through a fixed offset: with a higher-half
//! direct map (HHDM), every physical address is mapped at `HHDM_BASE + pa`.
//!
//! - [`HhdmPhysMapper`] is that mapper with the compile-time base.
//! - [`OffsetPhysMapper`] takes the base at runtime. Identity-mapped boot code
//!   uses an offset of zero; tests use the address of a heap buffer standing
//!   in for physical memory.
//!
//! ## Example
//! ```rust,no_run
//! use kernel_alloc::phys_mapper::HhdmPhysMapper;
//! use kernel_memory_addresses::{FrameNumber, VirtualAddress};
//! use kernel_vmem::AddressSpace;
//!
//! let mapper = HhdmPhysMapper;
//! let root = FrameNumber::from_index(0x1234);
//! let aspace = AddressSpace::from_root(&mapper, root);
//! let pa = aspace.translate(VirtualAddress::new(0x1000));
//! ```

use kernel_info::memory::HHDM_BASE;
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] for kernels with a higher-half direct map.
///
/// # Safety
/// - The HHDM mapping must be present and cover the referenced physical range.
#[derive(Debug, Copy, Clone, Default)]
pub struct HhdmPhysMapper;

impl PhysMapper for HhdmPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = (HHDM_BASE + pa.as_u64()) as *mut T;
        // SAFETY: Caller must ensure the physical address is valid and mapped via HHDM.
        unsafe { &mut *va }
    }
}

/// [`PhysMapper`] adding a runtime offset to every physical address.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct OffsetPhysMapper {
    offset: u64,
}

impl OffsetPhysMapper {
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }

    #[must_use]
    pub const fn offset(self) -> u64 {
        self.offset
    }
}

impl PhysMapper for OffsetPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = self.offset.wrapping_add(pa.as_u64()) as *mut T;
        // SAFETY: Caller must ensure `offset + pa` is mapped and writable.
        unsafe { &mut *va }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_mapper_adds_its_base() {
        let mut buf = [0u64; 4];
        let mapper = OffsetPhysMapper::new(buf.as_mut_ptr() as u64);

        let third: &mut u64 = unsafe { mapper.phys_to_mut(PhysicalAddress::new(16)) };
        *third = 0xdead_beef;
        assert_eq!(buf[2], 0xdead_beef);
        assert_eq!(mapper.offset(), buf.as_ptr() as u64);
    }
}
