//! # Memory Layout

use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress};

/// Installed physical memory assumed when nothing better is known (64 MiB).
///
/// Physical memory discovery is not performed; the detected size is this
/// byte count.
pub const DEFAULT_PHYS_MEMORY_BYTES: u64 = 64 * 1024 * 1024;

/// First physical byte the linker did not assign to kernel code, data or the
/// boot stacks. The boot allocator starts handing out memory here.
pub const KERNEL_IMAGE_END: u64 = 0x0040_0000; // 4 MiB

/// Size of the low physical region identity mapped while building the
/// initial page tables.
pub const IDENTITY_MAP_BYTES: u64 = 0x0040_0000; // 4 MiB

/// A simple Higher Half Direct Map (HHDM) base.
/// Anything you map at [`HHDM_BASE`] + `pa` lets the kernel
/// access physical memory via a fixed offset.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Virtual window reserved for the frame descriptor table.
///
/// Diagnostic collaborators read the table through this window; the memory
/// core itself only ever touches it through its physical address.
pub const FRAME_TABLE_BASE: u64 = 0xffff_8700_0000_0000;

/// Largest frame count whose index still fits the free-list link.
pub const MAX_FRAMES: u64 = u32::MAX as u64 - 1;

const _: () = {
    assert!(DEFAULT_PHYS_MEMORY_BYTES.is_multiple_of(FRAME_SIZE));
    assert!(KERNEL_IMAGE_END < DEFAULT_PHYS_MEMORY_BYTES);
    assert!(IDENTITY_MAP_BYTES.is_multiple_of(FRAME_SIZE));
    assert!(IDENTITY_MAP_BYTES <= DEFAULT_PHYS_MEMORY_BYTES);
    assert!(HHDM_BASE > FRAME_TABLE_BASE);
};

/// Physical memory layout handed to the virtual-memory bootstrap.
///
/// - `max_pa`: exclusive ceiling of physical memory; `frame_count = max_pa / FRAME_SIZE`.
/// - `free_start`: initial boot watermark (end of the kernel image).
/// - `identity_map_bytes`: size of the low region identity mapped at boot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryLayout {
    max_pa: PhysicalAddress,
    free_start: PhysicalAddress,
    identity_map_bytes: u64,
}

/// Rejected [`MemoryLayout`] configuration.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum LayoutError {
    #[error("physical memory size {0:#x} is not a multiple of the frame size")]
    UnalignedMemorySize(u64),
    #[error("physical memory size {0:#x} exceeds the supported number of frames")]
    TooManyFrames(u64),
    #[error("boot watermark {free_start:#x} lies at or beyond the memory ceiling {max_pa:#x}")]
    WatermarkBeyondMemory { free_start: u64, max_pa: u64 },
    #[error("identity map size {0:#x} is not a multiple of the frame size")]
    UnalignedIdentityMap(u64),
    #[error("identity map size {identity:#x} exceeds physical memory {max_pa:#x}")]
    IdentityMapTooLarge { identity: u64, max_pa: u64 },
}

impl MemoryLayout {
    /// Report the layout of the machine we are running on.
    ///
    /// There is no firmware query here: the result is the compile-time
    /// defaults, which is all a flat-memory target provides.
    #[must_use]
    pub const fn detect() -> Self {
        Self {
            max_pa: PhysicalAddress::new(DEFAULT_PHYS_MEMORY_BYTES),
            free_start: PhysicalAddress::new(KERNEL_IMAGE_END),
            identity_map_bytes: IDENTITY_MAP_BYTES,
        }
    }

    /// Build and validate a custom layout.
    ///
    /// # Errors
    /// Returns a [`LayoutError`] if the sizes are not frame multiples, if the
    /// boot watermark does not lie below the ceiling, or if the frame count
    /// does not fit the frame allocator's free-list links.
    pub const fn new(
        max_pa: u64,
        free_start: u64,
        identity_map_bytes: u64,
    ) -> Result<Self, LayoutError> {
        if !max_pa.is_multiple_of(FRAME_SIZE) {
            return Err(LayoutError::UnalignedMemorySize(max_pa));
        }
        if max_pa / FRAME_SIZE > MAX_FRAMES {
            return Err(LayoutError::TooManyFrames(max_pa));
        }
        if free_start >= max_pa {
            return Err(LayoutError::WatermarkBeyondMemory { free_start, max_pa });
        }
        if !identity_map_bytes.is_multiple_of(FRAME_SIZE) {
            return Err(LayoutError::UnalignedIdentityMap(identity_map_bytes));
        }
        if identity_map_bytes > max_pa {
            return Err(LayoutError::IdentityMapTooLarge {
                identity: identity_map_bytes,
                max_pa,
            });
        }
        Ok(Self {
            max_pa: PhysicalAddress::new(max_pa),
            free_start: PhysicalAddress::new(free_start),
            identity_map_bytes,
        })
    }

    #[inline]
    #[must_use]
    pub const fn max_pa(&self) -> PhysicalAddress {
        self.max_pa
    }

    #[inline]
    #[must_use]
    pub const fn free_start(&self) -> PhysicalAddress {
        self.free_start
    }

    #[inline]
    #[must_use]
    pub const fn identity_map_bytes(&self) -> u64 {
        self.identity_map_bytes
    }

    /// Number of physical frames, `max_pa / FRAME_SIZE`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn frame_count(&self) -> usize {
        (self.max_pa.as_u64() / FRAME_SIZE) as usize
    }

    /// Installed memory in KiB, for boot diagnostics.
    #[inline]
    #[must_use]
    pub const fn memory_kib(&self) -> u64 {
        self.max_pa.as_u64() / 1024
    }
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self::detect()
    }
}
