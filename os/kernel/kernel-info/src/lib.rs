//! # Kernel Memory Configuration
//!
//! This crate is the single source of truth for the memory layout the
//! virtual-memory core is configured with.
//!
//! ## Compile-time constants ([`memory`])
//!
//! * [`DEFAULT_PHYS_MEMORY_BYTES`](memory::DEFAULT_PHYS_MEMORY_BYTES): size of
//!   the flat physical address space when nothing is detected.
//! * [`KERNEL_IMAGE_END`](memory::KERNEL_IMAGE_END): where the boot watermark
//!   allocator starts.
//! * [`IDENTITY_MAP_BYTES`](memory::IDENTITY_MAP_BYTES): the low region mapped
//!   1:1 by the boot page tables.
//! * [`HHDM_BASE`](memory::HHDM_BASE) and
//!   [`FRAME_TABLE_BASE`](memory::FRAME_TABLE_BASE): fixed kernel windows.
//!
//! ## Runtime layout
//!
//! [`MemoryLayout`](memory::MemoryLayout) bundles the values the bootstrap
//! needs. [`MemoryLayout::detect`](memory::MemoryLayout::detect) returns the
//! defaults; [`MemoryLayout::new`](memory::MemoryLayout::new) validates a
//! custom layout (tests use small ones).
//!
//! ```text
//! Physical Memory Layout:
//! 0x0000_0000      ┌─────────────────────────────────┐
//!                  │  Kernel image, boot stacks      │  reserved forever
//! KERNEL_IMAGE_END ├─────────────────────────────────┤
//!                  │  Root table, frame descriptors  │  boot watermark allocations
//!                  │  boot page tables               │  (reserved forever)
//! watermark        ├─────────────────────────────────┤
//!                  │  Frames managed by the          │
//!                  │  frame allocator                │
//! max_pa           └─────────────────────────────────┘
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
