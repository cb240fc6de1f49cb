//! # Kernel Memory Allocation and Virtual Memory Management
//!
//! This crate owns physical memory and the kernel's translation hierarchy:
//! from the first boot allocation through runtime mapping.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │          Virtual Memory Manager ([`vmm`])           │
//! │    • insert / lookup / remove per (root, va)        │
//! │    • reference counting of mapped frames            │
//! │    • TLB invalidation                               │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │         Frame Allocator ([`frame_alloc`])           │
//! │    • one descriptor per frame                       │
//! │    • index-based LIFO free list                     │
//! │    • zero-fill on allocation                        │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ takes over at the final watermark
//! ┌─────────────────▼───────────────────────────────────┐
//! │         Boot Allocator ([`bootmem`])                │
//! │    • watermark, never frees                         │
//! │    • boot page tables and static mappings           │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! [`boot::bootstrap`] runs the boot allocator, builds the kernel hierarchy
//! and returns the [`Vmm`](vmm::Vmm). [`check::run`] is the self-test that
//! exercises the reference-counting contract against the live system.
//!
//! Physical memory is reached through a [`PhysMapper`](kernel_vmem::PhysMapper);
//! [`phys_mapper`] has the offset-based ones the kernel and the tests use.
//!
//! ## Concurrency
//!
//! None. Everything assumes a single execution context; [`Vmm`](vmm::Vmm)
//! methods take `&mut self` and that borrow is the only exclusion there is.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kernel_alloc::{boot::bootstrap, check, phys_mapper::HhdmPhysMapper};
//! use kernel_info::memory::MemoryLayout;
//! use kernel_vmem::tlb::Invlpg;
//!
//! let layout = MemoryLayout::detect();
//! let mapper = HhdmPhysMapper;
//! let mut vmm = bootstrap(&mapper, &layout, unsafe { Invlpg::new() });
//! check::run(&mut vmm, check::default_scratch(&layout)).expect("self-test");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod boot;
pub mod bootmem;
pub mod check;
pub mod frame_alloc;
pub mod phys_mapper;
pub mod vmm;
