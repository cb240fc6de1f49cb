//! # Typed `X86_64` Paging Registers
//!
//! The hardware-abstraction side of the virtual-memory core:
//!
//! - [`Cr3`]: the root page-table pointer of the active address space.
//! - [`tlb::invlpg`]: invalidate the cached translation of one virtual address.
//!
//! Register access is privileged; the traits below make that explicit with
//! `unsafe` entry points. Without the `asm` feature (or off `x86_64`) only the
//! pure encoding helpers are available.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod cr3;
pub mod tlb;

pub use crate::cr3::Cr3;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// Storing a paging register changes which translations are live.
    unsafe fn store_unsafe(self);
}
