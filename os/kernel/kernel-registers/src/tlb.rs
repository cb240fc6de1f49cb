//! # Translation Lookaside Buffer

/// Invalidate the cached translation for the page containing `va` on this CPU.
///
/// Synchronous; affects only the given address.
///
/// # Safety
/// Privileged instruction, must run at CPL0.
#[cfg(all(feature = "asm", target_arch = "x86_64"))]
#[inline]
pub unsafe fn invlpg(va: u64) {
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) va, options(nostack, preserves_flags));
    }
}
