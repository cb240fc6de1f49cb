//! # TLB Maintenance
//!
//! The mapping layer changes entries of live hierarchies and must drop stale
//! cached translations afterwards. [`TranslationCache`] is that seam; on
//! hardware it is [`Invlpg`], in tests a recorder.

use kernel_memory_addresses::VirtualAddress;

/// Something that caches translations and can forget one.
pub trait TranslationCache {
    /// Drop any cached translation for the page containing `va`.
    ///
    /// Must complete before the caller returns to code that may touch `va`.
    fn invalidate(&mut self, va: VirtualAddress);
}

impl<T: TranslationCache + ?Sized> TranslationCache for &mut T {
    #[inline]
    fn invalidate(&mut self, va: VirtualAddress) {
        (**self).invalidate(va);
    }
}

/// Invalidation via the `invlpg` instruction on the executing CPU.
#[cfg(target_arch = "x86_64")]
#[derive(Debug)]
pub struct Invlpg(());

#[cfg(target_arch = "x86_64")]
impl Invlpg {
    /// # Safety
    /// `invlpg` is privileged; the returned value may only be used at CPL0.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self(())
    }
}

#[cfg(target_arch = "x86_64")]
impl TranslationCache for Invlpg {
    #[inline]
    fn invalidate(&mut self, va: VirtualAddress) {
        // SAFETY: constructing `Invlpg` asserted CPL0.
        unsafe { kernel_registers::tlb::invlpg(va.as_u64()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Vec<VirtualAddress>);

    impl TranslationCache for Recorder {
        fn invalidate(&mut self, va: VirtualAddress) {
            self.0.push(va);
        }
    }

    fn flush_twice(mut cache: impl TranslationCache) {
        cache.invalidate(VirtualAddress::new(0x1000));
        cache.invalidate(VirtualAddress::new(0x2000));
    }

    #[test]
    fn invalidations_pass_through_mutable_references() {
        let mut rec = Recorder(Vec::new());
        flush_twice(&mut rec);
        assert_eq!(
            rec.0,
            [VirtualAddress::new(0x1000), VirtualAddress::new(0x2000)]
        );
    }
}
