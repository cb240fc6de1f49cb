//! # Virtual Memory Self-Test
//!
//! A scripted run of allocate/insert/remove against the live [`Vmm`] with a
//! literal expectation after every step: which frame comes out of the
//! allocator, which frame an address translates to, and every reference count
//! involved. The free list is stolen for the duration, so the test controls
//! exactly which frames are available.
//!
//! The scratch address must be 2 MiB aligned, its upper levels must already be
//! linked (the boot identity map provides them), and neither it nor the next
//! 2 MiB may have a leaf table yet. Then mapping the scratch address needs exactly one
//! new table and mapping `scratch + 2 MiB` needs another.
//!
//! On success every frame and table the run used is handed back. A failing run
//! stops at the failed step and leaves the allocator in whatever state that
//! step reached; treat it as fatal.

use crate::vmm::Vmm;
use kernel_info::memory::MemoryLayout;
use kernel_memory_addresses::{FRAME_SIZE, FrameNumber, VirtualAddress, align_up};
use kernel_vmem::{Level, PageFlags, PhysMapper, TranslationCache};
use log::info;

/// Virtual span of one leaf table.
const LEAF_TABLE_SPAN: u64 = Level::Leaf.table_span();

/// Self-test failure.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum CheckError {
    #[error("scratch address {0} is unsuitable for the self-test")]
    ScratchUnsuitable(VirtualAddress),
    #[error("self-test step failed: {0}")]
    Failed(&'static str),
}

/// First 2 MiB boundary past the boot identity map.
///
/// Suitable as long as the identity map is non-empty and does not end on a
/// 1 GiB boundary.
#[must_use]
pub const fn default_scratch(layout: &MemoryLayout) -> VirtualAddress {
    VirtualAddress::new(align_up(layout.identity_map_bytes(), LEAF_TABLE_SPAN))
}

#[inline]
const fn ensure(ok: bool, step: &'static str) -> Result<(), CheckError> {
    if ok {
        Ok(())
    } else {
        Err(CheckError::Failed(step))
    }
}

fn scratch_suitable<M: PhysMapper, T: TranslationCache>(
    vmm: &Vmm<'_, M, T>,
    scratch: VirtualAddress,
) -> bool {
    let aspace = vmm.space(vmm.kernel_root());
    let next = scratch + LEAF_TABLE_SPAN;
    scratch.is_aligned(LEAF_TABLE_SPAN)
        && aspace.table_for(scratch, Level::Middle).is_some()
        && aspace.table_for(next, Level::Middle).is_some()
        && aspace.leaf_table(scratch).is_none()
        && aspace.leaf_table(next).is_none()
}

fn maps_to<M: PhysMapper, T: TranslationCache>(
    vmm: &Vmm<'_, M, T>,
    root: FrameNumber,
    va: VirtualAddress,
    frame: FrameNumber,
) -> bool {
    vmm.lookup(root, va).map(|(f, _)| f) == Some(frame)
        && vmm.translate(root, va) == Some(frame.base())
}

/// Run the self-test in the kernel hierarchy at `scratch`.
///
/// # Errors
/// [`CheckError::ScratchUnsuitable`] before anything is touched if `scratch` does
/// not meet the requirements above; [`CheckError::Failed`] naming the first
/// step whose outcome differed from the expectation.
pub fn run<M: PhysMapper, T: TranslationCache>(
    vmm: &mut Vmm<'_, M, T>,
    scratch: VirtualAddress,
) -> Result<(), CheckError> {
    if !scratch_suitable(vmm, scratch) {
        return Err(CheckError::ScratchUnsuitable(scratch));
    }

    let root = vmm.kernel_root();
    let second = scratch + FRAME_SIZE;
    let next_table = scratch + LEAF_TABLE_SPAN;
    let rw = PageFlags::WRITABLE;

    let a = vmm
        .allocate_frame()
        .map_err(|_| CheckError::Failed("allocate A"))?;
    let b = vmm
        .allocate_frame()
        .map_err(|_| CheckError::Failed("allocate B"))?;
    let c = vmm
        .allocate_frame()
        .map_err(|_| CheckError::Failed("allocate C"))?;
    ensure(a != b && b != c && a != c, "three distinct frames")?;

    let stolen = vmm.frames_mut().detach_free_list();
    ensure(
        vmm.allocate_frame().is_err(),
        "allocation fails with the free list stolen",
    )?;

    // No frame for the leaf table yet.
    ensure(
        vmm.insert(root, b, scratch, rw).is_err(),
        "insert B without a table frame fails",
    )?;
    ensure(
        vmm.lookup(root, scratch).is_none(),
        "failed insert leaves no mapping",
    )?;

    // A becomes the leaf table.
    vmm.free_frame(a);
    ensure(
        vmm.insert(root, b, scratch, rw).is_ok(),
        "insert B at scratch",
    )?;
    ensure(
        vmm.space(root).leaf_table(scratch) == Some(a),
        "A is the leaf table",
    )?;
    ensure(maps_to(vmm, root, scratch, b), "scratch maps to B")?;
    ensure(vmm.ref_count(a) == 1, "ref(A) == 1")?;
    ensure(vmm.ref_count(b) == 1, "ref(B) == 1")?;

    // Same leaf table, no allocation needed.
    ensure(
        vmm.insert(root, c, second, rw).is_ok(),
        "insert C at scratch + 1 frame",
    )?;
    ensure(maps_to(vmm, root, second, c), "scratch + 1 frame maps to C")?;
    ensure(vmm.ref_count(c) == 1, "ref(C) == 1")?;
    ensure(
        vmm.allocate_frame().is_err(),
        "allocation fails with A, B and C in use",
    )?;

    // Remapping C to itself only updates the permissions.
    ensure(
        vmm.insert(root, c, second, PageFlags::USER).is_ok(),
        "re-insert C at scratch + 1 frame",
    )?;
    ensure(vmm.ref_count(c) == 1, "ref(C) stays 1 after re-insert")?;
    let user = vmm
        .lookup(root, second)
        .is_some_and(|(_, slot)| vmm.space(root).entry(slot).user());
    ensure(user, "re-insert updates permissions")?;
    ensure(vmm.allocate_frame().is_err(), "re-insert allocates nothing")?;

    // The next 2 MiB needs a table and none is free.
    ensure(
        vmm.insert(root, a, next_table, rw).is_err(),
        "insert A at scratch + 2 MiB fails",
    )?;
    ensure(
        vmm.space(root).leaf_table(next_table).is_none(),
        "failed insert builds no table",
    )?;
    ensure(vmm.ref_count(a) == 1, "ref(A) unchanged by failed insert")?;

    // B displaces C.
    ensure(
        vmm.insert(root, b, second, rw).is_ok(),
        "insert B at scratch + 1 frame",
    )?;
    ensure(maps_to(vmm, root, second, b), "scratch + 1 frame maps to B")?;
    ensure(vmm.ref_count(b) == 2, "ref(B) == 2")?;
    ensure(vmm.ref_count(c) == 0, "ref(C) == 0")?;
    ensure(vmm.frames().is_free(c), "C is free")?;
    ensure(vmm.allocate_frame() == Ok(c), "allocation returns C")?;

    vmm.remove(root, scratch);
    ensure(vmm.lookup(root, scratch).is_none(), "scratch unmapped")?;
    ensure(
        maps_to(vmm, root, second, b),
        "B still at scratch + 1 frame",
    )?;
    ensure(vmm.ref_count(b) == 1, "ref(B) == 1 after first remove")?;

    vmm.remove(root, second);
    ensure(
        vmm.lookup(root, second).is_none(),
        "scratch + 1 frame unmapped",
    )?;
    ensure(vmm.ref_count(b) == 0, "ref(B) == 0 after second remove")?;
    ensure(vmm.allocate_frame() == Ok(b), "allocation returns B")?;
    ensure(
        vmm.allocate_frame().is_err(),
        "allocation fails with A, B and C held",
    )?;

    // Take the leaf table back.
    ensure(vmm.ref_count(a) == 1, "ref(A) == 1 before reclaim")?;
    ensure(
        vmm.reclaim_leaf_table(root, scratch) == Some(a),
        "reclaim A",
    )?;
    ensure(
        vmm.ref_count(a) == 0 && vmm.frames().is_free(a),
        "A is free",
    )?;

    vmm.frames_mut().reattach_free_list(stolen);
    vmm.free_frame(b);
    vmm.free_frame(c);
    ensure(
        [a, b, c].iter().all(|&f| vmm.frames().is_free(f)),
        "A, B and C are free again",
    )?;

    info!("Virtual memory self-test passed at {scratch}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestSystem;

    #[test]
    fn self_test_passes_and_restores_the_allocator() {
        let sys = TestSystem::new(64);
        let mut vmm = sys.vmm();
        let before = vmm.frames().stats();

        run(&mut vmm, default_scratch(sys.layout())).unwrap();

        let after = vmm.frames().stats();
        assert_eq!(after.free, before.free);
        assert_eq!(
            after.allocated_total - after.freed_total,
            before.allocated_total - before.freed_total
        );
    }

    #[test]
    fn self_test_can_run_twice() {
        let sys = TestSystem::new(64);
        let mut vmm = sys.vmm();
        let scratch = default_scratch(sys.layout());
        run(&mut vmm, scratch).unwrap();
        run(&mut vmm, scratch).unwrap();
    }

    #[test]
    fn unsuitable_scratch_addresses_are_rejected_untouched() {
        let sys = TestSystem::new(64);
        let mut vmm = sys.vmm();
        let before = vmm.frames().stats();

        // Unaligned.
        let p = VirtualAddress::new(0x20_1000);
        assert_eq!(run(&mut vmm, p), Err(CheckError::ScratchUnsuitable(p)));
        // Covered by the identity map's leaf table.
        let p = VirtualAddress::zero();
        assert_eq!(run(&mut vmm, p), Err(CheckError::ScratchUnsuitable(p)));
        // No upper levels there.
        let p = VirtualAddress::new(0x80_0000_0000);
        assert_eq!(run(&mut vmm, p), Err(CheckError::ScratchUnsuitable(p)));

        assert_eq!(vmm.frames().stats(), before);
    }

    #[test]
    fn too_few_frames_fails_at_allocation() {
        let sys = TestSystem::new(11);
        let mut vmm = sys.vmm();
        assert_eq!(vmm.frames().stats().free, 2);
        assert_eq!(
            run(&mut vmm, default_scratch(sys.layout())),
            Err(CheckError::Failed("allocate C"))
        );
    }
}
