#![allow(clippy::cast_possible_truncation)]

mod common;

use common::{Machine, assert_consistent, drain};
use kernel_alloc::vmm::VmmError;
use kernel_memory_addresses::{FRAME_SIZE, FrameNumber, VirtualAddress};
use kernel_vmem::{PageFlags, PhysMapper};

const BASE: VirtualAddress = VirtualAddress::new(0x20_0000);

/// Small xorshift generator; keeps the operation mix deterministic.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

#[test]
fn random_mix_keeps_counts_and_lists_consistent() {
    let machine = Machine::new(128);
    let mut vmm = machine.boot();
    let root = vmm.kernel_root();
    let rw = PageFlags::WRITABLE;
    let mut rng = XorShift(0x9e37_79b9_7f4a_7c15);

    let pool: Vec<FrameNumber> = (0..8).map(|_| vmm.allocate_frame().unwrap()).collect();

    // Pin every pool frame once outside the exercised range so none of them
    // ever drops back onto the free list.
    let pins = BASE + 3 * 0x20_0000;
    for (i, &f) in pool.iter().enumerate() {
        let va = pins + i as u64 * FRAME_SIZE;
        vmm.insert(root, f, va, rw).unwrap();
    }

    // 16 pages spread over three leaf tables.
    let addrs: Vec<VirtualAddress> = (0..16u64)
        .map(|i| BASE + (i / 6) * 0x20_0000 + (i % 6) * FRAME_SIZE)
        .collect();

    for _ in 0..500 {
        let va = addrs[rng.below(addrs.len() as u64) as usize];
        if rng.below(3) == 0 {
            vmm.remove(root, va);
            assert_eq!(vmm.lookup(root, va), None);
        } else {
            let f = pool[rng.below(pool.len() as u64) as usize];
            vmm.insert(root, f, va, rw).unwrap();
            assert_eq!(vmm.lookup(root, va).map(|(m, _)| m), Some(f));
        }

        // One reference per address mapping the frame, plus the pin.
        for &f in &pool {
            let mapped = addrs
                .iter()
                .filter(|&&va| vmm.lookup(root, va).map(|(m, _)| m) == Some(f))
                .count();
            assert_eq!(vmm.ref_count(f) as usize, mapped + 1);
        }
        assert_consistent(&vmm);
    }
}

#[test]
fn at_most_one_mapping_per_address() {
    let machine = Machine::new(32);
    let mut vmm = machine.boot();
    let root = vmm.kernel_root();
    let f = vmm.allocate_frame().unwrap();
    let g = vmm.allocate_frame().unwrap();

    vmm.insert(root, f, BASE, PageFlags::WRITABLE).unwrap();
    vmm.insert(root, g, BASE, PageFlags::WRITABLE).unwrap();

    assert_eq!(vmm.lookup(root, BASE).map(|(m, _)| m), Some(g));
    assert_eq!(vmm.translate(root, BASE), Some(g.base()));
    assert_eq!(vmm.ref_count(f), 0);
    assert_eq!(vmm.ref_count(g), 1);
    assert_consistent(&vmm);
}

#[test]
fn remove_is_idempotent() {
    let machine = Machine::new(32);
    let mut vmm = machine.boot();
    let root = vmm.kernel_root();
    let f = vmm.allocate_frame().unwrap();
    vmm.insert(root, f, BASE, PageFlags::WRITABLE).unwrap();

    vmm.remove(root, BASE);
    let stats = vmm.frames().stats();
    let flushes = vmm.tlb().invalidated().len();

    vmm.remove(root, BASE);
    vmm.remove(root, BASE + 0x40_0000);
    assert_eq!(vmm.frames().stats(), stats);
    assert_eq!(vmm.tlb().invalidated().len(), flushes);
}

#[test]
fn self_remap_keeps_the_count() {
    let machine = Machine::new(32);
    let mut vmm = machine.boot();
    let root = vmm.kernel_root();
    let f = vmm.allocate_frame().unwrap();
    let rw = PageFlags::WRITABLE;

    vmm.insert(root, f, BASE, rw).unwrap();
    vmm.insert(root, f, BASE + FRAME_SIZE, rw).unwrap();
    for perm in [PageFlags::empty(), PageFlags::USER, PageFlags::WRITABLE | PageFlags::GLOBAL] {
        vmm.insert(root, f, BASE, perm).unwrap();
        assert_eq!(vmm.ref_count(f), 2);
        let (_, slot) = vmm.lookup(root, BASE).unwrap();
        assert_eq!(vmm.space(root).entry(slot).flags(), perm | PageFlags::VALID);
    }
}

#[test]
fn exhaustion_is_deterministic_until_a_frame_returns() {
    let machine = Machine::new(32);
    let mut vmm = machine.boot();
    let root = vmm.kernel_root();
    let f = vmm.allocate_frame().unwrap();
    vmm.insert(root, f, BASE, PageFlags::WRITABLE).unwrap();
    let held = drain(&mut vmm);
    assert!(!held.is_empty());

    let far = BASE + 0x20_0000;
    for _ in 0..3 {
        assert_eq!(vmm.allocate_frame(), Err(VmmError::OutOfMemory));
        assert_eq!(
            vmm.insert(root, held[0], far, PageFlags::WRITABLE),
            Err(VmmError::OutOfMemory)
        );
    }

    // Inserting into an existing leaf table needs no frame.
    let next = BASE + FRAME_SIZE;
    let rw = PageFlags::WRITABLE;
    vmm.insert(root, held[0], next, rw).unwrap();
    assert_eq!(vmm.allocate_frame(), Err(VmmError::OutOfMemory));

    // Dropping the last reference to `f` makes it allocatable again.
    vmm.remove(root, BASE);
    assert_eq!(vmm.allocate_frame(), Ok(f));
    assert_eq!(vmm.allocate_frame(), Err(VmmError::OutOfMemory));
    assert_consistent(&vmm);
}

#[test]
fn allocated_frames_are_zeroed() {
    let machine = Machine::new(32);
    let mapper = machine.mapper();
    let mut vmm = machine.boot();
    let root = vmm.kernel_root();

    // Map a frame, scribble on it, release it.
    let f = vmm.allocate_frame().unwrap();
    vmm.insert(root, f, BASE, PageFlags::WRITABLE).unwrap();
    let bytes: &mut [u8] = unsafe { mapper.phys_to_slice_mut(f.base(), 4096) };
    bytes.fill(0xCC);
    vmm.remove(root, BASE);

    assert_eq!(vmm.allocate_frame(), Ok(f));
    let bytes: &mut [u8] = unsafe { mapper.phys_to_slice_mut(f.base(), 4096) };
    assert!(bytes.iter().all(|&b| b == 0));
}
