use tcgen_core::Arena;

const CHUNK_SIZE: usize = 32 * 1024;

#[test]
fn small_allocations_share_a_chunk() {
    let mut arena = Arena::new();
    for _ in 0..100 {
        arena.alloc(64);
    }
    assert_eq!(arena.chunk_count(), 1);
    assert_eq!(arena.large_count(), 0);
}

#[test]
fn chunk_overflow_grows_the_chain() {
    let mut arena = Arena::new();
    // Three chunks' worth of 1 KiB allocations.
    for _ in 0..(3 * CHUNK_SIZE / 1024) {
        arena.alloc(1024);
    }
    assert!(arena.chunk_count() >= 3);
}

#[test]
fn oversize_goes_to_the_large_list() {
    let mut arena = Arena::new();
    arena.alloc(CHUNK_SIZE + 1);
    assert_eq!(arena.large_count(), 1);

    arena.reset();
    assert_eq!(arena.large_count(), 0, "large allocations freed on reset");
}

#[test]
fn reset_reuses_chunks() {
    let mut arena = Arena::new();
    for _ in 0..64 {
        arena.alloc(1024);
    }
    let chunks = arena.chunk_count();

    arena.reset();
    for _ in 0..64 {
        arena.alloc(1024);
    }
    assert_eq!(arena.chunk_count(), chunks, "no new chunks after reset");
}

#[test]
fn allocations_are_aligned_and_zeroed() {
    let mut arena = Arena::new();
    arena.alloc(3);
    let p = arena.alloc(5);
    assert_eq!(p as usize % 8, 0);

    // Dirty a buffer, recycle, and check the reused memory reads zero.
    // SAFETY: slice dropped before reset.
    unsafe {
        let buf = arena.alloc_bytes(256);
        buf.fill(0xAA);
    }
    arena.reset();
    // SAFETY: fresh allocation, nothing else references the arena.
    let buf = unsafe { arena.alloc_bytes(256) };
    assert!(buf.iter().all(|&b| b == 0));
}

#[test]
fn u32_slices_are_usable() {
    let mut arena = Arena::new();
    // SAFETY: dropped before any reset.
    let words = unsafe { arena.alloc_u32s(16) };
    assert!(words.iter().all(|&w| w == 0));
    words[3] = 0xDEAD;
    assert_eq!(words[3], 0xDEAD);
}
