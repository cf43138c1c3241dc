//! Full-stack scenarios: mapped region, arena, containers, and handles
//! working together, plus the cross-component invariant sweeps.

use anyhow::{ensure, Result};
use rstest::rstest;

use crate::common::{init_logging, AlignedRegion};
use rtcore::alloc::RawAlloc;
use rtcore::lru::LruCache;
use rtcore::map::{MapState, RtHashMap};
use rtcore::pool::ObjectPool;
use rtcore::rc::{RtBox, RtRc};
use rtcore::ring::SpscRing;
use rtcore::tlsf::{TlsfArena, ALIGN};
use rtcore::vec::RtVec;
use rtcore::RtAllocMt;

#[cfg(unix)]
use rtcore::region::MmapRegion;

/// The usual deployment shape: an anonymous mapping feeding a locked arena
/// handle, with every container living inside it.
#[cfg(unix)]
#[rstest]
fn mapped_region_hosts_the_full_container_stack() -> Result<()> {
    init_logging();

    let mut region = MmapRegion::new();
    region.init(8 * 1024 * 1024)?;
    let alloc = RtAllocMt::new();
    unsafe {
        alloc
            .init(region.as_ptr().expect("region mapped"), region.capacity())
            .map_err(|e| anyhow::anyhow!("arena init failed: {e}"))?;
    }

    {
        let mut numbers = RtVec::new(&alloc);
        for i in 0..10_000u64 {
            ensure!(numbers.push(i).is_ok(), "vector push failed at {i}");
        }

        let mut index: RtHashMap<'_, u64, u64, _> = RtHashMap::new(&alloc);
        for &n in numbers.as_slice() {
            ensure!(index.put(n, n * 2), "map put failed at {n}");
        }
        ensure!(index.finalize(), "map finalize failed");
        ensure!(index.state() == MapState::Stable, "map not stable");

        let mut pool: ObjectPool<'_, [u8; 128], _> = ObjectPool::new(&alloc, 32);
        let block = pool.get([7u8; 128]).expect("pool get failed");
        unsafe { pool.put(block) };

        let mut cache: LruCache<'_, u64, u64, _> = LruCache::new(&alloc, 256);
        for i in 0..1_000u64 {
            ensure!(cache.put(i, i + 1), "cache put failed at {i}");
        }
        ensure!(cache.len() == 256, "cache overfilled");

        let shared = RtRc::new(&alloc, vec![1u8, 2, 3]).expect("rc alloc failed");
        let weak = shared.downgrade();
        let boxed = RtBox::new(&alloc, 42u32).expect("box alloc failed");
        ensure!(*boxed == 42);
        drop(boxed);
        drop(shared);
        ensure!(weak.upgrade().is_none(), "weak survived its pointee");

        for i in (0..10_000u64).step_by(3) {
            ensure!(index.remove(&i), "map remove failed at {i}");
        }
        for i in 0..10_000u64 {
            let expect = if i % 3 == 0 { None } else { Some(i * 2) };
            ensure!(index.get(&i).copied() == expect, "map lookup mismatch at {i}");
        }
    }

    alloc.uninit();
    region.uninit();
    Ok(())
}

/// After a full alloc/free cycle the arena's bookkeeping region must be
/// byte-identical to its post-construction image.
#[rstest]
fn arena_bookkeeping_roundtrip_under_container_churn() {
    init_logging();
    let region = AlignedRegion::new(1024 * 1024);
    let mut arena = unsafe { TlsfArena::new(region.base(), region.len()).unwrap() };
    let snapshot = region.bytes(TlsfArena::header_size()).to_vec();

    let mut held = Vec::new();
    for round in 0..50usize {
        for i in 0..100usize {
            let size = (round * 31 + i * 7) % 2048 + 1;
            if let Some(p) = arena.alloc(size) {
                held.push(p);
            }
        }
        // Free half in an order unrelated to allocation order.
        for _ in 0..held.len() / 2 {
            let p = held.swap_remove(round % held.len().max(1));
            unsafe { arena.free(p) };
        }
    }
    for p in held {
        unsafe { arena.free(p) };
    }

    assert_eq!(region.bytes(TlsfArena::header_size()), snapshot.as_slice());
}

/// Alignment of every returned pointer, and coalescing proven by
/// reallocating the whole arena as one block afterwards.
#[rstest]
fn alignment_and_coalescing_sweep() {
    let region = AlignedRegion::new(256 * 1024);
    let mut arena = unsafe { TlsfArena::new(region.base(), region.len()).unwrap() };

    let mut held = Vec::new();
    let mut probe = 1usize;
    loop {
        match arena.alloc(probe) {
            Some(p) => {
                assert_eq!(p.as_ptr() as usize % ALIGN, 0, "misaligned for size {probe}");
                held.push(p);
                probe = probe % 409 + 17;
            }
            None => break,
        }
    }
    assert!(held.len() > 50);

    // Free everything in reverse, then claim one maximal block: only a
    // fully coalesced arena can serve it.
    let largest_before = {
        for p in held.drain(..).rev() {
            unsafe { arena.free(p) };
        }
        let mut lo = 1usize;
        let mut hi = region.len();
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            match arena.alloc(mid) {
                Some(p) => {
                    unsafe { arena.free(p) };
                    lo = mid;
                }
                None => hi = mid - 1,
            }
        }
        lo
    };

    // The single free block spans the region minus header and block
    // overhead; anything near that must be serviceable in one piece.
    assert!(largest_before > region.len() - TlsfArena::header_size() - 64 * ALIGN);
}

/// A ring shuttling bytes between two threads while both sides also churn
/// their own arena-backed containers.
#[rstest]
fn ring_and_arena_churn_together() {
    init_logging();
    let producer_region = AlignedRegion::new(1024 * 1024);
    let consumer_region = AlignedRegion::new(1024 * 1024);
    let producer_alloc = RtAllocMt::new();
    let consumer_alloc = RtAllocMt::new();
    unsafe {
        producer_alloc
            .init(producer_region.base(), producer_region.len())
            .unwrap();
        consumer_alloc
            .init(consumer_region.base(), consumer_region.len())
            .unwrap();
    }

    let mut buf = [0u8; 4096];
    let mut ring = SpscRing::new(&mut buf);
    let (mut tx, mut rx) = ring.split();
    const TOTAL: usize = 200_000;

    std::thread::scope(|scope| {
        scope.spawn(|| {
            let mut scratch: RtVec<'_, u8, _> = RtVec::new(&producer_alloc);
            let mut sent = 0usize;
            while sent < TOTAL {
                scratch.clear();
                let burst = sent % 300 + 1;
                for i in 0..burst.min(TOTAL - sent) {
                    scratch.push(((sent + i) % 127) as u8).unwrap();
                }
                let mut offset = 0usize;
                while offset < scratch.len() {
                    let n = tx.write_bytes(&scratch.as_slice()[offset..]) as usize;
                    offset += n;
                    if n == 0 {
                        std::thread::yield_now();
                    }
                }
                sent += scratch.len();
            }
        });

        scope.spawn(|| {
            let mut received: RtVec<'_, u8, _> = RtVec::new(&consumer_alloc);
            let mut scratch = [0u8; 512];
            while received.len() < TOTAL {
                let n = rx.read(&mut scratch) as usize;
                if n == 0 {
                    std::thread::yield_now();
                }
                for &b in &scratch[..n] {
                    received.push(b).unwrap();
                }
            }
            for (i, &b) in received.as_slice().iter().enumerate() {
                assert_eq!(b, (i % 127) as u8, "stream corrupted at byte {i}");
            }
        });
    });
}

/// Containers built on the arena release everything they took: after they
/// drop, the arena serves a maximal allocation again.
#[rstest]
fn containers_return_all_arena_memory() {
    let region = AlignedRegion::new(2 * 1024 * 1024);
    let alloc = RtAllocMt::new();
    unsafe { alloc.init(region.base(), region.len()).unwrap() };

    let baseline = {
        let mut lo = 1usize;
        let mut hi = region.len();
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            match alloc.alloc(mid) {
                Some(p) => {
                    unsafe { alloc.dealloc(p) };
                    lo = mid;
                }
                None => hi = mid - 1,
            }
        }
        lo
    };

    {
        let mut map: RtHashMap<'_, u32, [u64; 4], _> = RtHashMap::new(&alloc);
        let mut cache: LruCache<'_, u32, u32, _> = LruCache::new(&alloc, 512);
        let mut vec: RtVec<'_, String, _> = RtVec::new(&alloc);
        for i in 0..5_000u32 {
            assert!(map.put(i, [u64::from(i); 4]));
            assert!(cache.put(i, i));
            vec.push(format!("item-{i}")).unwrap();
        }
        assert!(map.finalize());
    }

    let after = {
        let mut lo = 1usize;
        let mut hi = region.len();
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            match alloc.alloc(mid) {
                Some(p) => {
                    unsafe { alloc.dealloc(p) };
                    lo = mid;
                }
                None => hi = mid - 1,
            }
        }
        lo
    };

    assert_eq!(baseline, after, "arena did not return to its baseline");
}
