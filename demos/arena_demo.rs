//! End-to-end tour: map a region, stand up the arena, and run every
//! container on top of it without touching the global heap.
//!
//! Run with: cargo run --example arena_demo

#[cfg(unix)]
use rtcore::{
    LruCache, MmapRegion, ObjectPool, RtAllocMt, RtHashMap, RtRc, RtVec, SpscRing,
};

#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
struct Sample {
    sensor: u32,
    micros: u64,
    value: f64,
}

#[cfg(not(unix))]
fn main() {
    eprintln!("this demo needs the anonymous-mapping region, which is unix-only");
}

#[cfg(unix)]
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // One anonymous mapping feeds everything below.
    let mut region = MmapRegion::new();
    region.init(16 * 1024 * 1024)?;
    let alloc = RtAllocMt::new();
    unsafe {
        alloc.init(region.as_ptr().expect("region mapped"), region.capacity())?;
    }

    // A growable sample log, bounded by the arena rather than the heap.
    let mut log: RtVec<'_, Sample, _> = RtVec::new(&alloc);
    for i in 0..10_000u64 {
        let sample = Sample {
            sensor: (i % 16) as u32,
            micros: i * 250,
            value: (i as f64).sin(),
        };
        if log.push(sample).is_err() {
            println!("arena exhausted after {} samples", log.len());
            break;
        }
    }
    println!("logged {} samples", log.len());

    // Index the latest sample per sensor; overwrites reuse the value slots.
    let mut latest: RtHashMap<'_, u32, Sample, _> = RtHashMap::new(&alloc);
    for sample in log.as_slice() {
        latest.put(sample.sensor, *sample);
    }
    latest.finalize();
    println!(
        "indexed {} sensors across {} buckets",
        latest.len(),
        latest.buckets()
    );

    // A small working set with strictly bounded lookups.
    let mut hot: LruCache<'_, u32, Sample, _> = LruCache::new(&alloc, 8);
    for sensor in 0..16u32 {
        if let Some(sample) = latest.get(&sensor) {
            hot.put(sensor, *sample);
        }
    }
    println!("hot set holds {} of 16 sensors", hot.len());

    // Pooled scratch buffers recycle without allocator round trips.
    let mut scratch: ObjectPool<'_, [u8; 512], _> = ObjectPool::new(&alloc, 4);
    for _ in 0..32 {
        if let Some(mut buffer) = scratch.get_scoped([0u8; 512]) {
            buffer[0] = 0xA5;
        }
    }
    println!("scratch pool settled at {} slots", scratch.len());

    // Shared ownership of a config blob, also arena-backed.
    let config = RtRc::new(&alloc, String::from("mode=flight"))
        .expect("arena can hold the config");
    let observer = config.downgrade();
    println!(
        "config '{}' observed: {}",
        &*config,
        observer.upgrade().is_some()
    );
    drop(config);
    println!("config after drop observed: {}", observer.upgrade().is_some());

    // Lock-free byte transport between two threads over a borrowed buffer.
    let mut wire = vec![0u8; 4096];
    let mut ring = SpscRing::new(&mut wire);
    let (mut tx, mut rx) = ring.split();
    let total: usize = 1 << 20;

    std::thread::scope(|scope| {
        scope.spawn(move || {
            let chunk = [0x42u8; 300];
            let mut sent = 0usize;
            while sent < total {
                let want = (total - sent).min(chunk.len());
                let n = tx.write_bytes(&chunk[..want]) as usize;
                if n == 0 {
                    std::thread::yield_now();
                }
                sent += n;
            }
        });

        scope.spawn(move || {
            let mut sink = [0u8; 479];
            let mut seen = 0usize;
            while seen < total {
                let n = rx.read(&mut sink) as usize;
                if n == 0 {
                    std::thread::yield_now();
                }
                seen += n;
            }
            println!("streamed {seen} bytes through a 4 KiB ring");
        });
    });

    drop(hot);
    drop(latest);
    drop(log);
    drop(scratch);
    alloc.uninit();
    region.uninit();
    Ok(())
}
