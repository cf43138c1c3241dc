//! LRU cache tests: usage order, eviction, reset

use rstest::rstest;

use rtcore::alloc::SystemAlloc;
use rtcore::lru::LruCache;

#[rstest]
fn capacity_two_eviction_order() {
    let alloc = SystemAlloc;
    let mut lru: LruCache<'_, i32, i32, _> = LruCache::new(&alloc, 2);

    assert!(!lru.contains(&2));
    assert!(lru.put(2, 3));
    assert!(lru.contains(&2));

    assert_eq!(lru.get(&2), Some(3));
    assert_eq!(lru.get(&1), None);

    assert!(lru.put(1, 1));
    assert!(lru.put(1, 5));

    assert_eq!(lru.get(&1), Some(5));
    assert_eq!(lru.get(&2), Some(3));

    // 2 is now most recent, 1 least recent: inserting 9 evicts 1.
    assert!(lru.put(9, 10));
    assert_eq!(lru.get(&1), None);
    assert_eq!(lru.get(&9), Some(10));
    assert_eq!(lru.len(), 2);
}

#[rstest]
fn get_marks_most_recently_used() {
    let alloc = SystemAlloc;
    let mut lru: LruCache<'_, u32, u32, _> = LruCache::new(&alloc, 3);

    for i in 0..3 {
        assert!(lru.put(i, i * 10));
    }
    // Touch the oldest entry; the next eviction must take the second oldest.
    assert_eq!(lru.get(&0), Some(0));
    assert!(lru.put(3, 30));

    assert!(lru.contains(&0));
    assert!(!lru.contains(&1));
    assert!(lru.contains(&2));
    assert!(lru.contains(&3));
}

#[rstest]
fn put_updates_in_place_and_relinks() {
    let alloc = SystemAlloc;
    let mut lru: LruCache<'_, u32, String, _> = LruCache::new(&alloc, 2);

    assert!(lru.put(1, String::from("one")));
    assert!(lru.put(2, String::from("two")));
    assert!(lru.put(1, String::from("uno")));

    // 2 is the least recently used entry now.
    assert!(lru.put(3, String::from("three")));
    assert!(!lru.contains(&2));
    assert_eq!(lru.get_ref(&1).map(String::as_str), Some("uno"));
}

#[rstest]
fn reset_empties_but_keeps_capacity() {
    let alloc = SystemAlloc;
    let mut lru: LruCache<'_, i32, i32, _> = LruCache::new(&alloc, 100);

    for i in 0..10 {
        assert!(lru.put(i, i));
    }
    assert_eq!(lru.len(), 10);

    lru.reset();
    assert!(lru.is_empty());
    assert_eq!(lru.capacity(), 100);
    for i in 0..10 {
        assert!(!lru.contains(&i));
    }

    for i in 0..10 {
        assert!(lru.put(i, i + 1));
    }
    for i in 0..10 {
        assert_eq!(lru.get(&i), Some(i + 1));
    }
}

#[rstest]
fn eviction_always_removes_the_tail() {
    let alloc = SystemAlloc;
    let capacity = 64usize;
    let mut lru: LruCache<'_, usize, usize, _> = LruCache::new(&alloc, capacity);

    for i in 0..1_000 {
        assert!(lru.put(i, i));
        assert!(lru.len() <= capacity);
        if i >= capacity {
            // Exactly the `capacity` most recent keys survive.
            assert!(!lru.contains(&(i - capacity)));
            assert!(lru.contains(&(i + 1 - capacity)));
        }
    }
    assert_eq!(lru.len(), capacity);
}

/// Random get/put traffic checked against a naive usage-ordered model.
#[rstest]
fn random_traffic_matches_a_naive_model() {
    let alloc = SystemAlloc;
    let capacity = 16usize;
    let mut lru: LruCache<'_, u32, u32, _> = LruCache::new(&alloc, capacity);
    // Model: most recently used at the front.
    let mut model: Vec<(u32, u32)> = Vec::new();

    let mut state = 0xB5AD_4ECE_DA1C_E2A9u64;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    for _ in 0..20_000 {
        let roll = next();
        let key = (roll % 48) as u32;
        if roll % 3 == 0 {
            let value = (roll >> 32) as u32;
            assert!(lru.put(key, value));
            if let Some(pos) = model.iter().position(|&(k, _)| k == key) {
                model.remove(pos);
            } else if model.len() == capacity {
                model.pop();
            }
            model.insert(0, (key, value));
        } else {
            let expected = model.iter().position(|&(k, _)| k == key).map(|pos| {
                let entry = model.remove(pos);
                model.insert(0, entry);
                entry.1
            });
            assert_eq!(lru.get(&key), expected, "key {key}");
        }
        assert_eq!(lru.len(), model.len());
    }
}

#[rstest]
fn string_keys_round_trip() {
    let alloc = SystemAlloc;
    let mut lru: LruCache<'_, String, u64, _> = LruCache::new(&alloc, 8);

    for i in 0..8u64 {
        assert!(lru.put(format!("k{i}"), i));
    }
    assert_eq!(lru.get(&String::from("k0")), Some(0));
    assert!(lru.put(String::from("k8"), 8));
    // k1 was the least recently used after k0 got touched.
    assert!(!lru.contains(&String::from("k1")));
}
