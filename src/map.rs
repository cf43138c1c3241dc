//! Amortized-rehash hash table
//!
//! An open-chaining map whose resizes are spread across subsequent
//! operations. Two tables exist while a resize is in flight: inserts go to
//! the secondary, lookups check the secondary first, and every public call
//! migrates up to [`TRANSFER_QUOTA`] entries from the tails of the primary's
//! buckets. Combined with a bounded-time allocator this keeps each map
//! operation bounded.
//!
//! Values live in their own allocations, so value pointers stay stable
//! across rehashes and in-place overwrites.

use std::mem;
use std::ptr::{self, NonNull};

use serde::{Deserialize, Serialize};

use crate::alloc::RawAlloc;
use crate::constants::{
    DEFAULT_MAX_LOAD_FACTOR_PERCENT, INITIAL_BUCKET_POW2, MAX_BUCKET_POW2, TRANSFER_QUOTA,
};
use crate::hash::{prime_for_pow2, RtHash};
use crate::vec::RtVec;

/// Externally observable state of the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapState {
    /// An unrecoverable allocation failure occurred; operations are no-ops.
    Error,
    /// All entries live in the primary table.
    Stable,
    /// A resize is in flight; entries are split between the two tables.
    Transfer,
}

/// One key slot in a bucket. The value is held behind its own allocation so
/// overwrites happen in place and migrations never move it.
struct Entry<K, V> {
    key: K,
    val: Option<NonNull<V>>,
}

impl<K, V> Entry<K, V> {
    /// Stores `value`, reusing the existing allocation when there is one.
    /// Only a first-time store can fail; overwrites are infallible.
    fn construct<A: RawAlloc>(&mut self, alloc: &A, value: V) -> bool {
        match self.val {
            Some(p) => {
                unsafe { *p.as_ptr() = value };
                true
            }
            None => {
                let Some(p) = alloc.alloc(mem::size_of::<V>()) else {
                    return false;
                };
                let p = p.cast::<V>();
                unsafe { ptr::write(p.as_ptr(), value) };
                self.val = Some(p);
                true
            }
        }
    }

    /// Drops and releases the value, leaving the slot hollow.
    fn deconstruct<A: RawAlloc>(&mut self, alloc: &A) {
        if let Some(p) = self.val.take() {
            unsafe {
                ptr::drop_in_place(p.as_ptr());
                alloc.dealloc(p.cast());
            }
        }
    }
}

/// One hash table: a prime-sized bucket array of entry chains.
struct Table<'a, K, V, A: RawAlloc> {
    alloc: &'a A,
    buckets: RtVec<'a, RtVec<'a, Entry<K, V>, A>, A>,
    total_entries: usize,
    num_buckets: usize,
    pow2: u8,
}

impl<'a, K: RtHash + Eq, V, A: RawAlloc> Table<'a, K, V, A> {
    fn new(alloc: &'a A, pow2: u8) -> Table<'a, K, V, A> {
        let pow2 = pow2.clamp(INITIAL_BUCKET_POW2, MAX_BUCKET_POW2);
        let mut table = Table {
            alloc,
            buckets: RtVec::new(alloc),
            total_entries: 0,
            num_buckets: 0,
            pow2,
        };
        table.num_buckets = table.expand(prime_for_pow2(u32::from(pow2)) as usize);
        table
    }

    /// Pushes `target` empty buckets, reporting how many actually fit.
    fn expand(&mut self, target: usize) -> usize {
        self.buckets.reserve(target);
        for i in 0..target {
            if self.buckets.push(RtVec::new(self.alloc)).is_err() {
                return i;
            }
        }
        target
    }

    fn bucket_index(&self, key: &K) -> usize {
        debug_assert!(self.num_buckets > 0);
        key.rt_hash() as usize % self.num_buckets
    }

    /// Locates `key`, returning (bucket, entry) indices.
    fn find(&self, key: &K) -> Option<(usize, usize)> {
        if self.num_buckets == 0 {
            return None;
        }
        let bi = self.bucket_index(key);
        let bucket = &self.buckets[bi];
        (0..bucket.len()).find(|&ei| bucket[ei].key == *key).map(|ei| (bi, ei))
    }

    fn value_ptr(&self, key: &K) -> Option<NonNull<V>> {
        let (bi, ei) = self.find(key)?;
        self.buckets[bi][ei].val
    }

    /// Steals the value pointer out of `key`'s entry, leaving it hollow.
    fn take_value(&mut self, key: &K) -> Option<NonNull<V>> {
        let (bi, ei) = self.find(key)?;
        self.buckets[bi][ei].val.take()
    }

    /// Finds or inserts an entry for `key`; `true` in the result means a new
    /// entry was created. `None` means the insertion failed.
    fn get_or_create(&mut self, key: K) -> Option<(usize, usize, bool)> {
        if self.num_buckets == 0 {
            return None;
        }
        if let Some((bi, ei)) = self.find(&key) {
            return Some((bi, ei, false));
        }
        let bi = self.bucket_index(&key);
        if self.buckets[bi].push(Entry { key, val: None }).is_err() {
            return None;
        }
        self.total_entries += 1;
        let ei = self.buckets[bi].len() - 1;
        Some((bi, ei, true))
    }

    fn remove(&mut self, key: &K) -> bool {
        let Some((bi, ei)) = self.find(key) else {
            return false;
        };
        let alloc = self.alloc;
        self.buckets[bi][ei].deconstruct(alloc);
        self.buckets[bi].remove_fast(ei);
        self.total_entries -= 1;
        true
    }

    /// Drops and releases every value; keys stay in place.
    fn deconstruct_all(&mut self) {
        let alloc = self.alloc;
        for bi in 0..self.buckets.len() {
            let bucket = &mut self.buckets[bi];
            for ei in 0..bucket.len() {
                bucket[ei].deconstruct(alloc);
            }
        }
    }

    /// Drops every entry and value, keeping the bucket array.
    fn delete_all(&mut self) {
        self.deconstruct_all();
        for bi in 0..self.buckets.len() {
            self.buckets[bi].clear();
        }
        self.total_entries = 0;
    }
}

/// Chained hash map with amortized resizing over a [`RawAlloc`].
///
/// Not thread-safe; callers serialize externally. An unrecoverable
/// allocation failure latches the map into [`MapState::Error`], after which
/// every operation reports failure.
pub struct RtHashMap<'a, K: RtHash + Eq, V, A: RawAlloc> {
    alloc: &'a A,
    main: Table<'a, K, V, A>,
    secondary: Option<Table<'a, K, V, A>>,
    state: MapState,
    max_load_factor_percent: usize,
    next_bucket_to_transfer: usize,
    locked: bool,
}

impl<'a, K: RtHash + Eq, V, A: RawAlloc> RtHashMap<'a, K, V, A> {
    /// Creates a map with the default maximum load factor (5.0 — chains
    /// average five entries before a resize begins).
    pub fn new(alloc: &'a A) -> RtHashMap<'a, K, V, A> {
        Self::with_load_factor(alloc, DEFAULT_MAX_LOAD_FACTOR_PERCENT as f32 / 100.0)
    }

    /// Creates a map with a custom maximum load factor. Chaining makes load
    /// factors above 1.0 reasonable.
    pub fn with_load_factor(alloc: &'a A, max_load_factor: f32) -> RtHashMap<'a, K, V, A> {
        debug_assert!(mem::align_of::<V>() <= crate::tlsf::ALIGN);
        let main = Table::new(alloc, INITIAL_BUCKET_POW2);
        let state = if main.num_buckets == 0 {
            MapState::Error
        } else {
            MapState::Stable
        };
        RtHashMap {
            alloc,
            main,
            secondary: None,
            state,
            max_load_factor_percent: (max_load_factor * 100.0) as usize,
            next_bucket_to_transfer: 0,
            locked: false,
        }
    }

    /// Current state of the map.
    pub fn state(&self) -> MapState {
        self.state
    }

    /// Stops the table from resizing; keeps operation cost strictly bounded
    /// at the price of growing chains.
    pub fn lock_size(&mut self) {
        self.locked = true;
    }

    /// Allows the table to resize again.
    pub fn unlock_size(&mut self) {
        self.locked = false;
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.main.total_entries
            + self.secondary.as_ref().map_or(0, |t| t.total_entries)
    }

    /// True when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bucket count of the authoritative table.
    pub fn buckets(&self) -> usize {
        match self.state {
            MapState::Error => 0,
            MapState::Stable => self.main.num_buckets,
            MapState::Transfer => self.secondary.as_ref().map_or(0, |t| t.num_buckets),
        }
    }

    /// Buckets needed to hold `expected` entries at the configured load
    /// factor; feed the result to [`RtHashMap::reserve`].
    pub fn approx_buckets_needed(&self, expected: u32) -> u32 {
        (u64::from(expected) * 100 / self.max_load_factor_percent as u64 + 1) as u32
    }

    /// True when `key` has a value in the map. Never migrates entries.
    pub fn contains(&self, key: &K) -> bool {
        match self.state {
            MapState::Error => false,
            MapState::Stable => self.main.value_ptr(key).is_some(),
            MapState::Transfer => {
                let sec = self.secondary.as_ref().expect("transfer without secondary");
                sec.value_ptr(key).or_else(|| self.main.value_ptr(key)).is_some()
            }
        }
    }

    /// Looks up `key`, migrating a bounded batch of entries when a resize is
    /// in flight (which is why this takes `&mut self`).
    pub fn get(&mut self, key: &K) -> Option<&mut V> {
        match self.state {
            MapState::Error => None,
            MapState::Stable => {
                let found = self.main.value_ptr(key);
                if self.should_resize() {
                    let next = u32::from(self.main.pow2) + 1;
                    if !self.begin_resize(next) {
                        self.state = MapState::Error;
                        return None;
                    }
                }
                found.map(|p| unsafe { &mut *p.as_ptr() })
            }
            MapState::Transfer => {
                let sec = self.secondary.as_ref().expect("transfer without secondary");
                let found = sec.value_ptr(key).or_else(|| self.main.value_ptr(key));
                if !self.partial_transfer() {
                    self.state = MapState::Error;
                    return None;
                }
                if self.transfer_complete() {
                    self.end_resize();
                }
                found.map(|p| unsafe { &mut *p.as_ptr() })
            }
        }
    }

    /// Inserts or overwrites `key`'s value. Overwrites happen in place, so
    /// previously obtained value references observe the new value.
    pub fn put(&mut self, key: K, value: V) -> bool {
        match self.state {
            MapState::Error => false,
            MapState::Stable => {
                let mut stored = false;
                if let Some((bi, ei, created)) = self.main.get_or_create(key) {
                    let alloc = self.alloc;
                    if self.main.buckets[bi][ei].construct(alloc, value) {
                        stored = true;
                    } else if created {
                        // Could not allocate the value: take the fresh shell
                        // back out so the failed put leaves no trace.
                        self.main.buckets[bi].remove_fast(ei);
                        self.main.total_entries -= 1;
                    }
                }
                if self.should_resize() {
                    let next = u32::from(self.main.pow2) + 1;
                    if !self.begin_resize(next) {
                        self.state = MapState::Error;
                        return false;
                    }
                }
                stored
            }
            MapState::Transfer => {
                let mut stored = false;
                let created_slot = self
                    .secondary
                    .as_mut()
                    .expect("transfer without secondary")
                    .get_or_create(key);
                if let Some((bi, ei, created)) = created_slot {
                    if created {
                        // The key may still live in the primary table; its
                        // value moves into the new slot before the store so
                        // the overwrite path reuses the allocation.
                        let moved = {
                            let sec = self.secondary.as_ref().expect("transfer without secondary");
                            let key_ref = &sec.buckets[bi][ei].key;
                            self.main.take_value(key_ref)
                        };
                        if moved.is_some() {
                            let sec = self.secondary.as_mut().expect("transfer without secondary");
                            sec.buckets[bi][ei].val = moved;
                        }
                    }
                    let alloc = self.alloc;
                    let sec = self.secondary.as_mut().expect("transfer without secondary");
                    if sec.buckets[bi][ei].construct(alloc, value) {
                        stored = true;
                    } else if created {
                        debug_assert!(sec.buckets[bi][ei].val.is_none());
                        sec.buckets[bi].remove_fast(ei);
                        sec.total_entries -= 1;
                    }
                }
                if !self.partial_transfer() {
                    self.state = MapState::Error;
                    return false;
                }
                if self.transfer_complete() {
                    self.end_resize();
                }
                stored
            }
        }
    }

    /// Removes `key`'s entry, reporting whether one existed.
    pub fn remove(&mut self, key: &K) -> bool {
        match self.state {
            MapState::Error => false,
            MapState::Stable => {
                let removed = self.main.remove(key);
                if self.should_resize() {
                    let next = u32::from(self.main.pow2) + 1;
                    if !self.begin_resize(next) {
                        self.state = MapState::Error;
                        return false;
                    }
                }
                removed
            }
            MapState::Transfer => {
                let removed = self.main.remove(key)
                    || self
                        .secondary
                        .as_mut()
                        .expect("transfer without secondary")
                        .remove(key);
                if !self.partial_transfer() {
                    self.state = MapState::Error;
                    return false;
                }
                if self.transfer_complete() {
                    self.end_resize();
                }
                removed
            }
        }
    }

    /// Drops every entry. Completes any in-flight transfer so the map ends
    /// up stable and empty.
    pub fn clear(&mut self) {
        match self.state {
            MapState::Error => {}
            MapState::Stable => self.main.delete_all(),
            MapState::Transfer => {
                self.main.delete_all();
                if let Some(sec) = self.secondary.as_mut() {
                    sec.delete_all();
                }
                let _ = self.finalize();
            }
        }
    }

    /// Completes any in-flight transfer in one pass. Returns false from the
    /// error state or when migration hits an allocation failure.
    pub fn finalize(&mut self) -> bool {
        match self.state {
            MapState::Error => false,
            MapState::Stable => true,
            MapState::Transfer => {
                while !self.transfer_complete() {
                    if !self.partial_transfer() {
                        return false;
                    }
                }
                self.end_resize();
                true
            }
        }
    }

    /// Grows the table synchronously (not amortized) until it has at least
    /// `number_of_buckets` buckets. Never shrinks.
    pub fn reserve(&mut self, number_of_buckets: u32) -> bool {
        if self.state == MapState::Error || number_of_buckets == 0 {
            return false;
        }

        let mut target_pow2 = None;
        for pow2 in 0..32u32 {
            if prime_for_pow2(pow2) >= number_of_buckets {
                target_pow2 = Some(pow2);
                break;
            }
        }
        let Some(target_pow2) = target_pow2 else {
            return false;
        };

        if self.state == MapState::Transfer {
            while !self.transfer_complete() {
                if !self.partial_transfer() {
                    return false;
                }
            }
            self.end_resize();
        }

        if target_pow2 <= u32::from(self.main.pow2) {
            return true;
        }

        if !self.begin_resize(target_pow2) {
            self.state = MapState::Error;
            return false;
        }
        while !self.transfer_complete() {
            if !self.partial_transfer() {
                return false;
            }
        }
        self.end_resize();
        true
    }

    fn should_resize(&self) -> bool {
        debug_assert_eq!(self.state, MapState::Stable);
        debug_assert!(self.secondary.is_none());
        if self.locked {
            return false;
        }
        let max_keys = self.max_load_factor_percent * self.main.num_buckets / 100;
        self.main.total_entries >= max_keys
    }

    /// Stands up the secondary table for a resize to `prime >= 2^new_pow2`.
    fn begin_resize(&mut self, new_pow2: u32) -> bool {
        debug_assert_eq!(self.state, MapState::Stable);
        debug_assert!(self.secondary.is_none());

        let expected = prime_for_pow2(new_pow2) as usize;
        if expected == 0 {
            // Already at the largest supported table.
            return false;
        }
        let table = Table::new(self.alloc, new_pow2 as u8);
        if table.num_buckets != expected {
            // Partial expansion; throw the fragment away and report failure.
            return false;
        }
        tracing::debug!(
            from = self.main.num_buckets,
            to = expected,
            "hash table resize started"
        );
        self.secondary = Some(table);
        self.state = MapState::Transfer;
        self.next_bucket_to_transfer = 0;
        true
    }

    /// Migrates up to [`TRANSFER_QUOTA`] entries from the tails of the
    /// primary's buckets into the secondary table.
    fn partial_transfer(&mut self) -> bool {
        debug_assert_eq!(self.state, MapState::Transfer);
        let mut quota = TRANSFER_QUOTA;

        let Self {
            main,
            secondary,
            next_bucket_to_transfer,
            ..
        } = self;
        let secondary = secondary.as_mut().expect("transfer without secondary");

        let bucket_count = main.buckets.len();
        while *next_bucket_to_transfer < bucket_count {
            let bi = *next_bucket_to_transfer;
            while !main.buckets[bi].is_empty() {
                if quota == 0 {
                    return true;
                }
                quota -= 1;

                let entry = main.buckets[bi].pop().expect("bucket emptied under us");
                let sbi = secondary.bucket_index(&entry.key);
                let already_there = secondary.buckets[sbi]
                    .as_slice()
                    .iter()
                    .any(|e| e.key == entry.key);
                if already_there {
                    // The secondary copy is authoritative; the primary entry
                    // must have been hollowed out by the insert that created
                    // it.
                    debug_assert!(entry.val.is_none());
                    main.total_entries -= 1;
                } else {
                    match secondary.buckets[sbi].push(entry) {
                        Ok(()) => {
                            secondary.total_entries += 1;
                            main.total_entries -= 1;
                        }
                        Err(entry) => {
                            // The pop left capacity behind, so this cannot fail.
                            let _ = main.buckets[bi].push(entry);
                            return false;
                        }
                    }
                }
            }
            *next_bucket_to_transfer += 1;
        }
        true
    }

    fn transfer_complete(&self) -> bool {
        debug_assert_eq!(self.state, MapState::Transfer);
        self.main.total_entries == 0
    }

    /// Retires the drained primary table and promotes the secondary.
    fn end_resize(&mut self) {
        debug_assert_eq!(self.state, MapState::Transfer);
        debug_assert_eq!(self.main.total_entries, 0);
        let drained = mem::replace(
            &mut self.main,
            self.secondary.take().expect("transfer without secondary"),
        );
        drop(drained);
        self.state = MapState::Stable;
        self.next_bucket_to_transfer = 0;
        tracing::debug!(buckets = self.main.num_buckets, "hash table resize complete");
    }
}

impl<'a, K: RtHash + Eq, V, A: RawAlloc> Drop for RtHashMap<'a, K, V, A> {
    fn drop(&mut self) {
        self.main.deconstruct_all();
        if let Some(sec) = self.secondary.as_mut() {
            sec.deconstruct_all();
        }
    }
}
