//! Least-recently-used cache with strictly bounded operations
//!
//! A pool-backed intrusive doubly linked list (most recent at the head)
//! plus a size-locked hash table from key to node. The table reserves
//! enough buckets for the configured capacity up front and locks its size,
//! so `put` and `get` never trigger a rehash.

use std::ptr::NonNull;

use crate::alloc::RawAlloc;
use crate::hash::RtHash;
use crate::map::RtHashMap;
use crate::pool::ObjectPool;

struct Node<K, V> {
    key: K,
    val: V,
    prev: Option<NonNull<Node<K, V>>>,
    next: Option<NonNull<Node<K, V>>>,
}

/// Fixed-capacity LRU cache over a [`RawAlloc`].
///
/// Not thread-safe. Keys are cloned into both the map and the list node.
pub struct LruCache<'a, K: RtHash + Eq + Clone, V, A: RawAlloc> {
    head: Option<NonNull<Node<K, V>>>,
    tail: Option<NonNull<Node<K, V>>>,
    map: RtHashMap<'a, K, NonNull<Node<K, V>>, A>,
    pool: ObjectPool<'a, Node<K, V>, A>,
    capacity: usize,
    len: usize,
}

impl<'a, K: RtHash + Eq + Clone, V, A: RawAlloc> LruCache<'a, K, V, A> {
    /// Creates a cache holding up to `capacity` entries.
    ///
    /// Node storage is pre-allocated and the index is sized for `capacity`
    /// and locked, which keeps every later operation free of rehashing.
    pub fn new(alloc: &'a A, capacity: usize) -> LruCache<'a, K, V, A> {
        let mut map = RtHashMap::new(alloc);
        let wanted = map.approx_buckets_needed(capacity as u32);
        if map.reserve(wanted) {
            map.lock_size();
        }
        LruCache {
            head: None,
            tail: None,
            map,
            pool: ObjectPool::new(alloc, capacity),
            capacity,
            len: 0,
        }
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when `key` is cached. Does not touch the usage order.
    pub fn contains(&self, key: &K) -> bool {
        self.map.contains(key)
    }

    /// Copies out the value for `key` and marks it most recently used.
    pub fn get(&mut self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let node = *self.map.get(key)?;
        self.unlink(node);
        // Copy rather than borrow: the entry may be evicted by any later put.
        let value = unsafe { node.as_ref().val.clone() };
        self.push_front(node);
        Some(value)
    }

    /// Borrows the value for `key` and marks it most recently used.
    ///
    /// The borrow ends before the next cache call, which is exactly the
    /// window in which the underlying entry is guaranteed to stay put.
    pub fn get_ref(&mut self, key: &K) -> Option<&V> {
        let node = *self.map.get(key)?;
        self.unlink(node);
        self.push_front(node);
        Some(unsafe { &node.as_ref().val })
    }

    /// Inserts or updates `key`, making it the most recently used entry.
    /// At capacity, the least recently used entry is evicted first.
    ///
    /// Returns false when the cache cannot allocate for the insertion; the
    /// cache is left unchanged in that case.
    pub fn put(&mut self, key: K, value: V) -> bool {
        if let Some(node) = self.map.get(&key) {
            let mut node = *node;
            self.unlink(node);
            unsafe {
                let n = node.as_mut();
                n.key = key;
                n.val = value;
            }
            self.push_front(node);
            return true;
        }

        if self.len == self.capacity {
            let Some(tail) = self.tail else {
                return false;
            };
            let evicted_key = unsafe { tail.as_ref().key.clone() };
            self.map.remove(&evicted_key);
            self.pop_back();
        }

        let Some(node) = self.pool.get(Node {
            key: key.clone(),
            val: value,
            prev: None,
            next: None,
        }) else {
            return false;
        };
        if !self.map.put(key, node) {
            unsafe { self.pool.put(node) };
            return false;
        }
        self.push_front(node);
        true
    }

    /// Drops every entry, leaving capacity and reserved storage in place.
    pub fn reset(&mut self) {
        while self.head.is_some() {
            self.pop_back();
        }
        self.map.clear();
        self.len = 0;
    }

    fn push_front(&mut self, mut node: NonNull<Node<K, V>>) {
        unsafe {
            debug_assert!(node.as_ref().prev.is_none());
            debug_assert!(node.as_ref().next.is_none());
            match self.head {
                None => {
                    self.head = Some(node);
                    self.tail = Some(node);
                }
                Some(mut head) => {
                    node.as_mut().next = Some(head);
                    head.as_mut().prev = Some(node);
                    self.head = Some(node);
                }
            }
        }
        self.len += 1;
    }

    /// Detaches `node` from the usage list without recycling it.
    fn unlink(&mut self, mut node: NonNull<Node<K, V>>) {
        debug_assert!(self.len > 0);
        unsafe {
            let prev = node.as_ref().prev;
            let next = node.as_ref().next;
            node.as_mut().prev = None;
            node.as_mut().next = None;

            match prev {
                Some(mut p) => p.as_mut().next = next,
                None => self.head = next,
            }
            match next {
                Some(mut n) => n.as_mut().prev = prev,
                None => self.tail = prev,
            }
        }
        self.len -= 1;
    }

    /// Evicts the least recently used node back into the pool.
    fn pop_back(&mut self) {
        let Some(tail) = self.tail else {
            return;
        };
        self.unlink(tail);
        unsafe { self.pool.put(tail) };
    }
}

impl<'a, K: RtHash + Eq + Clone, V, A: RawAlloc> Drop for LruCache<'a, K, V, A> {
    fn drop(&mut self) {
        while self.head.is_some() {
            self.pop_back();
        }
    }
}
