//! Bounded least-recently-used map.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Least-recently-used cache with a fixed capacity.
///
/// Recency is a monotonically increasing tick per access; `order` maps ticks
/// back to keys so the oldest key is the first entry of the tree.
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    tick: u64,
    map: HashMap<K, (V, u64)>,
    order: BTreeMap<u64, K>,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    /// A capacity of zero disables caching: every `put` is dropped.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tick: 0,
            map: HashMap::new(),
            order: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Look up `key` and mark it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let tick = self.next_tick();
        let (_, last) = self.map.get_mut(key)?;
        self.order.remove(last);
        *last = tick;
        self.order.insert(tick, key.clone());
        self.map.get(key).map(|(v, _)| v)
    }

    /// Mutable access without changing recency.
    pub fn peek_mut(&mut self, key: &K) -> Option<&mut V> {
        self.map.get_mut(key).map(|(v, _)| v)
    }

    /// Insert or replace `key`; returns the evicted key when over capacity.
    pub fn put(&mut self, key: K, value: V) -> Option<K> {
        if self.capacity == 0 {
            return None;
        }
        let tick = self.next_tick();
        if let Some((_, last)) = self.map.insert(key.clone(), (value, tick)) {
            self.order.remove(&last);
        }
        self.order.insert(tick, key);

        if self.map.len() > self.capacity {
            let (_, oldest) = self.order.pop_first()?;
            self.map.remove(&oldest);
            return Some(oldest);
        }
        None
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (value, tick) = self.map.remove(key)?;
        self.order.remove(&tick);
        Some(value)
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}
