//! A sharded LRU cache, used by table readers to share decoded
//! blocks.
//!
//! The key space is split across 16 shards, each guarded by its own
//! mutex, so concurrent readers rarely contend. Within a shard,
//! entries form an LRU list threaded through slab indices rather than
//! pointers; freed slots are reused through a free list.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const NUM_SHARD_BITS: usize = 4;
const NUM_SHARD: usize = 1 << NUM_SHARD_BITS;

struct Entry<K, V> {
    key: K,
    value: V,
    charge: usize,
    prev: Option<usize>,
    next: Option<usize>,
}

struct LruShard<K, V> {
    capacity: usize,
    usage: usize,
    map: HashMap<K, usize>,
    slab: Vec<Option<Entry<K, V>>>,
    free: Vec<usize>,
    /// Most recently used.
    head: Option<usize>,
    /// Least recently used; evicted first.
    tail: Option<usize>,
}

impl<K: Eq + Hash + Clone, V: Clone> LruShard<K, V> {
    fn new(capacity: usize) -> LruShard<K, V> {
        LruShard {
            capacity,
            usage: 0,
            map: HashMap::new(),
            slab: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    fn entry(&self, index: usize) -> &Entry<K, V> {
        self.slab[index].as_ref().expect("live slab entry")
    }

    fn entry_mut(&mut self, index: usize) -> &mut Entry<K, V> {
        self.slab[index].as_mut().expect("live slab entry")
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = {
            let entry = self.entry(index);
            (entry.prev, entry.next)
        };
        match prev {
            Some(p) => self.entry_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.entry_mut(n).prev = prev,
            None => self.tail = prev,
        }
    }

    fn link_front(&mut self, index: usize) {
        let old_head = self.head;
        {
            let entry = self.entry_mut(index);
            entry.prev = None;
            entry.next = old_head;
        }
        if let Some(h) = old_head {
            self.entry_mut(h).prev = Some(index);
        }
        self.head = Some(index);
        if self.tail.is_none() {
            self.tail = Some(index);
        }
    }

    fn look_up(&mut self, key: &K) -> Option<V> {
        let index = *self.map.get(key)?;
        self.unlink(index);
        self.link_front(index);
        Some(self.entry(index).value.clone())
    }

    fn insert(&mut self, key: K, value: V, charge: usize) {
        if let Some(&existing) = self.map.get(&key) {
            self.remove_index(existing);
        }

        let entry = Entry {
            key: key.clone(),
            value,
            charge,
            prev: None,
            next: None,
        };
        let index = match self.free.pop() {
            Some(slot) => {
                self.slab[slot] = Some(entry);
                slot
            }
            None => {
                self.slab.push(Some(entry));
                self.slab.len() - 1
            }
        };
        self.map.insert(key, index);
        self.link_front(index);
        self.usage += charge;

        while self.usage > self.capacity {
            match self.tail {
                // Never evict the entry just inserted.
                Some(t) if t != index => self.remove_index(t),
                _ => break,
            }
        }
    }

    fn erase(&mut self, key: &K) {
        if let Some(&index) = self.map.get(key) {
            self.remove_index(index);
        }
    }

    fn remove_index(&mut self, index: usize) {
        self.unlink(index);
        let entry = self.slab[index].take().expect("live slab entry");
        self.map.remove(&entry.key);
        self.usage -= entry.charge;
        self.free.push(index);
    }
}

pub struct ShardLruCache<K, V> {
    shards: Vec<Mutex<LruShard<K, V>>>,
    next_id: AtomicU64,
}

impl<K: Eq + Hash + Clone, V: Clone> ShardLruCache<K, V> {
    /// `capacity` is the total charge the cache may hold, split
    /// evenly across shards.
    pub fn new(capacity: usize) -> ShardLruCache<K, V> {
        let per_shard = (capacity + NUM_SHARD - 1) / NUM_SHARD;
        ShardLruCache {
            shards: (0..NUM_SHARD)
                .map(|_| Mutex::new(LruShard::new(per_shard)))
                .collect(),
            next_id: AtomicU64::new(0),
        }
    }

    /// A fresh id, used by table readers to partition a shared cache's
    /// key space.
    pub fn new_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn look_up(&self, key: &K) -> Option<V> {
        self.shard(key).lock().unwrap().look_up(key)
    }

    pub fn insert(&self, key: K, value: V, charge: usize) {
        self.shard(&key).lock().unwrap().insert(key, value, charge);
    }

    pub fn erase(&self, key: &K) {
        self.shard(key).lock().unwrap().erase(key);
    }

    fn shard(&self, key: &K) -> &Mutex<LruShard<K, V>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize & (NUM_SHARD - 1)]
    }
}

#[cfg(test)]
mod tests {
    use crate::cache::ShardLruCache;
    use std::sync::Arc;

    #[test]
    fn test_hit_and_miss() {
        let cache: ShardLruCache<u32, String> = ShardLruCache::new(1000);
        assert!(cache.look_up(&100).is_none());

        cache.insert(100, "101".to_string(), 1);
        assert_eq!(cache.look_up(&100).unwrap(), "101");
        assert!(cache.look_up(&200).is_none());
        assert!(cache.look_up(&300).is_none());

        cache.insert(200, "201".to_string(), 1);
        cache.insert(100, "102".to_string(), 1);
        assert_eq!(cache.look_up(&100).unwrap(), "102");
        assert_eq!(cache.look_up(&200).unwrap(), "201");
    }

    #[test]
    fn test_erase() {
        let cache: ShardLruCache<u32, String> = ShardLruCache::new(1000);
        cache.erase(&100);

        cache.insert(100, "101".to_string(), 1);
        cache.insert(200, "201".to_string(), 1);
        cache.erase(&100);
        assert!(cache.look_up(&100).is_none());
        assert_eq!(cache.look_up(&200).unwrap(), "201");
        cache.erase(&100);
        assert_eq!(cache.look_up(&200).unwrap(), "201");
    }

    #[test]
    fn test_eviction_is_lru() {
        // A single-shard-sized cache: keys that hash to one shard
        // would be fiddly, so give every shard capacity 2 and fill one
        // key's shard by inserting the same key's neighbors... Instead
        // exercise global behavior: tiny capacity, many inserts.
        let cache: ShardLruCache<u32, u32> = ShardLruCache::new(16);
        for i in 0..1000 {
            cache.insert(i, i, 1);
            // The entry just inserted must be resident.
            assert_eq!(cache.look_up(&i).unwrap(), i);
        }
        // Early entries have been evicted somewhere along the way.
        let resident = (0..1000).filter(|i| cache.look_up(i).is_some()).count();
        assert!(resident < 1000);
    }

    #[test]
    fn test_heavy_entry_evicts_others() {
        let cache: ShardLruCache<u32, u32> = ShardLruCache::new(16);
        // Same shard or not, a charge larger than the whole capacity
        // still gets admitted and pushes everything else out of its
        // shard.
        cache.insert(1, 1, 1000);
        assert_eq!(cache.look_up(&1).unwrap(), 1);
    }

    #[test]
    fn test_new_id_is_unique() {
        let cache: Arc<ShardLruCache<u32, u32>> = Arc::new(ShardLruCache::new(16));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            handles.push(std::thread::spawn(move || {
                (0..100).map(|_| cache.new_id()).collect::<Vec<u64>>()
            }));
        }
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 400);
    }

    #[test]
    fn test_concurrent_use() {
        let cache: Arc<ShardLruCache<u32, u32>> = Arc::new(ShardLruCache::new(1 << 20));
        let mut handles = Vec::new();
        for t in 0..4u32 {
            let cache = cache.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..1000 {
                    cache.insert(t * 1000 + i, i, 1);
                    assert_eq!(cache.look_up(&(t * 1000 + i)).unwrap(), i);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
