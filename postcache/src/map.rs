// Copyright 2026 postcache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    hash::{BuildHasher, Hash},
    sync::Arc,
};

use hashbrown::{hash_map::Entry, DefaultHashBuilder, HashMap};
use parking_lot::RwLock;

/// Map from key to shared value, split into independently locked shards.
///
/// Lookups only take a shard read lock for as long as it takes to clone an [`Arc`]. Get-or-create is atomic per key.
pub(crate) struct ShardedMap<K, V> {
    shards: Vec<RwLock<HashMap<K, Arc<V>>>>,
    hash_builder: DefaultHashBuilder,
}

impl<K, V> ShardedMap<K, V>
where
    K: Hash + Eq + Clone,
{
    pub(crate) fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1)).map(|_| RwLock::new(HashMap::new())).collect();
        Self {
            shards,
            hash_builder: DefaultHashBuilder::default(),
        }
    }

    fn shard(&self, key: &K) -> &RwLock<HashMap<K, Arc<V>>> {
        let hash = self.hash_builder.hash_one(key);
        &self.shards[hash as usize % self.shards.len()]
    }

    pub(crate) fn get(&self, key: &K) -> Option<Arc<V>> {
        self.shard(key).read().get(key).cloned()
    }

    /// Return the value of `key`, creating it with `f` if absent. The bool is `true` if it was created.
    pub(crate) fn get_or_insert_with(&self, key: &K, f: impl FnOnce() -> V) -> (Arc<V>, bool) {
        let shard = self.shard(key);
        if let Some(value) = shard.read().get(key) {
            return (value.clone(), false);
        }
        match shard.write().entry(key.clone()) {
            Entry::Occupied(o) => (o.get().clone(), false),
            Entry::Vacant(v) => (v.insert(Arc::new(f())).clone(), true),
        }
    }

    pub(crate) fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.shard(key).write().remove(key)
    }

    /// Remove `key` if it still maps to `value` and `predicate` holds. The predicate runs under the shard lock.
    pub(crate) fn remove_if(&self, key: &K, value: &Arc<V>, predicate: impl FnOnce(&V) -> bool) -> bool {
        let mut shard = self.shard(key).write();
        match shard.get(key) {
            Some(current) if Arc::ptr_eq(current, value) && predicate(current) => {
                shard.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Point-in-time copy of all entries. Shards are visited one by one.
    pub(crate) fn snapshot(&self) -> Vec<(K, Arc<V>)> {
        let mut entries = Vec::with_capacity(self.len());
        for shard in &self.shards {
            entries.extend(shard.read().iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        entries
    }

    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// Remove all entries as one step. All shards are locked in index order before any is cleared.
    pub(crate) fn drain(&self) -> Vec<(K, Arc<V>)> {
        let mut guards = self.shards.iter().map(|shard| shard.write()).collect::<Vec<_>>();
        let mut entries = Vec::with_capacity(guards.iter().map(|guard| guard.len()).sum());
        for guard in guards.iter_mut() {
            entries.extend(guard.drain());
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_get_or_insert_is_atomic() {
        let map = Arc::new(ShardedMap::<u64, u64>::new(4));
        let created = Arc::new(AtomicUsize::new(0));
        let handles = (0..8)
            .map(|_| {
                let map = map.clone();
                let created = created.clone();
                std::thread::spawn(move || {
                    for key in 0..100 {
                        let (_, new) = map.get_or_insert_with(&key, || key * 2);
                        if new {
                            created.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(created.load(Ordering::Relaxed), 100);
        assert_eq!(map.len(), 100);
        assert_eq!(*map.get(&21).unwrap(), 42);
    }

    #[test]
    fn test_remove_if_checks_identity() {
        let map = ShardedMap::<u64, u64>::new(2);
        let (old, _) = map.get_or_insert_with(&1, || 1);
        map.remove(&1);
        let (new, _) = map.get_or_insert_with(&1, || 2);
        assert!(!map.remove_if(&1, &old, |_| true));
        assert!(!map.remove_if(&1, &new, |v| *v == 1));
        assert!(map.remove_if(&1, &new, |v| *v == 2));
        assert!(map.get(&1).is_none());
    }

    #[test]
    fn test_drain() {
        let map = ShardedMap::<u64, u64>::new(3);
        for key in 0..10 {
            map.get_or_insert_with(&key, || key);
        }
        assert_eq!(map.snapshot().len(), 10);
        let mut drained = map.drain().into_iter().map(|(k, _)| k).collect::<Vec<_>>();
        drained.sort();
        assert_eq!(drained, (0..10).collect::<Vec<_>>());
        assert_eq!(map.len(), 0);
    }
}
