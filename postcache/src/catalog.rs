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

//! Catalog snapshots: which threads each board's catalog currently lists.
//!
//! The thread cache only reads them. Threads visible in a snapshot keep an addressable shell when evicted.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;

use crate::descriptor::{CatalogDescriptor, ThreadDescriptor};

/// Read-only view of the catalog snapshots, consulted by eviction and catalog reads.
pub trait CatalogSnapshotSource: Send + Sync + 'static {
    /// Current snapshot of `catalog`, if any.
    fn snapshot(&self, catalog: &CatalogDescriptor) -> Option<Arc<CatalogSnapshot>>;

    /// Whether `thread` is listed by its board's catalog.
    fn is_visible(&self, thread: &ThreadDescriptor) -> bool {
        self.snapshot(&thread.catalog())
            .is_some_and(|snapshot| snapshot.contains(thread))
    }
}

/// Ordered thread list of one catalog.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    catalog: CatalogDescriptor,
    threads: Vec<ThreadDescriptor>,
    members: HashSet<ThreadDescriptor>,
    end_reached: bool,
}

impl CatalogSnapshot {
    /// Snapshot listing `threads` in catalog order. Duplicates keep their first position.
    pub fn new(catalog: CatalogDescriptor, threads: impl IntoIterator<Item = ThreadDescriptor>) -> Self {
        let mut snapshot = Self {
            catalog,
            threads: vec![],
            members: HashSet::new(),
            end_reached: true,
        };
        snapshot.extend(threads);
        snapshot
    }

    /// Mark whether more pages may follow.
    pub fn with_end_reached(mut self, end_reached: bool) -> Self {
        self.end_reached = end_reached;
        self
    }

    fn extend(&mut self, threads: impl IntoIterator<Item = ThreadDescriptor>) {
        for thread in threads {
            if thread.catalog() != self.catalog {
                tracing::warn!("[catalog]: {thread} is not part of {}, ignored", self.catalog);
                continue;
            }
            if self.members.insert(thread.clone()) {
                self.threads.push(thread);
            }
        }
    }

    /// Catalog this snapshot belongs to.
    pub fn catalog(&self) -> &CatalogDescriptor {
        &self.catalog
    }

    /// Threads in catalog order.
    pub fn threads(&self) -> &[ThreadDescriptor] {
        &self.threads
    }

    /// Whether `thread` is listed.
    pub fn contains(&self, thread: &ThreadDescriptor) -> bool {
        self.members.contains(thread)
    }

    /// Number of listed threads.
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// Whether no thread is listed.
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Whether the last page of a paginated catalog has been loaded.
    pub fn is_end_reached(&self) -> bool {
        self.end_reached
    }
}

/// In-process [`CatalogSnapshotSource`], one snapshot per catalog.
#[derive(Debug, Default)]
pub struct CatalogSnapshotCache {
    snapshots: RwLock<HashMap<CatalogDescriptor, Arc<CatalogSnapshot>>>,
}

impl CatalogSnapshotCache {
    /// Create an empty snapshot cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot of its catalog.
    pub fn store(&self, snapshot: CatalogSnapshot) {
        tracing::trace!("[catalog]: store {} with {} threads", snapshot.catalog, snapshot.len());
        self.snapshots
            .write()
            .insert(snapshot.catalog.clone(), Arc::new(snapshot));
    }

    /// Append the next page of a paginated catalog.
    pub fn append(
        &self,
        catalog: &CatalogDescriptor,
        threads: impl IntoIterator<Item = ThreadDescriptor>,
        end_reached: bool,
    ) {
        let mut snapshots = self.snapshots.write();
        let entry = snapshots
            .entry(catalog.clone())
            .or_insert_with(|| Arc::new(CatalogSnapshot::new(catalog.clone(), [])));
        let snapshot = Arc::make_mut(entry);
        snapshot.extend(threads);
        snapshot.end_reached = end_reached;
    }

    /// Snapshot of `catalog`, if any.
    pub fn get(&self, catalog: &CatalogDescriptor) -> Option<Arc<CatalogSnapshot>> {
        self.snapshots.read().get(catalog).cloned()
    }

    /// Forget the snapshot of `catalog`.
    pub fn remove(&self, catalog: &CatalogDescriptor) -> Option<Arc<CatalogSnapshot>> {
        self.snapshots.write().remove(catalog)
    }

    /// Forget all snapshots.
    pub fn clear(&self) {
        self.snapshots.write().clear();
    }
}

impl CatalogSnapshotSource for CatalogSnapshotCache {
    fn snapshot(&self, catalog: &CatalogDescriptor) -> Option<Arc<CatalogSnapshot>> {
        self.get(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::BoardDescriptor;

    #[test_log::test]
    fn test_snapshot_membership_and_order() {
        let board = BoardDescriptor::new("4chan", "g");
        let other = BoardDescriptor::new("4chan", "a");
        let snapshot = CatalogSnapshot::new(
            board.catalog(),
            [board.thread(3), board.thread(1), board.thread(3), other.thread(2)],
        );
        assert_eq!(snapshot.threads(), &[board.thread(3), board.thread(1)]);
        assert!(snapshot.contains(&board.thread(1)));
        assert!(!snapshot.contains(&other.thread(2)));
        assert_eq!(snapshot.len(), 2);
    }

    #[test_log::test]
    fn test_snapshot_cache() {
        let board = BoardDescriptor::new("4chan", "g");
        let cache = CatalogSnapshotCache::new();
        assert!(!cache.is_visible(&board.thread(1)));

        cache.store(CatalogSnapshot::new(board.catalog(), [board.thread(1)]).with_end_reached(false));
        assert!(cache.is_visible(&board.thread(1)));

        cache.append(&board.catalog(), [board.thread(2), board.thread(1)], true);
        let snapshot = cache.snapshot(&board.catalog()).unwrap();
        assert_eq!(snapshot.threads(), &[board.thread(1), board.thread(2)]);
        assert!(snapshot.is_end_reached());

        cache.remove(&board.catalog());
        assert!(!cache.is_visible(&board.thread(2)));

        cache.append(&board.catalog(), [board.thread(5)], false);
        assert!(cache.is_visible(&board.thread(5)));
        cache.clear();
        assert!(cache.get(&board.catalog()).is_none());
    }
}
