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

//! Victim selection of the eviction pass.
//!
//! Selection is a pure function over a snapshot of `(last access, post count)` pairs. Applying it to the live thread
//! stores is up to the cache.

use serde::Serialize;

use crate::thread::ThreadState;

/// Why an eviction pass did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// Cached posts are within `max_cache_size`.
    WithinBudget,
    /// Too few populated threads, the working set is protected.
    WorkingSetProtected,
}

/// What happens to a victim thread once its posts were released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Reclaim {
    /// Keep the store in the map as a shell.
    Shell,
    /// Remove the store from the map.
    Drop,
}

impl Reclaim {
    /// Threads listed by a catalog always stay addressable. Others are dropped once they hold at most one post.
    pub fn decide(visible_in_catalog: bool, state: ThreadState) -> Self {
        match (visible_in_catalog, state) {
            (false, ThreadState::Shell | ThreadState::Absent) => Reclaim::Drop,
            _ => Reclaim::Shell,
        }
    }
}

/// Outcome of one eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    /// Set if the pass did nothing.
    pub skipped: Option<SkipReason>,
    /// Cached posts before the pass.
    pub total_before: usize,
    /// Cached posts after the pass.
    pub total_after: usize,
    /// Posts the pass aimed to release.
    pub amount_to_evict: usize,
    /// Threads whose posts were released.
    pub evicted_threads: usize,
    /// Posts released.
    pub evicted_posts: usize,
    /// Threads removed from the map.
    pub dropped_threads: usize,
}

impl EvictionReport {
    pub(crate) fn skipped(reason: SkipReason, total: usize) -> Self {
        Self {
            skipped: Some(reason),
            total_before: total,
            total_after: total,
            ..Default::default()
        }
    }
}

/// One thread as seen by the selection.
#[derive(Debug, Clone)]
pub(crate) struct Candidate<T> {
    pub(crate) item: T,
    pub(crate) last_access: u64,
    pub(crate) posts: usize,
}

#[derive(Debug)]
pub(crate) enum Selection<T> {
    Skip(SkipReason),
    Evict { amount: usize, victims: Vec<T> },
}

/// Select the least recently accessed threads whose posts add up to the amount to evict.
///
/// The `immune` most recently accessed threads are never selected.
pub(crate) fn select<T>(candidates: Vec<Candidate<T>>, max_cache_size: usize, immune: usize) -> Selection<T> {
    let total: usize = candidates.iter().map(|c| c.posts).sum();
    if total <= max_cache_size {
        return Selection::Skip(SkipReason::WithinBudget);
    }
    let populated = candidates.iter().filter(|c| c.posts > 1).count();
    if populated <= immune {
        return Selection::Skip(SkipReason::WorkingSetProtected);
    }

    let amount = (total - max_cache_size) + max_cache_size / 2;

    let mut candidates = candidates;
    candidates.sort_by_key(|c| c.last_access);
    let eligible = candidates.len().saturating_sub(immune);
    candidates.truncate(eligible);

    let mut accumulated = 0;
    let mut victims = vec![];
    for candidate in candidates {
        if accumulated >= amount {
            break;
        }
        accumulated += candidate.posts;
        victims.push(candidate.item);
    }

    Selection::Evict { amount, victims }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;

    fn candidates(layout: &[(u64, usize)]) -> Vec<Candidate<usize>> {
        layout.iter()
            .enumerate()
            .map(|(item, &(last_access, posts))| Candidate {
                item,
                last_access,
                posts,
            })
            .collect_vec()
    }

    #[test]
    fn test_within_budget() {
        let selection = select(candidates(&[(1, 50), (2, 50)]), 100, 0);
        assert!(matches!(selection, Selection::Skip(SkipReason::WithinBudget)));
    }

    #[test]
    fn test_working_set_protected() {
        let selection = select(candidates(&[(1, 500), (2, 500), (3, 1)]), 100, 2);
        assert!(matches!(selection, Selection::Skip(SkipReason::WorkingSetProtected)));
    }

    #[test]
    fn test_oldest_first_and_immune_excluded() {
        // 10 threads of 20 posts, item i accessed at 100 - i, so item 9 is the oldest.
        let layout = (0..10).map(|i| (100 - i as u64, 20)).collect_vec();
        let Selection::Evict { amount, victims } = select(candidates(&layout), 100, 8) else {
            panic!("expected eviction");
        };
        assert_eq!(amount, 150);
        assert_eq!(victims, vec![9, 8]);
    }

    #[test]
    fn test_stops_once_amount_reached() {
        let layout = (0..10).map(|i| (i as u64, 20)).collect_vec();
        let Selection::Evict { amount, victims } = select(candidates(&layout), 160, 0) else {
            panic!("expected eviction");
        };
        // (200 - 160) + 80
        assert_eq!(amount, 120);
        assert_eq!(victims, (0..6).collect_vec());
    }

    #[test]
    fn test_reclaim() {
        assert_eq!(Reclaim::decide(false, ThreadState::Shell), Reclaim::Drop);
        assert_eq!(Reclaim::decide(true, ThreadState::Shell), Reclaim::Shell);
        assert_eq!(
            Reclaim::decide(false, ThreadState::Populated { posts: 3 }),
            Reclaim::Shell
        );
    }
}
