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

//! Per-thread post store.
//!
//! One [`ThreadStore`] holds the posts of one thread in server order together with an identity index, so lookups by
//! [`PostDescriptor`] are O(1) and in-place updates never move a post. Each store has its own read/write lock, stores
//! of different threads never contend. The last access time lives outside the lock so that reads never need to be
//! promoted to writes.

use std::{
    collections::BTreeSet,
    mem,
    ops::Range,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use parking_lot::{RwLock, RwLockWriteGuard};
use postcache_common::{
    assert::strict_by_default,
    clock::{duration_millis, Clock},
    strict_assert, strict_assert_eq,
};
use serde::{Deserialize, Serialize};

use crate::{
    descriptor::{PostDescriptor, ThreadDescriptor},
    error::{Error, Result, Violation},
    post::{order_key, Post, PostImage},
};

/// Thread level status flags, independent from post content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadStatus {
    /// Thread no longer accepts replies.
    pub closed: bool,
    /// Thread was moved to the archive.
    pub archived: bool,
    /// Thread was deleted on the server.
    pub deleted: bool,
    /// Thread is pinned.
    pub sticky: bool,
}

/// Partial status update, `None` fields are left unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    /// New deleted flag.
    pub deleted: Option<bool>,
    /// New archived flag.
    pub archived: Option<bool>,
    /// New closed flag.
    pub closed: Option<bool>,
}

/// Status transitions since they were last taken, for one-shot notifications in the UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusChanges {
    /// Thread became sticky or stopped being sticky.
    pub sticky: Option<bool>,
    /// Thread was closed or reopened.
    pub closed: Option<bool>,
    /// Thread was archived or unarchived.
    pub archived: Option<bool>,
    /// Thread was deleted or restored.
    pub deleted: Option<bool>,
    /// Number of posts newly marked as deleted.
    pub deleted_posts: usize,
}

impl StatusChanges {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// How much of a thread is held in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Not cached at all.
    Absent,
    /// Addressable, but holds at most the original post.
    Shell,
    /// Holds the original post and replies.
    Populated {
        /// Number of cached posts.
        posts: usize,
    },
}

impl ThreadState {
    fn of(posts: usize) -> Self {
        if posts <= 1 {
            ThreadState::Shell
        } else {
            ThreadState::Populated { posts }
        }
    }
}

/// Options of [`ThreadStore::upsert_many_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOptions {
    /// The input is the complete post list of the thread as the server sees it. Cached posts missing from it are
    /// marked as deleted.
    pub full_refresh: bool,
    /// Count the write as an access. Disabled for low-priority population.
    pub touch: bool,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self {
            full_refresh: false,
            touch: true,
        }
    }
}

/// Outcome of an upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertStats {
    /// Posts inserted.
    pub added: usize,
    /// Posts merged into an existing post.
    pub updated: usize,
    /// Posts newly marked deleted by a full refresh.
    pub marked_deleted: usize,
    /// Input posts that were skipped.
    pub skipped: Vec<Violation>,
}

/// Outcome of a delete.
#[derive(Debug, Clone, Default)]
pub struct Removed {
    /// Posts that were removed.
    pub posts: Vec<Arc<Post>>,
    /// Requested identities that were refused.
    pub skipped: Vec<Violation>,
}

#[derive(Debug, Default)]
struct ThreadInner {
    /// Posts in server order.
    posts: Vec<Arc<Post>>,
    /// Position of every post in `posts`.
    index: HashMap<PostDescriptor, usize>,
    /// Raw comment hashes supplied by the parse pipeline.
    post_hashes: HashMap<PostDescriptor, u64>,
    status: ThreadStatus,
    changes: StatusChanges,
    /// Set once the store has been dropped from the cache map. Writes are refused afterwards.
    retired: bool,
}

impl ThreadInner {
    fn original(&self) -> Option<&Arc<Post>> {
        self.posts.first().filter(|post| post.is_original())
    }

    fn reindex_from(&mut self, from: usize) {
        for (i, post) in self.posts.iter().enumerate().skip(from) {
            match self.index.get_mut(&post.descriptor) {
                Some(slot) => *slot = i,
                None => {
                    self.index.insert(post.descriptor.clone(), i);
                }
            }
        }
    }

    /// Insert a post that is not indexed yet at its server order position. Returns the position.
    fn insert_sorted(&mut self, post: Arc<Post>) -> usize {
        let key = order_key(&post);
        let pos = match self.posts.last() {
            Some(last) if order_key(last) > key => self.posts.partition_point(|p| order_key(p) < key),
            _ => self.posts.len(),
        };
        self.posts.insert(pos, post);
        self.reindex_from(pos);
        pos
    }

    fn remove_at(&mut self, pos: usize) -> Arc<Post> {
        let post = self.posts.remove(pos);
        self.index.remove(&post.descriptor);
        self.post_hashes.remove(&post.descriptor);
        self.reindex_from(pos);
        post
    }

    /// Replace the post at `pos` with a new version of the same identity. Its comment hash stays.
    fn replace_at(&mut self, pos: usize, post: Arc<Post>) {
        if order_key(&self.posts[pos]) == order_key(&post) {
            self.posts[pos] = post;
        } else {
            let old = self.posts.remove(pos);
            self.index.remove(&old.descriptor);
            self.reindex_from(pos);
            self.insert_sorted(post);
        }
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        self.index.reserve(self.posts.len());
        for (i, post) in self.posts.iter().enumerate() {
            self.index.insert(post.descriptor.clone(), i);
        }
    }

    /// Add backlinks from every post in `sources` to the posts it quotes.
    fn link_replies<'a>(&mut self, sources: impl IntoIterator<Item = &'a PostDescriptor>) {
        for source in sources {
            let Some(&pos) = self.index.get(source) else {
                continue;
            };
            let targets = self.posts[pos].replies_to.iter().cloned().collect_vec();
            for target in targets {
                if &target == source {
                    continue;
                }
                if let Some(&t) = self.index.get(&target) {
                    if !self.posts[t].replies_from.contains(source) {
                        Arc::make_mut(&mut self.posts[t]).replies_from.insert(source.clone());
                    }
                }
            }
        }
    }

    /// Add backlinks to `target` from already cached posts quoting it.
    fn link_quoters(&mut self, target: &PostDescriptor) {
        let Some(&pos) = self.index.get(target) else {
            return;
        };
        let quoters = self
            .posts
            .iter()
            .filter(|post| post.replies_to.contains(target) && &post.descriptor != target)
            .map(|post| post.descriptor.clone())
            .collect::<BTreeSet<_>>();
        if quoters.is_subset(&self.posts[pos].replies_from) {
            return;
        }
        Arc::make_mut(&mut self.posts[pos]).replies_from.extend(quoters);
    }

    fn unlink_replies(&mut self, removed: &[Arc<Post>]) {
        for post in removed {
            for target in &post.replies_to {
                if let Some(&t) = self.index.get(target) {
                    if self.posts[t].replies_from.contains(&post.descriptor) {
                        Arc::make_mut(&mut self.posts[t]).replies_from.remove(&post.descriptor);
                    }
                }
            }
        }
    }

    /// Follow the server reported status of a fresh original post.
    fn apply_original_status(&mut self, original: &Post) {
        let Some(meta) = &original.original else {
            return;
        };
        let status = ThreadStatus {
            closed: meta.closed,
            archived: meta.archived,
            deleted: self.status.deleted || original.deleted,
            sticky: meta.sticky,
        };
        self.set_status(status);
    }

    fn set_status(&mut self, status: ThreadStatus) {
        let old = self.status;
        if old.sticky != status.sticky {
            self.changes.sticky = Some(status.sticky);
        }
        if old.closed != status.closed {
            self.changes.closed = Some(status.closed);
        }
        if old.archived != status.archived {
            self.changes.archived = Some(status.archived);
        }
        if old.deleted != status.deleted {
            self.changes.deleted = Some(status.deleted);
        }
        self.status = status;
    }

    fn check_consistency(&self) {
        strict_assert_eq!(self.posts.len(), self.index.len());
        strict_assert!(self
            .posts
            .iter()
            .tuple_windows()
            .all(|(a, b)| order_key(a) < order_key(b)));
        strict_assert!(self
            .posts
            .iter()
            .enumerate()
            .all(|(i, post)| self.index.get(&post.descriptor) == Some(&i)));
        strict_assert!(self.posts.iter().skip(1).all(|post| !post.is_original()));
    }
}

/// Posts, status and access bookkeeping of one thread.
#[derive(Debug)]
pub struct ThreadStore {
    descriptor: ThreadDescriptor,
    strict: bool,
    clock: Arc<dyn Clock>,
    last_access: AtomicU64,
    last_update: AtomicU64,
    inner: RwLock<ThreadInner>,
}

impl ThreadStore {
    /// Create an empty store for `descriptor`, last accessed now.
    pub fn new(descriptor: ThreadDescriptor, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_millis();
        Self {
            descriptor,
            strict: strict_by_default(),
            clock,
            last_access: AtomicU64::new(now),
            last_update: AtomicU64::new(0),
            inner: RwLock::new(ThreadInner::default()),
        }
    }

    /// Panic on invariant violations instead of logging and skipping.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Seed the last access time.
    pub fn with_last_access(self, millis: u64) -> Self {
        self.last_access.store(millis, Ordering::Relaxed);
        self
    }

    /// Thread this store holds.
    pub fn descriptor(&self) -> &ThreadDescriptor {
        &self.descriptor
    }

    fn violation(&self, violation: Violation) -> Violation {
        tracing::error!("[thread store]: {} invariant violation: {violation}", self.descriptor);
        if self.strict {
            panic!("invariant violation in {}: {violation}", self.descriptor);
        }
        violation
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, ThreadInner>> {
        let inner = self.inner.write();
        if inner.retired {
            return Err(Error::ThreadRetired(self.descriptor.clone()));
        }
        Ok(inner)
    }

    /// Check that `post` may be stored as the original post of this thread.
    fn validate_original(&self, post: &Post) -> std::result::Result<(), Violation> {
        if post.thread() != &self.descriptor {
            return Err(Violation::ForeignPost {
                thread: self.descriptor.clone(),
                post: post.descriptor.clone(),
            });
        }
        if !post.is_original() {
            return Err(Violation::NotOriginalPost(post.descriptor.clone()));
        }
        let expected = self.descriptor.original_post();
        if post.descriptor != expected {
            return Err(Violation::OriginalPostMismatch {
                old: expected,
                new: post.descriptor.clone(),
            });
        }
        Ok(())
    }

    /// Check that `post` may be upserted into this thread.
    fn validate_any(&self, post: &Post) -> std::result::Result<(), Violation> {
        if post.is_original() {
            return self.validate_original(post);
        }
        if post.thread() != &self.descriptor {
            return Err(Violation::ForeignPost {
                thread: self.descriptor.clone(),
                post: post.descriptor.clone(),
            });
        }
        Ok(())
    }

    /// Atomically replace all posts of the thread.
    ///
    /// `posts` must be non-empty and start with the original post. On a violation nothing is changed.
    pub fn replace_all(&self, posts: Vec<Post>) -> Result<()> {
        let mut posts = posts;
        self.replace_from(&mut posts)
    }

    /// [`ThreadStore::replace_all`] that leaves `posts` untouched if the store is retired, so the caller can retry.
    pub(crate) fn replace_from(&self, posts: &mut Vec<Post>) -> Result<()> {
        match posts.first() {
            None => return Err(self.violation(Violation::EmptyReplacement(self.descriptor.clone())).into()),
            Some(first) => {
                if let Err(violation) = self.validate_original(first) {
                    return Err(self.violation(violation).into());
                }
            }
        }
        if let Some(violation) = posts.iter().find_map(|post| self.validate_any(post).err()) {
            return Err(self.violation(violation).into());
        }
        posts.sort_by(crate::post::server_order);

        let mut inner = self.write()?;
        // Later duplicates win, merged into the earlier version.
        let mut deduped: Vec<Post> = Vec::with_capacity(posts.len());
        for post in mem::take(posts) {
            match deduped.last_mut() {
                Some(last) if last.descriptor == post.descriptor => *last = last.merged(post, false),
                _ => deduped.push(post),
            }
        }
        inner.posts = deduped.into_iter().map(Arc::new).collect();
        inner.rebuild_index();
        let descriptors = inner.posts.iter().map(|p| p.descriptor.clone()).collect_vec();
        inner.link_replies(&descriptors);
        let ThreadInner { post_hashes, index, .. } = &mut *inner;
        post_hashes.retain(|descriptor, _| index.contains_key(descriptor));
        if let Some(original) = inner.original().cloned() {
            inner.apply_original_status(&original);
        }
        inner.check_consistency();
        drop(inner);

        self.touch();
        Ok(())
    }

    /// Insert or update posts by identity with default [`UpsertOptions`].
    pub fn upsert_many(&self, posts: Vec<Post>) -> Result<UpsertStats> {
        self.upsert_many_with(posts, UpsertOptions::default())
    }

    /// Insert or update posts by identity.
    ///
    /// Known posts are merged in place, unknown posts are inserted at their server order position. Replies are
    /// accepted before the original post has arrived. Offending posts are skipped, the rest is applied.
    pub fn upsert_many_with(&self, posts: Vec<Post>, options: UpsertOptions) -> Result<UpsertStats> {
        let mut posts = posts;
        self.upsert_from(&mut posts, options)
    }

    /// [`ThreadStore::upsert_many_with`] that leaves `posts` untouched if the store is retired.
    pub(crate) fn upsert_from(&self, posts: &mut Vec<Post>, options: UpsertOptions) -> Result<UpsertStats> {
        let mut stats = UpsertStats::default();
        if posts.is_empty() {
            return Ok(stats);
        }

        let mut inner = self.write()?;
        let posts = mem::take(posts);

        let missing = if options.full_refresh {
            let incoming = posts.iter().map(|p| &p.descriptor).collect::<HashSet<_>>();
            inner
                .posts
                .iter()
                .filter(|p| !incoming.contains(&p.descriptor))
                .map(|p| p.descriptor.clone())
                .collect_vec()
        } else {
            vec![]
        };

        let mut touched = Vec::with_capacity(posts.len());
        for post in posts {
            if let Err(violation) = self.validate_any(&post) {
                stats.skipped.push(self.violation(violation));
                continue;
            }
            let descriptor = post.descriptor.clone();
            match inner.index.get(&descriptor).copied() {
                Some(pos) => {
                    let merged = Arc::new(inner.posts[pos].merged(post, false));
                    if merged.is_original() {
                        inner.apply_original_status(&merged);
                    }
                    inner.replace_at(pos, merged);
                    stats.updated += 1;
                }
                None => {
                    let is_original = post.is_original();
                    if is_original {
                        inner.apply_original_status(&post);
                    }
                    let pos = inner.insert_sorted(Arc::new(post));
                    if pos + 1 < inner.posts.len() {
                        inner.link_quoters(&descriptor);
                    }
                    stats.added += 1;
                }
            }
            touched.push(descriptor);
        }

        for descriptor in missing {
            let Some(&pos) = inner.index.get(&descriptor) else {
                continue;
            };
            if inner.posts[pos].deleted {
                continue;
            }
            Arc::make_mut(&mut inner.posts[pos]).deleted = true;
            stats.marked_deleted += 1;
        }
        inner.changes.deleted_posts += stats.marked_deleted;

        inner.link_replies(&touched);
        inner.check_consistency();
        drop(inner);

        tracing::trace!(
            "[thread store]: {} added {} posts, updated {} posts, marked {} posts as deleted",
            self.descriptor,
            stats.added,
            stats.updated,
            stats.marked_deleted
        );

        if options.touch {
            self.touch();
        }
        Ok(stats)
    }

    /// Set the original post, or merge it into the one already stored.
    pub fn set_or_update_original_post(&self, post: Post) -> Result<()> {
        self.set_original_from(&mut Some(post))
    }

    /// [`ThreadStore::set_or_update_original_post`] that leaves `post` untouched if the store is retired.
    pub(crate) fn set_original_from(&self, post: &mut Option<Post>) -> Result<()> {
        let Some(candidate) = post.as_ref() else {
            return Ok(());
        };
        if let Err(violation) = self.validate_original(candidate) {
            return Err(self.violation(violation).into());
        }

        let mut inner = self.write()?;
        let Some(post) = post.take() else {
            return Ok(());
        };
        match inner.original().cloned() {
            Some(old) => {
                if old.descriptor != post.descriptor {
                    let violation = Violation::OriginalPostMismatch {
                        old: old.descriptor.clone(),
                        new: post.descriptor.clone(),
                    };
                    return Err(self.violation(violation).into());
                }
                let merged = Arc::new(old.merged(post, false));
                inner.apply_original_status(&merged);
                inner.posts[0] = merged;
            }
            None => {
                inner.apply_original_status(&post);
                let descriptor = post.descriptor.clone();
                match inner.index.get(&descriptor).copied() {
                    // A provisional reply with the original post identity.
                    Some(pos) => {
                        let merged = Arc::new(inner.posts[pos].merged(post, false));
                        inner.replace_at(pos, merged);
                    }
                    None => {
                        inner.insert_sorted(Arc::new(post));
                    }
                }
                inner.link_quoters(&descriptor);
            }
        }
        inner.check_consistency();
        drop(inner);

        self.touch();
        Ok(())
    }

    /// Post by identity.
    pub fn get(&self, descriptor: &PostDescriptor) -> Option<Arc<Post>> {
        let post = {
            let inner = self.inner.read();
            inner.index.get(descriptor).map(|&pos| inner.posts[pos].clone())
        };
        self.touch();
        post
    }

    /// The original post, or [`Error::ThreadNotReady`] if it has not arrived yet.
    pub fn get_original_post(&self) -> Result<Arc<Post>> {
        let post = self.peek_original_post();
        self.touch();
        post.ok_or_else(|| Error::ThreadNotReady(self.descriptor.clone()))
    }

    /// The original post without counting as an access.
    pub fn peek_original_post(&self) -> Option<Arc<Post>> {
        self.inner.read().original().cloned()
    }

    /// All posts in server order.
    pub fn posts(&self) -> Vec<Arc<Post>> {
        let posts = self.inner.read().posts.clone();
        self.touch();
        posts
    }

    /// Posts with the given identities that are cached, in the order asked for.
    pub fn posts_by(&self, descriptors: &[PostDescriptor]) -> Vec<Arc<Post>> {
        let posts = {
            let inner = self.inner.read();
            descriptors
                .iter()
                .filter_map(|descriptor| inner.index.get(descriptor).map(|&pos| inner.posts[pos].clone()))
                .collect_vec()
        };
        self.touch();
        posts
    }

    /// Identities of all posts in server order.
    pub fn post_descriptors(&self) -> Vec<PostDescriptor> {
        self.inner.read().posts.iter().map(|p| p.descriptor.clone()).collect()
    }

    /// Post numbers of all posts.
    pub fn post_no_set(&self) -> BTreeSet<u64> {
        self.inner.read().posts.iter().map(|p| p.descriptor.post_no).collect()
    }

    /// The last post in server order.
    pub fn last_post(&self) -> Option<Arc<Post>> {
        self.inner.read().posts.last().cloned()
    }

    /// Number of cached posts, the original post included.
    pub fn posts_count(&self) -> usize {
        self.inner.read().posts.len()
    }

    /// Number of cached replies.
    pub fn replies_count(&self) -> usize {
        self.posts_count().saturating_sub(1)
    }

    /// Number of attached media files over all posts.
    pub fn images_count(&self) -> usize {
        self.inner.read().posts.iter().map(|p| p.images.len()).sum()
    }

    /// Number of posts numbered above `post_no`.
    pub fn new_posts_count(&self, post_no: u64) -> usize {
        self.inner
            .read()
            .posts
            .iter()
            .filter(|p| p.descriptor.post_no > post_no)
            .count()
    }

    /// `descriptor` followed by every post quoting it, directly or through other quoting posts.
    ///
    /// Each post is listed once, in discovery order. Empty if `descriptor` is not cached.
    pub fn find_post_with_replies_recursive(&self, descriptor: &PostDescriptor) -> Vec<Arc<Post>> {
        let inner = self.inner.read();
        let Some(&pos) = inner.index.get(descriptor) else {
            return vec![];
        };
        let mut seen = HashSet::new();
        seen.insert(descriptor.clone());
        let mut found = vec![inner.posts[pos].clone()];
        let mut next = 0;
        while let Some(post) = found.get(next).cloned() {
            next += 1;
            for quoter in &post.replies_from {
                let Some(&pos) = inner.index.get(quoter) else {
                    continue;
                };
                if seen.insert(quoter.clone()) {
                    found.push(inner.posts[pos].clone());
                }
            }
        }
        found
    }

    /// `descriptor` followed by the posts quoting it directly. Empty if `descriptor` is not cached.
    pub fn post_with_replies_to(&self, descriptor: &PostDescriptor) -> Vec<PostDescriptor> {
        let inner = self.inner.read();
        let Some(&pos) = inner.index.get(descriptor) else {
            return vec![];
        };
        std::iter::once(descriptor.clone())
            .chain(inner.posts[pos].replies_from.iter().cloned())
            .collect()
    }

    /// The post `offset` positions away from `descriptor` in server order.
    ///
    /// Offsets running past the start stop at the first post. Offsets running past the end find nothing.
    pub fn post_descriptor_relative_to(&self, descriptor: &PostDescriptor, offset: isize) -> Option<PostDescriptor> {
        let inner = self.inner.read();
        let pos = *inner.index.get(descriptor)?;
        let target = pos.saturating_add_signed(offset).min(inner.posts.len());
        inner.posts.get(target).map(|post| post.descriptor.clone())
    }

    /// Posts with media around `descriptor`: the post itself if it has media, then up to `left` earlier posts walking
    /// backwards, then up to `right` later posts walking forwards.
    pub fn posts_with_images_around(
        &self,
        descriptor: &PostDescriptor,
        left: usize,
        right: usize,
    ) -> Vec<PostDescriptor> {
        if left == 0 && right == 0 {
            return vec![];
        }
        let inner = self.inner.read();
        let Some(&pos) = inner.index.get(descriptor) else {
            return vec![];
        };
        let with_images = |post: &&Arc<Post>| !post.images.is_empty();
        let current = std::iter::once(&inner.posts[pos]).filter(with_images);
        let before = inner.posts[..pos].iter().rev().filter(with_images).take(left);
        let after = inner.posts[pos + 1..].iter().filter(with_images).take(right);
        current
            .chain(before)
            .chain(after)
            .map(|post| post.descriptor.clone())
            .collect()
    }

    /// Media of all posts in server order.
    pub fn thread_post_images(&self) -> Vec<PostImage> {
        self.inner
            .read()
            .posts
            .iter()
            .flat_map(|post| post.images.iter().cloned())
            .collect()
    }

    /// Whether the post has media. `false` if it is not cached.
    pub fn post_has_images(&self, descriptor: &PostDescriptor) -> bool {
        let inner = self.inner.read();
        inner
            .index
            .get(descriptor)
            .is_some_and(|&pos| !inner.posts[pos].images.is_empty())
    }

    /// Posts at the given positions in server order.
    ///
    /// Positions past the end are ignored, a post covered by several ranges is returned once.
    pub fn slice_posts(&self, ranges: &[Range<usize>]) -> Vec<Arc<Post>> {
        let inner = self.inner.read();
        let mut seen = HashSet::new();
        ranges
            .iter()
            .flat_map(|range| range.clone())
            .filter_map(|pos| inner.posts.get(pos))
            .filter(|post| seen.insert(post.descriptor.clone()))
            .cloned()
            .collect()
    }

    /// Whether any post is cached.
    pub fn has_at_least_one_post(&self) -> bool {
        !self.inner.read().posts.is_empty()
    }

    /// [`ThreadState::Shell`] or [`ThreadState::Populated`].
    pub fn state(&self) -> ThreadState {
        ThreadState::of(self.posts_count())
    }

    /// Remove posts by identity.
    ///
    /// The original post is refused, it only goes away together with the whole thread.
    pub fn delete(&self, descriptors: &[PostDescriptor]) -> Result<Removed> {
        let mut removed = Removed::default();
        let mut inner = self.write()?;
        for descriptor in descriptors {
            if descriptor.is_original() && descriptor.thread == self.descriptor {
                removed
                    .skipped
                    .push(self.violation(Violation::DeleteOriginalPost(descriptor.clone())));
                continue;
            }
            if let Some(pos) = inner.index.get(descriptor).copied() {
                let post = inner.remove_at(pos);
                removed.posts.push(post);
            }
        }
        inner.unlink_replies(&removed.posts);
        inner.check_consistency();
        Ok(removed)
    }

    /// Current status flags.
    pub fn status(&self) -> ThreadStatus {
        self.inner.read().status
    }

    /// Apply a partial status update.
    pub fn update_status(&self, update: StatusUpdate) -> Result<()> {
        let mut inner = self.write()?;
        let mut status = inner.status;
        if let Some(deleted) = update.deleted {
            status.deleted = deleted;
        }
        if let Some(archived) = update.archived {
            status.archived = archived;
        }
        if let Some(closed) = update.closed {
            status.closed = closed;
        }
        inner.set_status(status);
        Ok(())
    }

    /// Take and reset the recorded status transitions.
    pub fn take_status_changes(&self) -> StatusChanges {
        mem::take(&mut self.inner.write().changes)
    }

    /// Whether fetching new posts for the thread makes sense.
    pub fn can_update(&self) -> bool {
        let status = self.status();
        !status.closed && !status.archived && !status.deleted
    }

    /// Trim a rolling thread down to `cap` posts, dropping the oldest replies first.
    ///
    /// The original post is never removed. Returns the identities removed.
    pub fn cleanup_rolling_cap(&self, cap: usize) -> Vec<PostDescriptor> {
        self.trim_to(cap).iter().map(|p| p.descriptor.clone()).collect()
    }

    pub(crate) fn trim_to(&self, cap: usize) -> Vec<Arc<Post>> {
        let Ok(mut inner) = self.write() else {
            return vec![];
        };
        let cap = if inner.original().is_some() { cap.max(1) } else { cap };
        if inner.posts.len() <= cap {
            return vec![];
        }
        let start = usize::from(inner.original().is_some());
        let count = inner.posts.len() - cap;
        let removed = inner.posts.drain(start..start + count).collect_vec();
        for post in &removed {
            inner.index.remove(&post.descriptor);
            inner.post_hashes.remove(&post.descriptor);
        }
        inner.reindex_from(start);
        inner.unlink_replies(&removed);
        inner.check_consistency();
        removed
    }

    /// Release everything but the original post. Returns the released posts.
    ///
    /// Idempotent. A write racing with it is either fully before or fully after.
    pub fn cleanup(&self) -> Vec<Arc<Post>> {
        let mut inner = self.inner.write();
        let keep = usize::from(inner.original().is_some());
        if inner.posts.len() <= keep {
            return vec![];
        }
        let removed = inner.posts.split_off(keep);
        let ThreadInner {
            index, post_hashes, posts, ..
        } = &mut *inner;
        index.retain(|descriptor, _| posts.first().is_some_and(|p| &p.descriptor == descriptor) && keep == 1);
        post_hashes.retain(|descriptor, _| index.contains_key(descriptor));
        if let Some(original) = inner.posts.first() {
            if !original.replies_from.is_empty() {
                Arc::make_mut(&mut inner.posts[0]).replies_from.clear();
            }
        }
        inner.check_consistency();
        removed
    }

    /// Mark the store as removed from the cache if it holds at most one post.
    pub(crate) fn retire_if_shell(&self) -> bool {
        let mut inner = self.inner.write();
        if inner.posts.len() > 1 {
            return false;
        }
        inner.retired = true;
        true
    }

    /// Mark the store as removed from the cache if it holds no post at all.
    pub(crate) fn retire_if_empty(&self) -> bool {
        let mut inner = self.inner.write();
        if !inner.posts.is_empty() {
            return false;
        }
        inner.retired = true;
        true
    }

    /// Mark the store as removed from the cache and hand out its posts.
    pub(crate) fn retire(&self) -> Vec<Arc<Post>> {
        let mut inner = self.inner.write();
        inner.retired = true;
        inner.index.clear();
        inner.post_hashes.clear();
        mem::take(&mut inner.posts)
    }

    /// Remember the raw comment hash of a post.
    pub fn put_post_hash(&self, descriptor: PostDescriptor, hash: u64) {
        if let Ok(mut inner) = self.write() {
            inner.post_hashes.insert(descriptor, hash);
        }
    }

    /// Raw comment hash of a post, if remembered.
    pub fn post_hash(&self, descriptor: &PostDescriptor) -> Option<u64> {
        self.inner.read().post_hashes.get(descriptor).copied()
    }

    /// Last access time in milliseconds.
    pub fn last_access_time(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Bump the last access time to now. Never moves it backwards.
    pub fn touch(&self) {
        self.last_access.fetch_max(self.clock.now_millis(), Ordering::Relaxed);
    }

    /// Last time fresh server data was stored, `0` if never.
    pub fn last_update_time(&self) -> u64 {
        self.last_update.load(Ordering::Relaxed)
    }

    /// Record that fresh server data was stored now.
    pub fn mark_updated(&self) {
        self.last_update.store(self.clock.now_millis(), Ordering::Relaxed);
    }

    /// Whether the last update is older than `min_interval`.
    pub fn needs_update(&self, min_interval: Duration) -> bool {
        let last = self.last_update_time();
        last == 0 || self.clock.now_millis().saturating_sub(last) >= duration_millis(min_interval)
    }
}
