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

//! Post values as produced by the parse pipeline.

use std::{cmp::Ordering, collections::BTreeSet};

use serde::{Deserialize, Serialize};

use crate::descriptor::{PostDescriptor, ThreadDescriptor};

/// An attached media file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostImage {
    /// File name as stored on the server, unique within a post.
    pub server_filename: String,
    /// Full size url.
    pub url: String,
    /// Thumbnail url.
    pub thumbnail_url: Option<String>,
    /// File extension without the dot.
    pub extension: Option<String>,
    /// File size in bytes, `0` if unknown.
    pub size: u64,
    /// Whether the file is hidden behind a spoiler.
    pub spoiler: bool,
}

/// Who wrote a post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostAuthor {
    /// Display name.
    pub name: String,
    /// Tripcode, if any.
    pub tripcode: Option<String>,
    /// Per-thread poster id, if the board shows them.
    pub poster_id: Option<String>,
    /// Moderator capcode, if any.
    pub capcode: Option<String>,
}

/// Data only original posts carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OriginalPostMeta {
    /// Thread is pinned to the top of the catalog.
    pub sticky: bool,
    /// Thread no longer accepts replies.
    pub closed: bool,
    /// Thread was moved to the archive.
    pub archived: bool,
    /// For rolling sticky threads, the number of posts the server keeps.
    pub rolling_cap: Option<usize>,
    /// Replies count as reported by the catalog.
    pub catalog_replies_count: u32,
    /// Images count as reported by the catalog.
    pub catalog_images_count: u32,
    /// Distinct posters as reported by the server.
    pub unique_ips: u32,
    /// Last modification time reported by the server (unix seconds).
    pub last_modified: i64,
}

impl OriginalPostMeta {
    fn merge(old: &OriginalPostMeta, new: OriginalPostMeta) -> OriginalPostMeta {
        OriginalPostMeta {
            sticky: new.sticky,
            closed: new.closed,
            archived: new.archived,
            rolling_cap: new.rolling_cap,
            catalog_replies_count: old.catalog_replies_count.max(new.catalog_replies_count),
            catalog_images_count: old.catalog_images_count.max(new.catalog_images_count),
            unique_ips: old.unique_ips.max(new.unique_ips),
            last_modified: old.last_modified.max(new.last_modified),
        }
    }
}

/// A parsed post.
///
/// A post is an original post iff [`Post::original`] is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Identity.
    pub descriptor: PostDescriptor,
    /// Creation time (unix seconds).
    pub timestamp: i64,
    /// Author metadata.
    pub author: PostAuthor,
    /// Subject line.
    pub subject: Option<String>,
    /// Parsed and styled comment.
    pub comment: String,
    /// Hash of the raw comment as received from the server.
    pub comment_hash: u64,
    /// Attached media.
    pub images: Vec<PostImage>,
    /// Posts this post quotes.
    pub replies_to: BTreeSet<PostDescriptor>,
    /// Posts quoting this post, maintained by the thread store.
    pub replies_from: BTreeSet<PostDescriptor>,
    /// Deleted on the server.
    pub deleted: bool,
    /// Original post data.
    pub original: Option<OriginalPostMeta>,
}

impl Post {
    /// A reply with the given comment.
    pub fn reply(descriptor: PostDescriptor, comment: impl Into<String>) -> Self {
        Self {
            descriptor,
            timestamp: 0,
            author: PostAuthor::default(),
            subject: None,
            comment: comment.into(),
            comment_hash: 0,
            images: vec![],
            replies_to: BTreeSet::new(),
            replies_from: BTreeSet::new(),
            deleted: false,
            original: None,
        }
    }

    /// The original post of `thread` with the given comment.
    pub fn original(thread: &ThreadDescriptor, comment: impl Into<String>) -> Self {
        Self {
            original: Some(OriginalPostMeta::default()),
            ..Self::reply(thread.original_post(), comment)
        }
    }

    /// Set the creation time.
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the raw comment hash.
    pub fn with_comment_hash(mut self, comment_hash: u64) -> Self {
        self.comment_hash = comment_hash;
        self
    }

    /// Attach an image.
    pub fn with_image(mut self, image: PostImage) -> Self {
        self.images.push(image);
        self
    }

    /// Add a quote link.
    pub fn with_reply_to(mut self, target: PostDescriptor) -> Self {
        self.replies_to.insert(target);
        self
    }

    /// Set the original post data. Turns the post into an original post.
    pub fn with_original_meta(mut self, meta: OriginalPostMeta) -> Self {
        self.original = Some(meta);
        self
    }

    /// Whether this is the original post of its thread.
    pub fn is_original(&self) -> bool {
        self.original.is_some()
    }

    /// Thread the post belongs to.
    pub fn thread(&self) -> &ThreadDescriptor {
        &self.descriptor.thread
    }

    /// Merge a fresher version of the same post into this one.
    ///
    /// Fields of `new` win, except that deletion is sticky, backlinks and images only known to the old version are
    /// kept, and monotonic original post counters never go backwards.
    pub(crate) fn merged(&self, new: Post, mark_deleted: bool) -> Post {
        debug_assert_eq!(self.descriptor, new.descriptor);

        let (comment, comment_hash) = if self.comment_hash == new.comment_hash && new.comment_hash != 0 {
            (self.comment.clone(), self.comment_hash)
        } else {
            (new.comment, new.comment_hash)
        };

        let mut images = new.images;
        for image in &self.images {
            if !images.iter().any(|i| i.server_filename == image.server_filename) {
                images.push(image.clone());
            }
        }

        let mut replies_from = self.replies_from.clone();
        replies_from.extend(new.replies_from);

        let original = match (&self.original, new.original) {
            (Some(old), Some(new)) => Some(OriginalPostMeta::merge(old, new)),
            (None, Some(new)) => Some(new),
            (Some(old), None) => Some(old.clone()),
            (None, None) => None,
        };
        let timestamp = if original.is_some() {
            self.timestamp.max(new.timestamp)
        } else {
            new.timestamp
        };

        Post {
            descriptor: self.descriptor.clone(),
            timestamp,
            author: new.author,
            subject: new.subject,
            comment,
            comment_hash,
            images,
            replies_to: new.replies_to,
            replies_from,
            deleted: self.deleted || new.deleted || mark_deleted,
            original,
        }
    }
}

/// Server display order: the original post first, then by post number and sub number.
///
/// The original post goes first even if some site numbers it higher than its replies.
pub fn server_order(a: &Post, b: &Post) -> Ordering {
    order_key(a).cmp(&order_key(b))
}

pub(crate) fn order_key(post: &Post) -> (bool, u64, u64) {
    (!post.is_original(), post.descriptor.post_no, post.descriptor.post_sub_no)
}
