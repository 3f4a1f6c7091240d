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

//! In-memory cache of imageboard threads and posts.
//!
//! [`ThreadCache`] maps thread descriptors to per-thread stores. Each [`ThreadStore`] keeps its posts in server
//! order, original post first, and is guarded by its own lock. Once the global post budget is exceeded, the least
//! recently accessed threads are evicted: their replies are released, and threads that no catalog lists anymore are
//! forgotten entirely.
//!
//! ```
//! use std::sync::Arc;
//!
//! use postcache::prelude::*;
//!
//! let catalogs = Arc::new(CatalogSnapshotCache::new());
//! let cache = ThreadCacheBuilder::new(catalogs.clone())
//!     .with_max_cache_size(10_000)
//!     .build()
//!     .unwrap();
//!
//! let thread = BoardDescriptor::new("4chan", "g").thread(1);
//! cache
//!     .put_thread_posts(
//!         &thread,
//!         vec![Post::original(&thread, "hello"), Post::reply(thread.post(2), "hi")],
//!         PutOptions::default(),
//!     )
//!     .unwrap();
//!
//! assert_eq!(cache.get_thread_posts_count(&thread), 2);
//! assert!(cache.get_original_post(&thread).is_some());
//! ```

mod cache;
mod catalog;
mod config;
mod descriptor;
mod error;
mod eviction;
mod map;
mod post;
mod thread;

/// Commonly used types.
pub mod prelude;

pub use prelude::*;
