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

#[cfg(feature = "test_utils")]
pub use postcache_common::clock::ManualClock;
pub use postcache_common::{
    clock::{Clock, SystemClock},
    event::{Event, EventListener},
    metrics::{Metrics, MetricsSnapshot},
};

pub use crate::{
    cache::{Priority, PutOptions, ThreadCache, ThreadCacheBuilder, ThreadEventListener},
    catalog::{CatalogSnapshot, CatalogSnapshotCache, CatalogSnapshotSource},
    config::ThreadCacheConfig,
    descriptor::{BoardDescriptor, CatalogDescriptor, ChanDescriptor, PostDescriptor, ThreadDescriptor},
    error::{Error, MultipleError, Result, Violation},
    eviction::{EvictionReport, Reclaim, SkipReason},
    post::{server_order, OriginalPostMeta, Post, PostAuthor, PostImage},
    thread::{
        Removed, StatusChanges, StatusUpdate, ThreadState, ThreadStatus, ThreadStore, UpsertOptions, UpsertStats,
    },
};
