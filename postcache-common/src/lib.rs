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

//! Shared components for postcache.
//!
//! Nothing in this crate knows about posts or threads. It provides the pieces the thread cache is assembled from:
//! assertion helpers, a pluggable wall clock, the eviction interval gate, event kinds and counters.

/// Assertion macros that can be hardened with the `strict_assertions` feature.
pub mod assert;
/// Wall clock abstraction.
pub mod clock;
/// Cache event kinds and the listener trait.
pub mod event;
/// Lock-free cache counters.
pub mod metrics;
/// Interval gate that bounds how often a periodic routine may run.
pub mod rate;
