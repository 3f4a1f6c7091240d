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

//! Identities of boards, catalogs, threads and posts.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// A board of a site, e.g. `/g/` of `4chan`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BoardDescriptor {
    /// Name of the site the board belongs to.
    pub site_name: String,
    /// Board code without slashes.
    pub board_code: String,
}

impl BoardDescriptor {
    /// Create a board descriptor.
    pub fn new(site_name: impl Into<String>, board_code: impl Into<String>) -> Self {
        Self {
            site_name: site_name.into(),
            board_code: board_code.into(),
        }
    }

    /// Descriptor of thread `thread_no` on this board.
    pub fn thread(&self, thread_no: u64) -> ThreadDescriptor {
        ThreadDescriptor::new(self.clone(), thread_no)
    }

    /// Descriptor of the catalog of this board.
    pub fn catalog(&self) -> CatalogDescriptor {
        CatalogDescriptor { board: self.clone() }
    }
}

impl Display for BoardDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.site_name, self.board_code)
    }
}

/// The catalog (thread listing) of one board.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CatalogDescriptor {
    /// Board the catalog lists.
    pub board: BoardDescriptor,
}

impl Display for CatalogDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CD{{{}}}", self.board)
    }
}

/// A thread of a board.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadDescriptor {
    /// Board the thread lives on.
    pub board: BoardDescriptor,
    /// Thread number, equal to the post number of its original post.
    pub thread_no: u64,
}

impl ThreadDescriptor {
    /// Create a thread descriptor.
    ///
    /// Servers never hand out `0`, lookups by number treat it as a miss.
    pub fn new(board: BoardDescriptor, thread_no: u64) -> Self {
        Self { board, thread_no }
    }

    /// Descriptor of post `post_no` in this thread.
    pub fn post(&self, post_no: u64) -> PostDescriptor {
        PostDescriptor::new(self.clone(), post_no, 0)
    }

    /// Descriptor of the original post of this thread.
    pub fn original_post(&self) -> PostDescriptor {
        self.post(self.thread_no)
    }

    /// Descriptor of the catalog this thread is listed in.
    pub fn catalog(&self) -> CatalogDescriptor {
        self.board.catalog()
    }
}

impl Display for ThreadDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "TD{{{}/{}}}", self.board, self.thread_no)
    }
}

/// Identity of a post.
///
/// `post_sub_no` is non-zero only for sites that insert posts between already numbered ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PostDescriptor {
    /// Thread the post belongs to.
    pub thread: ThreadDescriptor,
    /// Post number.
    pub post_no: u64,
    /// Sub number for non-monotonic insertions, `0` otherwise.
    pub post_sub_no: u64,
}

impl PostDescriptor {
    /// Create a post descriptor.
    pub fn new(thread: ThreadDescriptor, post_no: u64, post_sub_no: u64) -> Self {
        Self {
            thread,
            post_no,
            post_sub_no,
        }
    }

    /// Whether this descriptor addresses the original post of its thread.
    pub fn is_original(&self) -> bool {
        self.post_no == self.thread.thread_no && self.post_sub_no == 0
    }
}

impl Display for PostDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.post_sub_no == 0 {
            write!(f, "PD{{{}/{}/{}}}", self.thread.board, self.thread.thread_no, self.post_no)
        } else {
            write!(
                f,
                "PD{{{}/{}/{},{}}}",
                self.thread.board, self.thread.thread_no, self.post_no, self.post_sub_no
            )
        }
    }
}

/// Either a thread or a catalog, the two things a reader can look at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChanDescriptor {
    /// A single thread.
    Thread(ThreadDescriptor),
    /// A board catalog.
    Catalog(CatalogDescriptor),
}

impl ChanDescriptor {
    /// Board of the descriptor.
    pub fn board(&self) -> &BoardDescriptor {
        match self {
            ChanDescriptor::Thread(thread) => &thread.board,
            ChanDescriptor::Catalog(catalog) => &catalog.board,
        }
    }
}

impl From<ThreadDescriptor> for ChanDescriptor {
    fn from(thread: ThreadDescriptor) -> Self {
        Self::Thread(thread)
    }
}

impl From<CatalogDescriptor> for ChanDescriptor {
    fn from(catalog: CatalogDescriptor) -> Self {
        Self::Catalog(catalog)
    }
}
