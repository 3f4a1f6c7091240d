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

use std::fmt::Display;

use crate::descriptor::{PostDescriptor, ThreadDescriptor};

/// A broken thread invariant.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A post that must be an original post is not one.
    #[error("post {0} is not an original post")]
    NotOriginalPost(PostDescriptor),
    /// Whole-thread replacement without posts.
    #[error("replacement of {0} has no posts")]
    EmptyReplacement(ThreadDescriptor),
    /// A post was routed to a thread it does not belong to.
    #[error("post {post} does not belong to {thread}")]
    ForeignPost {
        /// The thread that received the post.
        thread: ThreadDescriptor,
        /// The offending post.
        post: PostDescriptor,
    },
    /// The original post identity of a thread changed.
    #[error("original post of a thread changed from {old} to {new}")]
    OriginalPostMismatch {
        /// Identity already stored.
        old: PostDescriptor,
        /// Identity supplied.
        new: PostDescriptor,
    },
    /// The original post may only go away together with its thread.
    #[error("original post {0} cannot be deleted on its own")]
    DeleteOriginalPost(PostDescriptor),
}

/// Thread cache error.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A thread invariant would have been broken, the offending write was skipped.
    #[error("invariant violation: {0}")]
    InvariantViolation(Violation),
    /// The thread has no original post yet.
    #[error("thread {0} is not ready")]
    ThreadNotReady(ThreadDescriptor),
    /// The thread store was removed from the cache while in use.
    #[error("thread {0} was retired")]
    ThreadRetired(ThreadDescriptor),
    /// Multiple error list.
    #[error(transparent)]
    Multiple(MultipleError),
    /// Config error.
    #[error("config error: {0}")]
    ConfigError(String),
}

impl Error {
    /// Combine multiple errors into one error.
    pub fn multiple(errs: Vec<Error>) -> Self {
        Self::Multiple(MultipleError(errs))
    }

    /// `Ok(())` for no errors, the error itself for one, [`Error::Multiple`] otherwise.
    pub fn from_many(mut errs: Vec<Error>) -> Result<()> {
        match errs.len() {
            0 => Ok(()),
            1 => Err(errs.swap_remove(0)),
            _ => Err(Self::multiple(errs)),
        }
    }

    /// The violation, if this is an invariant violation.
    pub fn violation(&self) -> Option<&Violation> {
        match self {
            Error::InvariantViolation(violation) => Some(violation),
            _ => None,
        }
    }
}

impl From<Violation> for Error {
    fn from(violation: Violation) -> Self {
        Self::InvariantViolation(violation)
    }
}

/// Errors collected by a batch operation that kept going.
#[derive(thiserror::Error, Debug)]
pub struct MultipleError(Vec<Error>);

impl MultipleError {
    /// The collected errors.
    pub fn errors(&self) -> &[Error] {
        &self.0
    }
}

impl Display for MultipleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "multiple errors: [")?;
        if let Some((last, errs)) = self.0.as_slice().split_last() {
            for err in errs {
                write!(f, "{}, ", err)?;
            }
            write!(f, "{}", last)?;
        }
        write!(f, "]")?;
        Ok(())
    }
}

/// Thread cache result.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::BoardDescriptor;

    #[test]
    fn test_multiple_error_display() {
        let thread = BoardDescriptor::new("4chan", "g").thread(1);
        assert!(Error::from_many(vec![]).is_ok());

        let err = Error::from_many(vec![Error::ThreadNotReady(thread.clone())]).unwrap_err();
        assert!(matches!(err, Error::ThreadNotReady(_)));

        let err = Error::from_many(vec![
            Violation::EmptyReplacement(thread.clone()).into(),
            Error::ThreadNotReady(thread),
        ])
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "multiple errors: [invariant violation: replacement of TD{4chan/g/1} has no posts, \
             thread TD{4chan/g/1} is not ready]"
        );
    }
}
