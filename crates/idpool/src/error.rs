//! Error types for the ID pool.
//!
//! Callers only ever need to distinguish three outcomes of
//! [`IdPool::next_id`]:
//! - `TransientAllocation`: the renewal this call waited on timed out, was
//!   cancelled, or the authority failed. Call again later.
//! - `PoolExhausted`: the namespace is permanently out of capacity.
//! - `Closed`: the pool's owner shut it down.
//!
//! `Configuration` only surfaces while building a [`PoolConfig`].
//!
//! [`IdPool::next_id`]: crate::IdPool::next_id
//! [`PoolConfig`]: crate::PoolConfig

use core::time::Duration;

use crate::AuthorityError;

/// A result type defaulting to this crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors the pool can produce.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A block could not be obtained in time. The pool is consistent and the
    /// call can be retried.
    #[error(
        "id block allocation on partition({partition})-namespace({namespace}) failed: {reason}"
    )]
    TransientAllocation {
        partition: u32,
        namespace: u32,
        reason: AllocationFailure,
    },

    /// The upper bound was reached or the authority has no capacity left.
    /// Terminal: every later call fails the same way.
    #[error("exhausted id pool for partition({partition})-namespace({namespace})")]
    PoolExhausted { partition: u32, namespace: u32 },

    /// Invalid construction parameters.
    #[error("invalid pool configuration: {reason}")]
    Configuration { reason: String },

    /// The pool was closed by its owner.
    #[error("id pool for partition({partition})-namespace({namespace}) has been closed")]
    Closed { partition: u32, namespace: u32 },
}

impl Error {
    /// Whether calling [`IdPool::next_id`] again may succeed.
    ///
    /// [`IdPool::next_id`]: crate::IdPool::next_id
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientAllocation { .. })
    }

    /// Whether the pool is permanently out of IDs.
    pub const fn is_exhausted(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }

    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}

/// Why a renewal did not deliver a block to a waiting caller.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum AllocationFailure {
    /// The caller's block timeout elapsed first.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// Another caller's timeout cancelled the shared renewal.
    #[error("renewal was cancelled")]
    Cancelled,

    /// The authority returned an error.
    #[error(transparent)]
    Authority(#[from] AuthorityError),

    /// The authority panicked while serving the request.
    #[error("authority panicked: {0}")]
    Panicked(String),

    /// The renewal thread could not be started.
    #[error("could not start renewal: {0}")]
    Spawn(String),
}
