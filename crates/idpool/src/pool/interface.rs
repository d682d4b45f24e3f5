use crate::{PoolStatus, Result};

/// A source of unique IDs for one partition and namespace.
pub trait IdPool: Send + Sync {
    /// Returns the next unique ID, blocking while a new block is fetched.
    ///
    /// # Errors
    ///
    /// - [`Error::TransientAllocation`] if no block arrived within the block
    ///   timeout or the authority failed; the call may be retried.
    /// - [`Error::PoolExhausted`] once the pool is out of capacity.
    /// - [`Error::Closed`] after [`IdPool::close`].
    ///
    /// [`Error::TransientAllocation`]: crate::Error::TransientAllocation
    /// [`Error::PoolExhausted`]: crate::Error::PoolExhausted
    /// [`Error::Closed`]: crate::Error::Closed
    fn next_id(&self) -> Result<u64>;

    /// Returns an ID if one is available without waiting.
    ///
    /// # Errors
    ///
    /// Same terminal errors as [`IdPool::next_id`]; also fails transiently if
    /// a needed renewal could not be started.
    fn try_poll_id(&self) -> Result<PoolStatus>;

    /// Stops the pool. Outstanding and later calls fail with
    /// [`Error::Closed`](crate::Error::Closed).
    fn close(&self);

    /// The partition every block of this pool is requested for.
    fn partition(&self) -> u32;

    /// The namespace every block of this pool is requested for.
    fn namespace(&self) -> u32;
}
