/// Outcome of a non-blocking [`IdPool::try_poll_id`].
///
/// - [`PoolStatus::Ready`]: an ID was issued without waiting.
/// - [`PoolStatus::Pending`]: the current block is spent and the next one is
///   still being fetched. A renewal is guaranteed to be in flight; poll again
///   later or fall back to the blocking [`IdPool::next_id`].
///
/// # Example
/// ```
/// use idpool::{IdPool, MemoryIdAuthority, PoolConfig, PoolStatus, StandardIdPool};
///
/// let config = PoolConfig::builder(0, 0).build().unwrap();
/// let pool = StandardIdPool::new(MemoryIdAuthority::new(), config);
///
/// let id = loop {
///     match pool.try_poll_id().unwrap() {
///         PoolStatus::Ready { id } => break id,
///         PoolStatus::Pending => std::thread::yield_now(),
///     }
/// };
/// assert_eq!(id, 0);
/// ```
///
/// [`IdPool::try_poll_id`]: crate::IdPool::try_poll_id
/// [`IdPool::next_id`]: crate::IdPool::next_id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    /// A unique ID was issued.
    Ready {
        /// The issued ID.
        id: u64,
    },
    /// No ID is available until the in-flight renewal completes.
    Pending,
}

/// Lifecycle phase of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolPhase {
    /// No block has been installed yet and nothing is being fetched.
    Fresh,
    /// Serving IDs from the current block, no renewal outstanding.
    Active,
    /// A renewal request to the authority is outstanding.
    Renewing,
    /// Out of capacity. Terminal.
    Exhausted,
    /// Shut down by its owner. Terminal.
    Closed,
}

impl PoolPhase {
    /// Whether the pool will never issue another ID.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Exhausted | Self::Closed)
    }
}

/// Point-in-time counters of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Lifecycle phase at the time of the snapshot.
    pub phase: PoolPhase,
    /// IDs handed out so far.
    pub total_issued: u64,
    /// Blocks accepted from the authority, including a prefetched one not yet
    /// installed.
    pub blocks_granted: u64,
    /// Renewals that ended in an authority error or could not be started.
    pub failed_renewals: u64,
    /// IDs left in the current block.
    pub remaining: u64,
    /// Whether the next block has already been fetched.
    pub prefetched: bool,
}
