use std::{future::Future, panic, sync::Arc};

use crate::{AllocationFailure, Error, IdPool, PoolStatus, Result};

/// Extension trait for drawing IDs from a shared pool inside a
/// [`tokio`](https://docs.rs/tokio) runtime.
///
/// [`IdPool::next_id`] parks the calling thread while a block is being
/// fetched. This trait keeps that wait off the async worker threads: IDs that
/// are already available are returned inline, and only a caller that would
/// block is moved onto the blocking thread pool.
pub trait IdPoolAsyncExt {
    /// Returns a future that resolves to the next unique ID.
    ///
    /// # Errors
    ///
    /// Same as [`IdPool::next_id`]. If the runtime cancels the blocking task
    /// the call fails transiently with [`AllocationFailure::Cancelled`].
    fn next_id_async(&self) -> impl Future<Output = Result<u64>> + Send;
}

impl<P> IdPoolAsyncExt for Arc<P>
where
    P: IdPool + 'static,
{
    fn next_id_async(&self) -> impl Future<Output = Result<u64>> + Send {
        let pool = Arc::clone(self);
        async move {
            if let PoolStatus::Ready { id } = pool.try_poll_id()? {
                return Ok(id);
            }

            let partition = pool.partition();
            let namespace = pool.namespace();
            match tokio::task::spawn_blocking(move || pool.next_id()).await {
                Ok(result) => result,
                Err(e) if e.is_panic() => panic::resume_unwind(e.into_panic()),
                Err(_) => Err(Error::TransientAllocation {
                    partition,
                    namespace,
                    reason: AllocationFailure::Cancelled,
                }),
            }
        }
    }
}
