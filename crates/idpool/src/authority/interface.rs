use core::time::Duration;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{AuthorityError, IdBlock, IdBlockSizer, PartitionRange};

/// Everything an authority needs to grant one block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRequest {
    /// Partition the block is requested for.
    pub partition: u32,
    /// Namespace within the partition.
    pub namespace: u32,
    /// How long the caller is prepared to wait for this block.
    pub timeout: Duration,
    /// Number of IDs the pool's sizer asked for.
    pub block_size: u64,
}

/// The backing service that hands out ID blocks per partition and namespace.
///
/// Implementations are shared between a pool and its renewal threads, so they
/// must be `Send + Sync`. A call to [`get_id_block`] may take arbitrarily long;
/// the pool never holds its lock across it.
///
/// When [`supports_interruption`] returns `true`, the pool cancels `cancel` as
/// soon as a waiting caller's timeout elapses and expects the call to return
/// promptly (typically with [`AuthorityError::Interrupted`]). Otherwise the
/// call is left to finish in the background and its result is discarded if it
/// has been superseded.
///
/// [`get_id_block`]: IdAuthority::get_id_block
/// [`supports_interruption`]: IdAuthority::supports_interruption
pub trait IdAuthority: Send + Sync {
    /// Grants the next block for `request.partition`/`request.namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Exhausted`] once the namespace has no more
    /// capacity, and a temporary or permanent error when the backend fails.
    fn get_id_block(
        &self,
        request: &BlockRequest,
        cancel: &CancellationToken,
    ) -> Result<IdBlock, AuthorityError>;

    /// Partition ranges this authority serves locally.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot determine its local partitions.
    fn local_id_partitions(&self) -> Result<Vec<PartitionRange>, AuthorityError>;

    /// Installs an authority-side sizing policy.
    ///
    /// Authorities that do not size blocks themselves may ignore it and honor
    /// [`BlockRequest::block_size`] instead.
    fn set_id_block_sizer(&self, _sizer: Arc<dyn IdBlockSizer>) {}

    /// Releases backend resources. Later calls may fail.
    fn close(&self) {}

    /// An identifier that distinguishes this authority instance from others
    /// contending for the same ID space.
    fn unique_id(&self) -> String;

    /// Whether an outstanding [`IdAuthority::get_id_block`] call reacts to its
    /// cancellation token.
    fn supports_interruption(&self) -> bool;
}

impl<A> IdAuthority for Arc<A>
where
    A: IdAuthority + ?Sized,
{
    fn get_id_block(
        &self,
        request: &BlockRequest,
        cancel: &CancellationToken,
    ) -> Result<IdBlock, AuthorityError> {
        (**self).get_id_block(request, cancel)
    }

    fn local_id_partitions(&self) -> Result<Vec<PartitionRange>, AuthorityError> {
        (**self).local_id_partitions()
    }

    fn set_id_block_sizer(&self, sizer: Arc<dyn IdBlockSizer>) {
        (**self).set_id_block_sizer(sizer);
    }

    fn close(&self) {
        (**self).close();
    }

    fn unique_id(&self) -> String {
        (**self).unique_id()
    }

    fn supports_interruption(&self) -> bool {
        (**self).supports_interruption()
    }
}
