use core::time::Duration;
use std::{
    collections::HashMap,
    sync::Arc,
    time::Instant,
};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{AuthorityError, BlockRequest, IdAuthority, IdBlock, IdBlockSizer, PartitionRange};

/// Granularity at which simulated latency re-checks its cancellation token.
const LATENCY_TICK: Duration = Duration::from_millis(5);

#[derive(Default)]
struct Ledger {
    /// Next unallocated ID and number of blocks granted, per
    /// `(partition, namespace)`.
    cursors: HashMap<(u32, u32), (u64, u64)>,
    sizer: Option<Arc<dyn IdBlockSizer>>,
    calls: u64,
    closed: bool,
}

/// An in-process [`IdAuthority`] that carves each `(partition, namespace)` ID
/// space into consecutive blocks starting at zero.
///
/// Useful for tests, benchmarks and single-process deployments. Latency and
/// capacity can be configured to exercise the pool's timeout and exhaustion
/// paths.
///
/// # Example
/// ```
/// use idpool::{BlockRequest, IdAuthority, MemoryIdAuthority};
/// use tokio_util::sync::CancellationToken;
/// use std::time::Duration;
///
/// let authority = MemoryIdAuthority::new().with_capacity(250);
/// let request = BlockRequest {
///     partition: 0,
///     namespace: 1,
///     timeout: Duration::from_secs(1),
///     block_size: 200,
/// };
/// let cancel = CancellationToken::new();
///
/// assert_eq!(authority.get_id_block(&request, &cancel).unwrap().range(), 0..200);
/// assert_eq!(authority.get_id_block(&request, &cancel).unwrap().range(), 200..250);
/// assert!(authority.get_id_block(&request, &cancel).unwrap_err().is_exhausted());
/// ```
pub struct MemoryIdAuthority {
    ledger: Mutex<Ledger>,
    capacity: u64,
    latency: Duration,
    interruptible: bool,
    partitions: u32,
    unique_id: String,
}

impl MemoryIdAuthority {
    /// Creates an authority with unbounded capacity, no latency, a single
    /// local partition and interruption support.
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            capacity: u64::MAX,
            latency: Duration::ZERO,
            interruptible: true,
            partitions: 1,
            unique_id: format!("{:016x}", rand::random::<u64>()),
        }
    }

    /// Caps every namespace: IDs at or above `capacity` are never granted.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Delays every block grant by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Controls whether simulated latency observes the cancellation token.
    #[must_use]
    pub const fn with_interruption(mut self, interruptible: bool) -> Self {
        self.interruptible = interruptible;
        self
    }

    /// Number of partitions reported by [`IdAuthority::local_id_partitions`].
    #[must_use]
    pub const fn with_partitions(mut self, partitions: u32) -> Self {
        self.partitions = partitions;
        self
    }

    /// Total number of [`IdAuthority::get_id_block`] calls received.
    pub fn calls(&self) -> u64 {
        self.ledger.lock().calls
    }

    /// Next ID that would be granted for `partition`/`namespace`.
    pub fn cursor(&self, partition: u32, namespace: u32) -> u64 {
        self.ledger
            .lock()
            .cursors
            .get(&(partition, namespace))
            .map_or(0, |&(next, _)| next)
    }

    fn simulate_latency(&self, cancel: &CancellationToken) -> Result<(), AuthorityError> {
        if self.latency.is_zero() {
            return Ok(());
        }
        let deadline = Instant::now() + self.latency;
        loop {
            if self.interruptible && cancel.is_cancelled() {
                return Err(AuthorityError::Interrupted);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(LATENCY_TICK.min(deadline - now));
        }
    }
}

impl Default for MemoryIdAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAuthority for MemoryIdAuthority {
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self, cancel)))]
    fn get_id_block(
        &self,
        request: &BlockRequest,
        cancel: &CancellationToken,
    ) -> Result<IdBlock, AuthorityError> {
        self.ledger.lock().calls += 1;
        self.simulate_latency(cancel)?;

        let mut ledger = self.ledger.lock();
        if ledger.closed {
            return Err(AuthorityError::permanent("authority has been closed"));
        }
        let sizer = ledger.sizer.clone();
        let (next, granted) = ledger
            .cursors
            .entry((request.partition, request.namespace))
            .or_insert((0, 0));

        if *next >= self.capacity {
            return Err(AuthorityError::Exhausted {
                partition: request.partition,
                namespace: request.namespace,
            });
        }

        let size = sizer.map_or(request.block_size, |s| s.block_size(*granted));
        let block = IdBlock::new(*next, size.min(self.capacity - *next));
        *next = block.end();
        *granted += 1;
        Ok(block)
    }

    fn local_id_partitions(&self) -> Result<Vec<PartitionRange>, AuthorityError> {
        Ok(vec![PartitionRange::new(0, self.partitions)])
    }

    fn set_id_block_sizer(&self, sizer: Arc<dyn IdBlockSizer>) {
        self.ledger.lock().sizer = Some(sizer);
    }

    fn close(&self) {
        self.ledger.lock().closed = true;
    }

    fn unique_id(&self) -> String {
        self.unique_id.clone()
    }

    fn supports_interruption(&self) -> bool {
        self.interruptible
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimpleBlockSizer;

    fn request(partition: u32, namespace: u32, block_size: u64) -> BlockRequest {
        BlockRequest {
            partition,
            namespace,
            timeout: Duration::from_secs(1),
            block_size,
        }
    }

    #[test]
    fn blocks_are_consecutive_per_namespace() {
        let authority = MemoryIdAuthority::new();
        let cancel = CancellationToken::new();

        let a = authority.get_id_block(&request(0, 1, 10), &cancel).unwrap();
        let b = authority.get_id_block(&request(0, 1, 5), &cancel).unwrap();
        let other = authority.get_id_block(&request(0, 2, 10), &cancel).unwrap();

        assert_eq!(a.range(), 0..10);
        assert_eq!(b.range(), 10..15);
        assert_eq!(other.range(), 0..10);
        assert_eq!(authority.calls(), 3);
        assert_eq!(authority.cursor(0, 1), 15);
    }

    #[test]
    fn installed_sizer_overrides_request() {
        let authority = MemoryIdAuthority::new();
        authority.set_id_block_sizer(Arc::new(SimpleBlockSizer::new(3)));
        let block = authority
            .get_id_block(&request(1, 1, 1_000), &CancellationToken::new())
            .unwrap();
        assert_eq!(block.len(), 3);
    }

    #[test]
    fn capacity_truncates_then_exhausts() {
        let authority = MemoryIdAuthority::new().with_capacity(15);
        let cancel = CancellationToken::new();

        assert_eq!(authority.get_id_block(&request(0, 0, 10), &cancel).unwrap().len(), 10);
        assert_eq!(authority.get_id_block(&request(0, 0, 10), &cancel).unwrap().len(), 5);
        assert_eq!(
            authority.get_id_block(&request(0, 0, 10), &cancel),
            Err(AuthorityError::Exhausted {
                partition: 0,
                namespace: 0
            })
        );
    }

    #[test]
    fn cancelled_latency_is_interrupted() {
        let authority = MemoryIdAuthority::new().with_latency(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let start = Instant::now();
        let result = authority.get_id_block(&request(0, 0, 10), &cancel);
        assert_eq!(result, Err(AuthorityError::Interrupted));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(authority.cursor(0, 0), 0);
    }

    #[test]
    fn closed_authority_rejects_requests() {
        let authority = MemoryIdAuthority::new();
        authority.close();
        let err = authority
            .get_id_block(&request(0, 0, 10), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, AuthorityError::Permanent { .. }));
    }

    #[test]
    fn reports_local_partitions_and_identity() {
        let authority = MemoryIdAuthority::new().with_partitions(8);
        assert_eq!(
            authority.local_id_partitions().unwrap(),
            vec![PartitionRange::new(0, 8)]
        );
        assert_eq!(authority.unique_id().len(), 16);
        assert!(authority.supports_interruption());
        assert!(!MemoryIdAuthority::new().with_interruption(false).supports_interruption());
    }
}
