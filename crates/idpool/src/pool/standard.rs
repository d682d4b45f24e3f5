use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
#[cfg(feature = "tracing")]
use tracing::instrument;

use super::state::{PoolState, Prefetched, Terminal};
use crate::{
    AllocationFailure, AuthorityError, BlockRequest, Error, IdAuthority, IdBlock, IdBlockSizer,
    IdPool, PoolConfig, PoolStats, PoolStatus, Result, SimpleBlockSizer,
};

/// A block-based ID pool for one partition and namespace.
///
/// IDs are served from a locally held [`IdBlock`]. Once the cursor passes the
/// block's renewal point, the next block is requested from the
/// [`IdAuthority`] on a background thread so that consumers rarely wait. If a
/// caller does run dry, it blocks until the outstanding renewal completes or
/// its block timeout elapses.
///
/// All state lives behind one mutex; consuming an ID, deciding to renew and
/// swapping in the next block happen in the same critical section. The lock
/// is never held while the authority is being called.
///
/// ## Features
/// - ✅ Thread-safe
/// - ✅ At most one authority request that callers wait on
/// - ✅ Survives authority failures, panics and timeouts
/// - ✅ Never issues an ID at or above the configured upper bound
///
/// Dropping the pool closes it.
///
/// # Example
/// ```
/// use idpool::{IdPool, MemoryIdAuthority, PoolConfig, SimpleBlockSizer, StandardIdPool};
///
/// let config = PoolConfig::builder(0, 1).id_upper_bound(500).build().unwrap();
/// let pool = StandardIdPool::with_sizer(
///     MemoryIdAuthority::new(),
///     config,
///     SimpleBlockSizer::new(200),
/// );
///
/// for expected in 0..500 {
///     assert_eq!(pool.next_id().unwrap(), expected);
/// }
/// assert!(pool.next_id().unwrap_err().is_exhausted());
/// ```
pub struct StandardIdPool<A>
where
    A: IdAuthority + 'static,
{
    shared: Arc<Shared<A>>,
}

struct Shared<A> {
    authority: A,
    interruptible: bool,
    sizer: Arc<dyn IdBlockSizer>,
    config: PoolConfig,
    #[cfg(feature = "cache-padded")]
    state: crossbeam_utils::CachePadded<Mutex<PoolState>>,
    #[cfg(not(feature = "cache-padded"))]
    state: Mutex<PoolState>,
    /// Signalled whenever a renewal completes or the pool turns terminal.
    renewed: Condvar,
}

/// Result of one pass over the pool state.
enum Step {
    Issued(u64),
    /// Nothing to hand out until the given renewal attempt completes.
    Wait(u64),
}

impl<A> StandardIdPool<A>
where
    A: IdAuthority + 'static,
{
    /// Creates a pool requesting fixed-size blocks of
    /// [`DEFAULT_BLOCK_SIZE`](crate::DEFAULT_BLOCK_SIZE) IDs.
    ///
    /// No block is fetched until the first call.
    pub fn new(authority: A, config: PoolConfig) -> Self {
        Self::with_sizer(authority, config, SimpleBlockSizer::default())
    }

    /// Creates a pool that consults `sizer` before every renewal.
    pub fn with_sizer(authority: A, config: PoolConfig, sizer: impl IdBlockSizer + 'static) -> Self {
        let interruptible = authority.supports_interruption();
        Self {
            shared: Arc::new(Shared {
                authority,
                interruptible,
                sizer: Arc::new(sizer),
                config,
                #[cfg(feature = "cache-padded")]
                state: crossbeam_utils::CachePadded::new(Mutex::new(PoolState::default())),
                #[cfg(not(feature = "cache-padded"))]
                state: Mutex::new(PoolState::default()),
                renewed: Condvar::new(),
            }),
        }
    }

    /// The configuration the pool was built with.
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// The authority blocks are requested from.
    pub fn authority(&self) -> &A {
        &self.shared.authority
    }

    /// A consistent snapshot of the pool's counters and phase.
    pub fn stats(&self) -> PoolStats {
        self.shared.state.lock().stats()
    }

    /// Returns the next unique ID, blocking for at most the configured block
    /// timeout if a new block has to be fetched first.
    ///
    /// # Errors
    ///
    /// See [`IdPool::next_id`].
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn next_id(&self) -> Result<u64> {
        self.shared.next_id()
    }

    /// Returns an ID if one can be issued without waiting, otherwise makes
    /// sure a renewal is in flight and returns [`PoolStatus::Pending`].
    ///
    /// # Errors
    ///
    /// See [`IdPool::try_poll_id`].
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn try_poll_id(&self) -> Result<PoolStatus> {
        let mut state = self.shared.state.lock();
        match self.shared.step(&mut state)? {
            Step::Issued(id) => Ok(PoolStatus::Ready { id }),
            Step::Wait(_) => Ok(PoolStatus::Pending),
        }
    }

    /// Closes the pool, cancelling any outstanding renewal and releasing all
    /// waiters. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl<A> IdPool for StandardIdPool<A>
where
    A: IdAuthority + 'static,
{
    fn next_id(&self) -> Result<u64> {
        self.next_id()
    }

    fn try_poll_id(&self) -> Result<PoolStatus> {
        self.try_poll_id()
    }

    fn close(&self) {
        self.close();
    }

    fn partition(&self) -> u32 {
        self.shared.config.partition()
    }

    fn namespace(&self) -> u32 {
        self.shared.config.namespace()
    }
}

impl<A> Drop for StandardIdPool<A>
where
    A: IdAuthority + 'static,
{
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl<A> Shared<A>
where
    A: IdAuthority + 'static,
{
    fn next_id(self: &Arc<Self>) -> Result<u64> {
        let started = Instant::now();
        let deadline = started + self.config.block_timeout();
        let mut state = self.state.lock();
        loop {
            match self.step(&mut state)? {
                Step::Issued(id) => return Ok(id),
                Step::Wait(attempt) => self.wait_for(&mut state, attempt, started, deadline)?,
            }
        }
    }

    /// Issues from the current block, swapping in the prefetched block when
    /// the current one is spent. Starts a renewal if there is nothing to swap
    /// in and none is outstanding.
    fn step(self: &Arc<Self>, state: &mut PoolState) -> Result<Step> {
        loop {
            self.check_terminal(state)?;
            if let Some(id) = self.issue(state)? {
                return Ok(Step::Issued(id));
            }
            match state.next.take() {
                Some(Prefetched::Block(block)) => self.install(state, block)?,
                Some(Prefetched::Exhausted) => return Err(self.exhaust(state)),
                None => {
                    let attempt = match state.in_flight_attempt() {
                        Some(attempt) => attempt,
                        None => self.start_renewal(state)?,
                    };
                    return Ok(Step::Wait(attempt));
                }
            }
        }
    }

    fn issue(self: &Arc<Self>, state: &mut PoolState) -> Result<Option<u64>> {
        let upper = self.config.id_upper_bound();
        if state.total_issued >= upper {
            return Err(self.exhaust(state));
        }
        let Some(id) = state.peek() else {
            return Ok(None);
        };
        if id >= upper {
            return Err(self.exhaust(state));
        }
        state.advance();

        if state.wants_prefetch(upper) {
            state.prefetch_started = true;
            #[cfg(feature = "tracing")]
            tracing::debug!(
                partition = self.config.partition(),
                namespace = self.config.namespace(),
                offset = state.offset,
                "Starting block prefetch"
            );
            // The ID is already consumed; a failed start is retried once the
            // block runs dry.
            if let Err(_e) = self.start_renewal(state) {
                #[cfg(feature = "tracing")]
                tracing::warn!("Could not start prefetch: {_e}");
            }
        }
        Ok(Some(id))
    }

    fn install(&self, state: &mut PoolState, block: IdBlock) -> Result<()> {
        if block.start() >= self.config.id_upper_bound() {
            return Err(self.exhaust(state));
        }
        state.install(block, self.config.renewal_index(block.len()));
        #[cfg(feature = "tracing")]
        tracing::debug!(
            partition = self.config.partition(),
            namespace = self.config.namespace(),
            "Acquired block {block}"
        );
        Ok(())
    }

    fn start_renewal(self: &Arc<Self>, state: &mut PoolState) -> Result<u64> {
        let (attempt, cancel) = state.begin_renewal();
        let request = BlockRequest {
            partition: self.config.partition(),
            namespace: self.config.namespace(),
            timeout: self.config.block_timeout(),
            block_size: self.sizer.block_size(state.blocks_granted),
        };

        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!(
                "idpool-renew-{}-{}",
                request.partition, request.namespace
            ))
            .spawn(move || shared.renew(attempt, &request, &cancel));

        match spawned {
            Ok(_) => Ok(attempt),
            Err(e) => {
                state.in_flight = None;
                state.failed_renewals += 1;
                Err(self.transient(AllocationFailure::Spawn(e.to_string())))
            }
        }
    }

    /// Body of a renewal thread. Runs without the lock held while the
    /// authority is called.
    fn renew(&self, attempt: u64, request: &BlockRequest, cancel: &CancellationToken) {
        #[cfg(feature = "tracing")]
        tracing::debug!(attempt, ?request, "Requesting id block");

        let result = if cancel.is_cancelled() {
            Err(AllocationFailure::Authority(AuthorityError::Interrupted))
        } else {
            self.request_block(request, cancel)
        };

        let mut state = self.state.lock();
        if state.take_detached(attempt) {
            self.accept_late(&mut state, attempt, result);
        } else if state.in_flight_attempt() == Some(attempt) {
            self.accept(&mut state, attempt, result);
        } else {
            #[cfg(feature = "tracing")]
            tracing::debug!(attempt, "Discarding result of superseded renewal");
            return;
        }
        drop(state);
        self.renewed.notify_all();
    }

    /// Calls the authority, turning a panic into a failed attempt so the pool
    /// never stays marked as renewing.
    fn request_block(
        &self,
        request: &BlockRequest,
        cancel: &CancellationToken,
    ) -> Result<IdBlock, AllocationFailure> {
        match panic::catch_unwind(AssertUnwindSafe(|| {
            self.authority.get_id_block(request, cancel)
        })) {
            Ok(result) => result.map_err(AllocationFailure::from),
            Err(payload) => Err(AllocationFailure::Panicked(panic_message(&*payload))),
        }
    }

    /// Settles the attempt callers are waiting on.
    fn accept(
        &self,
        state: &mut PoolState,
        _attempt: u64,
        result: Result<IdBlock, AllocationFailure>,
    ) {
        let Some(renewal) = state.in_flight.take() else {
            return;
        };
        match result {
            Ok(block) => {
                if state.next.is_none() {
                    state.blocks_granted += 1;
                    state.next = Some(Prefetched::Block(block));
                } else {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        attempt = _attempt,
                        "Prefetch slot taken by a late block, dropping {block}"
                    );
                }
            }
            Err(AllocationFailure::Authority(AuthorityError::Exhausted { .. })) => {
                #[cfg(feature = "tracing")]
                tracing::info!(
                    partition = self.config.partition(),
                    namespace = self.config.namespace(),
                    "Authority has no more ids"
                );
                if state.next.is_none() {
                    state.next = Some(Prefetched::Exhausted);
                }
            }
            Err(reason) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(attempt = _attempt, "Id block renewal failed: {reason}");
                state.failed_renewals += 1;
                state.fail(renewal, reason);
            }
        }
    }

    /// Settles an attempt released by a timeout. Nobody waits on it; a block
    /// is kept only if nothing else filled the prefetch slot.
    fn accept_late(
        &self,
        state: &mut PoolState,
        _attempt: u64,
        result: Result<IdBlock, AllocationFailure>,
    ) {
        let slot_free = state.terminal.is_none() && state.next.is_none();
        match result {
            Ok(block) if slot_free => {
                #[cfg(feature = "tracing")]
                tracing::debug!(attempt = _attempt, "Keeping late block {block}");
                state.blocks_granted += 1;
                state.next = Some(Prefetched::Block(block));
            }
            Err(AllocationFailure::Authority(AuthorityError::Exhausted { .. })) if slot_free => {
                state.next = Some(Prefetched::Exhausted);
            }
            Ok(_block) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(attempt = _attempt, "Discarding late block {_block}");
            }
            Err(_reason) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    attempt = _attempt,
                    "Detached id block renewal failed: {_reason}"
                );
                state.failed_renewals += 1;
            }
        }
    }

    /// Parks the caller until `attempt` completes, the pool turns terminal, or
    /// `deadline` passes. Returning `Ok` means the state changed and should be
    /// stepped again.
    fn wait_for(
        &self,
        state: &mut MutexGuard<'_, PoolState>,
        attempt: u64,
        started: Instant,
        deadline: Instant,
    ) -> Result<()> {
        state.join(attempt);
        let outcome = self.wait_on(state, attempt, started, deadline);
        state.leave(attempt);
        outcome
    }

    fn wait_on(
        &self,
        state: &mut MutexGuard<'_, PoolState>,
        attempt: u64,
        started: Instant,
        deadline: Instant,
    ) -> Result<()> {
        loop {
            let timed_out = self.renewed.wait_until(state, deadline).timed_out();

            if state.terminal.is_some() || state.next.is_some() {
                return Ok(());
            }
            if state.in_flight_attempt() == Some(attempt) {
                if timed_out {
                    return Err(self.time_out(state, started.elapsed()));
                }
                continue;
            }
            if let Some(reason) = state.failure_of(attempt) {
                return Err(self.transient(reason.clone()));
            }
            if timed_out {
                return Err(self.transient(AllocationFailure::TimedOut(started.elapsed())));
            }
            // Our attempt delivered a block someone else already installed,
            // or was released by another caller's timeout.
            return Ok(());
        }
    }

    /// Releases the outstanding renewal. An interruptible one is cancelled and
    /// its waiters fail; otherwise it keeps running detached and the next
    /// caller starts a fresh renewal.
    fn time_out(&self, state: &mut PoolState, elapsed: Duration) -> Error {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            partition = self.config.partition(),
            namespace = self.config.namespace(),
            "Id block allocation timed out after {elapsed:?}"
        );
        if self.interruptible {
            if let Some(renewal) = state.abandon_in_flight() {
                state.fail(renewal, AllocationFailure::Cancelled);
            }
        } else {
            state.detach_in_flight();
        }
        self.renewed.notify_all();
        self.transient(AllocationFailure::TimedOut(elapsed))
    }

    fn exhaust(&self, state: &mut PoolState) -> Error {
        if state.terminal.is_none() {
            #[cfg(feature = "tracing")]
            tracing::info!(
                partition = self.config.partition(),
                namespace = self.config.namespace(),
                total_issued = state.total_issued,
                "Id pool exhausted"
            );
            state.terminal = Some(Terminal::Exhausted);
            state.next = None;
            state.abandon_in_flight();
            self.renewed.notify_all();
        }
        Error::PoolExhausted {
            partition: self.config.partition(),
            namespace: self.config.namespace(),
        }
    }

    fn close(&self) {
        let mut state = self.state.lock();
        if state.terminal == Some(Terminal::Closed) {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(
            partition = self.config.partition(),
            namespace = self.config.namespace(),
            "Closing id pool"
        );
        state.terminal = Some(Terminal::Closed);
        state.next = None;
        state.abandon_in_flight();
        drop(state);
        self.renewed.notify_all();
    }

    fn check_terminal(&self, state: &PoolState) -> Result<()> {
        match state.terminal {
            None => Ok(()),
            Some(Terminal::Exhausted) => Err(Error::PoolExhausted {
                partition: self.config.partition(),
                namespace: self.config.namespace(),
            }),
            Some(Terminal::Closed) => Err(Error::Closed {
                partition: self.config.partition(),
                namespace: self.config.namespace(),
            }),
        }
    }

    fn transient(&self, reason: AllocationFailure) -> Error {
        Error::TransientAllocation {
            partition: self.config.partition(),
            namespace: self.config.namespace(),
            reason,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
