use tokio_util::sync::CancellationToken;

use crate::{AllocationFailure, IdBlock, PoolPhase, PoolStats};

/// What the last completed renewal left for the next block swap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Prefetched {
    Block(IdBlock),
    /// The authority has nothing left; surfaces once the current block is
    /// spent.
    Exhausted,
}

/// The single outstanding request to the authority that callers wait on.
#[derive(Debug)]
pub(crate) struct Renewal {
    pub(crate) attempt: u64,
    pub(crate) cancel: CancellationToken,
    /// Callers currently parked on this attempt.
    pub(crate) waiters: usize,
}

/// A failed attempt whose waiters have not all observed the failure yet.
#[derive(Debug)]
pub(crate) struct FailedAttempt {
    pub(crate) attempt: u64,
    pub(crate) reason: AllocationFailure,
    pub(crate) waiters: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Terminal {
    Exhausted,
    Closed,
}

/// Mutable pool state. Only ever touched with the pool lock held.
#[derive(Debug, Default)]
pub(crate) struct PoolState {
    pub(crate) current: Option<IdBlock>,
    /// Next unconsumed position in `current`.
    pub(crate) offset: u64,
    pub(crate) renewal_index: u64,
    pub(crate) prefetch_started: bool,
    pub(crate) next: Option<Prefetched>,
    pub(crate) in_flight: Option<Renewal>,
    /// Attempts released by a timeout that still run against a
    /// non-interruptible authority. A block they deliver late is kept if the
    /// prefetch slot is free.
    pub(crate) detached: Vec<u64>,
    /// Failures still owed to parked callers, one entry per attempt.
    pub(crate) failures: Vec<FailedAttempt>,
    pub(crate) attempts: u64,
    pub(crate) blocks_granted: u64,
    pub(crate) failed_renewals: u64,
    pub(crate) total_issued: u64,
    pub(crate) terminal: Option<Terminal>,
}

impl PoolState {
    /// ID at the cursor, if the current block has one left.
    pub(crate) fn peek(&self) -> Option<u64> {
        self.current?.get(self.offset)
    }

    pub(crate) fn advance(&mut self) {
        debug_assert!(self.peek().is_some());
        self.offset += 1;
        self.total_issued += 1;
    }

    pub(crate) fn remaining(&self) -> u64 {
        self.current.map_or(0, |block| block.len() - self.offset)
    }

    pub(crate) fn install(&mut self, block: IdBlock, renewal_index: u64) {
        self.current = Some(block);
        self.offset = 0;
        self.renewal_index = renewal_index;
        self.prefetch_started = false;
    }

    /// Whether the cursor crossed the renewal point of the current block and
    /// nothing has been fetched or requested for it yet.
    pub(crate) fn wants_prefetch(&self, id_upper_bound: u64) -> bool {
        match self.current {
            Some(block) => {
                !self.prefetch_started
                    && self.next.is_none()
                    && self.in_flight.is_none()
                    && self.offset >= self.renewal_index
                    && block.end() < id_upper_bound
            }
            None => false,
        }
    }

    /// Registers a new outstanding renewal and returns its attempt number.
    pub(crate) fn begin_renewal(&mut self) -> (u64, CancellationToken) {
        debug_assert!(self.in_flight.is_none());
        self.attempts += 1;
        let attempt = self.attempts;
        let cancel = CancellationToken::new();
        self.in_flight = Some(Renewal {
            attempt,
            cancel: cancel.clone(),
            waiters: 0,
        });
        (attempt, cancel)
    }

    pub(crate) fn in_flight_attempt(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|renewal| renewal.attempt)
    }

    /// Detaches the outstanding renewal, cancelling its token. Its eventual
    /// result no longer matches `in_flight` and is dropped.
    pub(crate) fn abandon_in_flight(&mut self) -> Option<Renewal> {
        let renewal = self.in_flight.take()?;
        renewal.cancel.cancel();
        Some(renewal)
    }

    /// Releases the outstanding renewal without cancelling it, so the next
    /// caller starts a fresh one.
    pub(crate) fn detach_in_flight(&mut self) -> Option<u64> {
        let renewal = self.in_flight.take()?;
        self.detached.push(renewal.attempt);
        Some(renewal.attempt)
    }

    /// Forgets a detached attempt. Returns whether `attempt` was detached.
    pub(crate) fn take_detached(&mut self, attempt: u64) -> bool {
        match self.detached.iter().position(|&a| a == attempt) {
            Some(i) => {
                self.detached.swap_remove(i);
                true
            }
            None => false,
        }
    }

    /// Records a caller parking on `attempt`.
    pub(crate) fn join(&mut self, attempt: u64) {
        if let Some(renewal) = self.in_flight.as_mut().filter(|r| r.attempt == attempt) {
            renewal.waiters += 1;
        }
    }

    /// Records a caller leaving `attempt`, dropping the attempt's failure
    /// once its last waiter has seen it.
    pub(crate) fn leave(&mut self, attempt: u64) {
        if let Some(renewal) = self.in_flight.as_mut().filter(|r| r.attempt == attempt) {
            renewal.waiters = renewal.waiters.saturating_sub(1);
            return;
        }
        if let Some(i) = self.failures.iter().position(|f| f.attempt == attempt) {
            let failure = &mut self.failures[i];
            failure.waiters = failure.waiters.saturating_sub(1);
            if failure.waiters == 0 {
                self.failures.swap_remove(i);
            }
        }
    }

    /// Keeps `reason` for every caller parked on `renewal`.
    pub(crate) fn fail(&mut self, renewal: Renewal, reason: AllocationFailure) {
        if renewal.waiters > 0 {
            self.failures.push(FailedAttempt {
                attempt: renewal.attempt,
                reason,
                waiters: renewal.waiters,
            });
        }
    }

    /// The failure recorded for `attempt`, if it failed while callers waited
    /// on it.
    pub(crate) fn failure_of(&self, attempt: u64) -> Option<&AllocationFailure> {
        self.failures
            .iter()
            .find(|f| f.attempt == attempt)
            .map(|f| &f.reason)
    }

    pub(crate) fn phase(&self) -> PoolPhase {
        let renewing = self.in_flight.is_some() || !self.detached.is_empty();
        match (self.terminal, renewing, self.current) {
            (Some(Terminal::Closed), _, _) => PoolPhase::Closed,
            (Some(Terminal::Exhausted), _, _) => PoolPhase::Exhausted,
            (None, true, _) => PoolPhase::Renewing,
            (None, false, None) => PoolPhase::Fresh,
            (None, false, Some(_)) => PoolPhase::Active,
        }
    }

    pub(crate) fn stats(&self) -> PoolStats {
        PoolStats {
            phase: self.phase(),
            total_issued: self.total_issued,
            blocks_granted: self.blocks_granted,
            failed_renewals: self.failed_renewals,
            remaining: self.remaining(),
            prefetched: matches!(self.next, Some(Prefetched::Block(_))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_walks_the_current_block() {
        let mut state = PoolState::default();
        assert_eq!(state.peek(), None);

        state.install(IdBlock::new(10, 2), 1);
        assert_eq!(state.peek(), Some(10));
        state.advance();
        assert_eq!(state.peek(), Some(11));
        state.advance();
        assert_eq!(state.peek(), None);
        assert_eq!(state.total_issued, 2);
        assert_eq!(state.remaining(), 0);
    }

    #[test]
    fn prefetch_fires_once_past_the_renewal_index() {
        let mut state = PoolState::default();
        state.install(IdBlock::new(0, 10), 5);
        for _ in 0..5 {
            assert!(!state.wants_prefetch(u64::MAX));
            state.advance();
        }
        assert!(state.wants_prefetch(u64::MAX));
        // Never beyond the ceiling.
        assert!(!state.wants_prefetch(10));

        state.prefetch_started = true;
        assert!(!state.wants_prefetch(u64::MAX));
    }

    #[test]
    fn abandoned_renewal_is_cancelled() {
        let mut state = PoolState::default();
        let (attempt, cancel) = state.begin_renewal();
        assert_eq!(state.phase(), PoolPhase::Renewing);
        assert_eq!(state.in_flight_attempt(), Some(attempt));

        let renewal = state.abandon_in_flight().unwrap();
        assert_eq!(renewal.attempt, attempt);
        assert!(cancel.is_cancelled());
        assert_eq!(state.phase(), PoolPhase::Fresh);

        let (next, _) = state.begin_renewal();
        assert!(next > attempt);
    }

    #[test]
    fn detached_renewal_keeps_running() {
        let mut state = PoolState::default();
        let (attempt, cancel) = state.begin_renewal();

        assert_eq!(state.detach_in_flight(), Some(attempt));
        assert!(!cancel.is_cancelled());
        assert_eq!(state.in_flight_attempt(), None);
        assert_eq!(state.phase(), PoolPhase::Renewing);

        assert!(state.take_detached(attempt));
        assert!(!state.take_detached(attempt));
        assert_eq!(state.phase(), PoolPhase::Fresh);
    }

    #[test]
    fn failure_is_kept_until_every_waiter_has_left() {
        let mut state = PoolState::default();

        let (first, _) = state.begin_renewal();
        state.join(first);
        state.join(first);
        let renewal = state.in_flight.take().unwrap();
        state.fail(renewal, AllocationFailure::Cancelled);

        // A later attempt failing does not hide the first one's failure.
        let (second, _) = state.begin_renewal();
        state.join(second);
        let renewal = state.in_flight.take().unwrap();
        state.fail(renewal, AllocationFailure::Spawn("no threads".to_owned()));

        assert_eq!(state.failure_of(first), Some(&AllocationFailure::Cancelled));
        assert_eq!(
            state.failure_of(second),
            Some(&AllocationFailure::Spawn("no threads".to_owned()))
        );

        state.leave(first);
        assert!(state.failure_of(first).is_some());
        state.leave(first);
        assert_eq!(state.failure_of(first), None);
        state.leave(second);
        assert!(state.failures.is_empty());
    }

    #[test]
    fn failure_without_waiters_is_not_kept() {
        let mut state = PoolState::default();
        state.begin_renewal();
        let renewal = state.in_flight.take().unwrap();
        state.fail(renewal, AllocationFailure::Cancelled);
        assert!(state.failures.is_empty());
    }
}
