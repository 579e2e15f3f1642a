//! Handoff between the batch submitter, the workers and result consumers.
//!
//! Tasks go out through a FIFO; finished results come back into per-index
//! slots. Consumers take results strictly in index order and are only woken
//! when the slot at the head of that sequence is filled.

use crate::error::{AvmError, FatalError};
use crate::result::AvmWrappedResult;
use crate::state::ExternalState;
use crate::task::TransactionTask;
use crate::types::TxnIndex;
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// A finished transaction: its result and the state it committed into.
#[derive(Clone)]
pub struct TransactionOutcome {
    pub result: AvmWrappedResult,
    pub external_state: Arc<dyn ExternalState>,
}

impl fmt::Debug for TransactionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionOutcome")
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

/// Work handed to a worker.
pub(crate) enum Work {
    Execute(TransactionTask),
    /// The engine is shutting down or has failed.
    Stop,
}

#[derive(Default)]
struct HandoffState {
    pending: VecDeque<TransactionTask>,
    outgoing: Vec<Option<TransactionOutcome>>,
    next_consume: TxnIndex,
    shutdown: bool,
    fatal: Option<FatalError>,
}

impl HandoffState {
    fn check_accepting(&self) -> Result<(), AvmError> {
        if let Some(fatal) = &self.fatal {
            return Err(AvmError::BackgroundFatal(fatal.clone()));
        }
        if self.shutdown {
            return Err(AvmError::ShutDown);
        }
        let remaining = self.outgoing.len() - self.next_consume;
        if remaining > 0 {
            return Err(AvmError::BatchInFlight { remaining });
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct HandoffMonitor {
    state: Mutex<HandoffState>,
    work_ready: Condvar,
    result_ready: Condvar,
}

impl HandoffMonitor {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues a new batch. Every result of the previous batch must have been
    /// consumed.
    pub(crate) fn send_batch(&self, tasks: Vec<TransactionTask>) -> Result<(), AvmError> {
        let mut state = self.state.lock();
        state.check_accepting()?;
        state.outgoing = (0..tasks.len()).map(|_| None).collect();
        state.next_consume = 0;
        state.pending.extend(tasks);
        self.work_ready.notify_all();
        Ok(())
    }

    /// Whether a new batch would be accepted right now.
    pub(crate) fn check_accepting(&self) -> Result<(), AvmError> {
        self.state.lock().check_accepting()
    }

    pub(crate) fn is_stopping(&self) -> bool {
        let state = self.state.lock();
        state.shutdown || state.fatal.is_some()
    }

    /// Blocks until there is a task to run or the engine stops.
    pub(crate) fn next_work(&self) -> Work {
        let mut state = self.state.lock();
        loop {
            if state.shutdown || state.fatal.is_some() {
                return Work::Stop;
            }
            if let Some(task) = state.pending.pop_front() {
                return Work::Execute(task);
            }
            self.work_ready.wait(&mut state);
        }
    }

    /// Stores the final outcome of the task at `index`.
    pub(crate) fn publish(&self, index: TxnIndex, outcome: TransactionOutcome) {
        let mut state = self.state.lock();
        if let Some(slot) = state.outgoing.get_mut(index) {
            *slot = Some(outcome);
        }
        if index == state.next_consume {
            self.result_ready.notify_all();
        }
    }

    /// Blocks until the result at `index` is ready and takes it.
    ///
    /// # Panics
    ///
    /// If `index` is not the next result in submission order.
    pub(crate) fn blocking_consume(&self, index: TxnIndex) -> Result<TransactionOutcome, AvmError> {
        let mut state = self.state.lock();
        assert_eq!(
            index, state.next_consume,
            "results must be consumed in submission order"
        );
        loop {
            if let Some(fatal) = &state.fatal {
                return Err(AvmError::BackgroundFatal(fatal.clone()));
            }
            if let Some(outcome) = state.outgoing.get_mut(index).and_then(Option::take) {
                state.next_consume += 1;
                return Ok(outcome);
            }
            if state.shutdown {
                return Err(AvmError::ShutDown);
            }
            self.result_ready.wait(&mut state);
        }
    }

    /// Records the first fatal error and wakes everybody.
    pub(crate) fn latch_fatal(&self, error: FatalError) {
        let mut state = self.state.lock();
        state.fatal.get_or_insert(error);
        self.work_ready.notify_all();
        self.result_ready.notify_all();
    }

    pub(crate) fn fatal(&self) -> Option<FatalError> {
        self.state.lock().fatal.clone()
    }

    pub(crate) fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.work_ready.notify_all();
        self.result_ready.notify_all();
    }
}

/// Handle on the outcome of one submitted transaction.
///
/// The first accessor blocks until the outcome is available; later calls read
/// the cached value.
pub struct FutureResult {
    index: TxnIndex,
    handoff: Arc<HandoffMonitor>,
    resolved: OnceCell<TransactionOutcome>,
}

impl FutureResult {
    pub(crate) fn new(index: TxnIndex, handoff: Arc<HandoffMonitor>) -> Self {
        Self {
            index,
            handoff,
            resolved: OnceCell::new(),
        }
    }

    pub fn index(&self) -> TxnIndex {
        self.index
    }

    /// Blocks for the outcome.
    pub fn outcome(&self) -> Result<&TransactionOutcome, AvmError> {
        self.resolved
            .get_or_try_init(|| self.handoff.blocking_consume(self.index))
    }

    pub fn get_result(&self) -> Result<AvmWrappedResult, AvmError> {
        self.outcome().map(|outcome| outcome.result.clone())
    }

    /// The transaction's own state, committed into the state the batch ran on.
    pub fn get_external_state(&self) -> Result<Arc<dyn ExternalState>, AvmError> {
        self.outcome()
            .map(|outcome| outcome.external_state.clone())
    }

    pub fn get_exception(&self) -> Result<Option<String>, AvmError> {
        self.outcome()
            .map(|outcome| outcome.result.exception().map(str::to_string))
    }
}

impl fmt::Debug for FutureResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureResult")
            .field("index", &self.index)
            .field("resolved", &self.resolved.get().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{BlockContext, InMemoryState};
    use crate::types::{ExecutionType, Transaction};
    use alloy_primitives::{Address, Bytes, U256};
    use std::thread;
    use std::time::Duration;

    fn base() -> Arc<dyn ExternalState> {
        Arc::new(InMemoryState::new(BlockContext::default()))
    }

    fn task(index: TxnIndex) -> TransactionTask {
        let tx = Transaction::call(
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            index as u64,
            U256::ZERO,
            Bytes::new(),
            50_000,
            1,
        );
        TransactionTask::new(base(), tx, index, ExecutionType::AssumeMainchain, 0)
    }

    fn outcome(energy: u64) -> TransactionOutcome {
        TransactionOutcome {
            result: AvmWrappedResult::successful(energy),
            external_state: base(),
        }
    }

    #[test]
    fn test_tasks_leave_in_fifo_order() {
        let handoff = HandoffMonitor::new();
        handoff.send_batch(vec![task(0), task(1)]).unwrap();

        for expected in 0..2 {
            match handoff.next_work() {
                Work::Execute(task) => assert_eq!(task.index(), expected),
                Work::Stop => panic!("unexpected stop"),
            }
        }
        handoff.shutdown();
        assert!(matches!(handoff.next_work(), Work::Stop));
    }

    #[test]
    fn test_results_delivered_in_index_order() {
        let handoff = HandoffMonitor::new();
        handoff.send_batch(vec![task(0), task(1), task(2)]).unwrap();
        let futures: Vec<_> = (0..3).map(|i| FutureResult::new(i, handoff.clone())).collect();

        // Finish out of order, from another thread.
        let publisher = {
            let handoff = handoff.clone();
            thread::spawn(move || {
                for index in [2, 0, 1] {
                    thread::sleep(Duration::from_millis(5));
                    handoff.publish(index, outcome(100 + index as u64));
                }
            })
        };

        for (index, future) in futures.iter().enumerate() {
            assert_eq!(
                future.get_result().unwrap().energy_used(),
                100 + index as u64
            );
        }
        publisher.join().unwrap();

        // Resolved futures answer from their cache.
        assert_eq!(futures[1].get_result().unwrap().energy_used(), 101);
        assert_eq!(futures[1].get_exception().unwrap(), None);
    }

    #[test]
    fn test_new_batch_requires_consumed_results() {
        let handoff = HandoffMonitor::new();
        handoff.send_batch(vec![task(0), task(1)]).unwrap();
        assert!(matches!(
            handoff.send_batch(vec![task(0)]),
            Err(AvmError::BatchInFlight { remaining: 2 })
        ));

        handoff.publish(0, outcome(1));
        handoff.publish(1, outcome(1));
        handoff.blocking_consume(0).unwrap();
        handoff.blocking_consume(1).unwrap();
        handoff.send_batch(vec![task(0)]).unwrap();
    }

    #[test]
    #[should_panic(expected = "submission order")]
    fn test_out_of_order_consume_panics() {
        let handoff = HandoffMonitor::new();
        handoff.send_batch(vec![task(0), task(1)]).unwrap();
        let _ = handoff.blocking_consume(1);
    }

    #[test]
    fn test_fatal_is_latched() {
        let handoff = HandoffMonitor::new();
        handoff.send_batch(vec![task(0)]).unwrap();
        handoff.latch_fatal(FatalError::invariant("first"));
        handoff.latch_fatal(FatalError::invariant("second"));

        assert_eq!(handoff.fatal(), Some(FatalError::invariant("first")));
        assert!(matches!(handoff.next_work(), Work::Stop));
        assert!(matches!(
            FutureResult::new(0, handoff.clone()).get_result(),
            Err(AvmError::BackgroundFatal(FatalError::Invariant(_)))
        ));
        assert!(matches!(
            handoff.send_batch(vec![]),
            Err(AvmError::BackgroundFatal(_))
        ));
    }
}
