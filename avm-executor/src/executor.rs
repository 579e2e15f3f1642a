//! The engine: a fixed pool of worker threads fed batch by batch.
//!
//! [`AvmExecutor::run`] validates a batch, queues one task per transaction and
//! returns immediately with a [`FutureResult`] per transaction. Workers pull
//! tasks in index order and run them optimistically. A task that loses a
//! resource to a lower index is restarted from scratch until it commits, so
//! callers only ever see final results.

use crate::capabilities::ExternalCapabilities;
use crate::config::AvmConfiguration;
use crate::dispatch::AvmCore;
use crate::environment::SharedEnvironment;
use crate::error::{panic_message, AvmError, FatalError};
use crate::scheduler::{FutureResult, HandoffMonitor, TransactionOutcome, Work};
use crate::state::ExternalState;
use crate::task::TransactionTask;
use crate::types::{ExecutionType, Transaction};
use crossbeam::utils::CachePadded;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, info_span, trace};

/// Task lifecycle events go to `info` when verbose, `trace` otherwise.
macro_rules! task_event {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            info!($($arg)+)
        } else {
            trace!($($arg)+)
        }
    };
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters kept by one worker thread.
#[derive(Debug, Default)]
pub struct AvmThreadStats {
    transactions_processed: AtomicU64,
    aborts: AtomicU64,
    running_nanos: AtomicU64,
    sleeping_nanos: AtomicU64,
}

impl AvmThreadStats {
    /// Transactions this thread ran to a final result.
    pub fn transactions_processed(&self) -> u64 {
        self.transactions_processed.load(Ordering::Relaxed)
    }

    /// Attempts this thread had to restart.
    pub fn aborts(&self) -> u64 {
        self.aborts.load(Ordering::Relaxed)
    }

    pub fn running_nanos(&self) -> u64 {
        self.running_nanos.load(Ordering::Relaxed)
    }

    pub fn sleeping_nanos(&self) -> u64 {
        self.sleeping_nanos.load(Ordering::Relaxed)
    }
}

/// Engine-wide counters.
#[derive(Debug)]
pub struct AvmCoreStats {
    batches_consumed: AtomicU64,
    transactions_consumed: AtomicU64,
    threads: Vec<CachePadded<AvmThreadStats>>,
}

impl AvmCoreStats {
    fn new(thread_count: usize) -> Self {
        Self {
            batches_consumed: AtomicU64::new(0),
            transactions_consumed: AtomicU64::new(0),
            threads: (0..thread_count).map(|_| CachePadded::default()).collect(),
        }
    }

    pub fn batches_consumed(&self) -> u64 {
        self.batches_consumed.load(Ordering::Relaxed)
    }

    pub fn transactions_consumed(&self) -> u64 {
        self.transactions_consumed.load(Ordering::Relaxed)
    }

    pub fn threads(&self) -> impl Iterator<Item = &AvmThreadStats> {
        self.threads.iter().map(|padded| &**padded)
    }

    /// Restarts summed over every worker.
    pub fn total_aborts(&self) -> u64 {
        self.threads().map(AvmThreadStats::aborts).sum()
    }
}

fn elapsed_nanos(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

// ============================================================================
// Executor
// ============================================================================

pub struct AvmExecutor {
    core: Arc<AvmCore>,
    handoff: Arc<HandoffMonitor>,
    stats: Arc<AvmCoreStats>,
    workers: Vec<JoinHandle<()>>,
}

impl AvmExecutor {
    /// Starts `config.thread_count` workers.
    pub fn start(
        config: AvmConfiguration,
        capabilities: Arc<dyn ExternalCapabilities>,
        environment: Arc<SharedEnvironment>,
    ) -> Result<Self, AvmError> {
        if config.thread_count == 0 {
            return Err(AvmError::InvalidThreadCount);
        }
        let thread_count = config.thread_count;
        let core = Arc::new(AvmCore::new(config, capabilities, environment));
        let handoff = HandoffMonitor::new();
        let stats = Arc::new(AvmCoreStats::new(thread_count));

        let mut executor = Self {
            core,
            handoff,
            stats,
            workers: Vec::with_capacity(thread_count),
        };
        for worker_id in 0..thread_count {
            let core = executor.core.clone();
            let handoff = executor.handoff.clone();
            let stats = executor.stats.clone();

            let spawned = thread::Builder::new()
                .name(format!("AVM Executor Thread {worker_id}"))
                .spawn(move || {
                    worker_loop(worker_id, &core, &handoff, &stats.threads[worker_id]);
                });
            match spawned {
                Ok(handle) => executor.workers.push(handle),
                // Dropping the executor stops the workers already running.
                Err(e) => return Err(AvmError::Spawn(e.to_string())),
            }
        }
        debug!(thread_count, "AVM executor started");
        Ok(executor)
    }

    /// Queues `transactions` for execution on top of `state`.
    ///
    /// Every result of the previous batch must have been consumed first.
    pub fn run(
        &mut self,
        state: Arc<dyn ExternalState>,
        transactions: Vec<Transaction>,
        execution_type: ExecutionType,
        common_ancestor: u64,
    ) -> Result<Vec<FutureResult>, AvmError> {
        self.handoff.check_accepting()?;
        if transactions.is_empty() {
            return Err(AvmError::EmptyBatch);
        }
        let current_block = state.block_number();
        validate_common_ancestor(execution_type, current_block, common_ancestor)?;

        self.core
            .prepare_batch(execution_type, current_block, common_ancestor);

        let println = self.core.config().enable_blockchain_println;
        let count = transactions.len();
        let tasks: Vec<_> = transactions
            .into_iter()
            .enumerate()
            .map(|(index, tx)| {
                TransactionTask::new(state.clone(), tx, index, execution_type, common_ancestor)
                    .with_println(println)
            })
            .collect();

        self.stats.batches_consumed.fetch_add(1, Ordering::Relaxed);
        self.stats
            .transactions_consumed
            .fetch_add(count as u64, Ordering::Relaxed);
        self.handoff.send_batch(tasks)?;

        debug!(count, %execution_type, current_block, "batch submitted");
        Ok((0..count)
            .map(|index| FutureResult::new(index, self.handoff.clone()))
            .collect())
    }

    pub fn stats(&self) -> &AvmCoreStats {
        &self.stats
    }

    pub fn core(&self) -> &AvmCore {
        &self.core
    }

    /// Stops and joins every worker. Reports a fatal error raised by any of
    /// them.
    pub fn shutdown(mut self) -> Result<(), AvmError> {
        self.stop_workers();
        match self.handoff.fatal() {
            Some(fatal) => Err(AvmError::BackgroundFatal(fatal)),
            None => Ok(()),
        }
    }

    fn stop_workers(&mut self) {
        self.handoff.shutdown();
        for handle in self.workers.drain(..) {
            if let Err(payload) = handle.join() {
                self.handoff
                    .latch_fatal(FatalError::WorkerPanic(panic_message(&*payload)));
            }
        }
    }
}

impl Drop for AvmExecutor {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

fn validate_common_ancestor(
    execution_type: ExecutionType,
    current_block: u64,
    common_ancestor: u64,
) -> Result<(), AvmError> {
    let valid = match execution_type {
        ExecutionType::AssumeMainchain | ExecutionType::AssumeSidechain | ExecutionType::Mining => {
            common_ancestor.checked_add(1) == Some(current_block)
        }
        ExecutionType::AssumeDeepSidechain => common_ancestor == 0,
        ExecutionType::SwitchingMainchain | ExecutionType::EthCall => true,
    };
    if valid {
        Ok(())
    } else {
        Err(AvmError::InvalidCommonAncestor {
            execution_type,
            current_block,
            common_ancestor,
        })
    }
}

// ============================================================================
// Workers
// ============================================================================

fn worker_loop(worker_id: usize, core: &AvmCore, handoff: &HandoffMonitor, stats: &AvmThreadStats) {
    let _span = info_span!("avm_worker", worker_id).entered();
    let verbose = core.config().enable_verbose_concurrent_executor;

    loop {
        let sleeping = Instant::now();
        let work = handoff.next_work();
        stats
            .sleeping_nanos
            .fetch_add(elapsed_nanos(sleeping), Ordering::Relaxed);

        let mut task = match work {
            Work::Execute(task) => task,
            Work::Stop => break,
        };

        let running = Instant::now();
        let index = task.index();
        let executed =
            panic::catch_unwind(AssertUnwindSafe(|| execute_task(core, handoff, &mut task, stats, verbose)))
                .unwrap_or_else(|payload| Err(FatalError::WorkerPanic(panic_message(&*payload))));
        stats
            .running_nanos
            .fetch_add(elapsed_nanos(running), Ordering::Relaxed);

        match executed {
            Ok(Some(outcome)) => {
                stats.transactions_processed.fetch_add(1, Ordering::Relaxed);
                handoff.publish(index, outcome);
            }
            // The engine stopped while the task was waiting on a resource.
            Ok(None) => break,
            Err(fatal) => {
                error!(index, %fatal, "fatal error, stopping the engine");
                core.resource_monitor().poison();
                handoff.latch_fatal(fatal);
                break;
            }
        }
    }
    debug!(
        processed = stats.transactions_processed(),
        aborts = stats.aborts(),
        "worker exiting"
    );
}

/// Runs `task` until it produces a final result.
///
/// Returns `Ok(None)` if the engine stops before that happens.
fn execute_task(
    core: &AvmCore,
    handoff: &HandoffMonitor,
    task: &mut TransactionTask,
    stats: &AvmThreadStats,
    verbose: bool,
) -> Result<Option<TransactionOutcome>, FatalError> {
    let index = task.index();
    let mut aborts = 0u64;

    let result = loop {
        task.start_new_transaction();
        task_event!(verbose, index, attempt = aborts, "task started");

        let result = core.process_transaction(task)?;
        if !result.is_aborted() {
            break result;
        }

        aborts += 1;
        stats.aborts.fetch_add(1, Ordering::Relaxed);
        task_event!(verbose, index, abort_index_counter = aborts, "task aborted, restarting");
        if handoff.is_stopping() || core.resource_monitor().is_poisoned() {
            return Ok(None);
        }
    };
    task_event!(verbose, index, status = ?result.status(), energy_used = result.energy_used(), "task finished");

    let result = if result.is_rejected() {
        result
    } else {
        let (logs, internal_transactions) = task.take_side_effects().into_parts();
        result.with_side_effects(logs, internal_transactions)
    };
    Ok(Some(TransactionOutcome {
        result,
        external_state: task.kernel_state(),
    }))
}
