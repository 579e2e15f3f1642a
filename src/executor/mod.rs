//! Transaction execution strategies.
//!
//! This module provides the [`Executor`] trait and its implementations. Both
//! run the same AVM engine; they differ in how many workers it gets.

mod concurrent;
mod sequential;

pub use concurrent::ConcurrentExecutor;
pub use sequential::SequentialExecutor;

use crate::{sample_registry, Workload};
use avm_executor::{
    AvmConfiguration, AvmError, AvmExecutor, ExecutionType, ExternalState, InMemoryState,
    SharedEnvironment, StandardCapabilities, TransactionStatus,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of executing a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Transactions that ran to completion.
    pub successful: usize,
    /// Transactions that were included but failed (reverted, out of energy, ...).
    pub failed: usize,
    /// Transactions refused before execution; they leave no trace in the state.
    pub rejected: usize,
    /// Energy billed across the measured batch.
    pub energy_used: u64,
    /// Attempts thrown away because a lower-indexed transaction claimed a
    /// resource first. Always 0 with a single worker.
    pub aborts: u64,
}

impl ExecutionResult {
    /// Total number of transactions processed.
    pub fn total(&self) -> usize {
        self.successful + self.failed + self.rejected
    }

    /// Whether two runs produced the same per-transaction outcome counts.
    pub fn same_outcome(&self, other: &Self) -> bool {
        self.successful == other.successful
            && self.failed == other.failed
            && self.rejected == other.rejected
            && self.energy_used == other.energy_used
    }
}

/// Trait for different transaction execution strategies.
///
/// # Implementing a New Executor
///
/// ```ignore
/// use avm_bench::executor::{Executor, ExecutionResult};
/// use avm_bench::Workload;
///
/// pub struct PinnedExecutor {
///     pub cores: Vec<usize>,
/// }
///
/// impl Executor for PinnedExecutor {
///     fn execute(
///         &self,
///         workload: &Workload,
///     ) -> Result<(Arc<InMemoryState>, ExecutionResult), AvmError> {
///         // Your implementation here
///         todo!()
///     }
/// }
/// ```
pub trait Executor {
    /// Deploys the workload's contracts, then runs its transactions as one
    /// batch on a fresh state.
    ///
    /// # Returns
    /// A tuple of (final state, result of the measured batch).
    fn execute(
        &self,
        workload: &Workload,
    ) -> Result<(Arc<InMemoryState>, ExecutionResult), AvmError>;

    /// Returns a human-readable name for this executor.
    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// Runs `workload` on an engine started with `config` and shuts it down.
pub(crate) fn run_on_avm(
    config: AvmConfiguration,
    workload: &Workload,
) -> Result<(Arc<InMemoryState>, ExecutionResult), AvmError> {
    let environment = SharedEnvironment::new(Arc::new(sample_registry()));
    let mut avm = AvmExecutor::start(config, Arc::new(StandardCapabilities), Arc::new(environment))?;
    let state = workload.create_state();
    // A fresh state sits at block 1 on top of genesis.
    let common_ancestor = state.block_context().number - 1;

    let setup = avm.run(
        state.clone(),
        workload.setup.clone(),
        ExecutionType::AssumeMainchain,
        common_ancestor,
    )?;
    for future in &setup {
        let result = future.get_result()?;
        if !result.is_success() {
            warn!(index = future.index(), ?result, "deployment failed");
        }
    }

    let mut result = ExecutionResult::default();
    if !workload.transactions.is_empty() {
        let futures = avm.run(
            state.clone(),
            workload.transactions.clone(),
            ExecutionType::AssumeMainchain,
            common_ancestor,
        )?;
        for future in &futures {
            let outcome = future.get_result()?;
            result.energy_used += outcome.energy_used();
            match outcome.status() {
                TransactionStatus::Successful => result.successful += 1,
                TransactionStatus::Rejected => result.rejected += 1,
                _ => result.failed += 1,
            }
        }
    }

    result.aborts = avm.stats().total_aborts();
    debug!(?result, "workload executed");
    avm.shutdown()?;
    Ok((state, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WorkloadConfig;

    fn workload(conflict_factor: f64, seed: u64) -> Workload {
        Workload::generate(WorkloadConfig {
            num_accounts: 50,
            num_transactions: 300,
            num_counters: 4,
            conflict_factor,
            contract_call_ratio: 0.6,
            reentrant_ratio: 0.25,
            seed,
        })
    }

    #[test]
    fn test_executors_agree() {
        for (conflict_factor, seed) in [(0.0, 1), (0.5, 2), (1.0, 3)] {
            let workload = workload(conflict_factor, seed);
            let (sequential_state, sequential) = SequentialExecutor::new().execute(&workload).unwrap();
            let (concurrent_state, concurrent) = ConcurrentExecutor::new(6).execute(&workload).unwrap();

            assert!(
                sequential.same_outcome(&concurrent),
                "conflict {conflict_factor}: {sequential:?} vs {concurrent:?}"
            );
            assert_eq!(sequential_state.state_digest(), concurrent_state.state_digest());
            assert_eq!(sequential.aborts, 0);
        }
    }

    #[test]
    fn test_every_transaction_is_accepted() {
        let workload = workload(0.5, 7);
        let (_, result) = ConcurrentExecutor::new(4).execute(&workload).unwrap();

        assert_eq!(result.total(), workload.transactions.len());
        assert_eq!(result.rejected, 0);
        assert_eq!(result.failed, 0);
    }

    #[test]
    fn test_counter_reaches_call_count() {
        let workload = Workload::generate(WorkloadConfig {
            num_accounts: 20,
            num_transactions: 100,
            num_counters: 1,
            contract_call_ratio: 1.0,
            reentrant_ratio: 0.0,
            ..WorkloadConfig::default()
        });
        let (state, result) = ConcurrentExecutor::new(4).execute(&workload).unwrap();
        assert_eq!(result.successful, 100);

        let reader = workload.accounts[0];
        let read = avm_executor::Transaction::call(
            reader,
            workload.counters[0],
            workload
                .transactions
                .iter()
                .filter(|tx| tx.sender == reader)
                .count() as u64,
            alloy_primitives::U256::ZERO,
            vec![crate::counter_op::GET],
            crate::CALL_ENERGY_LIMIT,
            crate::ENERGY_PRICE,
        );
        let environment = SharedEnvironment::new(Arc::new(sample_registry()));
        let mut avm = AvmExecutor::start(
            AvmConfiguration::with_threads(1),
            Arc::new(StandardCapabilities),
            Arc::new(environment),
        )
        .unwrap();
        let futures = avm.run(state, vec![read], ExecutionType::EthCall, 0).unwrap();
        let output = futures[0].get_result().unwrap().output().cloned().unwrap();
        assert_eq!(output.as_ref(), &100u64.to_be_bytes()[..]);
    }
}
