//! Single-worker baseline.

use super::{run_on_avm, ExecutionResult, Executor};
use crate::Workload;
use avm_executor::{AvmConfiguration, AvmError, InMemoryState};
use std::sync::Arc;

/// Runs the engine with one worker thread.
///
/// With nobody to race against, no transaction ever aborts, which makes this
/// the reference the concurrent executor is checked against.
///
/// # Example
///
/// ```no_run
/// use avm_bench::{Executor, SequentialExecutor, Workload, WorkloadConfig};
///
/// let workload = Workload::generate(WorkloadConfig::default());
/// let (state, result) = SequentialExecutor::new().execute(&workload).unwrap();
///
/// println!("Successful: {}, Failed: {}", result.successful, result.failed);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SequentialExecutor {
    pub config: AvmConfiguration,
}

impl SequentialExecutor {
    pub fn new() -> Self {
        Self {
            config: AvmConfiguration::with_threads(1),
        }
    }
}

impl Executor for SequentialExecutor {
    fn execute(
        &self,
        workload: &Workload,
    ) -> Result<(Arc<InMemoryState>, ExecutionResult), AvmError> {
        let config = AvmConfiguration {
            thread_count: 1,
            ..self.config.clone()
        };
        run_on_avm(config, workload)
    }

    fn name(&self) -> &'static str {
        "sequential"
    }
}
