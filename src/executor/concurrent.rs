//! Multi-worker execution.

use super::{run_on_avm, ExecutionResult, Executor};
use crate::Workload;
use avm_executor::{AvmConfiguration, AvmError, InMemoryState};
use std::sync::Arc;

/// Runs the engine with a pool of worker threads.
#[derive(Debug, Clone)]
pub struct ConcurrentExecutor {
    pub config: AvmConfiguration,
}

impl ConcurrentExecutor {
    pub fn new(threads: usize) -> Self {
        Self {
            config: AvmConfiguration::with_threads(threads),
        }
    }

    pub fn with_config(config: AvmConfiguration) -> Self {
        Self { config }
    }

    pub fn threads(&self) -> usize {
        self.config.thread_count
    }
}

impl Executor for ConcurrentExecutor {
    fn execute(
        &self,
        workload: &Workload,
    ) -> Result<(Arc<InMemoryState>, ExecutionResult), AvmError> {
        run_on_avm(self.config.clone(), workload)
    }

    fn name(&self) -> &'static str {
        "concurrent"
    }
}
