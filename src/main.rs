//! CLI for benchmarking the AVM execution engine.

use avm_bench::{
    ConcurrentExecutor, ExecutionResult, Executor, SequentialExecutor, Workload, WorkloadConfig,
};
use avm_executor::{AvmConfiguration, InMemoryState};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Runs generated workloads through the AVM on one and on many threads")]
struct Args {
    /// Number of sending accounts.
    #[arg(long, default_value_t = 1000)]
    accounts: usize,

    /// Transactions per run.
    #[arg(long, default_value_t = 1000)]
    transactions: usize,

    /// Worker threads for the concurrent run. Defaults to the available cores.
    #[arg(long)]
    threads: Option<usize>,

    /// Run a single conflict factor (0.0..=1.0) instead of the usual sweep.
    #[arg(long)]
    conflict: Option<f64>,

    /// Share of transactions calling a contract rather than transferring value.
    #[arg(long, default_value_t = 0.5)]
    contract_call_ratio: f64,

    /// Share of contract calls that reenter through the relay.
    #[arg(long, default_value_t = 0.1)]
    reentrant_ratio: f64,

    /// Counter contracts deployed before the measured batch.
    #[arg(long, default_value_t = 8)]
    counters: usize,

    /// Contracts kept in the engine's hot cache.
    #[arg(long, default_value_t = 4_096)]
    hot_cache_capacity: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

struct Run {
    state: Arc<InMemoryState>,
    result: ExecutionResult,
    elapsed: Duration,
}

fn timed(executor: &dyn Executor, workload: &Workload) -> Result<Run, avm_executor::AvmError> {
    let start = Instant::now();
    let (state, result) = executor.execute(workload)?;
    Ok(Run {
        state,
        result,
        elapsed: start.elapsed(),
    })
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    let threads = args.threads.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(4)
    });

    let configs: Vec<(String, f64)> = match args.conflict {
        Some(factor) => vec![(format!("{:.0}% conflicts", factor * 100.0), factor)],
        None => vec![
            ("No conflicts".to_string(), 0.0),
            ("25% conflicts".to_string(), 0.25),
            ("50% conflicts".to_string(), 0.5),
            ("75% conflicts".to_string(), 0.75),
            ("Full conflicts".to_string(), 1.0),
        ],
    };

    println!("=== AVM Execution Benchmark ===\n");
    println!(
        "Configuration: {} accounts, {} transactions per run, {} threads\n",
        args.accounts, args.transactions, threads
    );

    let sequential = SequentialExecutor::new();
    let concurrent = ConcurrentExecutor::with_config(AvmConfiguration {
        thread_count: threads,
        hot_cache_capacity: args.hot_cache_capacity,
        ..AvmConfiguration::default()
    });

    let mut diverged = false;
    for (name, conflict_factor) in configs {
        let workload = Workload::generate(WorkloadConfig {
            num_accounts: args.accounts,
            num_transactions: args.transactions,
            num_counters: args.counters,
            conflict_factor,
            contract_call_ratio: args.contract_call_ratio,
            reentrant_ratio: args.reentrant_ratio,
            seed: args.seed,
        });

        let (baseline, parallel) = match (timed(&sequential, &workload), timed(&concurrent, &workload)) {
            (Ok(baseline), Ok(parallel)) => (baseline, parallel),
            (Err(e), _) | (_, Err(e)) => {
                error!(%name, error = %e, "run failed");
                return ExitCode::FAILURE;
            }
        };

        for (executor, run) in [(sequential.name(), &baseline), (concurrent.name(), &parallel)] {
            let tps = args.transactions as f64 / run.elapsed.as_secs_f64();
            println!(
                "{:16} | {:10} | {:5} ok | {:4} failed | {:4} rejected | {:6} aborts | {:8.2} ms | {:8.0} tx/s",
                name,
                executor,
                run.result.successful,
                run.result.failed,
                run.result.rejected,
                run.result.aborts,
                run.elapsed.as_secs_f64() * 1000.0,
                tps
            );
        }

        let expected = baseline.state.state_digest();
        let actual = parallel.state.state_digest();
        if expected != actual || !baseline.result.same_outcome(&parallel.result) {
            error!(%name, %expected, %actual, "concurrent run diverged from the sequential one");
            diverged = true;
        } else {
            info!(%name, digest = %expected, "runs agree");
        }
    }

    if diverged {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
