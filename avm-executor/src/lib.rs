//! Concurrent transaction execution core of the AVM.
//!
//! A batch of transactions is executed by a fixed pool of worker threads.
//! Transactions run optimistically and in parallel; conflicts over an address
//! are settled by the [`ResourceMonitor`](resource_monitor::ResourceMonitor),
//! which lets the lower index win and restarts the loser. Every transaction
//! commits its state changes strictly in index order, so the outcome of a batch
//! is the same as running it sequentially.
//!
//! # Core Components
//!
//! - **AvmExecutor**: owns the workers and accepts batches
//! - **HandoffMonitor**: hands tasks to workers and results back in order
//! - **ResourceMonitor**: per-address ownership, aborts and the commit sequence
//! - **AvmCore**: validation, billing and dispatch of a single transaction
//! - **HotCache**: loaded contracts reused across transactions and blocks
//!
//! # Example
//!
//! ```rust,ignore
//! use avm_executor::*;
//! use std::sync::Arc;
//!
//! let environment = SharedEnvironment::new(Arc::new(NativeCodeRegistry::new()));
//! let mut avm = AvmExecutor::start(
//!     AvmConfiguration::with_threads(4),
//!     Arc::new(StandardCapabilities),
//!     Arc::new(environment),
//! )?;
//!
//! let futures = avm.run(state, transactions, ExecutionType::AssumeMainchain, block - 1)?;
//! for future in &futures {
//!     println!("{:?}", future.get_result()?);
//! }
//! avm.shutdown()?;
//! ```

pub mod cache;
pub mod capabilities;
pub mod config;
pub mod dapp;
pub mod dispatch;
pub mod energy;
pub mod environment;
pub mod error;
pub mod executor;
pub mod reentrant;
pub mod resource_monitor;
pub mod result;
pub mod runtime;
pub mod scheduler;
pub mod side_effects;
pub mod state;
pub mod task;
pub mod types;

mod call;
mod creator;


pub use capabilities::{ExternalCapabilities, StandardCapabilities};
pub use config::AvmConfiguration;
pub use dapp::{CodeAndArguments, DAppCode, DAppHeap, DAppJar};
pub use energy::PricingPolicy;
pub use environment::{DAppTransformer, NativeCodeRegistry, SharedEnvironment};
pub use error::{AvmError, ContractFault, FatalError, TransformError};
pub use executor::{AvmCoreStats, AvmExecutor, AvmThreadStats};
pub use result::{AvmInternalError, AvmWrappedResult, TransactionStatus};
pub use runtime::{BlockchainRuntime, CallResult};
pub use scheduler::{FutureResult, TransactionOutcome};
pub use state::{BlockContext, EnergyLimitRules, ExternalState, InMemoryState};
pub use types::{ExecutionType, InternalTransaction, Log, Transaction, TxnIndex};
