//! Error types for the execution engine.
//!
//! Three layers, from the inside out:
//!
//! - [`ContractFault`]: how a single contract invocation ended badly. Produced by
//!   contract code and the runtime, matched once at the dispatcher boundary and
//!   turned into an [`AvmWrappedResult`](crate::result::AvmWrappedResult).
//! - [`FatalError`]: an unrecoverable condition. The only error allowed to leave
//!   the dispatcher; a worker that sees one latches it for the whole engine.
//! - [`AvmError`]: what the public engine API returns.

use crate::types::ExecutionType;
use std::any::Any;
use thiserror::Error;

/// Outcome kinds of a failed contract invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractFault {
    #[error("out of energy")]
    OutOfEnergy,

    #[error("out of stack")]
    OutOfStack,

    #[error("internal call depth cannot be more than 10")]
    CallDepthLimitExceeded,

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("reverted")]
    Revert,

    /// The task was asked to abort by a lower-indexed task.
    #[error("concurrent abort")]
    EarlyAbort,

    /// An error raised by the contract itself and not handled by it.
    #[error("uncaught exception: {0}")]
    Uncaught(String),

    /// A failure inside the contract that is none of the above.
    #[error("failed: {0}")]
    Failed(String),

    /// Contract code panicked.
    #[error("unexpected failure: {0}")]
    Unexpected(String),

    #[error(transparent)]
    Fatal(#[from] FatalError),
}

/// An unrecoverable engine condition. Once seen, the engine must be torn down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("internal invariant violated: {0}")]
    Invariant(String),

    #[error("corrupt object graph for {address}: {reason}")]
    CorruptObjectGraph { address: String, reason: String },

    #[error("stored code could not be loaded: {0}")]
    CodeLoad(String),

    #[error("worker thread panicked: {0}")]
    WorkerPanic(String),
}

impl FatalError {
    pub fn invariant(message: impl Into<String>) -> Self {
        FatalError::Invariant(message.into())
    }
}

/// Reasons code can be refused by the transformer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("malformed code archive: {0}")]
    MalformedArchive(String),

    #[error("class rejected: {0}")]
    RejectedClass(String),

    #[error("no code registered for main class {0}")]
    UnknownMainClass(String),

    #[error("transformed code version {found} does not match {expected}")]
    VersionMismatch { found: u32, expected: u32 },
}

/// Errors returned by the public engine API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AvmError {
    #[error("number of transactions must be larger than 0")]
    EmptyBatch,

    #[error(
        "invalid common mainchain block number {common_ancestor} for {execution_type} \
         (current block {current_block})"
    )]
    InvalidCommonAncestor {
        execution_type: ExecutionType,
        current_block: u64,
        common_ancestor: u64,
    },

    #[error("thread count must be at least 1")]
    InvalidThreadCount,

    #[error("the previous batch still has {remaining} unconsumed results")]
    BatchInFlight { remaining: usize },

    #[error("engine has been shut down")]
    ShutDown,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),

    #[error("background fatal error: {0}")]
    BackgroundFatal(#[from] FatalError),
}

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_converts_into_fault_and_api_error() {
        let fatal = FatalError::invariant("empty reentrant stack");
        let fault: ContractFault = fatal.clone().into();
        assert_eq!(fault, ContractFault::Fatal(fatal.clone()));

        let api: AvmError = fatal.into();
        assert!(api.to_string().contains("empty reentrant stack"));
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 7");

        let payload = std::panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static");
    }
}
