//! Transaction results.
//!
//! [`AvmWrappedResult`] is an immutable value. Every transition the dispatcher
//! makes produces a new value through one of the `with_*`/`into_*` methods, so a
//! result handed between workers is never aliased.

use crate::types::{InternalTransaction, Log};
use alloy_primitives::Bytes;

/// Externally visible status of a finished transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    Successful,
    FailedNonReverted,
    FailedReverted,
    Rejected,
}

/// Fine-grained reason behind a [`TransactionStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AvmInternalError {
    None,
    /// Internal only. Never delivered to a caller.
    Aborted,
    FailedException,
    FailedUnexpected,
    FailedOutOfEnergy,
    FailedOutOfStack,
    FailedCallDepthLimit,
    FailedInvalid,
    FailedInvalidData,
    FailedRejectedClass,
    FailedReverted,
    Failed,
    FailedRetransformation,
    RejectedInvalidEnergyPrice,
    RejectedInvalidEnergyLimit,
    RejectedInvalidNonce,
    RejectedInsufficientBalance,
}

impl AvmInternalError {
    pub fn status(self) -> TransactionStatus {
        match self {
            AvmInternalError::None => TransactionStatus::Successful,
            AvmInternalError::FailedReverted => TransactionStatus::FailedReverted,
            AvmInternalError::RejectedInvalidEnergyPrice
            | AvmInternalError::RejectedInvalidEnergyLimit
            | AvmInternalError::RejectedInvalidNonce
            | AvmInternalError::RejectedInsufficientBalance => TransactionStatus::Rejected,
            _ => TransactionStatus::FailedNonReverted,
        }
    }

    pub fn is_rejection(self) -> bool {
        self.status() == TransactionStatus::Rejected
    }
}

/// The result of one transaction (or one internal call).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvmWrappedResult {
    error: AvmInternalError,
    energy_used: u64,
    output: Option<Bytes>,
    logs: Vec<Log>,
    internal_transactions: Vec<InternalTransaction>,
    exception: Option<String>,
}

impl AvmWrappedResult {
    /// A successful result that has consumed `energy_used` so far.
    pub fn successful(energy_used: u64) -> Self {
        Self {
            error: AvmInternalError::None,
            energy_used,
            output: None,
            logs: Vec::new(),
            internal_transactions: Vec::new(),
            exception: None,
        }
    }

    /// A rejection. Nothing was charged.
    pub fn rejected(error: AvmInternalError) -> Self {
        debug_assert!(error.is_rejection());
        Self {
            error,
            ..Self::successful(0)
        }
    }

    pub fn aborted() -> Self {
        Self {
            error: AvmInternalError::Aborted,
            ..Self::successful(0)
        }
    }

    pub fn status(&self) -> TransactionStatus {
        self.error.status()
    }

    pub fn internal_error(&self) -> AvmInternalError {
        self.error
    }

    pub fn energy_used(&self) -> u64 {
        self.energy_used
    }

    pub fn output(&self) -> Option<&Bytes> {
        self.output.as_ref()
    }

    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    pub fn internal_transactions(&self) -> &[InternalTransaction] {
        &self.internal_transactions
    }

    /// Diagnostic text of an uncaught contract exception.
    pub fn exception(&self) -> Option<&str> {
        self.exception.as_deref()
    }

    pub fn is_success(&self) -> bool {
        self.error == AvmInternalError::None
    }

    pub fn is_rejected(&self) -> bool {
        self.error.is_rejection()
    }

    pub fn is_aborted(&self) -> bool {
        self.error == AvmInternalError::Aborted
    }

    pub fn is_reverted(&self) -> bool {
        self.error == AvmInternalError::FailedReverted
    }

    pub fn is_failed_unexpected(&self) -> bool {
        self.error == AvmInternalError::FailedUnexpected
    }

    #[must_use]
    pub fn with_energy_used(self, energy_used: u64) -> Self {
        Self {
            energy_used,
            ..self
        }
    }

    #[must_use]
    pub fn with_successful_output(self, output: Bytes) -> Self {
        Self {
            error: AvmInternalError::None,
            output: Some(output),
            ..self
        }
    }

    /// Marks a non-reverted failure. Output is dropped.
    #[must_use]
    pub fn with_non_reverted_failure(self, error: AvmInternalError, energy_used: u64) -> Self {
        debug_assert!(error.status() == TransactionStatus::FailedNonReverted);
        Self {
            error,
            energy_used,
            output: None,
            ..self
        }
    }

    #[must_use]
    pub fn with_reverted_failure(self, energy_used: u64) -> Self {
        Self {
            error: AvmInternalError::FailedReverted,
            energy_used,
            output: None,
            ..self
        }
    }

    #[must_use]
    pub fn with_failed_exception(self, exception: String, energy_used: u64) -> Self {
        Self {
            error: AvmInternalError::FailedException,
            energy_used,
            output: None,
            exception: Some(exception),
            ..self
        }
    }

    /// Attaches the logs and internal transactions gathered for this transaction.
    #[must_use]
    pub fn with_side_effects(
        self,
        logs: Vec<Log>,
        internal_transactions: Vec<InternalTransaction>,
    ) -> Self {
        Self {
            logs,
            internal_transactions,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AvmInternalError::None.status(), TransactionStatus::Successful);
        assert_eq!(
            AvmInternalError::FailedReverted.status(),
            TransactionStatus::FailedReverted
        );
        assert_eq!(
            AvmInternalError::RejectedInvalidNonce.status(),
            TransactionStatus::Rejected
        );
        assert_eq!(
            AvmInternalError::FailedOutOfEnergy.status(),
            TransactionStatus::FailedNonReverted
        );
        assert_eq!(
            AvmInternalError::Aborted.status(),
            TransactionStatus::FailedNonReverted
        );
    }

    #[test]
    fn test_aborted_and_rejected_charge_nothing() {
        let aborted = AvmWrappedResult::aborted();
        assert!(aborted.is_aborted());
        assert!(!aborted.is_success());
        assert_eq!(aborted.energy_used(), 0);

        let rejected = AvmWrappedResult::rejected(AvmInternalError::RejectedInsufficientBalance);
        assert!(rejected.is_rejected());
        assert_eq!(rejected.energy_used(), 0);
        assert!(rejected.logs().is_empty());
    }

    #[test]
    fn test_transitions_do_not_touch_original() {
        let base = AvmWrappedResult::successful(21_000);
        let done = base
            .clone()
            .with_successful_output(Bytes::from_static(b"ok"))
            .with_energy_used(30_000);
        assert_eq!(base.energy_used(), 21_000);
        assert!(base.output().is_none());
        assert_eq!(done.output().map(|b| b.as_ref()), Some(&b"ok"[..]));

        let failed = done.with_non_reverted_failure(AvmInternalError::FailedOutOfEnergy, 50_000);
        assert!(failed.output().is_none());
        assert_eq!(failed.energy_used(), 50_000);
    }

    #[test]
    fn test_failed_exception_keeps_diagnostic() {
        let result = AvmWrappedResult::successful(0)
            .with_failed_exception("IllegalStateException".into(), 100)
            .with_side_effects(
                vec![Log {
                    address: Address::ZERO,
                    topics: vec![],
                    data: Bytes::new(),
                }],
                vec![],
            );
        assert_eq!(result.internal_error(), AvmInternalError::FailedException);
        assert_eq!(result.exception(), Some("IllegalStateException"));
        assert_eq!(result.logs().len(), 1);
    }
}
