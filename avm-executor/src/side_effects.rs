//! Per-frame accumulator of logs and internal transactions.

use crate::types::{InternalTransaction, Log};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideEffects {
    logs: Vec<Log>,
    internal_transactions: Vec<InternalTransaction>,
}

impl SideEffects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_log(&mut self, log: Log) {
        self.logs.push(log);
    }

    pub fn add_internal_transaction(&mut self, transaction: InternalTransaction) {
        self.internal_transactions.push(transaction);
    }

    /// Appends everything from a finished child frame.
    pub fn merge(&mut self, child: SideEffects) {
        self.logs.extend(child.logs);
        self.internal_transactions
            .extend(child.internal_transactions);
    }

    pub fn clear_logs(&mut self) {
        self.logs.clear();
    }

    pub fn mark_all_internal_transactions_rejected(&mut self) {
        for transaction in &mut self.internal_transactions {
            transaction.rejected = true;
        }
    }

    /// Applied to a frame whose call did not succeed.
    pub fn discard_for_failure(&mut self) {
        self.clear_logs();
        self.mark_all_internal_transactions_rejected();
    }

    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    pub fn internal_transactions(&self) -> &[InternalTransaction] {
        &self.internal_transactions
    }

    pub fn into_parts(self) -> (Vec<Log>, Vec<InternalTransaction>) {
        (self.logs, self.internal_transactions)
    }
}
