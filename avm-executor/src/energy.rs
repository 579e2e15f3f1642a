//! Energy metering and the pricing policy.

use crate::error::ContractFault;
use crate::resource_monitor::AbortSignal;

/// Every numeric billing constant the engine uses.
///
/// None of these are part of the execution algorithm; embedders inject their own
/// through [`SharedEnvironment`](crate::environment::SharedEnvironment).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingPolicy {
    /// Flat cost of any external transaction.
    pub transaction_base: u64,
    pub transaction_zero_byte: u64,
    pub transaction_nonzero_byte: u64,

    pub deployment_base: u64,
    pub deployment_per_class: u64,
    pub deployment_per_code_byte: u64,

    /// Per byte of object graph (or storage value) read.
    pub read_per_byte: u64,
    /// Per byte of object graph (or storage value) written.
    pub write_per_byte: u64,

    pub self_destruct_refund: u64,
    pub reset_storage_refund: u64,

    pub runtime_query: u64,
    pub runtime_call: u64,
    pub runtime_create: u64,
    pub runtime_storage: u64,
    pub runtime_log: u64,
    pub runtime_log_per_topic: u64,
    pub runtime_log_per_byte: u64,
    pub runtime_hash: u64,
    pub runtime_hash_per_byte: u64,
    pub runtime_signature: u64,
    pub runtime_self_destruct: u64,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            transaction_base: 21_000,
            transaction_zero_byte: 4,
            transaction_nonzero_byte: 64,
            deployment_base: 200_000,
            deployment_per_class: 1_000,
            deployment_per_code_byte: 1,
            read_per_byte: 1,
            write_per_byte: 3,
            self_destruct_refund: 22_500,
            reset_storage_refund: 9_000,
            runtime_query: 100,
            runtime_call: 5_000,
            runtime_create: 5_000,
            runtime_storage: 1_000,
            runtime_log: 375,
            runtime_log_per_topic: 375,
            runtime_log_per_byte: 8,
            runtime_hash: 100,
            runtime_hash_per_byte: 1,
            runtime_signature: 3_000,
            runtime_self_destruct: 5_000,
        }
    }
}

impl PricingPolicy {
    /// Cost charged before any code runs.
    pub fn basic_transaction_cost(&self, data: &[u8]) -> u64 {
        let zeros = data.iter().filter(|b| **b == 0).count() as u64;
        let nonzeros = data.len() as u64 - zeros;
        self.transaction_base
            .saturating_add(zeros.saturating_mul(self.transaction_zero_byte))
            .saturating_add(nonzeros.saturating_mul(self.transaction_nonzero_byte))
    }

    pub fn deployment_fee(&self, class_count: usize, code_size: usize) -> u64 {
        self.deployment_base
            .saturating_add((class_count as u64).saturating_mul(self.deployment_per_class))
            .saturating_add((code_size as u64).saturating_mul(self.deployment_per_code_byte))
    }

    /// Refund for a top-level invocation, capped at half the energy used.
    pub fn refund(&self, energy_used: u64, self_destructs: u64, reset_storage_keys: u64) -> u64 {
        let earned = self_destructs
            .saturating_mul(self.self_destruct_refund)
            .saturating_add(reset_storage_keys.saturating_mul(self.reset_storage_refund));
        (energy_used / 2).min(earned)
    }

    pub fn read_fee(&self, bytes: usize) -> u64 {
        (bytes as u64).saturating_mul(self.read_per_byte)
    }

    pub fn write_fee(&self, bytes: usize) -> u64 {
        (bytes as u64).saturating_mul(self.write_per_byte)
    }
}

/// Energy budget of one invocation frame.
///
/// Owned by exactly one worker at a time. Every charge first checks the task's
/// abort signal so a task that lost a resource stops at its next charge.
#[derive(Debug)]
pub struct EnergyMeter {
    limit: u64,
    used: u64,
    /// Set by the first failed charge; every later charge fails too.
    exhausted: bool,
    abort: AbortSignal,
}

impl EnergyMeter {
    /// A meter for a frame with `limit`, of which `already_used` is spent.
    pub fn new(limit: u64, already_used: u64, abort: AbortSignal) -> Self {
        Self {
            limit,
            used: already_used.min(limit),
            exhausted: false,
            abort,
        }
    }

    pub fn charge(&mut self, amount: u64) -> Result<(), ContractFault> {
        if self.abort.is_set() {
            return Err(ContractFault::EarlyAbort);
        }
        if self.exhausted {
            return Err(ContractFault::OutOfEnergy);
        }
        match self.used.checked_add(amount) {
            Some(total) if total <= self.limit => {
                self.used = total;
                Ok(())
            }
            _ => {
                self.used = self.limit;
                self.exhausted = true;
                Err(ContractFault::OutOfEnergy)
            }
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn remaining(&self) -> u64 {
        self.limit - self.used
    }
}
