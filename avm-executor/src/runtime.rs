//! The API contract code runs against.

use crate::dapp::DAppHeap;
use crate::dispatch::AvmCore;
use crate::energy::EnergyMeter;
use crate::error::{ContractFault, FatalError};
use crate::result::AvmWrappedResult;
use crate::state::{credit, ExternalState};
use crate::task::{TransactionTask, MAX_CALL_DEPTH};
use crate::types::{InternalTransaction, Log};
use alloy_primitives::{Address, Bytes, B256, U256};
use std::sync::Arc;

/// Maximum number of topics on one log.
pub const MAX_LOG_TOPICS: usize = 4;

/// Outcome of an internal call or create, as seen by the calling contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResult {
    pub success: bool,
    pub output: Option<Bytes>,
}

/// Services available to running contract code.
///
/// Every fallible method may fail with [`ContractFault::EarlyAbort`] once the
/// task has been flagged; contracts should propagate errors with `?`.
pub trait BlockchainRuntime {
    fn address(&self) -> Address;
    fn caller(&self) -> Address;
    fn origin(&self) -> Address;
    fn value(&self) -> U256;
    fn data(&self) -> &[u8];
    fn energy_limit(&self) -> u64;
    fn remaining_energy(&self) -> u64;

    fn block_number(&self) -> u64;
    fn block_timestamp(&self) -> u64;
    fn block_energy_limit(&self) -> u64;
    fn block_difficulty(&self) -> U256;
    fn block_miner(&self) -> Address;

    fn heap(&self) -> &DAppHeap;
    fn heap_mut(&mut self) -> &mut DAppHeap;

    fn balance(&mut self, address: Address) -> Result<U256, ContractFault>;
    fn balance_of_this_contract(&mut self) -> Result<U256, ContractFault>;

    fn storage_get(&mut self, key: B256) -> Result<Option<Bytes>, ContractFault>;
    fn storage_put(&mut self, key: B256, value: Bytes) -> Result<(), ContractFault>;
    fn storage_remove(&mut self, key: B256) -> Result<(), ContractFault>;

    fn log(&mut self, topics: &[B256], data: &[u8]) -> Result<(), ContractFault>;

    fn call(
        &mut self,
        target: Address,
        value: U256,
        data: Bytes,
        energy_limit: u64,
    ) -> Result<CallResult, ContractFault>;
    fn create(&mut self, value: U256, data: Bytes, energy_limit: u64)
        -> Result<CallResult, ContractFault>;
    fn self_destruct(&mut self, beneficiary: Address) -> Result<(), ContractFault>;

    fn sha256(&mut self, data: &[u8]) -> Result<B256, ContractFault>;
    fn blake2b(&mut self, data: &[u8]) -> Result<B256, ContractFault>;
    fn keccak256(&mut self, data: &[u8]) -> Result<B256, ContractFault>;
    fn verify_ed25519(
        &mut self,
        data: &[u8],
        signature: &[u8],
        public_key: &[u8],
    ) -> Result<bool, ContractFault>;

    fn charge_energy(&mut self, amount: u64) -> Result<(), ContractFault>;

    fn print(&mut self, message: &str);
    fn println(&mut self, message: &str);

    /// Reverts the call unless `condition` holds.
    fn require(&self, condition: bool) -> Result<(), ContractFault> {
        if condition {
            Ok(())
        } else {
            Err(ContractFault::Revert)
        }
    }
}

/// Runtime of one invocation frame.
pub(crate) struct FrameRuntime<'a> {
    core: &'a AvmCore,
    task: &'a mut TransactionTask,
    state: Arc<dyn ExternalState>,
    address: Address,
    caller: Address,
    value: U256,
    data: Bytes,
    meter: EnergyMeter,
    heap: DAppHeap,
}

impl<'a> FrameRuntime<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        core: &'a AvmCore,
        task: &'a mut TransactionTask,
        state: Arc<dyn ExternalState>,
        address: Address,
        caller: Address,
        value: U256,
        data: Bytes,
        meter: EnergyMeter,
        heap: DAppHeap,
    ) -> Self {
        Self {
            core,
            task,
            state,
            address,
            caller,
            value,
            data,
            meter,
            heap,
        }
    }

    pub(crate) fn task(&self) -> &TransactionTask {
        self.task
    }

    pub(crate) fn meter_mut(&mut self) -> &mut EnergyMeter {
        &mut self.meter
    }

    pub(crate) fn into_parts(self) -> (EnergyMeter, DAppHeap) {
        (self.meter, self.heap)
    }

    fn require_argument(condition: bool, message: &str) -> Result<(), ContractFault> {
        if condition {
            Ok(())
        } else {
            Err(ContractFault::Uncaught(format!("IllegalArgumentException: {message}")))
        }
    }

    /// Energy handed to a callee: what was asked for, but never more than all
    /// but one 64th of what is left.
    fn restrict_energy_limit(&self, requested: u64) -> u64 {
        let remaining = self.meter.remaining();
        requested.min(remaining - (remaining >> 6))
    }

    fn check_internal_value(&self, value: U256) -> Result<(), ContractFault> {
        Self::require_argument(
            value <= self.state.get_balance(&self.address),
            "Insufficient balance",
        )?;
        if self.task.depth() == MAX_CALL_DEPTH - 1 {
            return Err(ContractFault::CallDepthLimitExceeded);
        }
        Ok(())
    }

    fn run_internal_call(&mut self, internal: InternalTransaction) -> Result<CallResult, ContractFault> {
        let address = self.address;
        self.task
            .peek_side_effects()
            .add_internal_transaction(internal.clone());

        let tx = internal.to_transaction();
        let destination = match tx.destination {
            Some(destination) => destination,
            None => self.core.capabilities().generate_contract_address(&tx),
        };

        // Park our heap so a reentrant call into us resumes from it.
        let parked = self.heap.clone();
        self.task
            .reentrant_stack_mut()
            .top_mut()
            .ok_or_else(|| FatalError::invariant("internal call with an empty reentrant stack"))?
            .park(address, parked);

        self.task.increment_depth();
        let outcome = if self
            .core
            .resource_monitor()
            .acquire(destination, self.task.handle())
        {
            self.core
                .run_internal_transaction(&self.state, &mut *self.task, &tx)
        } else {
            Ok(AvmWrappedResult::aborted())
        };
        self.task.decrement_depth();

        self.heap = self
            .task
            .reentrant_stack_mut()
            .top_mut()
            .and_then(|top| top.take_save_item(&address))
            .ok_or_else(|| FatalError::invariant("parked heap missing after internal call"))?;

        let result = outcome?;
        if result.is_aborted() {
            return Err(ContractFault::EarlyAbort);
        }
        self.meter.charge(result.energy_used())?;
        Ok(CallResult {
            success: result.is_success(),
            output: result.output().cloned(),
        })
    }
}

impl BlockchainRuntime for FrameRuntime<'_> {
    fn address(&self) -> Address {
        self.address
    }

    fn caller(&self) -> Address {
        self.caller
    }

    fn origin(&self) -> Address {
        self.task.origin()
    }

    fn value(&self) -> U256 {
        self.value
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn energy_limit(&self) -> u64 {
        self.meter.limit()
    }

    fn remaining_energy(&self) -> u64 {
        self.meter.remaining()
    }

    fn block_number(&self) -> u64 {
        self.state.block_number()
    }

    fn block_timestamp(&self) -> u64 {
        self.state.block_timestamp()
    }

    fn block_energy_limit(&self) -> u64 {
        self.state.block_energy_limit()
    }

    fn block_difficulty(&self) -> U256 {
        self.state.block_difficulty()
    }

    fn block_miner(&self) -> Address {
        self.state.miner_address()
    }

    fn heap(&self) -> &DAppHeap {
        &self.heap
    }

    fn heap_mut(&mut self) -> &mut DAppHeap {
        &mut self.heap
    }

    fn balance(&mut self, address: Address) -> Result<U256, ContractFault> {
        self.meter.charge(self.core.pricing().runtime_query)?;
        // Every task credits the miner, so its balance is only meaningful once
        // all earlier transactions have committed.
        let monitor = self.core.resource_monitor();
        let ready = if address == self.state.miner_address() {
            monitor.await_turn(self.task.handle())
        } else {
            // Any other account is read only while owned, so a lower-indexed
            // writer either commits first or aborts this task.
            monitor.acquire(address, self.task.handle())
        };
        if !ready {
            return Err(ContractFault::EarlyAbort);
        }
        Ok(self.state.get_balance(&address))
    }

    fn balance_of_this_contract(&mut self) -> Result<U256, ContractFault> {
        self.meter.charge(self.core.pricing().runtime_query)?;
        Ok(self.state.get_balance(&self.address))
    }

    fn storage_get(&mut self, key: B256) -> Result<Option<Bytes>, ContractFault> {
        self.meter.charge(self.core.pricing().runtime_storage)?;
        let value = self.state.get_storage(&self.address, &key);
        let read = value.as_ref().map(|v| v.len()).unwrap_or(0);
        self.meter.charge(self.core.pricing().read_fee(read))?;
        Ok(value)
    }

    fn storage_put(&mut self, key: B256, value: Bytes) -> Result<(), ContractFault> {
        let pricing = self.core.pricing();
        self.meter
            .charge(pricing.runtime_storage.saturating_add(pricing.write_fee(value.len())))?;
        self.state.put_storage(self.address, key, value);
        Ok(())
    }

    fn storage_remove(&mut self, key: B256) -> Result<(), ContractFault> {
        self.meter.charge(self.core.pricing().runtime_storage)?;
        if self.state.get_storage(&self.address, &key).is_some() {
            self.task.add_reset_storage_key(self.address, key);
        }
        self.state.remove_storage(self.address, key);
        Ok(())
    }

    fn log(&mut self, topics: &[B256], data: &[u8]) -> Result<(), ContractFault> {
        Self::require_argument(topics.len() <= MAX_LOG_TOPICS, "too many log topics")?;
        let pricing = self.core.pricing();
        let fee = pricing
            .runtime_log
            .saturating_add((topics.len() as u64).saturating_mul(pricing.runtime_log_per_topic))
            .saturating_add((data.len() as u64).saturating_mul(pricing.runtime_log_per_byte));
        self.meter.charge(fee)?;
        self.task.peek_side_effects().add_log(Log {
            address: self.address,
            topics: topics.to_vec(),
            data: Bytes::copy_from_slice(data),
        });
        Ok(())
    }

    fn call(
        &mut self,
        target: Address,
        value: U256,
        data: Bytes,
        energy_limit: u64,
    ) -> Result<CallResult, ContractFault> {
        self.meter.charge(self.core.pricing().runtime_call)?;
        self.check_internal_value(value)?;
        Self::require_argument(
            self.state.destination_address_is_safe_for_this_vm(&target),
            "Attempt to execute code using a foreign virtual machine",
        )?;

        let internal = InternalTransaction::contract_call(
            self.address,
            target,
            self.state.get_nonce(&self.address),
            value,
            data,
            self.restrict_energy_limit(energy_limit),
        );
        self.run_internal_call(internal)
    }

    fn create(
        &mut self,
        value: U256,
        data: Bytes,
        energy_limit: u64,
    ) -> Result<CallResult, ContractFault> {
        self.meter.charge(self.core.pricing().runtime_create)?;
        self.check_internal_value(value)?;

        let internal = InternalTransaction::contract_create(
            self.address,
            self.state.get_nonce(&self.address),
            value,
            data,
            self.restrict_energy_limit(energy_limit),
        );
        self.run_internal_call(internal)
    }

    fn self_destruct(&mut self, beneficiary: Address) -> Result<(), ContractFault> {
        self.meter.charge(self.core.pricing().runtime_self_destruct)?;
        if !self
            .core
            .resource_monitor()
            .acquire(beneficiary, self.task.handle())
        {
            return Err(ContractFault::EarlyAbort);
        }

        let balance = self.state.get_balance(&self.address);
        self.state.delete_account(self.address);
        if beneficiary != self.address {
            self.state.adjust_balance(beneficiary, credit(balance));
        }
        self.task.add_self_destruct(self.address);
        Ok(())
    }

    fn sha256(&mut self, data: &[u8]) -> Result<B256, ContractFault> {
        self.charge_hash(data.len())?;
        Ok(self.core.capabilities().sha256(data))
    }

    fn blake2b(&mut self, data: &[u8]) -> Result<B256, ContractFault> {
        self.charge_hash(data.len())?;
        Ok(self.core.capabilities().blake2b(data))
    }

    fn keccak256(&mut self, data: &[u8]) -> Result<B256, ContractFault> {
        self.charge_hash(data.len())?;
        Ok(self.core.capabilities().keccak256(data))
    }

    fn verify_ed25519(
        &mut self,
        data: &[u8],
        signature: &[u8],
        public_key: &[u8],
    ) -> Result<bool, ContractFault> {
        self.meter.charge(self.core.pricing().runtime_signature)?;
        Ok(self
            .core
            .capabilities()
            .verify_ed25519(data, signature, public_key))
    }

    fn charge_energy(&mut self, amount: u64) -> Result<(), ContractFault> {
        self.meter.charge(amount)
    }

    fn print(&mut self, message: &str) {
        self.task.print(message);
    }

    fn println(&mut self, message: &str) {
        self.task.println(message);
    }
}

impl FrameRuntime<'_> {
    fn charge_hash(&mut self, bytes: usize) -> Result<(), ContractFault> {
        let pricing = self.core.pricing();
        self.meter.charge(
            pricing
                .runtime_hash
                .saturating_add((bytes as u64).saturating_mul(pricing.runtime_hash_per_byte)),
        )
    }
}
