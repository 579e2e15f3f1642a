//! Per-transaction execution context.

use crate::reentrant::ReentrantCallStack;
use crate::resource_monitor::{AbortSignal, TaskHandle};
use crate::side_effects::SideEffects;
use crate::state::{ExternalState, TransactionalState};
use crate::types::{ExecutionType, Transaction, TxnIndex};
use alloy_primitives::{Address, B256};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// Hard limit on nested internal transactions.
pub const MAX_CALL_DEPTH: usize = 10;

/// Mutable context of one transaction, reset at the start of every attempt.
pub struct TransactionTask {
    transaction: Transaction,
    handle: TaskHandle,
    execution_type: ExecutionType,
    common_ancestor: u64,
    println_enabled: bool,

    parent_state: Arc<dyn ExternalState>,
    kernel: Arc<TransactionalState>,
    side_effects: Vec<SideEffects>,
    reentrant_stack: ReentrantCallStack,
    depth: usize,
    self_destructs: BTreeSet<Address>,
    /// Storage slots removed while holding a value; each earns one refund.
    reset_storage_keys: BTreeSet<(Address, B256)>,
    output: String,
    /// Contract whose hot cache data this attempt replaced.
    cached_data_write: Option<Address>,
}

impl TransactionTask {
    pub fn new(
        parent_state: Arc<dyn ExternalState>,
        transaction: Transaction,
        index: TxnIndex,
        execution_type: ExecutionType,
        common_ancestor: u64,
    ) -> Self {
        let kernel = Arc::new(TransactionalState::new(parent_state.clone()));
        Self {
            transaction,
            handle: TaskHandle {
                index,
                abort: AbortSignal::default(),
            },
            execution_type,
            common_ancestor,
            println_enabled: false,
            parent_state,
            kernel,
            side_effects: vec![SideEffects::new()],
            reentrant_stack: ReentrantCallStack::new(),
            depth: 0,
            self_destructs: BTreeSet::new(),
            reset_storage_keys: BTreeSet::new(),
            output: String::new(),
            cached_data_write: None,
        }
    }

    pub fn with_println(mut self, enabled: bool) -> Self {
        self.println_enabled = enabled;
        self
    }

    /// Discards everything the previous attempt did.
    pub fn start_new_transaction(&mut self) {
        self.handle.abort.reset();
        self.kernel = Arc::new(TransactionalState::new(self.parent_state.clone()));
        self.side_effects.clear();
        self.side_effects.push(SideEffects::new());
        self.reentrant_stack.clear();
        self.depth = 0;
        self.self_destructs.clear();
        self.reset_storage_keys.clear();
        self.output.clear();
        self.cached_data_write = None;
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn index(&self) -> TxnIndex {
        self.handle.index
    }

    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    pub fn abort_signal(&self) -> &AbortSignal {
        &self.handle.abort
    }

    pub fn is_aborted(&self) -> bool {
        self.handle.abort.is_set()
    }

    pub fn execution_type(&self) -> ExecutionType {
        self.execution_type
    }

    pub fn common_ancestor(&self) -> u64 {
        self.common_ancestor
    }

    /// Sender of the external transaction.
    pub fn origin(&self) -> Address {
        self.transaction.sender
    }

    /// Block number of the state the batch runs on.
    pub fn current_block(&self) -> u64 {
        self.parent_state.block_number()
    }

    pub fn parent_state(&self) -> &Arc<dyn ExternalState> {
        &self.parent_state
    }

    /// The state this attempt writes into.
    pub fn kernel(&self) -> &Arc<TransactionalState> {
        &self.kernel
    }

    pub fn kernel_state(&self) -> Arc<dyn ExternalState> {
        self.kernel.clone()
    }

    pub(crate) fn note_cached_data_write(&mut self, address: Address) {
        self.cached_data_write = Some(address);
    }

    pub(crate) fn take_cached_data_write(&mut self) -> Option<Address> {
        self.cached_data_write.take()
    }

    pub(crate) fn commit_kernel(&self) {
        self.kernel.commit();
    }

    pub fn push_side_effects(&mut self, side_effects: SideEffects) {
        self.side_effects.push(side_effects);
    }

    pub fn pop_side_effects(&mut self) -> Option<SideEffects> {
        self.side_effects.pop()
    }

    /// Frame collecting side effects right now. The root frame always exists.
    pub fn peek_side_effects(&mut self) -> &mut SideEffects {
        if self.side_effects.is_empty() {
            self.side_effects.push(SideEffects::new());
        }
        let last = self.side_effects.len() - 1;
        &mut self.side_effects[last]
    }

    /// Takes the root side effects once the transaction is done.
    pub fn take_side_effects(&mut self) -> SideEffects {
        let root = self.side_effects.drain(..).next().unwrap_or_default();
        self.side_effects.push(SideEffects::new());
        root
    }

    pub fn reentrant_stack(&self) -> &ReentrantCallStack {
        &self.reentrant_stack
    }

    pub fn reentrant_stack_mut(&mut self) -> &mut ReentrantCallStack {
        &mut self.reentrant_stack
    }

    /// Number of internal transactions currently nested.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn increment_depth(&mut self) {
        self.depth += 1;
    }

    pub fn decrement_depth(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn add_self_destruct(&mut self, address: Address) {
        self.self_destructs.insert(address);
    }

    pub fn has_self_destructed(&self, address: &Address) -> bool {
        self.self_destructs.contains(address)
    }

    pub fn self_destruct_count(&self) -> u64 {
        self.self_destructs.len() as u64
    }

    pub fn add_reset_storage_key(&mut self, address: Address, key: B256) {
        self.reset_storage_keys.insert((address, key));
    }

    pub fn reset_storage_key_count(&self) -> u64 {
        self.reset_storage_keys.len() as u64
    }

    pub fn print(&mut self, message: &str) {
        if self.println_enabled {
            self.output.push_str(message);
        }
    }

    pub fn println(&mut self, message: &str) {
        if self.println_enabled {
            self.output.push_str(message);
            self.output.push('\n');
        }
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub(crate) fn flush_output(&mut self) {
        if self.output.is_empty() {
            return;
        }
        for line in self.output.lines() {
            info!(target: "avm::println", index = self.handle.index, "{line}");
        }
        self.output.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{credit, BlockContext, InMemoryState};
    use crate::types::InternalTransaction;
    use alloy_primitives::{Bytes, U256};

    fn task() -> TransactionTask {
        let base: Arc<dyn ExternalState> = Arc::new(InMemoryState::new(BlockContext::default()));
        let tx = Transaction::call(
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            0,
            U256::ZERO,
            Bytes::new(),
            100_000,
            1,
        );
        TransactionTask::new(base, tx, 3, ExecutionType::AssumeMainchain, 0).with_println(true)
    }

    #[test]
    fn test_restart_discards_attempt() {
        let mut task = task();
        let first_kernel = task.kernel().clone();

        task.kernel().adjust_balance(Address::repeat_byte(1), credit(U256::from(9)));
        task.abort_signal().set();
        task.increment_depth();
        task.add_self_destruct(Address::repeat_byte(4));
        task.add_reset_storage_key(Address::repeat_byte(4), B256::repeat_byte(1));
        task.println("hello");
        task.peek_side_effects().add_internal_transaction(InternalTransaction::contract_call(
            Address::ZERO,
            Address::ZERO,
            0,
            U256::ZERO,
            Bytes::new(),
            1,
        ));

        task.start_new_transaction();

        assert!(!task.is_aborted());
        assert!(!Arc::ptr_eq(&first_kernel, task.kernel()));
        assert_eq!(task.kernel().get_balance(&Address::repeat_byte(1)), U256::ZERO);
        assert_eq!(task.depth(), 0);
        assert_eq!(task.self_destruct_count(), 0);
        assert_eq!(task.reset_storage_key_count(), 0);
        assert!(task.output().is_empty());
        assert!(task.take_side_effects().internal_transactions().is_empty());
    }

    #[test]
    fn test_reset_storage_keys_count_once_per_slot() {
        let mut task = task();
        let contract = Address::repeat_byte(4);
        task.add_reset_storage_key(contract, B256::repeat_byte(1));
        task.add_reset_storage_key(contract, B256::repeat_byte(1));
        assert_eq!(task.reset_storage_key_count(), 1);

        task.add_reset_storage_key(contract, B256::repeat_byte(2));
        task.add_reset_storage_key(Address::repeat_byte(5), B256::repeat_byte(1));
        assert_eq!(task.reset_storage_key_count(), 3);
    }

    #[test]
    fn test_side_effect_frames() {
        let mut task = task();
        task.push_side_effects(SideEffects::new());
        task.peek_side_effects().add_log(crate::types::Log {
            address: Address::ZERO,
            topics: vec![],
            data: Bytes::new(),
        });
        let child = task.pop_side_effects().unwrap();
        task.peek_side_effects().merge(child);

        assert_eq!(task.take_side_effects().logs().len(), 1);
        assert!(task.take_side_effects().logs().is_empty());
    }

    #[test]
    fn test_self_destructs_are_counted_once() {
        let mut task = task();
        task.add_self_destruct(Address::repeat_byte(5));
        task.add_self_destruct(Address::repeat_byte(5));
        assert_eq!(task.self_destruct_count(), 1);
        assert_eq!(task.index(), 3);
    }
}
