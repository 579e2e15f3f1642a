//! Versioned account state.
//!
//! [`ExternalState`] is the view of accounts, storage and code that every
//! invocation runs against. States form a tree: [`TransactionalState`] buffers
//! writes on top of a parent and only pushes them down on `commit`. The root of
//! the tree is supplied by the embedder; [`InMemoryState`] is the one used by the
//! tests and the benchmark harness.

use alloy_primitives::{keccak256, Address, Bytes, Sign, B256, I256, U256};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Header fields of the block being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockContext {
    pub number: u64,
    pub timestamp: u64,
    pub energy_limit: u64,
    pub difficulty: U256,
    pub miner: Address,
}

impl Default for BlockContext {
    fn default() -> Self {
        Self {
            number: 1,
            timestamp: 1_600_000_000,
            energy_limit: 15_000_000,
            difficulty: U256::from(10_000_000u64),
            miner: Address::repeat_byte(0xc0),
        }
    }
}

/// Account and storage view used by the engine.
///
/// All methods take `&self`; implementations use interior mutability so a state
/// can be shared between the task that owns it and the child states built on it.
pub trait ExternalState: Send + Sync {
    fn create_account(&self, address: Address);
    fn delete_account(&self, address: Address);
    fn has_account_state(&self, address: &Address) -> bool;

    fn get_code(&self, address: &Address) -> Option<Bytes>;
    fn put_code(&self, address: Address, code: Bytes);
    fn get_transformed_code(&self, address: &Address) -> Option<Bytes>;
    fn set_transformed_code(&self, address: Address, code: Bytes);
    fn get_object_graph(&self, address: &Address) -> Option<Bytes>;
    fn put_object_graph(&self, address: Address, graph: Bytes);

    fn get_storage(&self, address: &Address, key: &B256) -> Option<Bytes>;
    fn put_storage(&self, address: Address, key: B256, value: Bytes);
    fn remove_storage(&self, address: Address, key: B256);

    fn get_balance(&self, address: &Address) -> U256;
    fn adjust_balance(&self, address: Address, delta: I256);
    fn refund_account(&self, address: Address, amount: U256);

    fn get_nonce(&self, address: &Address) -> u64;
    fn increment_nonce(&self, address: Address);

    fn is_valid_energy_limit_for_create(&self, limit: u64) -> bool;
    fn is_valid_energy_limit_for_non_create(&self, limit: u64) -> bool;
    fn destination_address_is_safe_for_this_vm(&self, address: &Address) -> bool;

    fn block_context(&self) -> BlockContext;

    /// A fresh child whose writes stay buffered until it commits.
    fn new_child_external_state(self: Arc<Self>) -> Arc<dyn ExternalState>;

    /// Pushes buffered writes into the parent. A no-op on a root state.
    fn commit(&self);

    /// Pushes buffered writes into `target` instead of the parent.
    fn commit_to(&self, target: &dyn ExternalState);

    fn account_nonce_equals(&self, address: &Address, nonce: u64) -> bool {
        self.get_nonce(address) == nonce
    }

    fn account_balance_is_at_least(&self, address: &Address, amount: U256) -> bool {
        self.get_balance(address) >= amount
    }

    fn block_number(&self) -> u64 {
        self.block_context().number
    }

    fn block_timestamp(&self) -> u64 {
        self.block_context().timestamp
    }

    fn block_energy_limit(&self) -> u64 {
        self.block_context().energy_limit
    }

    fn block_difficulty(&self) -> U256 {
        self.block_context().difficulty
    }

    fn miner_address(&self) -> Address {
        self.block_context().miner
    }
}

/// Positive balance delta. Saturates at `I256::MAX`.
pub fn credit(amount: U256) -> I256 {
    I256::checked_from_sign_and_abs(Sign::Positive, amount).unwrap_or(I256::MAX)
}

/// Negative balance delta. Saturates at `I256::MIN`.
pub fn debit(amount: U256) -> I256 {
    I256::checked_from_sign_and_abs(Sign::Negative, amount).unwrap_or(I256::MIN)
}

fn apply_delta(balance: U256, delta: I256) -> U256 {
    let (sign, magnitude) = delta.into_sign_and_abs();
    match sign {
        Sign::Positive => balance.saturating_add(magnitude),
        Sign::Negative => balance.saturating_sub(magnitude),
    }
}

// ============================================================================
// Transactional (child) state
// ============================================================================

/// One buffered write, replayed against the parent on commit.
#[derive(Debug, Clone, PartialEq, Eq)]
enum WriteOp {
    CreateAccount(Address),
    DeleteAccount(Address),
    PutCode(Address, Bytes),
    SetTransformedCode(Address, Bytes),
    PutObjectGraph(Address, Bytes),
    PutStorage(Address, B256, Bytes),
    RemoveStorage(Address, B256),
    AdjustBalance(Address, I256),
    RefundAccount(Address, U256),
    IncrementNonce(Address),
}

impl WriteOp {
    fn apply(&self, target: &dyn ExternalState) {
        match self {
            WriteOp::CreateAccount(address) => target.create_account(*address),
            WriteOp::DeleteAccount(address) => target.delete_account(*address),
            WriteOp::PutCode(address, code) => target.put_code(*address, code.clone()),
            WriteOp::SetTransformedCode(address, code) => {
                target.set_transformed_code(*address, code.clone())
            }
            WriteOp::PutObjectGraph(address, graph) => {
                target.put_object_graph(*address, graph.clone())
            }
            WriteOp::PutStorage(address, key, value) => {
                target.put_storage(*address, *key, value.clone())
            }
            WriteOp::RemoveStorage(address, key) => target.remove_storage(*address, *key),
            WriteOp::AdjustBalance(address, delta) => target.adjust_balance(*address, *delta),
            WriteOp::RefundAccount(address, amount) => target.refund_account(*address, *amount),
            WriteOp::IncrementNonce(address) => target.increment_nonce(*address),
        }
    }
}

/// What this state has changed about one account.
#[derive(Debug, Default)]
struct AccountDelta {
    /// Deleted here; parent values are hidden.
    cleared: bool,
    exists: Option<bool>,
    credit: U256,
    debit: U256,
    nonce_increments: u64,
    code: Option<Option<Bytes>>,
    transformed_code: Option<Option<Bytes>>,
    object_graph: Option<Option<Bytes>>,
    storage: HashMap<B256, Option<Bytes>>,
}

#[derive(Debug, Default)]
struct Overlay {
    accounts: HashMap<Address, AccountDelta>,
    log: Vec<WriteOp>,
}

impl Overlay {
    fn touch(&mut self, address: Address) -> &mut AccountDelta {
        let delta = self.accounts.entry(address).or_default();
        delta.exists = Some(true);
        delta
    }
}

/// A child state that buffers writes until committed.
pub struct TransactionalState {
    parent: Arc<dyn ExternalState>,
    block: BlockContext,
    overlay: Mutex<Overlay>,
}

impl TransactionalState {
    pub fn new(parent: Arc<dyn ExternalState>) -> Self {
        let block = parent.block_context();
        Self {
            parent,
            block,
            overlay: Mutex::new(Overlay::default()),
        }
    }

    /// Number of buffered writes.
    pub fn pending_writes(&self) -> usize {
        self.overlay.lock().log.len()
    }

    /// Reads a field of the overlay. `None` means "ask the parent"; a cleared
    /// account answers `Some(default)`.
    fn local<T>(
        &self,
        address: &Address,
        field: impl FnOnce(&AccountDelta) -> Option<T>,
        cleared_default: impl FnOnce() -> T,
    ) -> Option<T> {
        let overlay = self.overlay.lock();
        let delta = overlay.accounts.get(address)?;
        match field(delta) {
            Some(value) => Some(value),
            None if delta.cleared => Some(cleared_default()),
            None => None,
        }
    }

    fn is_cleared(&self, address: &Address) -> bool {
        self.overlay
            .lock()
            .accounts
            .get(address)
            .map(|delta| delta.cleared)
            .unwrap_or(false)
    }

    fn drain_log(&self) -> Vec<WriteOp> {
        let mut overlay = self.overlay.lock();
        overlay.accounts.clear();
        std::mem::take(&mut overlay.log)
    }
}

impl ExternalState for TransactionalState {
    fn create_account(&self, address: Address) {
        let mut overlay = self.overlay.lock();
        overlay.touch(address);
        overlay.log.push(WriteOp::CreateAccount(address));
    }

    fn delete_account(&self, address: Address) {
        let mut overlay = self.overlay.lock();
        overlay.accounts.insert(
            address,
            AccountDelta {
                cleared: true,
                exists: Some(false),
                ..AccountDelta::default()
            },
        );
        overlay.log.push(WriteOp::DeleteAccount(address));
    }

    fn has_account_state(&self, address: &Address) -> bool {
        match self.local(address, |d| d.exists, || false) {
            Some(exists) => exists,
            None => self.parent.has_account_state(address),
        }
    }

    fn get_code(&self, address: &Address) -> Option<Bytes> {
        match self.local(address, |d| d.code.clone(), || None) {
            Some(code) => code,
            None => self.parent.get_code(address),
        }
    }

    fn put_code(&self, address: Address, code: Bytes) {
        let mut overlay = self.overlay.lock();
        overlay.touch(address).code = Some(Some(code.clone()));
        overlay.log.push(WriteOp::PutCode(address, code));
    }

    fn get_transformed_code(&self, address: &Address) -> Option<Bytes> {
        match self.local(address, |d| d.transformed_code.clone(), || None) {
            Some(code) => code,
            None => self.parent.get_transformed_code(address),
        }
    }

    fn set_transformed_code(&self, address: Address, code: Bytes) {
        let mut overlay = self.overlay.lock();
        overlay.touch(address).transformed_code = Some(Some(code.clone()));
        overlay.log.push(WriteOp::SetTransformedCode(address, code));
    }

    fn get_object_graph(&self, address: &Address) -> Option<Bytes> {
        match self.local(address, |d| d.object_graph.clone(), || None) {
            Some(graph) => graph,
            None => self.parent.get_object_graph(address),
        }
    }

    fn put_object_graph(&self, address: Address, graph: Bytes) {
        let mut overlay = self.overlay.lock();
        overlay.touch(address).object_graph = Some(Some(graph.clone()));
        overlay.log.push(WriteOp::PutObjectGraph(address, graph));
    }

    fn get_storage(&self, address: &Address, key: &B256) -> Option<Bytes> {
        match self.local(address, |d| d.storage.get(key).cloned(), || None) {
            Some(value) => value,
            None => self.parent.get_storage(address, key),
        }
    }

    fn put_storage(&self, address: Address, key: B256, value: Bytes) {
        let mut overlay = self.overlay.lock();
        overlay.touch(address).storage.insert(key, Some(value.clone()));
        overlay.log.push(WriteOp::PutStorage(address, key, value));
    }

    fn remove_storage(&self, address: Address, key: B256) {
        let mut overlay = self.overlay.lock();
        overlay.touch(address).storage.insert(key, None);
        overlay.log.push(WriteOp::RemoveStorage(address, key));
    }

    fn get_balance(&self, address: &Address) -> U256 {
        let (cleared, credit, debit) = {
            let overlay = self.overlay.lock();
            overlay
                .accounts
                .get(address)
                .map(|d| (d.cleared, d.credit, d.debit))
                .unwrap_or((false, U256::ZERO, U256::ZERO))
        };
        let base = if cleared {
            U256::ZERO
        } else {
            self.parent.get_balance(address)
        };
        base.saturating_add(credit).saturating_sub(debit)
    }

    fn adjust_balance(&self, address: Address, delta: I256) {
        let mut overlay = self.overlay.lock();
        let account = overlay.touch(address);
        let (sign, magnitude) = delta.into_sign_and_abs();
        match sign {
            Sign::Positive => account.credit = account.credit.saturating_add(magnitude),
            Sign::Negative => account.debit = account.debit.saturating_add(magnitude),
        }
        overlay.log.push(WriteOp::AdjustBalance(address, delta));
    }

    fn refund_account(&self, address: Address, amount: U256) {
        let mut overlay = self.overlay.lock();
        let account = overlay.touch(address);
        account.credit = account.credit.saturating_add(amount);
        overlay.log.push(WriteOp::RefundAccount(address, amount));
    }

    fn get_nonce(&self, address: &Address) -> u64 {
        let increments = self
            .overlay
            .lock()
            .accounts
            .get(address)
            .map(|d| d.nonce_increments)
            .unwrap_or(0);
        let base = if self.is_cleared(address) {
            0
        } else {
            self.parent.get_nonce(address)
        };
        base + increments
    }

    fn increment_nonce(&self, address: Address) {
        let mut overlay = self.overlay.lock();
        overlay.touch(address).nonce_increments += 1;
        overlay.log.push(WriteOp::IncrementNonce(address));
    }

    fn is_valid_energy_limit_for_create(&self, limit: u64) -> bool {
        self.parent.is_valid_energy_limit_for_create(limit)
    }

    fn is_valid_energy_limit_for_non_create(&self, limit: u64) -> bool {
        self.parent.is_valid_energy_limit_for_non_create(limit)
    }

    fn destination_address_is_safe_for_this_vm(&self, address: &Address) -> bool {
        self.parent.destination_address_is_safe_for_this_vm(address)
    }

    fn block_context(&self) -> BlockContext {
        self.block
    }

    fn new_child_external_state(self: Arc<Self>) -> Arc<dyn ExternalState> {
        Arc::new(TransactionalState::new(self))
    }

    fn commit(&self) {
        for op in self.drain_log() {
            op.apply(self.parent.as_ref());
        }
    }

    fn commit_to(&self, target: &dyn ExternalState) {
        for op in self.drain_log() {
            op.apply(target);
        }
    }
}

// ============================================================================
// In-memory root state
// ============================================================================

/// Everything stored for one account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountRecord {
    pub balance: U256,
    pub nonce: u64,
    pub code: Option<Bytes>,
    pub transformed_code: Option<Bytes>,
    pub object_graph: Option<Bytes>,
    pub storage: BTreeMap<B256, Bytes>,
}

/// Energy limit bounds for external transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnergyLimitRules {
    pub create_min: u64,
    pub create_max: u64,
    pub call_min: u64,
    pub call_max: u64,
}

impl Default for EnergyLimitRules {
    fn default() -> Self {
        Self {
            create_min: 221_000,
            create_max: 5_000_000,
            call_min: 21_000,
            call_max: 2_000_000,
        }
    }
}

/// A root state kept entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryState {
    accounts: RwLock<BTreeMap<Address, AccountRecord>>,
    foreign: RwLock<HashSet<Address>>,
    block: BlockContext,
    limits: EnergyLimitRules,
}

impl InMemoryState {
    pub fn new(block: BlockContext) -> Self {
        Self {
            block,
            ..Self::default()
        }
    }

    pub fn with_energy_limit_rules(mut self, limits: EnergyLimitRules) -> Self {
        self.limits = limits;
        self
    }

    /// Creates (or tops up) an account with the given balance.
    pub fn fund(&self, address: Address, amount: U256) {
        let mut accounts = self.accounts.write();
        let record = accounts.entry(address).or_default();
        record.balance = record.balance.saturating_add(amount);
    }

    /// Marks an address as owned by another virtual machine.
    pub fn mark_foreign(&self, address: Address) {
        self.foreign.write().insert(address);
    }

    pub fn account(&self, address: &Address) -> Option<AccountRecord> {
        self.accounts.read().get(address).cloned()
    }

    pub fn account_count(&self) -> usize {
        self.accounts.read().len()
    }

    /// Drops the transformed code of an account, forcing a re-transformation
    /// on its next call.
    pub fn clear_transformed_code(&self, address: &Address) {
        if let Some(record) = self.accounts.write().get_mut(address) {
            record.transformed_code = None;
        }
    }

    /// Hash over every account in address order.
    pub fn state_digest(&self) -> B256 {
        let accounts = self.accounts.read();
        let mut buf = Vec::with_capacity(accounts.len() * 96);
        for (address, record) in accounts.iter() {
            buf.extend_from_slice(address.as_slice());
            buf.extend_from_slice(&record.balance.to_be_bytes::<32>());
            buf.extend_from_slice(&record.nonce.to_be_bytes());
            for blob in [&record.code, &record.transformed_code, &record.object_graph] {
                match blob {
                    Some(bytes) => buf.extend_from_slice(keccak256(bytes).as_slice()),
                    None => buf.push(0),
                }
            }
            for (key, value) in &record.storage {
                buf.extend_from_slice(key.as_slice());
                buf.extend_from_slice(keccak256(value).as_slice());
            }
        }
        keccak256(&buf)
    }

    fn with_record(&self, address: Address, f: impl FnOnce(&mut AccountRecord)) {
        let mut accounts = self.accounts.write();
        f(accounts.entry(address).or_default());
    }

    fn read_record<T>(&self, address: &Address, f: impl FnOnce(&AccountRecord) -> T) -> Option<T> {
        self.accounts.read().get(address).map(f)
    }
}

impl ExternalState for InMemoryState {
    fn create_account(&self, address: Address) {
        self.with_record(address, |_| {});
    }

    fn delete_account(&self, address: Address) {
        self.accounts.write().remove(&address);
    }

    fn has_account_state(&self, address: &Address) -> bool {
        self.accounts.read().contains_key(address)
    }

    fn get_code(&self, address: &Address) -> Option<Bytes> {
        self.read_record(address, |r| r.code.clone()).flatten()
    }

    fn put_code(&self, address: Address, code: Bytes) {
        self.with_record(address, |r| r.code = Some(code));
    }

    fn get_transformed_code(&self, address: &Address) -> Option<Bytes> {
        self.read_record(address, |r| r.transformed_code.clone())
            .flatten()
    }

    fn set_transformed_code(&self, address: Address, code: Bytes) {
        self.with_record(address, |r| r.transformed_code = Some(code));
    }

    fn get_object_graph(&self, address: &Address) -> Option<Bytes> {
        self.read_record(address, |r| r.object_graph.clone()).flatten()
    }

    fn put_object_graph(&self, address: Address, graph: Bytes) {
        self.with_record(address, |r| r.object_graph = Some(graph));
    }

    fn get_storage(&self, address: &Address, key: &B256) -> Option<Bytes> {
        self.read_record(address, |r| r.storage.get(key).cloned())
            .flatten()
    }

    fn put_storage(&self, address: Address, key: B256, value: Bytes) {
        self.with_record(address, |r| {
            r.storage.insert(key, value);
        });
    }

    fn remove_storage(&self, address: Address, key: B256) {
        self.with_record(address, |r| {
            r.storage.remove(&key);
        });
    }

    fn get_balance(&self, address: &Address) -> U256 {
        self.read_record(address, |r| r.balance).unwrap_or_default()
    }

    fn adjust_balance(&self, address: Address, delta: I256) {
        self.with_record(address, |r| r.balance = apply_delta(r.balance, delta));
    }

    fn refund_account(&self, address: Address, amount: U256) {
        self.with_record(address, |r| r.balance = r.balance.saturating_add(amount));
    }

    fn get_nonce(&self, address: &Address) -> u64 {
        self.read_record(address, |r| r.nonce).unwrap_or_default()
    }

    fn increment_nonce(&self, address: Address) {
        self.with_record(address, |r| r.nonce += 1);
    }

    fn is_valid_energy_limit_for_create(&self, limit: u64) -> bool {
        (self.limits.create_min..=self.limits.create_max).contains(&limit)
    }

    fn is_valid_energy_limit_for_non_create(&self, limit: u64) -> bool {
        (self.limits.call_min..=self.limits.call_max).contains(&limit)
    }

    fn destination_address_is_safe_for_this_vm(&self, address: &Address) -> bool {
        !self.foreign.read().contains(address)
    }

    fn block_context(&self) -> BlockContext {
        self.block
    }

    fn new_child_external_state(self: Arc<Self>) -> Arc<dyn ExternalState> {
        Arc::new(TransactionalState::new(self))
    }

    fn commit(&self) {}

    fn commit_to(&self, target: &dyn ExternalState) {
        for (address, record) in self.accounts.read().iter() {
            target.create_account(*address);
            target.adjust_balance(*address, credit(record.balance));
            for _ in 0..record.nonce {
                target.increment_nonce(*address);
            }
            if let Some(code) = &record.code {
                target.put_code(*address, code.clone());
            }
            if let Some(code) = &record.transformed_code {
                target.set_transformed_code(*address, code.clone());
            }
            if let Some(graph) = &record.object_graph {
                target.put_object_graph(*address, graph.clone());
            }
            for (key, value) in &record.storage {
                target.put_storage(*address, *key, value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn root() -> Arc<InMemoryState> {
        let state = InMemoryState::new(BlockContext::default());
        state.fund(addr(1), U256::from(1_000));
        Arc::new(state)
    }

    #[test]
    fn test_child_writes_invisible_until_commit() {
        let base = root();
        let child = TransactionalState::new(base.clone());

        child.adjust_balance(addr(1), debit(U256::from(300)));
        child.adjust_balance(addr(2), credit(U256::from(300)));
        child.increment_nonce(addr(1));
        child.put_storage(addr(2), B256::repeat_byte(9), Bytes::from_static(b"v"));

        assert_eq!(child.get_balance(&addr(1)), U256::from(700));
        assert_eq!(base.get_balance(&addr(1)), U256::from(1_000));
        assert_eq!(base.get_nonce(&addr(1)), 0);
        assert!(base.get_storage(&addr(2), &B256::repeat_byte(9)).is_none());

        child.commit();

        assert_eq!(base.get_balance(&addr(1)), U256::from(700));
        assert_eq!(base.get_balance(&addr(2)), U256::from(300));
        assert_eq!(base.get_nonce(&addr(1)), 1);
        assert_eq!(
            base.get_storage(&addr(2), &B256::repeat_byte(9)),
            Some(Bytes::from_static(b"v"))
        );
        assert_eq!(child.pending_writes(), 0);
    }

    #[test]
    fn test_dropped_child_leaves_parent_untouched() {
        let base = root();
        let digest = base.state_digest();
        {
            let child = TransactionalState::new(base.clone());
            child.adjust_balance(addr(1), debit(U256::from(1)));
            child.create_account(addr(3));
        }
        assert_eq!(base.state_digest(), digest);
    }

    #[test]
    fn test_nested_children_commit_through_each_level() {
        let base = root();
        let task: Arc<dyn ExternalState> = Arc::new(TransactionalState::new(base.clone()));
        let invocation = task.clone().new_child_external_state();

        invocation.put_code(addr(5), Bytes::from_static(b"code"));
        invocation.increment_nonce(addr(1));
        assert_eq!(task.get_nonce(&addr(1)), 0);

        invocation.commit();
        assert_eq!(task.get_nonce(&addr(1)), 1);
        assert!(!base.has_account_state(&addr(5)));

        task.commit();
        assert_eq!(base.get_code(&addr(5)), Some(Bytes::from_static(b"code")));
    }

    #[test]
    fn test_delete_hides_parent_values() {
        let base = root();
        base.put_storage(addr(1), B256::ZERO, Bytes::from_static(b"x"));
        let child = TransactionalState::new(base.clone());

        child.delete_account(addr(1));
        assert!(!child.has_account_state(&addr(1)));
        assert_eq!(child.get_balance(&addr(1)), U256::ZERO);
        assert!(child.get_storage(&addr(1), &B256::ZERO).is_none());

        child.adjust_balance(addr(1), credit(U256::from(5)));
        assert_eq!(child.get_balance(&addr(1)), U256::from(5));

        child.commit();
        assert_eq!(base.get_balance(&addr(1)), U256::from(5));
        assert!(base.get_storage(&addr(1), &B256::ZERO).is_none());
    }

    #[test]
    fn test_commit_to_other_target() {
        let base = root();
        let other = Arc::new(InMemoryState::new(BlockContext::default()));
        let child = TransactionalState::new(base.clone());
        child.refund_account(addr(4), U256::from(42));

        child.commit_to(other.as_ref());
        assert_eq!(other.get_balance(&addr(4)), U256::from(42));
        assert_eq!(base.get_balance(&addr(4)), U256::ZERO);
    }

    #[test]
    fn test_energy_limit_rules_and_foreign_addresses() {
        let base = root();
        assert!(base.is_valid_energy_limit_for_create(221_000));
        assert!(!base.is_valid_energy_limit_for_create(220_999));
        assert!(base.is_valid_energy_limit_for_non_create(2_000_000));
        assert!(!base.is_valid_energy_limit_for_non_create(2_000_001));

        base.mark_foreign(addr(8));
        let child = TransactionalState::new(base);
        assert!(!child.destination_address_is_safe_for_this_vm(&addr(8)));
        assert!(child.destination_address_is_safe_for_this_vm(&addr(9)));
    }

    #[test]
    fn test_balance_deltas_saturate() {
        assert_eq!(apply_delta(U256::from(3), debit(U256::from(5))), U256::ZERO);
        assert_eq!(
            apply_delta(U256::from(3), credit(U256::from(5))),
            U256::from(8)
        );
    }
}
