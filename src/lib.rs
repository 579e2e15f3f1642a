//! Workloads and sample contracts for exercising the AVM execution engine.
//!
//! # Architecture
//!
//! - **Workload**: a deterministic batch of transfers and contract calls, plus
//!   the deployments it depends on
//! - **Contracts**: natively implemented sample contracts ([`Counter`], [`Relay`])
//! - **Executor**: a strategy for running a workload (one thread or many)
//!
//! # Quick Start
//!
//! ```no_run
//! use avm_bench::{ConcurrentExecutor, Executor, Workload, WorkloadConfig};
//!
//! let workload = Workload::generate(WorkloadConfig::default());
//! let (state, result) = ConcurrentExecutor::new(4).execute(&workload).unwrap();
//!
//! println!("successful: {}, digest: {}", result.successful, state.state_digest());
//! ```

pub mod executor;

pub use executor::{ConcurrentExecutor, ExecutionResult, Executor, SequentialExecutor};

use alloy_primitives::{keccak256, Address, Bytes, U256};
use avm_executor::{
    BlockContext, BlockchainRuntime, ContractFault, DAppCode, DAppJar, ExternalCapabilities,
    InMemoryState, NativeCodeRegistry, StandardCapabilities, Transaction,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;

pub const TRANSFER_ENERGY_LIMIT: u64 = 21_000;
pub const CALL_ENERGY_LIMIT: u64 = 500_000;
pub const CREATE_ENERGY_LIMIT: u64 = 1_000_000;
pub const ENERGY_PRICE: u64 = 1;

// ============================================================================
// Sample contracts
// ============================================================================

/// Call data understood by [`Counter`].
pub mod counter_op {
    /// `[INCREMENT]`: bump the count, return it.
    pub const INCREMENT: u8 = 1;
    /// `[GET]`: return the count.
    pub const GET: u8 = 2;
    /// `[INCREMENT_VIA, relay]`: bump the count, then read it back through the
    /// relay, which calls into this counter again.
    pub const INCREMENT_VIA: u8 = 3;
}

const COUNT_FIELD: &str = "count";

/// A counter kept in the contract heap.
pub struct Counter;

impl Counter {
    pub const MAIN_CLASS: &'static str = "bench.Counter";

    fn count(rt: &dyn BlockchainRuntime) -> u64 {
        rt.heap()
            .get(COUNT_FIELD)
            .and_then(|raw| <[u8; 8]>::try_from(raw).ok())
            .map(u64::from_be_bytes)
            .unwrap_or(0)
    }

    fn increment(rt: &mut dyn BlockchainRuntime) -> Result<u64, ContractFault> {
        let next = Self::count(rt) + 1;
        rt.heap_mut().put(COUNT_FIELD, next.to_be_bytes().to_vec());
        rt.log(&[keccak256(b"Incremented")], &next.to_be_bytes())?;
        Ok(next)
    }
}

impl DAppCode for Counter {
    fn main(&self, rt: &mut dyn BlockchainRuntime) -> Result<Bytes, ContractFault> {
        let data = rt.data().to_vec();
        match data.split_first() {
            Some((&counter_op::INCREMENT, _)) => {
                Ok(Bytes::copy_from_slice(&Self::increment(rt)?.to_be_bytes()))
            }
            Some((&counter_op::GET, _)) => Ok(Bytes::copy_from_slice(&Self::count(rt).to_be_bytes())),
            Some((&counter_op::INCREMENT_VIA, relay)) if relay.len() == 20 => {
                let expected = Self::increment(rt)?;
                let mut forward = rt.address().to_vec();
                forward.push(counter_op::GET);
                let limit = rt.remaining_energy() / 2;
                let echoed =
                    rt.call(Address::from_slice(relay), U256::ZERO, forward.into(), limit)?;
                rt.require(echoed.success)?;
                // The reentrant read must see the increment made above.
                rt.require(echoed.output.as_ref().map(|out| out.to_vec()) == Some(expected.to_be_bytes().to_vec()))?;
                Ok(Bytes::copy_from_slice(&expected.to_be_bytes()))
            }
            _ => Err(ContractFault::Invalid("unknown counter operation".into())),
        }
    }
}

/// Forwards `data[20..]` to the address in `data[..20]` and returns its output.
pub struct Relay;

impl Relay {
    pub const MAIN_CLASS: &'static str = "bench.Relay";
}

impl DAppCode for Relay {
    fn main(&self, rt: &mut dyn BlockchainRuntime) -> Result<Bytes, ContractFault> {
        let data = rt.data().to_vec();
        if data.len() < 20 {
            return Err(ContractFault::Invalid("relay needs a target".into()));
        }
        let (target, inner) = data.split_at(20);
        let limit = rt.remaining_energy();
        let result = rt.call(
            Address::from_slice(target),
            U256::ZERO,
            Bytes::copy_from_slice(inner),
            limit,
        )?;
        rt.require(result.success)?;
        Ok(result.output.unwrap_or_default())
    }
}

/// Transformer knowing every sample contract.
pub fn sample_registry() -> NativeCodeRegistry {
    NativeCodeRegistry::new()
        .with(Counter::MAIN_CLASS, Arc::new(Counter))
        .with(Relay::MAIN_CLASS, Arc::new(Relay))
}

// ============================================================================
// Workload Configuration & Generation
// ============================================================================

#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Number of externally owned accounts sending transactions.
    pub num_accounts: usize,
    /// Number of transactions in the measured batch.
    pub num_transactions: usize,
    /// Number of counter contracts deployed up front.
    pub num_counters: usize,
    /// 0.0 = spread over all accounts and counters, 1.0 = everything touches
    /// the same few.
    pub conflict_factor: f64,
    /// Share of transactions that call a contract instead of moving value.
    pub contract_call_ratio: f64,
    /// Share of contract calls that go through the relay and reenter.
    pub reentrant_ratio: f64,
    pub seed: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            num_accounts: 1000,
            num_transactions: 1000,
            num_counters: 8,
            conflict_factor: 0.0,
            contract_call_ratio: 0.5,
            reentrant_ratio: 0.1,
            seed: 42,
        }
    }
}

/// Deterministic account address for index `i` of a workload seeded with `seed`.
fn account_address(seed: u64, i: usize) -> Address {
    let mut preimage = seed.to_be_bytes().to_vec();
    preimage.extend_from_slice(&(i as u64).to_be_bytes());
    Address::from_slice(&keccak256(&preimage)[12..])
}

/// A complete benchmark workload.
#[derive(Debug, Clone)]
pub struct Workload {
    pub accounts: Vec<Address>,
    /// Sends every deployment.
    pub deployer: Address,
    /// Deployments, run as their own batch before `transactions`.
    pub setup: Vec<Transaction>,
    pub counters: Vec<Address>,
    pub relay: Address,
    /// The measured batch.
    pub transactions: Vec<Transaction>,
    pub config: WorkloadConfig,
}

impl Workload {
    pub fn generate(config: WorkloadConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let accounts: Vec<Address> = (0..config.num_accounts.max(2))
            .map(|i| account_address(config.seed, i))
            .collect();
        let deployer = account_address(config.seed, usize::MAX);

        let deploy = |nonce: u64, main_class: &str| {
            let payload = DAppJar::new(main_class).deployment(Bytes::new());
            Transaction::create(deployer, nonce, U256::ZERO, payload, CREATE_ENERGY_LIMIT, ENERGY_PRICE)
        };
        let mut setup: Vec<Transaction> = (0..config.num_counters.max(1))
            .map(|i| deploy(i as u64, Counter::MAIN_CLASS))
            .collect();
        setup.push(deploy(setup.len() as u64, Relay::MAIN_CLASS));

        let capabilities = StandardCapabilities;
        let mut deployed: Vec<Address> = setup
            .iter()
            .map(|tx| capabilities.generate_contract_address(tx))
            .collect();
        let relay = deployed.pop().unwrap_or_default();
        let counters = deployed;

        // A conflict factor of 1.0 narrows every choice down to two accounts
        // and one counter.
        let hot_accounts = if config.conflict_factor > 0.0 {
            (2.0 + (1.0 - config.conflict_factor) * (accounts.len() as f64 - 2.0)).max(2.0) as usize
        } else {
            accounts.len()
        };
        let hot_counters = if config.conflict_factor > 0.0 {
            (1.0 + (1.0 - config.conflict_factor) * (counters.len() as f64 - 1.0)).max(1.0) as usize
        } else {
            counters.len()
        };

        let mut nonces: HashMap<usize, u64> = HashMap::new();
        let transactions = (0..config.num_transactions)
            .map(|_| {
                let use_hot = rng.gen::<f64>() < config.conflict_factor;
                let pool = if use_hot { hot_accounts } else { accounts.len() };
                let from = rng.gen_range(0..pool);
                let nonce = nonces.entry(from).or_insert(0);
                let sender = accounts[from];
                let tx_nonce = *nonce;
                *nonce += 1;

                if rng.gen::<f64>() < config.contract_call_ratio {
                    let pool = if use_hot { hot_counters } else { counters.len() };
                    let counter = counters[rng.gen_range(0..pool)];
                    let data = if rng.gen::<f64>() < config.reentrant_ratio {
                        let mut data = vec![counter_op::INCREMENT_VIA];
                        data.extend_from_slice(relay.as_slice());
                        data
                    } else {
                        vec![counter_op::INCREMENT]
                    };
                    Transaction::call(sender, counter, tx_nonce, U256::ZERO, data, CALL_ENERGY_LIMIT, ENERGY_PRICE)
                } else {
                    let mut to = rng.gen_range(0..pool);
                    while to == from {
                        to = rng.gen_range(0..pool);
                    }
                    Transaction::call(
                        sender,
                        accounts[to],
                        tx_nonce,
                        U256::from(1_000u64),
                        Bytes::new(),
                        TRANSFER_ENERGY_LIMIT,
                        ENERGY_PRICE,
                    )
                }
            })
            .map(|tx| {
                let hash = transaction_hash(&tx);
                tx.with_hash(hash)
            })
            .collect();

        Self {
            accounts,
            deployer,
            setup,
            counters,
            relay,
            transactions,
            config,
        }
    }

    /// A fresh state at block 1 with every account funded.
    pub fn create_state(&self) -> Arc<InMemoryState> {
        let state = InMemoryState::new(BlockContext::default());
        let initial_balance = U256::from(1_000_000_000_000_000_000_000u128);
        for account in self.accounts.iter().chain(std::iter::once(&self.deployer)) {
            state.fund(*account, initial_balance);
        }
        Arc::new(state)
    }
}

/// Hash over the fields that identify a transaction.
fn transaction_hash(tx: &Transaction) -> alloy_primitives::B256 {
    let mut data = Vec::with_capacity(20 + 20 + 8 + 32 + tx.data.len());
    data.extend_from_slice(tx.sender.as_slice());
    data.extend_from_slice(tx.destination.unwrap_or_default().as_slice());
    data.extend_from_slice(&tx.nonce.to_be_bytes());
    data.extend_from_slice(&tx.value.to_be_bytes::<32>());
    data.extend_from_slice(&tx.data);
    keccak256(&data)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_generation() {
        let config = WorkloadConfig {
            num_accounts: 10,
            num_transactions: 20,
            num_counters: 3,
            seed: 123,
            ..WorkloadConfig::default()
        };
        let workload = Workload::generate(config.clone());

        assert_eq!(workload.accounts.len(), 10);
        assert_eq!(workload.transactions.len(), 20);
        assert_eq!(workload.counters.len(), 3);
        assert_eq!(workload.setup.len(), 4);

        // Same seed, same workload.
        let again = Workload::generate(config);
        assert_eq!(again.transactions, workload.transactions);
    }

    #[test]
    fn test_nonces_are_sequential_per_sender() {
        let workload = Workload::generate(WorkloadConfig {
            num_accounts: 5,
            num_transactions: 200,
            conflict_factor: 0.5,
            ..WorkloadConfig::default()
        });

        let mut next: HashMap<Address, u64> = HashMap::new();
        for tx in &workload.transactions {
            let expected = next.entry(tx.sender).or_insert(0);
            assert_eq!(tx.nonce, *expected);
            *expected += 1;
        }
    }

    #[test]
    fn test_full_conflict_uses_one_counter() {
        let workload = Workload::generate(WorkloadConfig {
            num_transactions: 100,
            conflict_factor: 1.0,
            contract_call_ratio: 1.0,
            ..WorkloadConfig::default()
        });

        assert!(workload
            .transactions
            .iter()
            .all(|tx| tx.destination == Some(workload.counters[0])));
    }
}
