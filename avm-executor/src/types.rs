//! Core types shared by the execution engine.

use alloy_primitives::{Address, Bytes, B256, U256};
use std::fmt;

/// Position of a transaction within the submitted batch (0-based).
pub type TxnIndex = usize;

/// An external transaction submitted to the engine.
///
/// A missing `destination` means contract creation; `data` then holds the
/// encoded [`CodeAndArguments`](crate::dapp::CodeAndArguments).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub sender: Address,
    pub destination: Option<Address>,
    pub nonce: u64,
    pub value: U256,
    pub data: Bytes,
    pub energy_limit: u64,
    pub energy_price: u64,
    /// Quasi-identifier. May be left zero-filled.
    pub hash: B256,
}

impl Transaction {
    /// Builds a call (or plain value transfer) to `destination`.
    pub fn call(
        sender: Address,
        destination: Address,
        nonce: u64,
        value: U256,
        data: impl Into<Bytes>,
        energy_limit: u64,
        energy_price: u64,
    ) -> Self {
        Self {
            sender,
            destination: Some(destination),
            nonce,
            value,
            data: data.into(),
            energy_limit,
            energy_price,
            hash: B256::ZERO,
        }
    }

    /// Builds a contract creation.
    pub fn create(
        sender: Address,
        nonce: u64,
        value: U256,
        data: impl Into<Bytes>,
        energy_limit: u64,
        energy_price: u64,
    ) -> Self {
        Self {
            sender,
            destination: None,
            nonce,
            value,
            data: data.into(),
            energy_limit,
            energy_price,
            hash: B256::ZERO,
        }
    }

    pub fn with_hash(mut self, hash: B256) -> Self {
        self.hash = hash;
        self
    }

    pub fn is_create(&self) -> bool {
        self.destination.is_none()
    }
}

/// A call or create spawned by contract code while executing a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalTransaction {
    pub rejected: bool,
    pub sender: Address,
    pub destination: Option<Address>,
    pub nonce: u64,
    pub value: U256,
    pub data: Bytes,
    pub energy_limit: u64,
    pub energy_price: u64,
}

impl InternalTransaction {
    pub fn contract_call(
        sender: Address,
        destination: Address,
        nonce: u64,
        value: U256,
        data: Bytes,
        energy_limit: u64,
    ) -> Self {
        Self {
            rejected: false,
            sender,
            destination: Some(destination),
            nonce,
            value,
            data,
            energy_limit,
            energy_price: 0,
        }
    }

    pub fn contract_create(
        sender: Address,
        nonce: u64,
        value: U256,
        data: Bytes,
        energy_limit: u64,
    ) -> Self {
        Self {
            rejected: false,
            sender,
            destination: None,
            nonce,
            value,
            data,
            energy_limit,
            energy_price: 0,
        }
    }

    /// The transaction the dispatcher runs for this internal call.
    pub fn to_transaction(&self) -> Transaction {
        Transaction {
            sender: self.sender,
            destination: self.destination,
            nonce: self.nonce,
            value: self.value,
            data: self.data.clone(),
            energy_limit: self.energy_limit,
            energy_price: self.energy_price,
            hash: B256::ZERO,
        }
    }
}

/// A log emitted by contract code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// Chain-topology mode for a batch. Governs hot-cache eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionType {
    AssumeMainchain,
    SwitchingMainchain,
    AssumeSidechain,
    AssumeDeepSidechain,
    Mining,
    EthCall,
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionType::AssumeMainchain => "ASSUME_MAINCHAIN",
            ExecutionType::SwitchingMainchain => "SWITCHING_MAINCHAIN",
            ExecutionType::AssumeSidechain => "ASSUME_SIDECHAIN",
            ExecutionType::AssumeDeepSidechain => "ASSUME_DEEP_SIDECHAIN",
            ExecutionType::Mining => "MINING",
            ExecutionType::EthCall => "ETH_CALL",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_transaction_conversion() {
        let sender = Address::repeat_byte(1);
        let target = Address::repeat_byte(2);
        let internal = InternalTransaction::contract_call(
            sender,
            target,
            7,
            U256::from(5),
            Bytes::from_static(b"ping"),
            50_000,
        );

        let tx = internal.to_transaction();
        assert_eq!(tx.sender, sender);
        assert_eq!(tx.destination, Some(target));
        assert_eq!(tx.nonce, 7);
        assert_eq!(tx.energy_price, 0);
        assert!(!tx.is_create());
    }

    #[test]
    fn test_create_has_no_destination() {
        let tx = Transaction::create(Address::ZERO, 0, U256::ZERO, Bytes::new(), 1_000_000, 1);
        assert!(tx.is_create());
        assert_eq!(tx.hash, B256::ZERO);
    }
}
