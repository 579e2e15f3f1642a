//! Hashing, signature and address-derivation services supplied by the host.

use crate::types::Transaction;
use alloy_primitives::{keccak256, Address, B256};
use blake2::digest::consts::U32;
use blake2::Blake2b;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

type Blake2b256 = Blake2b<U32>;

/// Leading byte of every contract address derived by [`StandardCapabilities`].
pub const CONTRACT_ADDRESS_PREFIX: u8 = 0xa0;

pub trait ExternalCapabilities: Send + Sync {
    fn sha256(&self, data: &[u8]) -> B256;
    fn blake2b(&self, data: &[u8]) -> B256;
    fn keccak256(&self, data: &[u8]) -> B256;
    fn verify_ed25519(&self, data: &[u8], signature: &[u8], public_key: &[u8]) -> bool;

    /// Address of the contract a create transaction deploys. Pure.
    fn generate_contract_address(&self, tx: &Transaction) -> Address;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCapabilities;

impl ExternalCapabilities for StandardCapabilities {
    fn sha256(&self, data: &[u8]) -> B256 {
        B256::from_slice(&Sha256::digest(data))
    }

    fn blake2b(&self, data: &[u8]) -> B256 {
        B256::from_slice(&Blake2b256::digest(data))
    }

    fn keccak256(&self, data: &[u8]) -> B256 {
        keccak256(data)
    }

    fn verify_ed25519(&self, data: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
        let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        key.verify(data, &signature).is_ok()
    }

    fn generate_contract_address(&self, tx: &Transaction) -> Address {
        let mut preimage = Vec::with_capacity(28);
        preimage.extend_from_slice(tx.sender.as_slice());
        preimage.extend_from_slice(&tx.nonce.to_be_bytes());
        let hash = keccak256(&preimage);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash[12..]);
        bytes[0] = CONTRACT_ADDRESS_PREFIX;
        Address::from(bytes)
    }
}
