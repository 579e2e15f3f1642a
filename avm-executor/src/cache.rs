//! Hot cache of loaded contracts.
//!
//! The only structure shared by all workers without ownership coordination.
//! Checkout removes the entry, so no two workers ever hold the same instance;
//! a race between workers costs a cache miss, never a shared instance.

use crate::dapp::LoadedDApp;
use crate::types::ExecutionType;
use alloy_primitives::Address;
use dashmap::DashMap;

#[derive(Debug)]
pub struct HotCache {
    entries: DashMap<Address, LoadedDApp>,
    capacity: usize,
}

impl HotCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Removes and returns the cached contract at `address`.
    pub fn checkout(&self, address: &Address) -> Option<LoadedDApp> {
        self.entries.remove(address).map(|(_, dapp)| dapp)
    }

    /// Returns a contract to the cache, evicting another entry when full.
    pub fn checkin(&self, address: Address, dapp: LoadedDApp) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&address) {
            let victim = self.entries.iter().next().map(|entry| *entry.key());
            if let Some(victim) = victim {
                self.entries.remove(&victim);
            }
        }
        self.entries.insert(address, dapp);
    }

    /// Drops every entry whose code was loaded at or after `block_number`.
    pub fn validate_code_cache(&self, block_number: u64) {
        self.entries
            .retain(|_, dapp| dapp.has_valid_cached_code(block_number));
    }

    /// Forgets cached data but keeps cached code.
    pub fn purge_data_cache(&self) {
        self.entries
            .iter_mut()
            .for_each(|mut entry| entry.value_mut().clear_data_state());
    }

    /// Forgets the cached data of one contract, keeping its code.
    pub fn clear_data(&self, address: &Address) {
        if let Some(mut entry) = self.entries.get_mut(address) {
            entry.value_mut().clear_data_state();
        }
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.entries.contains_key(address)
    }

    pub fn peek<T>(&self, address: &Address, f: impl FnOnce(&LoadedDApp) -> T) -> Option<T> {
        self.entries.get(address).map(|entry| f(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// How a call may use the hot cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheDecision {
    /// The checked-out entry is unusable and goes straight back.
    pub return_unused: bool,
    /// Check the contract (back) in after the call.
    pub write_back: bool,
    /// Take the object graph from the cached entry instead of storage.
    pub read_data: bool,
    /// On success, record the post-call graph in the cached entry.
    pub update_data: bool,
}

impl CacheDecision {
    /// Whether a call under `execution_type` checks the cache out at all.
    pub fn consults_cache(execution_type: ExecutionType) -> bool {
        execution_type != ExecutionType::AssumeDeepSidechain
    }

    /// Decides cache use for a call given what checkout returned.
    pub fn decide(
        execution_type: ExecutionType,
        cached: Option<&LoadedDApp>,
        current_block: u64,
        common_ancestor: u64,
    ) -> Self {
        match execution_type {
            ExecutionType::AssumeMainchain | ExecutionType::SwitchingMainchain => Self {
                return_unused: false,
                write_back: true,
                read_data: cached.is_some_and(|d| d.has_valid_cached_data(current_block)),
                update_data: true,
            },
            ExecutionType::AssumeSidechain | ExecutionType::EthCall => {
                let floor = common_ancestor + 1;
                match cached {
                    Some(dapp) if !dapp.has_valid_cached_code(floor) => Self {
                        return_unused: true,
                        ..Self::default()
                    },
                    Some(dapp) => Self {
                        write_back: true,
                        read_data: dapp.has_valid_cached_data(floor),
                        ..Self::default()
                    },
                    None => Self::default(),
                }
            }
            ExecutionType::AssumeDeepSidechain => Self::default(),
            ExecutionType::Mining => Self {
                write_back: cached.is_some(),
                ..Self::default()
            },
        }
    }
}
