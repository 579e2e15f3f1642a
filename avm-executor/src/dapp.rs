//! Contracts as the engine sees them.
//!
//! Contract code is opaque: a [`DAppCode`] entry point obtained from the
//! transformer. Its persistent instance state is a [`DAppHeap`], stored between
//! transactions as an [`ObjectGraph`] (bytes tagged with the next object hash).

use crate::error::ContractFault;
use crate::runtime::BlockchainRuntime;
use alloy_primitives::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Entry points of a deployed contract.
pub trait DAppCode: Send + Sync {
    /// Static initialization, run once at deployment. The deployment arguments
    /// are available through [`BlockchainRuntime::data`].
    fn initialize(&self, runtime: &mut dyn BlockchainRuntime) -> Result<(), ContractFault> {
        let _ = runtime;
        Ok(())
    }

    /// Handles one call. The call payload is [`BlockchainRuntime::data`].
    fn main(&self, runtime: &mut dyn BlockchainRuntime) -> Result<Bytes, ContractFault>;
}

/// Code ready to run, produced by the transformer.
#[derive(Clone)]
pub struct LoadedCode {
    main_class: Arc<str>,
    dapp: Arc<dyn DAppCode>,
    interned: Arc<[String]>,
}

impl LoadedCode {
    pub fn new(main_class: &str, dapp: Arc<dyn DAppCode>, classes: Vec<String>) -> Self {
        Self {
            main_class: Arc::from(main_class),
            dapp,
            interned: Arc::from(classes),
        }
    }

    pub fn main_class(&self) -> &str {
        &self.main_class
    }

    pub fn dapp(&self) -> &dyn DAppCode {
        self.dapp.as_ref()
    }

    /// Class table shared by every instance of this code.
    pub fn interned_classes(&self) -> &Arc<[String]> {
        &self.interned
    }

    pub fn class_count(&self) -> usize {
        self.interned.len()
    }
}

impl fmt::Debug for LoadedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedCode")
            .field("main_class", &self.main_class)
            .field("classes", &self.interned.len())
            .finish()
    }
}

/// A loaded contract as kept by the hot cache.
///
/// Code and data carry the block height they were loaded at so the cache can
/// tell whether they are still valid on the chain being executed.
#[derive(Debug, Clone)]
pub struct LoadedDApp {
    code: LoadedCode,
    loaded_code_block: Option<u64>,
    loaded_data_block: Option<u64>,
    cached_graph: Option<ObjectGraph>,
}

impl LoadedDApp {
    /// A freshly loaded contract with no cached data.
    pub fn new(code: LoadedCode, block_number: u64) -> Self {
        Self {
            code,
            loaded_code_block: Some(block_number),
            loaded_data_block: None,
            cached_graph: None,
        }
    }

    pub fn code(&self) -> &LoadedCode {
        &self.code
    }

    pub fn loaded_code_block(&self) -> Option<u64> {
        self.loaded_code_block
    }

    pub fn loaded_data_block(&self) -> Option<u64> {
        self.loaded_data_block
    }

    pub fn has_valid_cached_code(&self, block_number: u64) -> bool {
        matches!(self.loaded_code_block, Some(block) if block < block_number)
    }

    pub fn has_valid_cached_data(&self, block_number: u64) -> bool {
        matches!(self.loaded_data_block, Some(block) if block < block_number) && self.cached_graph.is_some()
    }

    pub fn cached_graph(&self) -> Option<&ObjectGraph> {
        self.cached_graph.as_ref()
    }

    /// Records the object graph a successful transaction left behind.
    pub fn update_loaded_block_for_successful_transaction(
        &mut self,
        block_number: u64,
        graph: Option<ObjectGraph>,
    ) {
        match graph {
            Some(graph) => {
                self.loaded_data_block = Some(block_number);
                self.cached_graph = Some(graph);
            }
            None => self.clear_data_state(),
        }
    }

    pub fn clear_data_state(&mut self) {
        self.loaded_data_block = None;
        self.cached_graph = None;
    }
}

/// The in-memory instance state of a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DAppHeap {
    next_hash: u32,
    fields: BTreeMap<String, Vec<u8>>,
}

impl Default for DAppHeap {
    fn default() -> Self {
        Self {
            next_hash: 1,
            fields: BTreeMap::new(),
        }
    }
}

impl DAppHeap {
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.fields.get(name).map(Vec::as_slice)
    }

    /// Stores a field. A new field allocates an object hash.
    pub fn put(&mut self, name: &str, value: Vec<u8>) {
        if self.fields.insert(name.to_string(), value).is_none() {
            self.allocate_hash();
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        self.fields.remove(name)
    }

    pub fn allocate_hash(&mut self) -> u32 {
        let hash = self.next_hash;
        self.next_hash = self.next_hash.wrapping_add(1);
        hash
    }

    pub fn next_hash(&self) -> u32 {
        self.next_hash
    }

    pub fn capture(&self) -> Result<ObjectGraph, String> {
        let data = bincode::serialize(&self.fields).map_err(|e| e.to_string())?;
        Ok(ObjectGraph {
            next_hash: self.next_hash,
            data: Bytes::from(data),
        })
    }

    pub fn restore(graph: &ObjectGraph) -> Result<Self, String> {
        let fields = bincode::deserialize(&graph.data).map_err(|e| e.to_string())?;
        Ok(Self {
            next_hash: graph.next_hash,
            fields,
        })
    }
}

/// Serialized contract heap, tagged with its next object hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectGraph {
    pub next_hash: u32,
    pub data: Bytes,
}

impl ObjectGraph {
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(4 + self.data.len());
        out.extend_from_slice(&self.next_hash.to_be_bytes());
        out.extend_from_slice(&self.data);
        out.into()
    }

    pub fn decode(raw: &[u8]) -> Option<Self> {
        let (hash, data) = raw.split_first_chunk::<4>()?;
        Some(Self {
            next_hash: u32::from_be_bytes(*hash),
            data: Bytes::copy_from_slice(data),
        })
    }

    /// Length of the encoded form, which is what reads and writes are billed on.
    pub fn encoded_len(&self) -> usize {
        4 + self.data.len()
    }
}

/// Payload of a create transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAndArguments {
    pub code: Bytes,
    pub arguments: Bytes,
}

impl CodeAndArguments {
    pub fn new(code: impl Into<Bytes>, arguments: impl Into<Bytes>) -> Self {
        Self {
            code: code.into(),
            arguments: arguments.into(),
        }
    }

    /// `len(code) | code | len(arguments) | arguments`, lengths as big-endian u32.
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(8 + self.code.len() + self.arguments.len());
        for part in [&self.code, &self.arguments] {
            out.extend_from_slice(&(part.len() as u32).to_be_bytes());
            out.extend_from_slice(part);
        }
        out.into()
    }

    pub fn decode(raw: &[u8]) -> Option<Self> {
        fn take(raw: &[u8]) -> Option<(&[u8], &[u8])> {
            let (len, rest) = raw.split_first_chunk::<4>()?;
            let len = u32::from_be_bytes(*len) as usize;
            (rest.len() >= len).then(|| rest.split_at(len))
        }
        let (code, rest) = take(raw)?;
        let (arguments, rest) = take(rest)?;
        if !rest.is_empty() || code.is_empty() {
            return None;
        }
        Some(Self::new(
            Bytes::copy_from_slice(code),
            Bytes::copy_from_slice(arguments),
        ))
    }
}

/// Deployable code archive: the main class plus the classes it ships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DAppJar {
    pub main_class: String,
    pub classes: Vec<String>,
}

impl DAppJar {
    pub fn new(main_class: &str) -> Self {
        Self {
            main_class: main_class.to_string(),
            classes: vec![main_class.to_string()],
        }
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }

    pub fn encode(&self) -> Bytes {
        // Serializing plain strings into a Vec cannot fail.
        bincode::serialize(self).map(Bytes::from).unwrap_or_default()
    }

    pub fn decode(raw: &[u8]) -> Result<Self, String> {
        bincode::deserialize(raw).map_err(|e| e.to_string())
    }

    /// Create-transaction payload deploying this archive.
    pub fn deployment(&self, arguments: impl Into<Bytes>) -> Bytes {
        CodeAndArguments::new(self.encode(), arguments).encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_and_arguments_rejects_malformed_input() {
        let payload = CodeAndArguments::new(&b"code"[..], &b"args"[..]);
        assert_eq!(CodeAndArguments::decode(&payload.encode()), Some(payload.clone()));

        let mut trailing = payload.encode().to_vec();
        trailing.push(0);
        assert_eq!(CodeAndArguments::decode(&trailing), None);
        assert_eq!(CodeAndArguments::decode(&[0, 0, 0, 9, 1]), None);
        assert_eq!(CodeAndArguments::decode(b"xy"), None);
        assert_eq!(
            CodeAndArguments::decode(&CodeAndArguments::new(Bytes::new(), &b"a"[..]).encode()),
            None
        );
    }

    #[test]
    fn test_heap_allocates_hash_for_new_fields_only() {
        let mut heap = DAppHeap::default();
        assert_eq!(heap.next_hash(), 1);
        heap.put("x", vec![1]);
        heap.put("x", vec![2]);
        heap.put("y", vec![3]);
        assert_eq!(heap.next_hash(), 3);
        assert_eq!(heap.get("x"), Some(&[2u8][..]));

        let graph = heap.capture().unwrap();
        let decoded = ObjectGraph::decode(&graph.encode()).unwrap();
        assert_eq!(decoded.encoded_len(), graph.encode().len());
        assert_eq!(DAppHeap::restore(&decoded).unwrap(), heap);
    }

    #[test]
    fn test_corrupt_graph_fails_restore() {
        let graph = ObjectGraph {
            next_hash: 1,
            data: Bytes::from_static(&[0xff; 3]),
        };
        assert!(DAppHeap::restore(&graph).is_err());
        assert!(ObjectGraph::decode(&[1, 2]).is_none());
    }

    struct Nop;
    impl DAppCode for Nop {
        fn main(&self, _: &mut dyn BlockchainRuntime) -> Result<Bytes, ContractFault> {
            Ok(Bytes::new())
        }
    }

    #[test]
    fn test_cache_validity_windows() {
        let code = LoadedCode::new("Nop", Arc::new(Nop), vec!["Nop".into()]);
        let mut dapp = LoadedDApp::new(code, 10);

        assert!(!dapp.has_valid_cached_code(10));
        assert!(dapp.has_valid_cached_code(11));
        assert!(!dapp.has_valid_cached_data(11));

        let graph = DAppHeap::default().capture().unwrap();
        dapp.update_loaded_block_for_successful_transaction(12, Some(graph));
        assert!(!dapp.has_valid_cached_data(12));
        assert!(dapp.has_valid_cached_data(13));

        dapp.clear_data_state();
        assert!(!dapp.has_valid_cached_data(13));
        assert!(dapp.has_valid_cached_code(13));
    }
}
