//! Contract instances live on the current call chain.
//!
//! Every invocation pushes a [`ReentrantState`] before running and pops it when
//! done. A frame about to call out parks its heap in its own `save_items` under
//! its address; a reentrant call into that address resumes from the newest
//! parked heap instead of storage, which has not seen the caller's writes yet.
//! Save items travel down the stack: a successful frame hands its items (and its
//! own post-call heap) to the frame below, a failed frame's items are dropped.

use crate::dapp::{DAppHeap, LoadedCode};
use alloy_primitives::Address;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ReentrantState {
    address: Address,
    code: LoadedCode,
    next_hash: u32,
    save_items: HashMap<Address, DAppHeap>,
}

impl ReentrantState {
    pub fn new(address: Address, code: LoadedCode, next_hash: u32) -> Self {
        Self {
            address,
            code,
            next_hash,
            save_items: HashMap::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn code(&self) -> &LoadedCode {
        &self.code
    }

    /// Next object hash as of the last time this frame parked or started.
    pub fn next_hash(&self) -> u32 {
        self.next_hash
    }

    pub fn save_items(&self) -> &HashMap<Address, DAppHeap> {
        &self.save_items
    }

    /// Parks the heap of the contract at `address` in this frame.
    pub fn park(&mut self, address: Address, heap: DAppHeap) {
        if address == self.address {
            self.next_hash = heap.next_hash();
        }
        self.save_items.insert(address, heap);
    }

    pub fn take_save_item(&mut self, address: &Address) -> Option<DAppHeap> {
        self.save_items.remove(address)
    }
}

#[derive(Debug, Default)]
pub struct ReentrantCallStack {
    frames: Vec<ReentrantState>,
}

impl ReentrantCallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, state: ReentrantState) {
        self.frames.push(state);
    }

    pub fn pop(&mut self) -> Option<ReentrantState> {
        self.frames.pop()
    }

    pub fn top(&self) -> Option<&ReentrantState> {
        self.frames.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut ReentrantState> {
        self.frames.last_mut()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Drops every frame above the first `len`.
    pub fn truncate(&mut self, len: usize) {
        self.frames.truncate(len);
    }

    /// Newest live frame for `address`, searching from the top.
    pub fn try_share_state(&self, address: &Address) -> Option<&ReentrantState> {
        self.frames.iter().rev().find(|s| s.address == *address)
    }

    /// Newest parked heap for `address`, searching from the top.
    pub fn find_save_item(&self, address: &Address) -> Option<&DAppHeap> {
        self.frames
            .iter()
            .rev()
            .find_map(|s| s.save_items.get(address))
    }

    /// Pops a frame that finished successfully, handing its save items and its
    /// final heap to the frame below.
    pub fn pop_committed(&mut self, final_heap: DAppHeap) -> Option<ReentrantState> {
        let mut finished = self.frames.pop()?;
        if let Some(below) = self.frames.last_mut() {
            let items = std::mem::take(&mut finished.save_items);
            below.save_items.extend(items);
            below.park(finished.address, final_heap);
        }
        Some(finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dapp::DAppCode;
    use crate::error::ContractFault;
    use crate::runtime::BlockchainRuntime;
    use alloy_primitives::Bytes;
    use std::sync::Arc;

    struct Nop;
    impl DAppCode for Nop {
        fn main(&self, _: &mut dyn BlockchainRuntime) -> Result<Bytes, ContractFault> {
            Ok(Bytes::new())
        }
    }

    fn state(byte: u8) -> ReentrantState {
        let code = LoadedCode::new("Nop", Arc::new(Nop), vec!["Nop".into()]);
        ReentrantState::new(Address::repeat_byte(byte), code, 1)
    }

    fn heap_with(value: u8) -> DAppHeap {
        let mut heap = DAppHeap::default();
        heap.put("x", vec![value]);
        heap
    }

    #[test]
    fn test_try_share_state_finds_newest() {
        let mut stack = ReentrantCallStack::new();
        stack.push(state(1));
        stack.push(state(2));
        stack.push(state(1));
        stack.top_mut().unwrap().park(Address::repeat_byte(9), heap_with(0));

        let found = stack.try_share_state(&Address::repeat_byte(1)).unwrap();
        assert!(found.save_items().contains_key(&Address::repeat_byte(9)));
        assert!(stack.try_share_state(&Address::repeat_byte(3)).is_none());
    }

    #[test]
    fn test_reentrant_heap_flows_back_to_caller() {
        let a = Address::repeat_byte(1);
        let mut stack = ReentrantCallStack::new();

        // A starts and parks x=1 before calling B.
        stack.push(state(1));
        stack.top_mut().unwrap().park(a, heap_with(1));

        // B calls back into A, which resumes from the parked heap.
        stack.push(state(2));
        assert_eq!(stack.find_save_item(&a), Some(&heap_with(1)));
        stack.push(state(1));
        stack.pop_committed(heap_with(2));

        // B succeeds, so A sees the reentrant write once it resumes.
        stack.pop_committed(DAppHeap::default());
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.top_mut().unwrap().take_save_item(&a), Some(heap_with(2)));
    }

    #[test]
    fn test_failed_frame_drops_its_items() {
        let a = Address::repeat_byte(1);
        let mut stack = ReentrantCallStack::new();
        stack.push(state(1));
        stack.top_mut().unwrap().park(a, heap_with(1));

        stack.push(state(2));
        stack.push(state(1));
        stack.pop_committed(heap_with(2));
        // B fails: plain pop, nothing handed down.
        stack.pop();

        assert_eq!(stack.top_mut().unwrap().take_save_item(&a), Some(heap_with(1)));
    }
}
