//! Per-address ownership between concurrently executing tasks.
//!
//! A task must own every address it mutates. Ownership conflicts are always
//! resolved in favour of the lower transaction index: a lower task asking for an
//! address held by a higher one flags the holder for abort and waits for the
//! release, while a higher task asking for an address held by a lower one simply
//! waits. Commits go through the monitor in strict index order.

use crate::task::TransactionTask;
use crate::types::TxnIndex;
use alloy_primitives::Address;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Shared abort flag of one task.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Identity of a task as seen by the monitor.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub index: TxnIndex,
    pub abort: AbortSignal,
}

#[derive(Debug, Default)]
struct Resource {
    owner: Option<TaskHandle>,
    waiting: BTreeSet<TxnIndex>,
}

#[derive(Debug, Default)]
struct MonitorState {
    resources: HashMap<Address, Resource>,
    owned: HashMap<TxnIndex, Vec<Address>>,
    commit_counter: TxnIndex,
    /// Set after a fatal error; every waiter gives up.
    poisoned: bool,
}

impl MonitorState {
    fn release_all(&mut self, index: TxnIndex) {
        for address in self.owned.remove(&index).unwrap_or_default() {
            if let Some(resource) = self.resources.get_mut(&address) {
                if resource.owner.as_ref().map(|o| o.index) == Some(index) {
                    resource.owner = None;
                }
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct ResourceMonitor {
    state: Mutex<MonitorState>,
    changed: Condvar,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets all ownership and restarts the commit sequence. Called between
    /// batches.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        *state = MonitorState::default();
    }

    /// Blocks until `task` owns `address`. Returns `false` once the task has
    /// been flagged for abort; the caller must then abandon the attempt.
    pub fn acquire(&self, address: Address, task: &TaskHandle) -> bool {
        let mut state = self.state.lock();
        loop {
            if task.abort.is_set() || state.poisoned {
                if let Some(resource) = state.resources.get_mut(&address) {
                    resource.waiting.remove(&task.index);
                }
                return false;
            }

            let resource = state.resources.entry(address).or_default();
            let outranked = resource
                .waiting
                .iter()
                .next()
                .is_some_and(|&first| first < task.index);

            match &resource.owner {
                Some(owner) if owner.index == task.index => return true,
                None if !outranked => {
                    resource.owner = Some(task.clone());
                    resource.waiting.remove(&task.index);
                    state.owned.entry(task.index).or_default().push(address);
                    return true;
                }
                Some(owner) if owner.index > task.index => {
                    trace!(
                        address = %address,
                        owner = owner.index,
                        requester = task.index,
                        "aborting higher-indexed owner"
                    );
                    owner.abort.set();
                    resource.waiting.insert(task.index);
                    self.changed.notify_all();
                }
                _ => {
                    resource.waiting.insert(task.index);
                }
            }
            self.changed.wait(&mut state);
        }
    }

    /// Blocks until every lower-indexed task has committed. Returns `false` if
    /// the task is flagged for abort first.
    pub fn await_turn(&self, task: &TaskHandle) -> bool {
        let mut state = self.state.lock();
        loop {
            if task.abort.is_set() || state.poisoned {
                return false;
            }
            if state.commit_counter == task.index {
                return true;
            }
            self.changed.wait(&mut state);
        }
    }

    /// Finishes an attempt of `task`.
    ///
    /// Waits for the task's turn in the commit sequence, then commits its
    /// kernel (unless the transaction was rejected) and flushes its output.
    /// Returns `false` if the task was aborted instead; nothing is committed in
    /// that case and `on_abort` runs while the task still owns its resources.
    /// All of the task's resources are released either way.
    pub fn commit_kernel_for_task(
        &self,
        task: &mut TransactionTask,
        is_rejected: bool,
        on_abort: impl FnOnce(&mut TransactionTask),
    ) -> bool {
        let handle = task.handle().clone();
        let mut state = self.state.lock();
        let committed = loop {
            if handle.abort.is_set() || state.poisoned {
                break false;
            }
            if state.commit_counter == handle.index {
                if !is_rejected {
                    task.commit_kernel();
                }
                task.flush_output();
                state.commit_counter += 1;
                break true;
            }
            self.changed.wait(&mut state);
        };
        if !committed {
            on_abort(task);
        }
        state.release_all(handle.index);
        self.changed.notify_all();
        committed
    }

    /// Makes every current and future wait fail until the next [`clear`].
    ///
    /// [`clear`]: ResourceMonitor::clear
    pub fn poison(&self) {
        self.state.lock().poisoned = true;
        self.changed.notify_all();
    }

    pub fn is_poisoned(&self) -> bool {
        self.state.lock().poisoned
    }

    /// Index of the next task allowed to commit.
    pub fn commit_counter(&self) -> TxnIndex {
        self.state.lock().commit_counter
    }
}
