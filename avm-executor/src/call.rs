//! Running a call against an already deployed contract.

use crate::dapp::{DAppHeap, LoadedCode, ObjectGraph};
use crate::dispatch::AvmCore;
use crate::energy::EnergyMeter;
use crate::error::{panic_message, ContractFault, FatalError};
use crate::reentrant::ReentrantState;
use crate::result::{AvmInternalError, AvmWrappedResult};
use crate::runtime::FrameRuntime;
use crate::state::ExternalState;
use crate::task::TransactionTask;
use crate::types::Transaction;
use alloy_primitives::Address;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// The contract a call runs against, as resolved by the dispatcher.
pub(crate) struct CallTarget {
    pub address: Address,
    pub code: LoadedCode,
    /// Object graph taken from the hot cache instead of storage.
    pub cached_graph: Option<ObjectGraph>,
    /// The contract already has a frame further down the call chain.
    pub reentrant: bool,
}

/// Outcome of [`call`].
pub(crate) struct CallOutcome {
    pub result: AvmWrappedResult,
    /// The graph written back to storage, if the call succeeded and was not
    /// reentrant.
    pub graph: Option<ObjectGraph>,
}

fn load_heap(
    task: &TransactionTask,
    state: &dyn ExternalState,
    target: &CallTarget,
) -> Result<(DAppHeap, usize), FatalError> {
    if let Some(parked) = task.reentrant_stack().find_save_item(&target.address) {
        return Ok((parked.clone(), 0));
    }
    if target.reentrant {
        return Err(FatalError::invariant(format!(
            "reentrant call into {} without a parked heap",
            target.address
        )));
    }

    let corrupt = |reason: String| FatalError::CorruptObjectGraph {
        address: target.address.to_string(),
        reason,
    };
    let graph = match &target.cached_graph {
        Some(graph) => Some(graph.clone()),
        None => match state.get_object_graph(&target.address) {
            Some(raw) => Some(
                ObjectGraph::decode(&raw).ok_or_else(|| corrupt("truncated header".into()))?,
            ),
            None => None,
        },
    };
    match graph {
        Some(graph) => Ok((DAppHeap::restore(&graph).map_err(corrupt)?, graph.encoded_len())),
        None => Ok((DAppHeap::default(), 0)),
    }
}

/// Invokes `main` of the target contract for `tx`.
///
/// `state` is the invocation state of this call; it is committed or dropped by
/// the caller. Only a [`FatalError`] escapes; every contract fault is folded
/// into the returned result.
pub(crate) fn call(
    core: &AvmCore,
    task: &mut TransactionTask,
    state: Arc<dyn ExternalState>,
    target: CallTarget,
    tx: &Transaction,
    result: AvmWrappedResult,
) -> Result<CallOutcome, FatalError> {
    let (heap, read_bytes) = load_heap(task, state.as_ref(), &target)?;
    let meter = EnergyMeter::new(
        tx.energy_limit,
        result.energy_used(),
        task.abort_signal().clone(),
    );

    let base = task.reentrant_stack().len();
    task.reentrant_stack_mut().push(ReentrantState::new(
        target.address,
        target.code.clone(),
        heap.next_hash(),
    ));

    let address = target.address;
    let code = target.code;
    let run = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut runtime = FrameRuntime::new(
            core,
            &mut *task,
            state.clone(),
            address,
            tx.sender,
            tx.value,
            tx.data.clone(),
            meter,
            heap,
        );
        let output = runtime
            .meter_mut()
            .charge(core.pricing().read_fee(read_bytes))
            .and_then(|()| code.dapp().main(&mut runtime));
        let (meter, heap) = runtime.into_parts();
        (output, meter, heap)
    }));

    let (output, mut meter, heap) = match run {
        Ok(parts) => parts,
        Err(payload) => {
            task.reentrant_stack_mut().truncate(base);
            let fault = ContractFault::Unexpected(panic_message(&*payload));
            let result = fault_to_result(core, tx, result, fault, tx.energy_limit)?;
            return Ok(CallOutcome {
                result,
                graph: None,
            });
        }
    };

    let mut graph = None;
    let output = output
        .and_then(|out| {
            if task.is_aborted() {
                Err(ContractFault::EarlyAbort)
            } else {
                Ok(out)
            }
        })
        .and_then(|out| {
            if !target.reentrant {
                let captured = heap.capture().map_err(|reason| FatalError::CorruptObjectGraph {
                    address: address.to_string(),
                    reason,
                })?;
                meter.charge(core.pricing().write_fee(captured.encoded_len()))?;
                if !task.has_self_destructed(&address) {
                    state.put_object_graph(address, captured.encode());
                    graph = Some(captured);
                }
            }
            Ok(out)
        });

    let result = match output {
        Ok(out) => {
            let used = meter.used();
            let refund = top_level_refund(core, task, used);
            task.reentrant_stack_mut().pop_committed(heap);
            result
                .with_energy_used(used - refund)
                .with_successful_output(out)
        }
        Err(fault) => {
            task.reentrant_stack_mut().truncate(base);
            graph = None;
            fault_to_result(core, tx, result, fault, meter.used())?
        }
    };
    Ok(CallOutcome { result, graph })
}

/// Refund earned by the whole transaction. Only granted to the outermost frame.
pub(crate) fn top_level_refund(core: &AvmCore, task: &TransactionTask, energy_used: u64) -> u64 {
    if task.depth() != 0 {
        return 0;
    }
    core.pricing().refund(
        energy_used,
        task.self_destruct_count(),
        task.reset_storage_key_count(),
    )
}

/// Folds a contract fault into `result`.
///
/// `energy_used` is only billed for a revert; every other failure consumes the
/// whole limit.
pub(crate) fn fault_to_result(
    core: &AvmCore,
    tx: &Transaction,
    result: AvmWrappedResult,
    fault: ContractFault,
    energy_used: u64,
) -> Result<AvmWrappedResult, FatalError> {
    let limit = tx.energy_limit;
    match &fault {
        ContractFault::EarlyAbort => {
            debug!(tx = %tx.hash, "concurrent abort, will retry");
        }
        ContractFault::Unexpected(message) => {
            error!(tx = %tx.hash, %message, "contract failed unexpectedly");
        }
        ContractFault::Fatal(_) => {}
        fault if core.config().enable_verbose_contract_errors => {
            warn!(tx = %tx.hash, %fault, "contract invocation failed");
        }
        _ => {}
    }

    Ok(match fault {
        ContractFault::OutOfEnergy => {
            result.with_non_reverted_failure(AvmInternalError::FailedOutOfEnergy, limit)
        }
        ContractFault::OutOfStack => {
            result.with_non_reverted_failure(AvmInternalError::FailedOutOfStack, limit)
        }
        ContractFault::CallDepthLimitExceeded => {
            result.with_non_reverted_failure(AvmInternalError::FailedCallDepthLimit, limit)
        }
        ContractFault::Invalid(_) => {
            result.with_non_reverted_failure(AvmInternalError::FailedInvalid, limit)
        }
        ContractFault::Failed(_) => result.with_non_reverted_failure(AvmInternalError::Failed, limit),
        ContractFault::Revert => result.with_reverted_failure(energy_used),
        ContractFault::EarlyAbort => AvmWrappedResult::aborted(),
        ContractFault::Uncaught(message) => result.with_failed_exception(message, limit),
        ContractFault::Unexpected(_) => {
            result.with_non_reverted_failure(AvmInternalError::FailedUnexpected, limit)
        }
        ContractFault::Fatal(fatal) => return Err(fatal),
    })
}

