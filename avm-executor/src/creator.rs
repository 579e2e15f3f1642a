//! Deploying a new contract.

use crate::call::{fault_to_result, top_level_refund};
use crate::dapp::{CodeAndArguments, DAppHeap};
use crate::dispatch::AvmCore;
use crate::energy::EnergyMeter;
use crate::error::{panic_message, ContractFault, FatalError, TransformError};
use crate::reentrant::ReentrantState;
use crate::result::{AvmInternalError, AvmWrappedResult};
use crate::runtime::FrameRuntime;
use crate::state::ExternalState;
use crate::task::TransactionTask;
use crate::types::Transaction;
use alloy_primitives::{Address, Bytes};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

fn transform_failure(error: &TransformError) -> AvmInternalError {
    match error {
        TransformError::RejectedClass(_) | TransformError::UnknownMainClass(_) => {
            AvmInternalError::FailedRejectedClass
        }
        TransformError::MalformedArchive(_) | TransformError::VersionMismatch { .. } => {
            AvmInternalError::FailedInvalidData
        }
    }
}

/// Deploys the code carried by `tx` at `address` and runs its initializer.
///
/// On success the output is the new contract's address.
pub(crate) fn create(
    core: &AvmCore,
    task: &mut TransactionTask,
    state: Arc<dyn ExternalState>,
    address: Address,
    tx: &Transaction,
    result: AvmWrappedResult,
) -> Result<AvmWrappedResult, FatalError> {
    let verbose = core.config().enable_verbose_contract_errors;
    let limit = tx.energy_limit;

    let Some(payload) = CodeAndArguments::decode(&tx.data) else {
        if verbose {
            warn!(tx = %tx.hash, "deployment failed: malformed code and arguments");
        }
        return Ok(result.with_non_reverted_failure(AvmInternalError::FailedInvalidData, limit));
    };

    let transformer = &core.environment().transformer;
    let loaded = transformer
        .verify_and_transform(&payload.code, core.config().preserve_debuggability)
        .and_then(|transformed| {
            transformer
                .load(&transformed)
                .map(|code| (transformed, code))
        });
    let (transformed, code) = match loaded {
        Ok(loaded) => loaded,
        Err(error) => {
            if verbose {
                warn!(tx = %tx.hash, %error, "deployment rejected");
            }
            return Ok(result.with_non_reverted_failure(transform_failure(&error), limit));
        }
    };

    let meter = EnergyMeter::new(limit, result.energy_used(), task.abort_signal().clone());
    let heap = DAppHeap::default();
    let base = task.reentrant_stack().len();
    task.reentrant_stack_mut()
        .push(ReentrantState::new(address, code.clone(), heap.next_hash()));

    let deployment_fee = core
        .pricing()
        .deployment_fee(code.class_count(), payload.code.len());
    let run = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut runtime = FrameRuntime::new(
            core,
            &mut *task,
            state.clone(),
            address,
            tx.sender,
            tx.value,
            payload.arguments.clone(),
            meter,
            heap,
        );
        let initialized = runtime.meter_mut().charge(deployment_fee).and_then(|()| {
            state.put_code(address, payload.code.clone());
            state.set_transformed_code(address, transformed.clone());
            code.dapp().initialize(&mut runtime)
        });
        let (meter, heap) = runtime.into_parts();
        (initialized, meter, heap)
    }));

    let (initialized, mut meter, heap) = match run {
        Ok(parts) => parts,
        Err(unwound) => {
            task.reentrant_stack_mut().truncate(base);
            let fault = ContractFault::Unexpected(panic_message(&*unwound));
            return fault_to_result(core, tx, result, fault, limit);
        }
    };

    let saved = initialized
        .and_then(|()| {
            if task.is_aborted() {
                Err(ContractFault::EarlyAbort)
            } else {
                Ok(())
            }
        })
        .and_then(|()| {
            let graph = heap.capture().map_err(|reason| FatalError::CorruptObjectGraph {
                address: address.to_string(),
                reason,
            })?;
            meter.charge(core.pricing().write_fee(graph.encoded_len()))?;
            if !task.has_self_destructed(&address) {
                state.put_object_graph(address, graph.encode());
            }
            Ok(())
        });

    match saved {
        Ok(()) => {
            let used = meter.used();
            let refund = top_level_refund(core, task, used);
            task.reentrant_stack_mut().pop_committed(heap);
            Ok(result
                .with_energy_used(used - refund)
                .with_successful_output(Bytes::copy_from_slice(address.as_slice())))
        }
        Err(fault) => {
            task.reentrant_stack_mut().truncate(base);
            fault_to_result(core, tx, result, fault, meter.used())
        }
    }
}
