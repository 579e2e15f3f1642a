//! Transaction dispatch: validation, billing and routing to create or call.

use crate::cache::{CacheDecision, HotCache};
use crate::call::{self, CallTarget};
use crate::capabilities::ExternalCapabilities;
use crate::config::AvmConfiguration;
use crate::creator;
use crate::dapp::{LoadedCode, LoadedDApp};
use crate::energy::PricingPolicy;
use crate::environment::SharedEnvironment;
use crate::error::{FatalError, TransformError};
use crate::resource_monitor::ResourceMonitor;
use crate::result::{AvmInternalError, AvmWrappedResult};
use crate::side_effects::SideEffects;
use crate::state::{credit, debit, ExternalState};
use crate::task::TransactionTask;
use crate::types::{ExecutionType, Transaction};
use alloy_primitives::{Address, Bytes, U256};
use std::sync::Arc;
use tracing::{trace, warn};

/// Everything a worker needs to execute transactions.
pub struct AvmCore {
    config: AvmConfiguration,
    capabilities: Arc<dyn ExternalCapabilities>,
    environment: Arc<SharedEnvironment>,
    hot_cache: HotCache,
    resource_monitor: ResourceMonitor,
}

impl AvmCore {
    pub fn new(
        config: AvmConfiguration,
        capabilities: Arc<dyn ExternalCapabilities>,
        environment: Arc<SharedEnvironment>,
    ) -> Self {
        let hot_cache = HotCache::new(config.hot_cache_capacity);
        Self {
            config,
            capabilities,
            environment,
            hot_cache,
            resource_monitor: ResourceMonitor::new(),
        }
    }

    pub fn config(&self) -> &AvmConfiguration {
        &self.config
    }

    pub fn capabilities(&self) -> &dyn ExternalCapabilities {
        self.capabilities.as_ref()
    }

    pub fn environment(&self) -> &SharedEnvironment {
        &self.environment
    }

    pub fn pricing(&self) -> &PricingPolicy {
        &self.environment.pricing
    }

    pub fn hot_cache(&self) -> &HotCache {
        &self.hot_cache
    }

    pub fn resource_monitor(&self) -> &ResourceMonitor {
        &self.resource_monitor
    }

    /// Resets per-batch coordination and brings the hot cache in line with the
    /// chain the batch runs on.
    pub fn prepare_batch(
        &self,
        execution_type: ExecutionType,
        current_block: u64,
        common_ancestor: u64,
    ) {
        self.resource_monitor.clear();
        match execution_type {
            ExecutionType::AssumeMainchain | ExecutionType::Mining => {
                self.hot_cache.validate_code_cache(current_block);
            }
            ExecutionType::SwitchingMainchain => {
                self.hot_cache.validate_code_cache(common_ancestor + 1);
                self.hot_cache.purge_data_cache();
            }
            ExecutionType::AssumeSidechain
            | ExecutionType::AssumeDeepSidechain
            | ExecutionType::EthCall => {}
        }
    }

    /// Runs one attempt of `task` to the end, including its ordered commit.
    ///
    /// Returns an aborted result if the task lost a resource at any point; the
    /// caller restarts it. Any other result is final.
    pub fn process_transaction(
        &self,
        task: &mut TransactionTask,
    ) -> Result<AvmWrappedResult, FatalError> {
        let tx = task.transaction().clone();
        let kernel = task.kernel_state();

        let mut error = None;
        if tx.energy_price == 0 {
            error = Some(AvmInternalError::RejectedInvalidEnergyPrice);
        }
        let valid_limit = if tx.is_create() {
            kernel.is_valid_energy_limit_for_create(tx.energy_limit)
        } else {
            kernel.is_valid_energy_limit_for_non_create(tx.energy_limit)
        };
        if !valid_limit {
            error = Some(AvmInternalError::RejectedInvalidEnergyLimit);
        }

        let target = self.recipient_of(&tx);
        let sender_acquired = self.resource_monitor.acquire(tx.sender, task.handle());
        let target_acquired = self.resource_monitor.acquire(target, task.handle());

        let outcome = if sender_acquired && target_acquired {
            if !kernel.account_nonce_equals(&tx.sender, tx.nonce) {
                error = Some(AvmInternalError::RejectedInvalidNonce);
            }
            match error {
                None => self.run_external_invoke(&kernel, task, &tx),
                Some(error) => Ok(AvmWrappedResult::rejected(error)),
            }
        } else {
            Ok(AvmWrappedResult::aborted())
        };

        let result = match outcome {
            Ok(result) => result,
            Err(fatal) => {
                self.resource_monitor.poison();
                return Err(fatal);
            }
        };

        // Runs for aborted attempts too: either address may have been acquired.
        let committed =
            self.resource_monitor
                .commit_kernel_for_task(task, result.is_rejected(), |task| {
                    // Whoever takes the contract over next must not see data
                    // this attempt never committed.
                    if let Some(address) = task.take_cached_data_write() {
                        self.hot_cache.clear_data(&address);
                    }
                });
        if !committed {
            return Ok(AvmWrappedResult::aborted());
        }
        Ok(result)
    }

    /// Runs a contract-initiated call or create on top of `parent`, the state
    /// of the calling frame.
    pub(crate) fn run_internal_transaction(
        &self,
        parent: &Arc<dyn ExternalState>,
        task: &mut TransactionTask,
        tx: &Transaction,
    ) -> Result<AvmWrappedResult, FatalError> {
        task.push_side_effects(SideEffects::new());
        let result = self.common_invoke(parent, task, tx, 0);
        let mut side_effects = task.pop_side_effects().unwrap_or_default();
        let result = result?;

        if !result.is_success() {
            side_effects.discard_for_failure();
        }
        task.peek_side_effects().merge(side_effects);
        Ok(result)
    }

    fn recipient_of(&self, tx: &Transaction) -> Address {
        tx.destination
            .unwrap_or_else(|| self.capabilities.generate_contract_address(tx))
    }

    fn run_external_invoke(
        &self,
        kernel: &Arc<dyn ExternalState>,
        task: &mut TransactionTask,
        tx: &Transaction,
    ) -> Result<AvmWrappedResult, FatalError> {
        let base_cost = self.pricing().basic_transaction_cost(&tx.data);
        let price = U256::from(tx.energy_price);
        let prepaid = U256::from(tx.energy_limit).saturating_mul(price);

        if base_cost > tx.energy_limit {
            return Ok(AvmWrappedResult::rejected(
                AvmInternalError::RejectedInvalidEnergyLimit,
            ));
        }
        if !kernel.account_balance_is_at_least(&tx.sender, prepaid.saturating_add(tx.value)) {
            return Ok(AvmWrappedResult::rejected(
                AvmInternalError::RejectedInsufficientBalance,
            ));
        }

        kernel.adjust_balance(tx.sender, debit(prepaid));
        let result = self.common_invoke(kernel, task, tx, base_cost)?;

        let unused = tx.energy_limit.saturating_sub(result.energy_used());
        kernel.refund_account(tx.sender, U256::from(unused).saturating_mul(price));
        kernel.adjust_balance(
            kernel.miner_address(),
            credit(U256::from(result.energy_used()).saturating_mul(price)),
        );

        if !result.is_success() {
            task.peek_side_effects().discard_for_failure();
        }
        Ok(result)
    }

    /// The part shared by external and internal transactions: value transfer,
    /// nonce, then create or call in a fresh invocation state.
    fn common_invoke(
        &self,
        parent: &Arc<dyn ExternalState>,
        task: &mut TransactionTask,
        tx: &Transaction,
        base_cost: u64,
    ) -> Result<AvmWrappedResult, FatalError> {
        let invocation = parent.clone().new_child_external_state();
        let result = AvmWrappedResult::successful(base_cost);
        let recipient = self.recipient_of(tx);

        invocation.adjust_balance(tx.sender, debit(tx.value));
        invocation.adjust_balance(recipient, credit(tx.value));

        // Past this point the transaction can no longer be rejected.
        task.kernel().increment_nonce(tx.sender);

        let result = if tx.is_create() {
            creator::create(self, task, invocation.clone(), recipient, tx, result)?
        } else {
            self.call_recipient(parent, &invocation, task, tx, recipient, result)?
        };

        if result.is_success() {
            invocation.commit();
        }
        Ok(result)
    }

    fn call_recipient(
        &self,
        parent: &Arc<dyn ExternalState>,
        invocation: &Arc<dyn ExternalState>,
        task: &mut TransactionTask,
        tx: &Transaction,
        recipient: Address,
        result: AvmWrappedResult,
    ) -> Result<AvmWrappedResult, FatalError> {
        let transformed = invocation.get_transformed_code(&recipient);

        // Reentering a contract already on the call chain bypasses the cache.
        if transformed.is_some() {
            if let Some(frame) = task.reentrant_stack().try_share_state(&recipient) {
                let target = CallTarget {
                    address: recipient,
                    code: frame.code().clone(),
                    cached_graph: None,
                    reentrant: true,
                };
                return Ok(call::call(self, task, invocation.clone(), target, tx, result)?.result);
            }
        }

        let execution_type = task.execution_type();
        let current_block = parent.block_number();
        let mut cached = if CacheDecision::consults_cache(execution_type) {
            self.hot_cache.checkout(&recipient)
        } else {
            None
        };
        let decision = CacheDecision::decide(
            execution_type,
            cached.as_ref(),
            current_block,
            task.common_ancestor(),
        );
        if decision.return_unused {
            if let Some(dapp) = cached.take() {
                self.hot_cache.checkin(recipient, dapp);
            }
        }

        let mut result = result;
        let transformed = match transformed {
            Some(transformed) => Some(transformed),
            None => {
                // Stored code predates the current transformation; a cached
                // instance of it is not reusable either.
                cached = None;
                match self.retransform(parent, recipient) {
                    Ok(transformed) => transformed,
                    Err(error) => {
                        if self.config.enable_verbose_contract_errors {
                            warn!(address = %recipient, %error, "re-transformation failed");
                        }
                        result = result.with_non_reverted_failure(
                            AvmInternalError::FailedRetransformation,
                            tx.energy_limit,
                        );
                        None
                    }
                }
            }
        };

        let mut dapp = match (cached, transformed) {
            (Some(dapp), _) => dapp,
            (None, Some(transformed)) => {
                LoadedDApp::new(self.load_stored_code(recipient, &transformed)?, current_block)
            }
            // No code: a plain value transfer.
            (None, None) => return Ok(result),
        };

        let target = CallTarget {
            address: recipient,
            code: dapp.code().clone(),
            cached_graph: decision
                .read_data
                .then(|| dapp.cached_graph().cloned())
                .flatten(),
            reentrant: false,
        };
        let outcome = call::call(self, task, invocation.clone(), target, tx, result)?;

        if decision.write_back {
            // An internal call's graph is only final once every enclosing
            // frame succeeds, so only the outermost call caches data.
            if outcome.result.is_success() && decision.update_data && task.depth() == 0 {
                dapp.update_loaded_block_for_successful_transaction(current_block, outcome.graph);
                task.note_cached_data_write(recipient);
            } else {
                dapp.clear_data_state();
            }
            self.hot_cache.checkin(recipient, dapp);
        }
        Ok(outcome.result)
    }

    /// Transforms the stored original code of `address` again. `Ok(None)` if
    /// there is no code.
    fn retransform(
        &self,
        parent: &Arc<dyn ExternalState>,
        address: Address,
    ) -> Result<Option<Bytes>, TransformError> {
        let Some(code) = parent.get_code(&address) else {
            return Ok(None);
        };
        let transformed = self
            .environment
            .transformer
            .verify_and_transform(&code, self.config.preserve_debuggability)?;
        trace!(%address, "re-transformed stored code");
        parent.set_transformed_code(address, transformed.clone());
        Ok(Some(transformed))
    }

    fn load_stored_code(&self, address: Address, transformed: &[u8]) -> Result<LoadedCode, FatalError> {
        self.environment
            .transformer
            .load(transformed)
            .map_err(|error| FatalError::CodeLoad(format!("{address}: {error}")))
    }
}
