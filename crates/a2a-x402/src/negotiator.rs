//! Server-side payment negotiation.
//!
//! [`PaymentNegotiator`] wraps a [`TaskDelegate`] and drives each task
//! through `Created → PaymentRequired → PaymentSubmitted → PaymentVerified
//! → PaymentSettled → Completed`, or into `PaymentFailed`. Where settlement
//! falls relative to delivery is set by [`SettlementPolicy`].
//!
//! Failure handling:
//! - a missing or malformed payload is rejected and leaves the task waiting
//! - a mismatched, expired or refused payment ends the task in `PaymentFailed`
//! - a facilitator transport failure leaves the task where it was, so the
//!   caller can retry the same step

use std::sync::Arc;
use std::time::Duration;

use crate::config::{NegotiatorConfig, SettlementPolicy};
use crate::delegate::{CapabilityResult, DelegateOutcome, TaskContext, TaskDelegate, TaskOutput};
use crate::error::{ErrorCode, ErrorReport, X402Error};
use crate::extension::check_extension_activation;
use crate::facilitator::{check_payload, rejection_code, Facilitator};
use crate::state::{PaymentStateStore, PaymentStatus, TaskPaymentState, TaskStateGuard};
use crate::{
    unix_now, Message, PaymentPayload, PaymentRequirements, SettleResponse, TaskRequest,
    TaskResponse, TaskState, EXTENSION_URI,
};

pub struct PaymentNegotiator<D, F> {
    delegate: D,
    facilitator: F,
    store: Arc<PaymentStateStore>,
    config: NegotiatorConfig,
}

impl<D, F> PaymentNegotiator<D, F>
where
    D: TaskDelegate,
    F: Facilitator,
{
    pub fn new(delegate: D, facilitator: F, config: NegotiatorConfig) -> Self {
        let store = Arc::new(PaymentStateStore::new(config.state_retention));
        Self {
            delegate,
            facilitator,
            store,
            config,
        }
    }

    pub fn store(&self) -> &Arc<PaymentStateStore> {
        &self.store
    }

    pub fn policy(&self) -> SettlementPolicy {
        self.config.policy
    }

    /// Purge finished and abandoned task states every `every`.
    pub fn start_cleanup(&self, every: Duration) {
        self.store.start_cleanup(every);
    }

    /// Handle one inbound task message.
    pub async fn handle(&self, request: TaskRequest) -> TaskResponse {
        let activated = check_extension_activation(&request.extensions);
        let message = request.message;
        let task_id = message
            .task_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let context_id = message.context_id.clone().unwrap_or_else(|| task_id.clone());

        if !activated {
            return self.passthrough(task_id, context_id, message).await;
        }

        let mut response = self.negotiate(task_id, context_id, message).await;
        response.activated_extensions = vec![EXTENSION_URI.to_string()];
        response
    }

    /// Caller did not opt in: run the delegate unmodified, never demand payment.
    async fn passthrough(&self, task_id: String, context_id: String, message: Message) -> TaskResponse {
        let ctx = TaskContext {
            task_id: task_id.clone(),
            context_id: context_id.clone(),
            message,
            payments_enabled: false,
            injected: None,
        };
        match self.delegate.execute(ctx).await {
            Ok(DelegateOutcome::Completed(output)) => {
                TaskResponse::new(task_id, context_id, TaskState::Completed).with_output(output)
            }
            Ok(DelegateOutcome::PaymentRequired(signal)) => {
                tracing::warn!(
                    task_id = %task_id,
                    resource = %signal.resource,
                    "payment signal ignored: x402 extension not activated"
                );
                TaskResponse::new(task_id, context_id, TaskState::Completed)
                    .with_output(TaskOutput::default())
            }
            Err(e) => TaskResponse::new(task_id, context_id, TaskState::Failed).with_error(&e),
        }
    }

    async fn negotiate(&self, task_id: String, context_id: String, message: Message) -> TaskResponse {
        let submitted = message.payment_payload();

        if let Some(guard) = self.store.lock(&task_id).await {
            return self.continue_task(guard, message, submitted).await;
        }

        if let Some(status) = self.store.finished_status(&task_id) {
            let err = X402Error::State(format!("task {task_id} already finished ({status})"));
            return rejected(task_id, context_id, Some(status), &err);
        }

        match submitted {
            Ok(None) => self.start_task(task_id, context_id, message).await,
            Ok(Some(_)) => {
                let err = X402Error::State(format!(
                    "payment submitted for task {task_id}, but no requirement was issued"
                ));
                tracing::warn!(task_id = %task_id, "payment submitted without a requirement");
                rejected(task_id, context_id, None, &err)
            }
            Err(e) => rejected(task_id, context_id, None, &e),
        }
    }

    async fn start_task(&self, task_id: String, context_id: String, message: Message) -> TaskResponse {
        let ctx = TaskContext {
            task_id: task_id.clone(),
            context_id: context_id.clone(),
            message,
            payments_enabled: true,
            injected: None,
        };

        let signal = match self.delegate.execute(ctx).await {
            Ok(DelegateOutcome::Completed(output)) => {
                return TaskResponse::new(task_id, context_id, TaskState::Completed)
                    .with_output(output);
            }
            Ok(DelegateOutcome::PaymentRequired(signal)) => signal,
            Err(e) => {
                return TaskResponse::new(task_id, context_id, TaskState::Failed).with_error(&e);
            }
        };

        if let Err(e) = validate_accepts(&signal.accepts) {
            return TaskResponse::new(task_id, context_id, TaskState::Failed).with_error(&e);
        }

        let mut state = TaskPaymentState::new(
            task_id.clone(),
            context_id.clone(),
            signal.resource.clone(),
            signal.accepts.clone(),
        );
        if let Err(e) = state.advance(PaymentStatus::PaymentRequired) {
            return rejected(task_id, context_id, None, &e);
        }
        if let Err(e) = self.store.create(state) {
            return rejected(task_id, context_id, None, &e);
        }

        tracing::info!(
            task_id = %task_id,
            resource = %signal.resource,
            options = signal.accepts.len(),
            status = %PaymentStatus::PaymentRequired,
            "payment required"
        );
        TaskResponse::new(task_id, context_id, TaskState::InputRequired)
            .with_payment_status(PaymentStatus::PaymentRequired)
            .with_payment_required(&signal.to_response())
    }

    async fn continue_task(
        &self,
        guard: TaskStateGuard,
        message: Message,
        submitted: Result<Option<PaymentPayload>, X402Error>,
    ) -> TaskResponse {
        match guard.status() {
            PaymentStatus::PaymentRequired | PaymentStatus::PaymentSubmitted => {
                self.accept_submission(guard, message, submitted).await
            }
            PaymentStatus::PaymentVerified => {
                if matches!(submitted, Ok(Some(_))) {
                    let err = X402Error::State(format!(
                        "task {} already has a verified payment",
                        guard.task_id
                    ));
                    return rejected_in(&guard, &err);
                }
                // Retry of a completion step that hit a transport failure.
                self.complete_verified(guard, message).await
            }
            status => {
                let err = X402Error::State(format!(
                    "task {} does not accept messages in status {status}",
                    guard.task_id
                ));
                rejected_in(&guard, &err)
            }
        }
    }

    async fn accept_submission(
        &self,
        mut guard: TaskStateGuard,
        message: Message,
        submitted: Result<Option<PaymentPayload>, X402Error>,
    ) -> TaskResponse {
        let payload = match submitted {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                let err = X402Error::Message(
                    ErrorCode::InvalidPayload,
                    format!(
                        "task {} is waiting for a payment: message carries no {}",
                        guard.task_id,
                        crate::METADATA_PAYLOAD_KEY
                    ),
                );
                return rejected_in(&guard, &err);
            }
            Err(e) => return rejected_in(&guard, &e),
        };

        if guard.status() == PaymentStatus::PaymentRequired {
            if let Err(e) = guard.advance(PaymentStatus::PaymentSubmitted) {
                return rejected_in(&guard, &e);
            }
        }
        // A resubmission after a transport failure replaces the earlier payload.
        guard.payload = Some(payload.clone());
        guard.selected = None;
        tracing::info!(
            task_id = %guard.task_id,
            payer = %payload.payload.authorization.from,
            nonce = %payload.payload.authorization.nonce,
            status = %PaymentStatus::PaymentSubmitted,
            "payment submitted"
        );

        let requirement = match match_requirement(&guard.accepts, &payload) {
            Ok(requirement) => requirement,
            Err(e) => return self.fail(guard, e),
        };

        if guard.is_requirement_expired(requirement.max_timeout_seconds) {
            let err = X402Error::Validation(
                ErrorCode::ExpiredPayment,
                format!(
                    "requirement expired: more than {}s since it was issued",
                    requirement.max_timeout_seconds
                ),
            );
            return self.fail(guard, err);
        }

        if let Err(e) = check_payload(&payload, &requirement, unix_now()) {
            return self.fail(guard, e);
        }

        let verdict = match self.facilitator.verify(&payload, &requirement).await {
            Ok(verdict) => verdict,
            Err(e) if e.is_transport() => return retryable(&guard, e),
            Err(e) => return self.fail(guard, e),
        };

        if !verdict.is_valid {
            let reason = verdict
                .invalid_reason
                .clone()
                .unwrap_or_else(|| "payment rejected by facilitator".to_string());
            guard.verify_response = Some(verdict);
            let err = X402Error::Payment(
                rejection_code(&reason, ErrorCode::VerificationFailed),
                reason,
            );
            return self.fail(guard, err);
        }

        if let Err(e) = guard.advance(PaymentStatus::PaymentVerified) {
            return rejected_in(&guard, &e);
        }
        guard.pending_injection = Some(CapabilityResult::payment_confirmed(
            &payload,
            &verdict,
            &guard.resource,
        ));
        guard.verify_response = Some(verdict);
        guard.selected = Some(requirement);
        tracing::info!(
            task_id = %guard.task_id,
            payer = %payload.payload.authorization.from,
            status = %PaymentStatus::PaymentVerified,
            "payment verified"
        );

        self.complete_verified(guard, message).await
    }

    async fn complete_verified(&self, mut guard: TaskStateGuard, message: Message) -> TaskResponse {
        match self.config.policy {
            SettlementPolicy::SettleBeforeDeliver => {
                if let Err(e) = self.settle_once(&mut guard).await {
                    return self.settlement_error(guard, e);
                }
                match self.deliver(&mut guard, message).await {
                    Ok(output) => self.complete(guard, output),
                    Err(e) => self.fail(guard, e),
                }
            }
            SettlementPolicy::SettleAfterDeliver => {
                let output = match guard.tentative_output.clone() {
                    Some(output) => output,
                    None => match self.deliver(&mut guard, message).await {
                        Ok(output) => {
                            guard.tentative_output = Some(output.clone());
                            output
                        }
                        Err(e) => return self.fail(guard, e),
                    },
                };
                if let Err(e) = self.settle_once(&mut guard).await {
                    return self.settlement_error(guard, e);
                }
                self.complete(guard, output)
            }
            SettlementPolicy::VerifyOnly => match self.deliver(&mut guard, message).await {
                Ok(output) => self.complete(guard, output),
                Err(e) => self.fail(guard, e),
            },
        }
    }

    /// Call settle at most once for the verified payload.
    async fn settle_once(&self, state: &mut TaskPaymentState) -> Result<SettleResponse, X402Error> {
        if state.settle_attempted {
            return Err(X402Error::State(format!(
                "settlement already attempted for task {}",
                state.task_id
            )));
        }
        let (Some(payload), Some(requirement)) = (state.payload.clone(), state.selected.clone())
        else {
            return Err(X402Error::State(format!(
                "task {} has no verified payment to settle",
                state.task_id
            )));
        };

        state.settle_attempted = true;
        let receipt = match self.facilitator.settle(&payload, &requirement).await {
            Ok(receipt) => receipt,
            Err(e) => {
                if e.is_transport() {
                    // Nothing is known to have happened; the same call may be retried.
                    state.settle_attempted = false;
                    tracing::error!(task_id = %state.task_id, error = %e, "settle transport failure");
                }
                return Err(e);
            }
        };
        state.settle_response = Some(receipt.clone());

        if !receipt.success {
            let reason = receipt
                .error_reason
                .clone()
                .unwrap_or_else(|| "settlement failed".to_string());
            return Err(X402Error::Payment(
                rejection_code(&reason, ErrorCode::SettlementFailed),
                reason,
            ));
        }

        state.advance(PaymentStatus::PaymentSettled)?;
        tracing::info!(
            task_id = %state.task_id,
            payer = receipt.payer.as_deref().unwrap_or_default(),
            transaction = receipt.transaction.as_deref().unwrap_or_default(),
            status = %PaymentStatus::PaymentSettled,
            "payment settled"
        );
        Ok(receipt)
    }

    /// Re-invoke the delegate with the injected confirmation. The injection
    /// is consumed here, so this runs at most once per verified payment.
    async fn deliver(
        &self,
        state: &mut TaskPaymentState,
        message: Message,
    ) -> Result<TaskOutput, X402Error> {
        let injected = state.pending_injection.take().ok_or_else(|| {
            X402Error::State(format!(
                "task {} has no pending payment confirmation",
                state.task_id
            ))
        })?;

        let ctx = TaskContext {
            task_id: state.task_id.clone(),
            context_id: state.context_id.clone(),
            message,
            payments_enabled: true,
            injected: Some(injected),
        };
        match self.delegate.execute(ctx).await? {
            DelegateOutcome::Completed(output) => Ok(output),
            DelegateOutcome::PaymentRequired(_) => Err(X402Error::Payment(
                ErrorCode::DelegateFailed,
                "delegate requested payment again after a verified payment".to_string(),
            )),
        }
    }

    fn complete(&self, mut guard: TaskStateGuard, output: TaskOutput) -> TaskResponse {
        if let Err(e) = guard.advance(PaymentStatus::Completed) {
            return self.fail(guard, e);
        }
        guard.tentative_output = None;
        self.store.finish(&guard.task_id, PaymentStatus::Completed);
        tracing::info!(task_id = %guard.task_id, status = %PaymentStatus::Completed, "task completed");

        let mut response = respond(&guard, TaskState::Completed).with_output(output);
        if let Some(receipt) = &guard.settle_response {
            response = response.with_receipt(receipt);
        }
        response
    }

    fn settlement_error(&self, guard: TaskStateGuard, err: X402Error) -> TaskResponse {
        if err.is_transport() {
            retryable(&guard, err)
        } else {
            self.fail(guard, err)
        }
    }

    /// Terminal failure. Moves to `PaymentFailed` where the table allows it;
    /// after settlement the tombstone keeps `PaymentSettled`.
    fn fail(&self, mut guard: TaskStateGuard, err: X402Error) -> TaskResponse {
        if guard.status().can_transition_to(PaymentStatus::PaymentFailed) {
            if let Err(e) = guard.advance(PaymentStatus::PaymentFailed) {
                tracing::error!(task_id = %guard.task_id, error = %e, "failed to record payment failure");
            }
        }
        guard.tentative_output = None;
        guard.pending_injection = None;
        guard.error = Some(ErrorReport::from(&err));
        self.store.finish(&guard.task_id, guard.status());

        tracing::warn!(
            task_id = %guard.task_id,
            status = %guard.status(),
            code = ?err.code(),
            reason = %err.reason(),
            "payment failed"
        );

        let mut response = respond(&guard, TaskState::Failed).with_error(&err);
        if let Some(receipt) = &guard.settle_response {
            response = response.with_receipt(receipt);
        }
        response
    }
}

/// Requirement a payload claims to pay: same scheme and network, preferring
/// one whose payee and cap fit the authorization.
fn match_requirement(
    accepts: &[PaymentRequirements],
    payload: &PaymentPayload,
) -> Result<PaymentRequirements, X402Error> {
    let candidates: Vec<&PaymentRequirements> = accepts
        .iter()
        .filter(|r| r.scheme == payload.scheme && r.network == payload.network)
        .collect();

    let Some(first) = candidates.first() else {
        return Err(X402Error::Message(
            ErrorCode::NetworkMismatch,
            format!(
                "payload ({} on {}) matches none of the issued requirements",
                payload.scheme, payload.network
            ),
        ));
    };

    let auth = &payload.payload.authorization;
    let fits = |r: &PaymentRequirements| -> bool {
        let payee = r.is_payee(&auth.to);
        let within = matches!((auth.value_amount(), r.max_amount()), (Ok(v), Ok(m)) if v <= m);
        payee && within
    };

    Ok(candidates
        .iter()
        .find(|r| fits(r))
        .copied()
        .unwrap_or(*first)
        .clone())
}

fn validate_accepts(accepts: &[PaymentRequirements]) -> Result<(), X402Error> {
    if accepts.is_empty() {
        return Err(X402Error::Validation(
            ErrorCode::InvalidPayload,
            "payment-required signal carries no requirements".to_string(),
        ));
    }
    accepts.iter().try_for_each(PaymentRequirements::validate)
}

fn respond(state: &TaskPaymentState, task_state: TaskState) -> TaskResponse {
    TaskResponse::new(&state.task_id, &state.context_id, task_state)
        .with_payment_status(state.status())
}

fn rejected(
    task_id: String,
    context_id: String,
    status: Option<PaymentStatus>,
    err: &X402Error,
) -> TaskResponse {
    let mut response = TaskResponse::new(task_id, context_id, TaskState::Rejected);
    if let Some(status) = status {
        response = response.with_payment_status(status);
    }
    response.with_error(err)
}

/// Refused without touching the task's state.
fn rejected_in(state: &TaskPaymentState, err: &X402Error) -> TaskResponse {
    tracing::warn!(task_id = %state.task_id, status = %state.status(), reason = %err.reason(), "message rejected");
    respond(state, TaskState::Rejected).with_error(err)
}

/// Transport failure: state untouched, the caller may retry the same step.
fn retryable(state: &TaskPaymentState, err: X402Error) -> TaskResponse {
    tracing::error!(task_id = %state.task_id, status = %state.status(), error = %err, "facilitator unavailable");
    respond(state, TaskState::InputRequired).with_error(&err)
}
