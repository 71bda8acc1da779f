//! Contract between the negotiator and the business logic it wraps.
//!
//! A delegate never raises "payment required": it returns
//! [`DelegateOutcome::PaymentRequired`] and the negotiator branches on it.

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ErrorCode, X402Error};
use crate::{
    Message, PaymentPayload, PaymentRequiredResponse, PaymentRequirements, VerifyResponse,
    PAYMENT_STATUS_CAPABILITY,
};

/// Result the delegate produces when it can finish without (further) payment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskOutput {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl TaskOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// "Payment needed for `resource`, payable any of these ways."
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequiredSignal {
    pub resource: String,
    pub accepts: Vec<PaymentRequirements>,
}

impl PaymentRequiredSignal {
    pub fn single(resource: impl Into<String>, requirement: PaymentRequirements) -> Self {
        Self {
            resource: resource.into(),
            accepts: vec![requirement],
        }
    }

    /// Several options in preference order. Must not be empty.
    pub fn choice(
        resource: impl Into<String>,
        accepts: Vec<PaymentRequirements>,
    ) -> Result<Self, X402Error> {
        if accepts.is_empty() {
            return Err(X402Error::Validation(
                ErrorCode::InvalidPayload,
                "payment-required signal needs at least one accepted requirement".to_string(),
            ));
        }
        Ok(Self {
            resource: resource.into(),
            accepts,
        })
    }

    pub fn to_response(&self) -> PaymentRequiredResponse {
        PaymentRequiredResponse::new(self.accepts.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DelegateOutcome {
    Completed(TaskOutput),
    PaymentRequired(PaymentRequiredSignal),
}

/// Synthesized output of a named capability call, handed to the delegate once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResult {
    pub name: String,
    pub response: Value,
}

impl CapabilityResult {
    /// The "payment confirmed" result for a verified payload.
    pub fn payment_confirmed(
        payload: &PaymentPayload,
        verdict: &VerifyResponse,
        resource: &str,
    ) -> Self {
        let auth = &payload.payload.authorization;
        Self {
            name: PAYMENT_STATUS_CAPABILITY.to_string(),
            response: json!({
                "status": "SUCCESS",
                "resource": resource,
                "payer": verdict.payer.clone().unwrap_or_else(|| auth.from.clone()),
                "network": payload.network,
                "authorization": auth,
            }),
        }
    }

    pub fn is_payment_confirmation(&self) -> bool {
        self.name == PAYMENT_STATUS_CAPABILITY
            && self.response.get("status").and_then(Value::as_str) == Some("SUCCESS")
    }
}

/// Everything the delegate sees for one invocation.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub context_id: String,
    pub message: Message,
    /// False when the caller did not activate the extension.
    pub payments_enabled: bool,
    pub injected: Option<CapabilityResult>,
}

/// Business logic wrapped by [`crate::PaymentNegotiator`].
///
/// Work done before returning [`DelegateOutcome::PaymentRequired`] must have
/// no externally visible side effect.
pub trait TaskDelegate: Send + Sync {
    fn execute(
        &self,
        ctx: TaskContext,
    ) -> impl Future<Output = Result<DelegateOutcome, X402Error>> + Send;
}

impl<D: TaskDelegate> TaskDelegate for std::sync::Arc<D> {
    fn execute(
        &self,
        ctx: TaskContext,
    ) -> impl Future<Output = Result<DelegateOutcome, X402Error>> + Send {
        (**self).execute(ctx)
    }
}
