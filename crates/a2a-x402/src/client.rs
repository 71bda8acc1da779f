//! Caller-side helpers: answer a payment-required response.

use alloy::primitives::U256;

use crate::builder::AuthorizationBuilder;
use crate::error::X402Error;
use crate::ledger::{Ledger, PaymentSigner};
use crate::selector::{select_within_budget, PaymentCapability};
use crate::{Message, PaymentPayload, PaymentRequiredResponse};

/// Select a requirement from `response` and sign a payload for it.
///
/// Nothing is signed (and the ledger is not read) when no entry is
/// satisfiable.
pub async fn process_payment_required<S: PaymentSigner, L: Ledger>(
    response: &PaymentRequiredResponse,
    capabilities: &[PaymentCapability],
    max_value: Option<U256>,
    builder: &AuthorizationBuilder,
    signer: &S,
    ledger: &L,
) -> Result<PaymentPayload, X402Error> {
    let requirement = select_within_budget(&response.accepts, capabilities, max_value)?;
    tracing::debug!(
        network = %requirement.network,
        asset = %requirement.asset,
        amount = %requirement.max_amount_required,
        resource = %requirement.resource,
        "selected payment requirement"
    );
    builder.build(&requirement, signer, ledger, None, None).await
}

/// Message carrying `payload` back to the executor for `task_id`.
pub fn create_payment_submission_message(
    task_id: &str,
    payload: &PaymentPayload,
) -> Result<Message, X402Error> {
    let mut message = Message::user("").with_task_id(task_id);
    message.set_payment_payload(payload)?;
    Ok(message)
}

pub fn extract_task_id(message: &Message) -> Option<&str> {
    message.task_id.as_deref()
}
