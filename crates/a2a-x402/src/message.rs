//! Task messages and the `x402.payment.*` metadata they carry.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::delegate::TaskOutput;
use crate::error::{ErrorCode, ErrorReport, X402Error};
use crate::state::PaymentStatus;
use crate::{PaymentPayload, PaymentRequiredResponse, SettleResponse};

pub const METADATA_STATUS_KEY: &str = "x402.payment.status";
pub const METADATA_REQUIRED_KEY: &str = "x402.payment.required";
pub const METADATA_PAYLOAD_KEY: &str = "x402.payment.payload";
pub const METADATA_RECEIPTS_KEY: &str = "x402.payment.receipts";
pub const METADATA_ERROR_KEY: &str = "x402.payment.error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

/// One turn of a task conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            task_id: None,
            context_id: None,
            role: Role::User,
            text: text.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_context_id(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    /// Embedded payment payload.
    ///
    /// `Ok(None)` when the key is absent; a present but malformed payload is
    /// a `MessageError`.
    pub fn payment_payload(&self) -> Result<Option<PaymentPayload>, X402Error> {
        let Some(raw) = self.metadata.get(METADATA_PAYLOAD_KEY) else {
            return Ok(None);
        };
        serde_json::from_value(raw.clone()).map(Some).map_err(|e| {
            X402Error::Message(
                ErrorCode::InvalidPayload,
                format!("malformed {METADATA_PAYLOAD_KEY}: {e}"),
            )
        })
    }

    pub fn set_payment_payload(&mut self, payload: &PaymentPayload) -> Result<(), X402Error> {
        self.metadata
            .insert(METADATA_PAYLOAD_KEY.to_string(), serde_json::to_value(payload)?);
        self.set_payment_status(PaymentStatus::PaymentSubmitted);
        Ok(())
    }

    pub fn payment_status(&self) -> Option<PaymentStatus> {
        payment_status_in(&self.metadata)
    }

    pub fn set_payment_status(&mut self, status: PaymentStatus) {
        self.metadata.insert(
            METADATA_STATUS_KEY.to_string(),
            Value::String(status.as_str().to_string()),
        );
    }
}

/// Inbound task request: a message plus the extension URIs the caller activated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub message: Message,
    #[serde(default)]
    pub extensions: Vec<String>,
}

impl TaskRequest {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            extensions: Vec::new(),
        }
    }

    pub fn with_extension(mut self, uri: impl Into<String>) -> Self {
        self.extensions.push(uri.into());
        self
    }
}

/// Task-level outcome reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Completed,
    /// Waiting on the caller, here for a payment submission.
    InputRequired,
    Failed,
    /// Refused without touching task state.
    Rejected,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::InputRequired => "input-required",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub task_id: String,
    pub context_id: String,
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<TaskOutput>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub activated_extensions: Vec<String>,
}

impl TaskResponse {
    pub fn new(task_id: impl Into<String>, context_id: impl Into<String>, state: TaskState) -> Self {
        Self {
            task_id: task_id.into(),
            context_id: context_id.into(),
            state,
            payment_status: None,
            output: None,
            metadata: Map::new(),
            error: None,
            activated_extensions: Vec::new(),
        }
    }

    pub fn with_output(mut self, output: TaskOutput) -> Self {
        self.output = Some(output);
        self
    }

    /// Record `status` both as a field and under `x402.payment.status`.
    pub fn with_payment_status(mut self, status: PaymentStatus) -> Self {
        self.payment_status = Some(status);
        self.metadata.insert(
            METADATA_STATUS_KEY.to_string(),
            Value::String(status.as_str().to_string()),
        );
        self
    }

    pub fn with_error(mut self, err: &X402Error) -> Self {
        let report = ErrorReport::from(err);
        if self.payment_status.is_some() {
            self.metadata.insert(
                METADATA_ERROR_KEY.to_string(),
                serde_json::to_value(report.code).unwrap_or(Value::Null),
            );
        }
        self.error = Some(report);
        self
    }

    pub fn with_payment_required(mut self, required: &PaymentRequiredResponse) -> Self {
        if let Ok(value) = serde_json::to_value(required) {
            self.metadata.insert(METADATA_REQUIRED_KEY.to_string(), value);
        }
        self
    }

    pub fn with_receipt(mut self, receipt: &SettleResponse) -> Self {
        if let Ok(value) = serde_json::to_value(receipt) {
            self.metadata
                .insert(METADATA_RECEIPTS_KEY.to_string(), Value::Array(vec![value]));
        }
        self
    }

    /// Requirements carried by a payment-required answer, if any.
    pub fn payment_required(&self) -> Result<Option<PaymentRequiredResponse>, X402Error> {
        match self.metadata.get(METADATA_REQUIRED_KEY) {
            Some(raw) => Ok(Some(serde_json::from_value(raw.clone())?)),
            None => Ok(None),
        }
    }

    pub fn receipts(&self) -> Result<Vec<SettleResponse>, X402Error> {
        match self.metadata.get(METADATA_RECEIPTS_KEY) {
            Some(raw) => Ok(serde_json::from_value(raw.clone())?),
            None => Ok(Vec::new()),
        }
    }
}

fn payment_status_in(metadata: &Map<String, Value>) -> Option<PaymentStatus> {
    metadata
        .get(METADATA_STATUS_KEY)
        .and_then(Value::as_str)
        .and_then(PaymentStatus::parse)
}
