use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The four failure classes reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed or missing payment payload where one is required.
    MessageError,
    /// Requirement mismatch: asset/network, amount cap, validity window, unsatisfiable accepts.
    ValidationError,
    /// Facilitator, ledger or signer rejection or failure.
    PaymentError,
    /// Operation attempted in a state that forbids it.
    StateError,
}

/// Machine-readable failure code attached to every reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidPayload,
    NetworkMismatch,
    UnsupportedScheme,
    InvalidAmount,
    RecipientMismatch,
    ExpiredPayment,
    Unsatisfiable,
    InvalidSignature,
    DuplicateNonce,
    InsufficientFunds,
    VerificationFailed,
    SettlementFailed,
    LedgerUnavailable,
    SigningFailed,
    FacilitatorUnavailable,
    DelegateFailed,
    InvalidState,
    InvalidConfig,
}

/// Errors returned by x402 operations.
#[derive(Debug, Error)]
pub enum X402Error {
    #[error("message error: {1}")]
    Message(ErrorCode, String),

    #[error("validation error: {1}")]
    Validation(ErrorCode, String),

    #[error("payment error: {1}")]
    Payment(ErrorCode, String),

    /// I/O failure talking to a facilitator. Never advances task state.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("state error: {0}")]
    State(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl X402Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            X402Error::Message(..) | X402Error::SerdeError(_) => ErrorKind::MessageError,
            X402Error::Validation(..) | X402Error::Config(_) => ErrorKind::ValidationError,
            X402Error::Payment(..) | X402Error::Transport(_) => ErrorKind::PaymentError,
            X402Error::State(_) => ErrorKind::StateError,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            X402Error::Message(code, _)
            | X402Error::Validation(code, _)
            | X402Error::Payment(code, _) => *code,
            X402Error::Transport(_) => ErrorCode::FacilitatorUnavailable,
            X402Error::State(_) => ErrorCode::InvalidState,
            X402Error::Config(_) => ErrorCode::InvalidConfig,
            X402Error::SerdeError(_) => ErrorCode::InvalidPayload,
        }
    }

    /// Human-readable reason without the kind prefix.
    pub fn reason(&self) -> String {
        match self {
            X402Error::Message(_, r) | X402Error::Validation(_, r) | X402Error::Payment(_, r) => {
                r.clone()
            }
            X402Error::Transport(r) | X402Error::State(r) | X402Error::Config(r) => r.clone(),
            X402Error::SerdeError(e) => e.to_string(),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, X402Error::Transport(_))
    }
}

/// Wire form of a failure attached to a task response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub message: String,
}

impl From<&X402Error> for ErrorReport {
    fn from(e: &X402Error) -> Self {
        Self {
            kind: e.kind(),
            code: e.code(),
            message: e.reason(),
        }
    }
}
