//! x402 payment extension for agent-to-agent tasks.
//!
//! Lets a task executor demand payment before finishing work, and lets the
//! calling agent answer with an EIP-3009 `transferWithAuthorization` signed
//! off-chain. A facilitator verifies and settles the authorization later.
//!
//! # Three-party model
//!
//! - **Client** ([`select`], [`AuthorizationBuilder`]): picks an accepted
//!   requirement and signs a transfer authorization for it
//! - **Executor** ([`PaymentNegotiator`]): wraps a [`TaskDelegate`], issues
//!   requirements, drives verify/settle and re-injects the outcome
//! - **Facilitator** ([`Facilitator`]): verifies and settles; either the
//!   deterministic [`LocalFacilitator`] or the HTTP [`RemoteFacilitator`]
//!
//! # Quick example (client)
//!
//! ```no_run
//! use alloy::signers::local::PrivateKeySigner;
//! use x402_a2a::{
//!     process_payment_required, AuthorizationBuilder, InMemoryLedger, LocalSigner,
//!     PaymentCapability, PaymentRequiredResponse,
//! };
//!
//! # async fn run(required: PaymentRequiredResponse, ledger: InMemoryLedger) {
//! let signer = LocalSigner::new(PrivateKeySigner::random());
//! let builder = AuthorizationBuilder::new();
//! let caps = [PaymentCapability::new(
//!     "base-sepolia",
//!     "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
//! )];
//!
//! let payload = process_payment_required(&required, &caps, None, &builder, &signer, &ledger)
//!     .await
//!     .unwrap();
//! # }
//! ```

// Wire types and errors
pub mod constants;
pub mod error;
pub mod message;
pub mod payment;
pub mod response;

// Client side
pub mod builder;
pub mod client;
pub mod eip712;
pub mod ledger;
pub mod requirements;
pub mod selector;

// Executor side
pub mod agent_card;
pub mod config;
pub mod delegate;
pub mod extension;
pub mod facilitator;
pub mod hmac;
pub mod negotiator;
pub mod nonce_store;
pub mod state;

use alloy::sol;

// EIP-3009 typed-data body. The sol! macro derives SolStruct which provides
// eip712_signing_hash(); the struct name is part of the type hash.
sol! {
    #[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

// Read surface of an EIP-3009 token used to build the signing domain.
sol! {
    #[sol(rpc)]
    interface IERC3009 {
        function name() external view returns (string);
        function version() external view returns (string);
        function nonces(address owner) external view returns (uint256);
    }
}

// Re-exports
pub use constants::*;
pub use error::{ErrorCode, ErrorKind, ErrorReport, X402Error};
pub use message::*;
pub use payment::*;
pub use response::*;

pub use agent_card::{create_x402_agent_card, AgentCapabilities, AgentCard, AgentSkill};
pub use builder::AuthorizationBuilder;
pub use client::{create_payment_submission_message, extract_task_id, process_payment_required};
pub use config::{FacilitatorConfig, NegotiatorConfig, SettlementPolicy};
pub use delegate::{
    CapabilityResult, DelegateOutcome, PaymentRequiredSignal, TaskContext, TaskDelegate,
    TaskOutput,
};
pub use eip712::{AssetMetadata, TypedAuthorization};
pub use extension::{check_extension_activation, extension_declaration, AgentExtension};
pub use facilitator::{
    check_payload, ConfiguredFacilitator, Facilitator, LocalFacilitator, RemoteFacilitator,
};
pub use ledger::{InMemoryLedger, Ledger, LocalSigner, PaymentSigner, RpcLedger};
pub use negotiator::PaymentNegotiator;
pub use requirements::{
    create_payment_requirements, create_tiered_payment_options, parse_price, RequirementOptions,
};
pub use selector::{select, select_within_budget, PaymentCapability};
pub use state::{PaymentStateStore, PaymentStatus, TaskPaymentState};
