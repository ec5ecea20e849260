use thiserror::Error;

use tier_catalog::PurchaseError;

use crate::flow::FlowState;

/// Everything that can go wrong between selecting a plan and a confirmed
/// payment. Variants are produced at the adapter boundaries (chain, wallet,
/// backend); the flow only ever matches on the tag, never on message text.
#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    /// The ledger already knows this transaction. Reclassified as success
    /// by the flow, never surfaced to the user as an error.
    #[error("transaction was already processed")]
    AlreadyProcessed,

    #[error("transaction signature verification failed")]
    SignatureVerification,

    #[error("blockhash expired before the transaction landed")]
    BlockhashExpired,

    #[error("transaction simulation failed: {reason}")]
    SimulationFailed { reason: String, node_related: bool },

    #[error("transaction was rejected in the wallet")]
    WalletRejected,

    #[error("wallet is not connected")]
    WalletNotConnected,

    #[error("insufficient balance: required {required} lamports, available {available} lamports")]
    InsufficientBalance { required: u64, available: u64 },

    #[error("network error: {0}")]
    Network(String),

    #[error("transaction was not confirmed in time")]
    ConfirmationTimeout,

    #[error("payment verification failed after {attempts} attempts")]
    VerificationFailed { attempts: u32 },

    #[error("payment rejected by the backend: {message}")]
    VerificationRejected {
        code: Option<String>,
        message: String,
    },

    #[error("payment was marked failed during confirmation")]
    ConfirmationFailed,

    #[error("payment confirmation timed out after {waited_secs}s")]
    StatusPollTimeout { waited_secs: u64 },

    #[error("broadcast returned a malformed signature")]
    MalformedSignature,

    #[error("payment system is not configured: {0}")]
    Misconfigured(String),

    #[error(transparent)]
    InvalidPurchase(#[from] PurchaseError),

    #[error("operation is not allowed in the {0} state")]
    WrongState(FlowState),
}

/// What the user can do about a terminal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    TryAgain,
    CheckBalance,
    CheckNetworkStatus,
    ContactSupport,
    None,
}

impl PaymentError {
    /// Errors the controller retries on its own, building a fresh
    /// transaction when no signature was captured by the failed attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::SignatureVerification
                | PaymentError::BlockhashExpired
                | PaymentError::Network(_)
                | PaymentError::ConfirmationTimeout
                | PaymentError::SimulationFailed {
                    node_related: true,
                    ..
                }
        )
    }

    pub fn recovery(&self) -> RecoveryAction {
        match self {
            PaymentError::InsufficientBalance { .. } => RecoveryAction::CheckBalance,
            PaymentError::Network(_)
            | PaymentError::ConfirmationTimeout
            | PaymentError::SimulationFailed {
                node_related: true, ..
            } => RecoveryAction::CheckNetworkStatus,
            PaymentError::SignatureVerification
            | PaymentError::BlockhashExpired
            | PaymentError::ConfirmationFailed
            | PaymentError::VerificationFailed { .. }
            | PaymentError::SimulationFailed {
                node_related: false, ..
            } => RecoveryAction::TryAgain,
            PaymentError::Misconfigured(_)
            | PaymentError::StatusPollTimeout { .. }
            | PaymentError::VerificationRejected { .. }
            | PaymentError::MalformedSignature => RecoveryAction::ContactSupport,
            PaymentError::AlreadyProcessed
            | PaymentError::WalletRejected
            | PaymentError::WalletNotConnected
            | PaymentError::InvalidPurchase(_)
            | PaymentError::WrongState(_) => RecoveryAction::None,
        }
    }
}
