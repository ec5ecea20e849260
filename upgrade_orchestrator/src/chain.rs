use solana_client::rpc_client::RpcClient;
use solana_commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;

use crate::error::PaymentError;

/// Node boundary used by the flow: balance preflight, blockhash fetch and
/// broadcast.
#[allow(async_fn_in_trait)]
pub trait ChainRpc {
    async fn balance_of(&self, wallet: &Pubkey) -> Result<u64, PaymentError>;
    async fn latest_blockhash(&self) -> Result<Hash, PaymentError>;
    async fn send_transaction(&self, tx: &Transaction) -> Result<Signature, PaymentError>;
}

pub struct JsonRpcChain {
    solana_url: String,
}

impl JsonRpcChain {
    pub fn new<T>(solana_url: T) -> Self
    where
        T: Into<String>,
    {
        Self {
            solana_url: solana_url.into(),
        }
    }

    fn client(&self) -> RpcClient {
        RpcClient::new_with_commitment(&self.solana_url, CommitmentConfig::confirmed())
    }
}

impl ChainRpc for JsonRpcChain {
    async fn balance_of(&self, wallet: &Pubkey) -> Result<u64, PaymentError> {
        self.client()
            .get_balance(wallet)
            .map_err(|e| PaymentError::Network(format!("Failed to get balance: {}", e)))
    }

    async fn latest_blockhash(&self) -> Result<Hash, PaymentError> {
        self.client()
            .get_latest_blockhash()
            .map_err(|e| PaymentError::Network(format!("Failed to get latest blockhash: {}", e)))
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<Signature, PaymentError> {
        self.client()
            .send_transaction(tx)
            .map_err(|e| classify_send_error(&e.to_string()))
    }
}

/// Maps node error text onto the typed taxonomy. This is the only place
/// broadcast error strings are inspected; everything downstream matches on
/// the variant.
pub fn classify_send_error(message: &str) -> PaymentError {
    let lower = message.to_lowercase();
    if lower.contains("already been processed") || lower.contains("already processed") {
        return PaymentError::AlreadyProcessed;
    }
    if lower.contains("blockhash not found") || lower.contains("blockhash expired") {
        return PaymentError::BlockhashExpired;
    }
    if lower.contains("signature verification") {
        return PaymentError::SignatureVerification;
    }
    if lower.contains("was not confirmed") {
        return PaymentError::ConfirmationTimeout;
    }
    if lower.contains("simulation failed") {
        let node_related = [
            "node is behind",
            "too many requests",
            "rate limit",
            "connection",
            "timed out",
            "temporarily unavailable",
        ]
        .iter()
        .any(|marker| lower.contains(marker));
        return PaymentError::SimulationFailed {
            reason: message.to_string(),
            node_related,
        };
    }
    PaymentError::Network(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_duplicate_broadcast() {
        assert!(matches!(
            classify_send_error("This transaction has already been processed"),
            PaymentError::AlreadyProcessed
        ));
    }

    #[test]
    fn test_classify_blockhash_even_inside_simulation_text() {
        assert!(matches!(
            classify_send_error("Blockhash not found"),
            PaymentError::BlockhashExpired
        ));
        assert!(matches!(
            classify_send_error("Transaction simulation failed: Blockhash not found"),
            PaymentError::BlockhashExpired
        ));
    }

    #[test]
    fn test_classify_signature_verification() {
        assert!(matches!(
            classify_send_error("Transaction signature verification failure"),
            PaymentError::SignatureVerification
        ));
    }

    #[test]
    fn test_classify_confirmation_timeout() {
        assert!(matches!(
            classify_send_error(
                "Transaction was not confirmed in 30.00 seconds. It is unknown if it succeeded or failed."
            ),
            PaymentError::ConfirmationTimeout
        ));
    }

    #[test]
    fn test_classify_simulation_failures_by_origin() {
        let node = classify_send_error("Transaction simulation failed: node is behind by 152 slots");
        assert!(matches!(
            node,
            PaymentError::SimulationFailed { node_related: true, .. }
        ));

        let program = classify_send_error(
            "Transaction simulation failed: Error processing Instruction 0: custom program error: 0x1",
        );
        assert!(matches!(
            program,
            PaymentError::SimulationFailed { node_related: false, .. }
        ));
    }

    #[test]
    fn test_unrecognized_text_falls_back_to_network() {
        assert!(matches!(
            classify_send_error("error sending request for url (http://localhost:8899/)"),
            PaymentError::Network(_)
        ));
    }
}
