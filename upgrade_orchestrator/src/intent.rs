use chrono::{DateTime, Utc};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;

use tier_catalog::PaymentTarget;

/// Referral terms snapshotted when the intent is created. Read once per
/// intent so a mid-flow change on the backend cannot reroute the split.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferralShare {
    pub referrer: Pubkey,
    pub commission_rate: f64,
    pub referral_code: Option<String>,
}

/// One attempted purchase. Created when the user confirms a selection,
/// discarded when the flow is closed or reset.
#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub target: PaymentTarget,
    pub amount_lamports: u64,
    pub is_prorated: bool,
    pub payer: Pubkey,
    pub referral: Option<ReferralShare>,
    pub created_at: DateTime<Utc>,
}

impl PaymentIntent {
    pub fn referral_params(&self) -> Option<transfer_builder::Referral> {
        self.referral
            .as_ref()
            .map(|share| transfer_builder::Referral {
                referrer: share.referrer,
                commission_rate: share.commission_rate,
            })
    }
}

/// Written once when the broadcast returns and never mutated afterwards.
/// A retry that finds a record reuses its signature instead of
/// re-broadcasting the payment.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub signature: Signature,
    pub amount_lamports: u64,
    pub target: PaymentTarget,
    pub broadcast_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn broadcast(signature: Signature, intent: &PaymentIntent) -> Self {
        Self {
            signature,
            amount_lamports: intent.amount_lamports,
            target: intent.target.clone(),
            broadcast_at: Utc::now(),
        }
    }

    /// Whether this record belongs to the same purchase as `intent`.
    pub fn matches(&self, intent: &PaymentIntent) -> bool {
        self.target == intent.target && self.amount_lamports == intent.amount_lamports
    }
}

/// Terminal summary of a confirmed payment.
#[derive(Debug, Clone)]
pub struct PaymentReceipt {
    pub payment_id: Option<String>,
    pub signature: Signature,
    pub amount_lamports: u64,
    pub target: PaymentTarget,
    pub attempts: u32,
    pub completed_at: DateTime<Utc>,
}
