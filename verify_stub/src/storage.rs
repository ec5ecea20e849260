use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tier_catalog::{tier_config, PaymentTarget, ProrateQuote, SubscriptionTier};
use tracing::info;

/// Accepted payments may be off by one micro-SOL at most.
pub const AMOUNT_TOLERANCE_SOL: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentState {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PaymentRecord {
    pub payment_id: String,
    pub wallet: String,
    pub target: PaymentTarget,
    pub amount_sol: f64,
    pub state: PaymentState,
    pub polls_seen: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CreditBalance {
    pub messages: u32,
    pub premium_messages: u32,
}

/// A verification submission, already parsed out of the request body.
#[derive(Debug, Clone)]
pub struct PaymentSubmission {
    pub signature: String,
    pub wallet: String,
    pub amount_sol: f64,
    pub target: PaymentTarget,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    Accepted { payment_id: String },
    Duplicate,
    AmountMismatch { expected_sol: f64 },
    InvalidPurchase(String),
}

/// All backend state, kept in memory behind one lock.
#[derive(Default)]
pub struct PaymentStore {
    payments: HashMap<String, PaymentRecord>,
    subscriptions: HashMap<String, SubscriptionTier>,
    credits: HashMap<String, CreditBalance>,
    next_payment_seq: u64,
}

impl PaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_subscription(&mut self, wallet: String, tier: SubscriptionTier) {
        self.subscriptions.insert(wallet, tier);
    }

    pub fn current_tier(&self, wallet: &str) -> SubscriptionTier {
        self.subscriptions
            .get(wallet)
            .copied()
            .unwrap_or(SubscriptionTier::Free)
    }

    pub fn credits(&self, wallet: &str) -> CreditBalance {
        self.credits.get(wallet).copied().unwrap_or_default()
    }

    /// Records a payment keyed by its transaction signature. A signature
    /// that was seen before is reported as a duplicate, whatever its state,
    /// so a retried verify call never creates a second payment.
    pub fn verify(&mut self, submission: PaymentSubmission, days_remaining: u32) -> VerifyOutcome {
        if self.payments.contains_key(&submission.signature) {
            return VerifyOutcome::Duplicate;
        }
        let current = self.current_tier(&submission.wallet);
        if let Err(err) = tier_catalog::validate_purchase(current, &submission.target) {
            return VerifyOutcome::InvalidPurchase(err.to_string());
        }
        let expected_sol = self.expected_amount(current, &submission.target, days_remaining);
        if (submission.amount_sol - expected_sol).abs() > AMOUNT_TOLERANCE_SOL {
            return VerifyOutcome::AmountMismatch { expected_sol };
        }
        self.next_payment_seq += 1;
        let payment_id = format!("pay_{:08}", self.next_payment_seq);
        self.payments.insert(
            submission.signature.clone(),
            PaymentRecord {
                payment_id: payment_id.clone(),
                wallet: submission.wallet,
                target: submission.target,
                amount_sol: submission.amount_sol,
                state: PaymentState::Pending,
                polls_seen: 0,
            },
        );
        VerifyOutcome::Accepted { payment_id }
    }

    /// One status poll. Unknown signatures read as failed; a pending payment
    /// confirms once it has been polled `confirm_after` times, which is also
    /// when the purchase is applied to the account.
    pub fn poll(&mut self, signature: &str, confirm_after: u32) -> PaymentState {
        let (state, confirmed) = match self.payments.get_mut(signature) {
            None => return PaymentState::Failed,
            Some(record) => match record.state {
                PaymentState::Confirmed | PaymentState::Failed => (record.state, None),
                PaymentState::Pending => {
                    record.polls_seen += 1;
                    if record.polls_seen >= confirm_after {
                        record.state = PaymentState::Confirmed;
                        info!(
                            payment_id = %record.payment_id,
                            wallet = %record.wallet,
                            amount_sol = record.amount_sol,
                            "payment confirmed"
                        );
                        (
                            PaymentState::Confirmed,
                            Some((record.wallet.clone(), record.target.clone())),
                        )
                    } else {
                        (PaymentState::Pending, None)
                    }
                }
            },
        };
        if let Some((wallet, target)) = confirmed {
            self.apply_confirmed(&wallet, &target);
        }
        state
    }

    pub fn prorate(
        &self,
        wallet: &str,
        target: SubscriptionTier,
        days_remaining: u32,
    ) -> ProrateQuote {
        let current = self.current_tier(wallet);
        match prorated_price(current, target, days_remaining) {
            Some(price) => ProrateQuote {
                is_prorated: true,
                prorated_price_sol: Some(price),
                days_remaining: Some(days_remaining),
            },
            None => ProrateQuote {
                is_prorated: false,
                prorated_price_sol: None,
                days_remaining: None,
            },
        }
    }

    fn expected_amount(
        &self,
        current: SubscriptionTier,
        target: &PaymentTarget,
        days_remaining: u32,
    ) -> f64 {
        match target {
            PaymentTarget::Tier(tier) => prorated_price(current, *tier, days_remaining)
                .unwrap_or_else(|| tier_config(*tier).price_sol),
            PaymentTarget::CreditPacks(pack) => pack.price_sol(),
        }
    }

    fn apply_confirmed(&mut self, wallet: &str, target: &PaymentTarget) {
        match target {
            PaymentTarget::Tier(tier) => {
                self.subscriptions.insert(wallet.to_string(), *tier);
            }
            PaymentTarget::CreditPacks(pack) => {
                let balance = self.credits.entry(wallet.to_string()).or_default();
                balance.messages = balance.messages.saturating_add(pack.messages());
                balance.premium_messages =
                    balance.premium_messages.saturating_add(pack.premium_messages());
            }
        }
    }
}

/// Upgrade price after crediting the unused share of the current plan,
/// rounded to micro-SOL. Only a paid plan moving up gets prorated.
pub fn prorated_price(
    current: SubscriptionTier,
    target: SubscriptionTier,
    days_remaining: u32,
) -> Option<f64> {
    if !current.is_paid() || !target.is_paid() || target <= current {
        return None;
    }
    let current_price = tier_config(current).price_sol;
    let target_price = tier_config(target).price_sol;
    let credit = current_price * days_remaining as f64 / 30.0;
    Some(lamports_util::round_sol((target_price - credit).max(0.0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tier_catalog::CreditPack;

    fn submission(signature: &str, wallet: &str, amount_sol: f64, target: PaymentTarget) -> PaymentSubmission {
        PaymentSubmission {
            signature: signature.to_string(),
            wallet: wallet.to_string(),
            amount_sol,
            target,
        }
    }

    #[test]
    fn test_verify_accepts_the_list_price_for_a_new_wallet() {
        let mut store = PaymentStore::new();
        let outcome = store.verify(
            submission("sig-1", "wallet-a", 0.05, PaymentTarget::Tier(SubscriptionTier::Pro)),
            12,
        );
        assert_eq!(
            outcome,
            VerifyOutcome::Accepted {
                payment_id: "pay_00000001".to_string(),
            }
        );
    }

    #[test]
    fn test_repeated_signature_is_a_duplicate() {
        let mut store = PaymentStore::new();
        let first = submission("sig-1", "wallet-a", 0.05, PaymentTarget::Tier(SubscriptionTier::Pro));
        assert!(matches!(
            store.verify(first.clone(), 12),
            VerifyOutcome::Accepted { .. }
        ));
        assert_eq!(store.verify(first, 12), VerifyOutcome::Duplicate);
    }

    #[test]
    fn test_amount_mismatch_names_the_expected_price() {
        let mut store = PaymentStore::new();
        let outcome = store.verify(
            submission("sig-1", "wallet-a", 0.04, PaymentTarget::Tier(SubscriptionTier::Pro)),
            12,
        );
        assert_eq!(
            outcome,
            VerifyOutcome::AmountMismatch { expected_sol: 0.05 }
        );
    }

    #[test]
    fn test_payment_confirms_after_the_configured_polls_and_upgrades() {
        let mut store = PaymentStore::new();
        store.verify(
            submission("sig-1", "wallet-a", 0.05, PaymentTarget::Tier(SubscriptionTier::Pro)),
            12,
        );

        assert_eq!(store.poll("sig-1", 2), PaymentState::Pending);
        assert_eq!(store.current_tier("wallet-a"), SubscriptionTier::Free);
        assert_eq!(store.poll("sig-1", 2), PaymentState::Confirmed);
        assert_eq!(store.current_tier("wallet-a"), SubscriptionTier::Pro);

        // Confirmed is sticky.
        assert_eq!(store.poll("sig-1", 2), PaymentState::Confirmed);
    }

    #[test]
    fn test_unknown_signature_polls_as_failed() {
        let mut store = PaymentStore::new();
        assert_eq!(store.poll("never-seen", 2), PaymentState::Failed);
    }

    #[test]
    fn test_prorated_upgrade_uses_the_remaining_days_credit() {
        let mut store = PaymentStore::new();
        store.seed_subscription("wallet-a".to_string(), SubscriptionTier::Pro);

        // 0.1 minus 12/30 of the 0.05 already paid.
        let quote = store.prorate("wallet-a", SubscriptionTier::ProPlus, 12);
        assert!(quote.is_prorated);
        assert_eq!(quote.prorated_price_sol, Some(0.08));
        assert_eq!(quote.days_remaining, Some(12));

        let outcome = store.verify(
            submission(
                "sig-1",
                "wallet-a",
                0.08,
                PaymentTarget::Tier(SubscriptionTier::ProPlus),
            ),
            12,
        );
        assert!(matches!(outcome, VerifyOutcome::Accepted { .. }));
    }

    #[test]
    fn test_prorate_quote_is_flat_for_free_wallets() {
        let store = PaymentStore::new();
        let quote = store.prorate("wallet-a", SubscriptionTier::Pro, 12);
        assert!(!quote.is_prorated);
        assert_eq!(quote.prorated_price_sol, None);
    }

    #[test]
    fn test_the_credit_never_drives_the_price_below_zero() {
        assert_eq!(
            prorated_price(SubscriptionTier::Pro, SubscriptionTier::ProPlus, 30),
            Some(0.05)
        );
        assert_eq!(
            prorated_price(SubscriptionTier::Pro, SubscriptionTier::ProPlus, 0),
            Some(0.1)
        );
        // A misconfigured period longer than a month clamps instead of refunding.
        assert_eq!(
            prorated_price(SubscriptionTier::Pro, SubscriptionTier::ProPlus, 90),
            Some(0.0)
        );
    }

    #[test]
    fn test_pack_purchase_grants_credits_once_confirmed() {
        let mut store = PaymentStore::new();
        store.seed_subscription("wallet-a".to_string(), SubscriptionTier::Pro);
        store.verify(
            submission(
                "sig-1",
                "wallet-a",
                0.05,
                PaymentTarget::CreditPacks(CreditPack { quantity: 2 }),
            ),
            12,
        );

        store.poll("sig-1", 1);
        assert_eq!(
            store.credits("wallet-a"),
            CreditBalance {
                messages: 300,
                premium_messages: 50,
            }
        );
        // The subscription itself is untouched by a pack purchase.
        assert_eq!(store.current_tier("wallet-a"), SubscriptionTier::Pro);
    }

    #[test]
    fn test_credit_grants_pin_at_the_quota_ceiling() {
        let mut store = PaymentStore::new();
        store.seed_subscription("wallet-a".to_string(), SubscriptionTier::Pro);
        store.credits.insert(
            "wallet-a".to_string(),
            CreditBalance {
                messages: u32::MAX - 10,
                premium_messages: u32::MAX,
            },
        );
        store.verify(
            submission(
                "sig-1",
                "wallet-a",
                0.05,
                PaymentTarget::CreditPacks(CreditPack { quantity: 2 }),
            ),
            12,
        );

        store.poll("sig-1", 1);
        assert_eq!(
            store.credits("wallet-a"),
            CreditBalance {
                messages: u32::MAX,
                premium_messages: u32::MAX,
            }
        );
    }

    #[test]
    fn test_packs_require_a_paid_subscription() {
        let mut store = PaymentStore::new();
        let outcome = store.verify(
            submission(
                "sig-1",
                "wallet-a",
                0.025,
                PaymentTarget::CreditPacks(CreditPack { quantity: 1 }),
            ),
            12,
        );
        assert!(matches!(outcome, VerifyOutcome::InvalidPurchase(_)));
    }

    #[test]
    fn test_downgrades_are_rejected() {
        let mut store = PaymentStore::new();
        store.seed_subscription("wallet-a".to_string(), SubscriptionTier::ProPlus);
        let outcome = store.verify(
            submission("sig-1", "wallet-a", 0.05, PaymentTarget::Tier(SubscriptionTier::Pro)),
            12,
        );
        assert!(matches!(outcome, VerifyOutcome::InvalidPurchase(_)));
    }
}
