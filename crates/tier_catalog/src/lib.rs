use std::fmt;
use std::str::FromStr;

use lamports_util::round_sol;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Subscription plan levels, ordered from lowest to highest.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    Free,
    Pro,
    ProPlus,
    Admin,
}

impl SubscriptionTier {
    pub fn is_paid(self) -> bool {
        matches!(self, SubscriptionTier::Pro | SubscriptionTier::ProPlus)
    }

    /// Admin is assigned, never bought; Free is the default plan.
    pub fn is_purchasable(self) -> bool {
        self.is_paid()
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Pro => "pro",
            SubscriptionTier::ProPlus => "pro_plus",
            SubscriptionTier::Admin => "admin",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for SubscriptionTier {
    type Err = PurchaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(SubscriptionTier::Free),
            "pro" => Ok(SubscriptionTier::Pro),
            "pro_plus" => Ok(SubscriptionTier::ProPlus),
            "admin" => Ok(SubscriptionTier::Admin),
            _ => Err(PurchaseError::UnknownTier(s.to_string())),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TierConfig {
    pub tier: SubscriptionTier,
    pub display_name: &'static str,
    pub price_sol: f64,
    pub price_usd: f64,
    pub messages_per_month: u32,
    pub premium_messages_per_month: u32,
    pub features: &'static [&'static str],
}

static TIER_CONFIGS: [TierConfig; 4] = [
    TierConfig {
        tier: SubscriptionTier::Free,
        display_name: "Free",
        price_sol: 0.0,
        price_usd: 0.0,
        messages_per_month: 50,
        premium_messages_per_month: 0,
        features: &["Standard models", "Community support"],
    },
    TierConfig {
        tier: SubscriptionTier::Pro,
        display_name: "Pro",
        price_sol: 0.05,
        price_usd: 9.0,
        messages_per_month: 500,
        premium_messages_per_month: 100,
        features: &[
            "Standard and premium models",
            "Custom agent personas",
            "Priority support",
        ],
    },
    TierConfig {
        tier: SubscriptionTier::ProPlus,
        display_name: "Pro+",
        price_sol: 0.1,
        price_usd: 18.0,
        messages_per_month: 1500,
        premium_messages_per_month: 300,
        features: &[
            "Everything in Pro",
            "Early access to new models",
            "Extended agent tooling",
        ],
    },
    TierConfig {
        tier: SubscriptionTier::Admin,
        display_name: "Admin",
        price_sol: 0.0,
        price_usd: 0.0,
        messages_per_month: u32::MAX,
        premium_messages_per_month: u32::MAX,
        features: &["Operator account"],
    },
];

pub fn tier_config(tier: SubscriptionTier) -> &'static TierConfig {
    match tier {
        SubscriptionTier::Free => &TIER_CONFIGS[0],
        SubscriptionTier::Pro => &TIER_CONFIGS[1],
        SubscriptionTier::ProPlus => &TIER_CONFIGS[2],
        SubscriptionTier::Admin => &TIER_CONFIGS[3],
    }
}

pub const CREDIT_PACK_PRICE_SOL: f64 = 0.025;
pub const CREDIT_PACK_MESSAGES: u32 = 150;
pub const CREDIT_PACK_PREMIUM_MESSAGES: u32 = 25;
pub const MAX_CREDIT_PACKS: u32 = 100;

/// One-time purchasable message bundle, independent of the billing cycle.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreditPack {
    pub quantity: u32,
}

impl CreditPack {
    /// Total price, rounded to micro-SOL so the quoted amount is the one
    /// the converted lamports recombine to.
    pub fn price_sol(&self) -> f64 {
        round_sol(self.quantity as f64 * CREDIT_PACK_PRICE_SOL)
    }

    pub fn messages(&self) -> u32 {
        self.quantity.saturating_mul(CREDIT_PACK_MESSAGES)
    }

    pub fn premium_messages(&self) -> u32 {
        self.quantity.saturating_mul(CREDIT_PACK_PREMIUM_MESSAGES)
    }
}

/// What the user is paying for: a tier upgrade or a batch of credit packs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum PaymentTarget {
    Tier(SubscriptionTier),
    CreditPacks(CreditPack),
}

impl fmt::Display for PaymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentTarget::Tier(tier) => write!(f, "{}", tier),
            PaymentTarget::CreditPacks(pack) => write!(f, "{} credit pack(s)", pack.quantity),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PurchaseError {
    #[error("unknown tier: {0}")]
    UnknownTier(String),
    #[error("already subscribed to the {0} tier")]
    AlreadyOnTier(SubscriptionTier),
    #[error("cannot move from {current} down to {target}")]
    Downgrade {
        current: SubscriptionTier,
        target: SubscriptionTier,
    },
    #[error("the {0} tier cannot be purchased")]
    NotPurchasable(SubscriptionTier),
    #[error("credit packs require an active paid subscription")]
    PackRequiresPaidTier,
    #[error("credit pack quantity must be at least 1")]
    EmptyPack,
    #[error("a single purchase is limited to {0} credit packs")]
    TooManyPacks(u32),
}

/// Checks whether `target` can be bought while subscribed to `current`.
/// Runs before any payment state is created; failures carry no side effects.
pub fn validate_purchase(
    current: SubscriptionTier,
    target: &PaymentTarget,
) -> Result<(), PurchaseError> {
    match target {
        PaymentTarget::Tier(tier) => {
            if !tier.is_purchasable() {
                return Err(PurchaseError::NotPurchasable(*tier));
            }
            if *tier == current {
                return Err(PurchaseError::AlreadyOnTier(current));
            }
            if *tier < current {
                return Err(PurchaseError::Downgrade {
                    current,
                    target: *tier,
                });
            }
            Ok(())
        }
        PaymentTarget::CreditPacks(pack) => {
            if pack.quantity == 0 {
                return Err(PurchaseError::EmptyPack);
            }
            if pack.quantity > MAX_CREDIT_PACKS {
                return Err(PurchaseError::TooManyPacks(MAX_CREDIT_PACKS));
            }
            if !current.is_paid() {
                return Err(PurchaseError::PackRequiresPaidTier);
            }
            Ok(())
        }
    }
}

/// Prorate data computed by the backend for a mid-cycle tier upgrade.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProrateQuote {
    pub is_prorated: bool,
    pub prorated_price_sol: Option<f64>,
    pub days_remaining: Option<u32>,
}

/// Price quote for a purchase. `prorated_price_sol` is only meaningful when
/// `is_prorated` is set.
#[derive(Clone, Debug, PartialEq)]
pub struct UpgradeQuote {
    pub price_sol: f64,
    pub is_prorated: bool,
    pub prorated_price_sol: Option<f64>,
    pub days_remaining: Option<u32>,
}

impl UpgradeQuote {
    pub fn amount_due_sol(&self) -> f64 {
        if self.is_prorated {
            self.prorated_price_sol.unwrap_or(self.price_sol)
        } else {
            self.price_sol
        }
    }
}

/// Resolves the price of a purchase. A missing `prorate` means the prorate
/// query has not answered yet; the quote then falls back to the list price
/// and the caller treats the result as provisional, not as a failure.
pub fn resolve_quote(target: &PaymentTarget, prorate: Option<&ProrateQuote>) -> UpgradeQuote {
    match target {
        PaymentTarget::Tier(tier) => {
            let list_price = tier_config(*tier).price_sol;
            match prorate {
                Some(quote) if quote.is_prorated => UpgradeQuote {
                    price_sol: list_price,
                    is_prorated: true,
                    prorated_price_sol: quote.prorated_price_sol,
                    days_remaining: quote.days_remaining,
                },
                _ => UpgradeQuote {
                    price_sol: list_price,
                    is_prorated: false,
                    prorated_price_sol: None,
                    days_remaining: None,
                },
            }
        }
        PaymentTarget::CreditPacks(pack) => UpgradeQuote {
            price_sol: pack.price_sol(),
            is_prorated: false,
            prorated_price_sol: None,
            days_remaining: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(SubscriptionTier::Free < SubscriptionTier::Pro);
        assert!(SubscriptionTier::Pro < SubscriptionTier::ProPlus);
        assert!(SubscriptionTier::ProPlus < SubscriptionTier::Admin);
    }

    #[test]
    fn test_tier_round_trips_through_str() {
        for tier in [
            SubscriptionTier::Free,
            SubscriptionTier::Pro,
            SubscriptionTier::ProPlus,
            SubscriptionTier::Admin,
        ] {
            assert_eq!(tier.to_string().parse::<SubscriptionTier>(), Ok(tier));
        }
        assert!("platinum".parse::<SubscriptionTier>().is_err());
    }

    #[test]
    fn test_validate_rejects_same_or_lower_tier() {
        let res = validate_purchase(
            SubscriptionTier::Pro,
            &PaymentTarget::Tier(SubscriptionTier::Pro),
        );
        assert_eq!(res, Err(PurchaseError::AlreadyOnTier(SubscriptionTier::Pro)));

        let res = validate_purchase(
            SubscriptionTier::ProPlus,
            &PaymentTarget::Tier(SubscriptionTier::Pro),
        );
        assert_eq!(
            res,
            Err(PurchaseError::Downgrade {
                current: SubscriptionTier::ProPlus,
                target: SubscriptionTier::Pro,
            })
        );
    }

    #[test]
    fn test_validate_rejects_unpurchasable_tiers() {
        assert!(matches!(
            validate_purchase(
                SubscriptionTier::Free,
                &PaymentTarget::Tier(SubscriptionTier::Admin)
            ),
            Err(PurchaseError::NotPurchasable(SubscriptionTier::Admin))
        ));
        assert!(matches!(
            validate_purchase(
                SubscriptionTier::Pro,
                &PaymentTarget::Tier(SubscriptionTier::Free)
            ),
            Err(PurchaseError::NotPurchasable(SubscriptionTier::Free))
        ));
    }

    #[test]
    fn test_validate_allows_upgrade() {
        assert!(validate_purchase(
            SubscriptionTier::Free,
            &PaymentTarget::Tier(SubscriptionTier::Pro)
        )
        .is_ok());
        assert!(validate_purchase(
            SubscriptionTier::Pro,
            &PaymentTarget::Tier(SubscriptionTier::ProPlus)
        )
        .is_ok());
    }

    #[test]
    fn test_validate_packs_require_paid_tier() {
        let packs = PaymentTarget::CreditPacks(CreditPack { quantity: 2 });
        assert_eq!(
            validate_purchase(SubscriptionTier::Free, &packs),
            Err(PurchaseError::PackRequiresPaidTier)
        );
        assert!(validate_purchase(SubscriptionTier::Pro, &packs).is_ok());
        assert_eq!(
            validate_purchase(
                SubscriptionTier::Pro,
                &PaymentTarget::CreditPacks(CreditPack { quantity: 0 })
            ),
            Err(PurchaseError::EmptyPack)
        );
    }

    #[test]
    fn test_validate_caps_the_pack_quantity() {
        assert!(validate_purchase(
            SubscriptionTier::Pro,
            &PaymentTarget::CreditPacks(CreditPack {
                quantity: MAX_CREDIT_PACKS,
            })
        )
        .is_ok());
        assert_eq!(
            validate_purchase(
                SubscriptionTier::Pro,
                &PaymentTarget::CreditPacks(CreditPack {
                    quantity: MAX_CREDIT_PACKS + 1,
                })
            ),
            Err(PurchaseError::TooManyPacks(MAX_CREDIT_PACKS))
        );
    }

    #[test]
    fn test_resolve_quote_uses_prorated_price() {
        let prorate = ProrateQuote {
            is_prorated: true,
            prorated_price_sol: Some(0.06),
            days_remaining: Some(12),
        };
        let quote = resolve_quote(
            &PaymentTarget::Tier(SubscriptionTier::ProPlus),
            Some(&prorate),
        );
        assert!(quote.is_prorated);
        assert_eq!(quote.amount_due_sol(), 0.06);
        assert_eq!(quote.days_remaining, Some(12));
    }

    #[test]
    fn test_resolve_quote_falls_back_to_list_price_while_pending() {
        let quote = resolve_quote(&PaymentTarget::Tier(SubscriptionTier::ProPlus), None);
        assert!(!quote.is_prorated);
        assert_eq!(quote.amount_due_sol(), 0.1);
    }

    #[test]
    fn test_resolve_quote_prices_packs_by_quantity() {
        // 3 * 0.025 picks up float noise without the micro-SOL rounding.
        assert_eq!(CreditPack { quantity: 3 }.price_sol(), 0.075);

        let quote = resolve_quote(
            &PaymentTarget::CreditPacks(CreditPack { quantity: 3 }),
            None,
        );
        assert!(!quote.is_prorated);
        assert_eq!(quote.amount_due_sol(), 0.075);
    }

    #[test]
    fn test_pack_quotas_scale_with_quantity() {
        let pack = CreditPack { quantity: 2 };
        assert_eq!(pack.messages(), 300);
        assert_eq!(pack.premium_messages(), 50);
    }
}
