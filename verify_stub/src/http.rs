use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use tier_catalog::{CreditPack, PaymentTarget, ProrateQuote, SubscriptionTier};

use crate::cfg::Cfg;
use crate::storage::{PaymentState, PaymentStore, PaymentSubmission, VerifyOutcome};

pub type SharedStore = Arc<Mutex<PaymentStore>>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    pub tx_signature: String,
    pub expected_amount_sol: f64,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub pack_quantity: Option<u32>,
    pub wallet_address: String,
    #[serde(default)]
    pub is_prorated: Option<bool>,
    #[serde(default)]
    pub referral_code: Option<String>,
    #[serde(default)]
    pub referrer_wallet: Option<String>,
    #[serde(default)]
    pub commission_rate: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl VerifyPaymentResponse {
    fn accepted(payment_id: String) -> Self {
        Self {
            success: true,
            payment_id: Some(payment_id),
            error: None,
            code: None,
        }
    }

    fn rejected<T: Into<String>>(error: T, code: &str) -> Self {
        Self {
            success: false,
            payment_id: None,
            error: Some(error.into()),
            code: Some(code.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: PaymentState,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralInfoResponse {
    pub has_referrer: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer_wallet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commission_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral_code: Option<String>,
}

pub async fn handle_verify_payment(
    store: SharedStore,
    cfg: Arc<Cfg>,
    Json(request): Json<VerifyPaymentRequest>,
) -> Result<Json<VerifyPaymentResponse>, StatusCode> {
    let target = match resolve_target(&request) {
        Ok(target) => target,
        Err(message) => {
            warn!("Rejecting verify request: {}", message);
            return Ok(Json(VerifyPaymentResponse::rejected(
                message,
                "INVALID_TARGET",
            )));
        }
    };
    let submission = PaymentSubmission {
        signature: request.tx_signature.clone(),
        wallet: request.wallet_address.clone(),
        amount_sol: request.expected_amount_sol,
        target,
    };

    let outcome = {
        let mut store = store.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        store.verify(submission, cfg.days_remaining)
    };
    let response = match outcome {
        VerifyOutcome::Accepted { payment_id } => {
            info!(
                signature = %request.tx_signature,
                payment_id = %payment_id,
                prorated = request.is_prorated.unwrap_or(false),
                "payment accepted"
            );
            // The real backend pays the commission out; the stub just records
            // what it was told.
            if let Some(referrer) = &request.referrer_wallet {
                info!(
                    referrer = %referrer,
                    commission_rate = request.commission_rate.unwrap_or(0.0),
                    code = request.referral_code.as_deref().unwrap_or(""),
                    "referral commission owed"
                );
            }
            VerifyPaymentResponse::accepted(payment_id)
        }
        VerifyOutcome::Duplicate => {
            info!(signature = %request.tx_signature, "duplicate verify call");
            VerifyPaymentResponse::rejected("Transaction already processed", "ALREADY_PROCESSED")
        }
        VerifyOutcome::AmountMismatch { expected_sol } => {
            warn!(
                signature = %request.tx_signature,
                expected_sol,
                got = request.expected_amount_sol,
                "amount mismatch"
            );
            VerifyPaymentResponse::rejected(
                format!(
                    "amount does not match the selected purchase, expected {} SOL",
                    expected_sol
                ),
                "AMOUNT_MISMATCH",
            )
        }
        VerifyOutcome::InvalidPurchase(reason) => {
            warn!(signature = %request.tx_signature, "invalid purchase: {}", reason);
            VerifyPaymentResponse::rejected(reason, "INVALID_PURCHASE")
        }
    };
    Ok(Json(response))
}

pub async fn handle_payment_status(
    store: SharedStore,
    cfg: Arc<Cfg>,
    Path(signature): Path<String>,
) -> Result<Json<StatusResponse>, StatusCode> {
    let mut store = store.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let status = store.poll(&signature, cfg.confirm_after_polls);
    info!(%signature, ?status, "status poll");
    Ok(Json(StatusResponse { status }))
}

pub async fn handle_referral_info(
    cfg: Arc<Cfg>,
    Path(wallet): Path<String>,
) -> Json<ReferralInfoResponse> {
    match &cfg.referrer_wallet {
        // Nobody referred themselves.
        Some(referrer) if *referrer != wallet => Json(ReferralInfoResponse {
            has_referrer: true,
            referrer_wallet: Some(referrer.clone()),
            commission_rate: Some(cfg.referral_commission_rate),
            referral_code: Some(cfg.referral_code.clone()),
        }),
        _ => Json(ReferralInfoResponse {
            has_referrer: false,
            referrer_wallet: None,
            commission_rate: None,
            referral_code: None,
        }),
    }
}

pub async fn handle_prorate_quote(
    store: SharedStore,
    cfg: Arc<Cfg>,
    params: Query<HashMap<String, String>>,
) -> Result<Json<ProrateQuote>, StatusCode> {
    let wallet = match params.get("wallet") {
        Some(wallet) => wallet.clone(),
        None => {
            warn!("Missing wallet parameter");
            return Err(StatusCode::BAD_REQUEST);
        }
    };
    let target = match params.get("target").map(|raw| raw.parse::<SubscriptionTier>()) {
        Some(Ok(target)) => target,
        _ => {
            warn!("Missing or invalid target parameter");
            return Err(StatusCode::BAD_REQUEST);
        }
    };
    let store = store.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(store.prorate(&wallet, target, cfg.days_remaining)))
}

fn resolve_target(request: &VerifyPaymentRequest) -> Result<PaymentTarget, String> {
    match (&request.tier, request.pack_quantity) {
        (Some(tier), None) => tier
            .parse::<SubscriptionTier>()
            .map(PaymentTarget::Tier)
            .map_err(|e| e.to_string()),
        (None, Some(quantity)) => Ok(PaymentTarget::CreditPacks(CreditPack { quantity })),
        _ => Err("provide exactly one of tier or packQuantity".to_string()),
    }
}
