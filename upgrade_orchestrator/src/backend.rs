use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;

use tier_catalog::{PaymentTarget, ProrateQuote, SubscriptionTier};

use crate::error::PaymentError;
use crate::intent::PaymentIntent;

pub const ALREADY_PROCESSED_CODE: &str = "ALREADY_PROCESSED";

/// Payment details handed to the backend for verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub tx_signature: String,
    pub expected_amount_sol: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pack_quantity: Option<u32>,
    pub wallet_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_prorated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer_wallet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commission_rate: Option<f64>,
}

impl VerifyRequest {
    pub fn from_intent(intent: &PaymentIntent, signature: &Signature) -> Self {
        let (tier, pack_quantity) = match &intent.target {
            PaymentTarget::Tier(tier) => (Some(tier.to_string()), None),
            PaymentTarget::CreditPacks(pack) => (None, Some(pack.quantity)),
        };
        Self {
            tx_signature: signature.to_string(),
            expected_amount_sol: lamports_util::lamports_to_sol(intent.amount_lamports),
            tier,
            pack_quantity,
            wallet_address: intent.payer.to_string(),
            is_prorated: intent.is_prorated.then_some(true),
            referral_code: intent
                .referral
                .as_ref()
                .and_then(|share| share.referral_code.clone()),
            referrer_wallet: intent
                .referral
                .as_ref()
                .map(|share| share.referrer.to_string()),
            commission_rate: intent.referral.as_ref().map(|share| share.commission_rate),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub success: bool,
    #[serde(default)]
    pub payment_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

/// The backend accepted the payment for confirmation tracking.
#[derive(Debug, Clone)]
pub struct VerifyAccepted {
    pub payment_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralPayoutInfo {
    pub has_referrer: bool,
    #[serde(default)]
    pub referrer_wallet: Option<String>,
    #[serde(default)]
    pub commission_rate: Option<f64>,
    #[serde(default)]
    pub referral_code: Option<String>,
}

/// Backend boundary: referral terms, prorate quotes, verification and
/// confirmation status.
#[allow(async_fn_in_trait)]
pub trait BackendApi {
    async fn referral_info(&self, wallet: &Pubkey) -> Result<ReferralPayoutInfo, PaymentError>;
    async fn prorate_quote(
        &self,
        wallet: &Pubkey,
        target: SubscriptionTier,
    ) -> Result<ProrateQuote, PaymentError>;
    async fn verify_payment(&self, request: &VerifyRequest)
        -> Result<VerifyAccepted, PaymentError>;
    async fn payment_status(&self, signature: &str) -> Result<PaymentStatus, PaymentError>;
}

pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new<T>(base_url: T) -> Self
    where
        T: Into<String>,
    {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

fn transport_error(context: &str, err: reqwest::Error) -> PaymentError {
    PaymentError::Network(format!("{}: {}", context, err))
}

/// Maps the verify body onto the taxonomy. A rejection carrying the
/// duplicate code (or the matching message) means the payment already went
/// through, which the flow treats as success.
fn map_verify_response(body: VerifyResponse) -> Result<VerifyAccepted, PaymentError> {
    let VerifyResponse {
        success,
        payment_id,
        error,
        code,
    } = body;
    if success {
        return Ok(VerifyAccepted { payment_id });
    }
    let message = error.unwrap_or_else(|| "verification rejected".to_string());
    if code.as_deref() == Some(ALREADY_PROCESSED_CODE)
        || message.to_lowercase().contains("already processed")
    {
        return Err(PaymentError::AlreadyProcessed);
    }
    Err(PaymentError::VerificationRejected { code, message })
}

impl BackendApi for HttpBackend {
    async fn referral_info(&self, wallet: &Pubkey) -> Result<ReferralPayoutInfo, PaymentError> {
        let url = self.url(&format!("/api/referral-info/{}", wallet));
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error("referral info request", e))?
            .error_for_status()
            .map_err(|e| transport_error("referral info request", e))?;
        resp.json()
            .await
            .map_err(|e| transport_error("referral info response", e))
    }

    async fn prorate_quote(
        &self,
        wallet: &Pubkey,
        target: SubscriptionTier,
    ) -> Result<ProrateQuote, PaymentError> {
        let url = self.url("/api/prorate-quote");
        let resp = self
            .client
            .get(&url)
            .query(&[("wallet", wallet.to_string()), ("target", target.to_string())])
            .send()
            .await
            .map_err(|e| transport_error("prorate quote request", e))?
            .error_for_status()
            .map_err(|e| transport_error("prorate quote request", e))?;
        resp.json()
            .await
            .map_err(|e| transport_error("prorate quote response", e))
    }

    async fn verify_payment(
        &self,
        request: &VerifyRequest,
    ) -> Result<VerifyAccepted, PaymentError> {
        let url = self.url("/api/verify-payment");
        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error("verify request", e))?;
        if resp.status().is_server_error() {
            return Err(PaymentError::Network(format!(
                "verify request: backend returned {}",
                resp.status()
            )));
        }
        let body: VerifyResponse = resp
            .json()
            .await
            .map_err(|e| transport_error("verify response", e))?;
        map_verify_response(body)
    }

    async fn payment_status(&self, signature: &str) -> Result<PaymentStatus, PaymentError> {
        let url = self.url(&format!("/api/payment-status/{}", signature));
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error("status request", e))?
            .error_for_status()
            .map_err(|e| transport_error("status request", e))?;
        let body: StatusResponse = resp
            .json()
            .await
            .map_err(|e| transport_error("status response", e))?;
        Ok(body.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tier_catalog::CreditPack;

    use crate::intent::ReferralShare;

    fn pack_intent() -> PaymentIntent {
        PaymentIntent {
            target: PaymentTarget::CreditPacks(CreditPack { quantity: 2 }),
            amount_lamports: 50_000_000,
            is_prorated: false,
            payer: Pubkey::new_unique(),
            referral: Some(ReferralShare {
                referrer: Pubkey::new_unique(),
                commission_rate: 0.05,
                referral_code: Some("FRIEND".to_string()),
            }),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_verify_request_uses_camel_case_and_drops_empty_fields() {
        let intent = pack_intent();
        let request = VerifyRequest::from_intent(&intent, &Signature::from([5u8; 64]));
        let value = serde_json::to_value(&request).unwrap();
        let object = value.as_object().unwrap();

        assert!(object.contains_key("txSignature"));
        assert_eq!(object["expectedAmountSol"], 0.05);
        assert_eq!(object["packQuantity"], 2);
        assert_eq!(object["referralCode"], "FRIEND");
        assert_eq!(object["commissionRate"], 0.05);
        assert!(!object.contains_key("tier"));
        assert!(!object.contains_key("isProrated"));
    }

    #[test]
    fn test_verify_request_for_a_tier_names_the_tier() {
        let mut intent = pack_intent();
        intent.target = PaymentTarget::Tier(SubscriptionTier::ProPlus);
        intent.referral = None;
        let request = VerifyRequest::from_intent(&intent, &Signature::from([5u8; 64]));

        assert_eq!(request.tier.as_deref(), Some("pro_plus"));
        assert_eq!(request.pack_quantity, None);
        assert_eq!(request.referrer_wallet, None);
    }

    #[test]
    fn test_map_verify_accepts_success() {
        let accepted = map_verify_response(VerifyResponse {
            success: true,
            payment_id: Some("pay_00000001".to_string()),
            error: None,
            code: None,
        })
        .unwrap();
        assert_eq!(accepted.payment_id.as_deref(), Some("pay_00000001"));
    }

    #[test]
    fn test_map_verify_duplicate_code_becomes_already_processed() {
        let err = map_verify_response(VerifyResponse {
            success: false,
            payment_id: None,
            error: Some("Transaction already processed".to_string()),
            code: Some(ALREADY_PROCESSED_CODE.to_string()),
        })
        .unwrap_err();
        assert!(matches!(err, PaymentError::AlreadyProcessed));
    }

    #[test]
    fn test_map_verify_duplicate_message_without_code() {
        let err = map_verify_response(VerifyResponse {
            success: false,
            payment_id: None,
            error: Some("transaction already processed".to_string()),
            code: None,
        })
        .unwrap_err();
        assert!(matches!(err, PaymentError::AlreadyProcessed));
    }

    #[test]
    fn test_map_verify_other_rejections_keep_their_code() {
        let err = map_verify_response(VerifyResponse {
            success: false,
            payment_id: None,
            error: Some("amount does not match the selected tier".to_string()),
            code: Some("AMOUNT_MISMATCH".to_string()),
        })
        .unwrap_err();
        match err {
            PaymentError::VerificationRejected { code, message } => {
                assert_eq!(code.as_deref(), Some("AMOUNT_MISMATCH"));
                assert!(message.contains("amount"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_status_response_parses_lowercase_states() {
        let body: StatusResponse = serde_json::from_str(r#"{"status":"confirmed"}"#).unwrap();
        assert_eq!(body.status, PaymentStatus::Confirmed);
        let body: StatusResponse = serde_json::from_str(r#"{"status":"pending"}"#).unwrap();
        assert_eq!(body.status, PaymentStatus::Pending);
    }
}
