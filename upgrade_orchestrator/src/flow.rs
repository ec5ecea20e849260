use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use lamports_util::{round_sol, sol_to_lamports};
use tier_catalog::{PaymentTarget, SubscriptionTier, UpgradeQuote};

use crate::backend::{BackendApi, PaymentStatus, VerifyAccepted, VerifyRequest};
use crate::chain::ChainRpc;
use crate::error::PaymentError;
use crate::intent::{PaymentIntent, PaymentReceipt, ReferralShare, TransactionRecord};
use crate::schedule::{Backoff, PollSchedule};
use crate::wallet::WalletSigner;

const MAX_SEND_ATTEMPTS: u32 = 3;
const VERIFY_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF_BASE: Duration = Duration::from_secs(1);
const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(30);
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(3);
const STATUS_POLL_DEADLINE: Duration = Duration::from_secs(300);
const MIN_SIGNATURE_LEN: usize = 64;

/// Where the payment flow currently is. `Failed` is recoverable through
/// `try_again`; `Success` is terminal for the current intent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlowState {
    #[default]
    Select,
    Payment,
    Processing,
    Success,
    Failed,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowState::Select => "select",
            FlowState::Payment => "payment",
            FlowState::Processing => "processing",
            FlowState::Success => "success",
            FlowState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Result of driving one send. `AlreadyInFlight` and `NotReady` leave the
/// flow untouched.
#[derive(Debug)]
pub enum SendOutcome {
    Success(PaymentReceipt),
    Failed(PaymentError),
    AlreadyInFlight,
    NotReady(FlowState),
}

/// Collaborators and subscription context, injected at construction.
pub struct FlowParams<W, C, B> {
    pub wallet: W,
    pub chain: C,
    pub backend: B,
    pub current_tier: SubscriptionTier,
    pub treasury: Option<Pubkey>,
}

#[derive(Default)]
struct FlowInner {
    state: FlowState,
    in_flight: bool,
    intent: Option<PaymentIntent>,
    record: Option<TransactionRecord>,
    last_error: Option<PaymentError>,
    receipt: Option<PaymentReceipt>,
}

/// The upgrade payment state machine. All mutation goes through the inner
/// lock, so the flow can be shared across tasks; a second `send_payment`
/// while one is running is refused by the in-flight latch rather than
/// double-charging.
pub struct UpgradeFlow<W, C, B> {
    wallet: W,
    chain: C,
    backend: B,
    current_tier: SubscriptionTier,
    treasury: Option<Pubkey>,
    inner: Mutex<FlowInner>,
}

impl<W, C, B> UpgradeFlow<W, C, B>
where
    W: WalletSigner,
    C: ChainRpc,
    B: BackendApi,
{
    pub fn new(params: FlowParams<W, C, B>) -> Self {
        Self {
            wallet: params.wallet,
            chain: params.chain,
            backend: params.backend,
            current_tier: params.current_tier,
            treasury: params.treasury,
            inner: Mutex::new(FlowInner::default()),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, FlowInner> {
        self.inner.lock().expect("payment flow lock")
    }

    pub fn state(&self) -> FlowState {
        self.lock_inner().state
    }

    pub fn receipt(&self) -> Option<PaymentReceipt> {
        self.lock_inner().receipt.clone()
    }

    pub fn captured_signature(&self) -> Option<Signature> {
        self.lock_inner().record.as_ref().map(|r| r.signature)
    }

    /// Validates the choice and creates the payment intent. Referral terms
    /// are read here, once per intent; a prorate quote is requested only
    /// when a paid account upgrades to another paid plan. On error the flow
    /// stays exactly where it was.
    pub async fn confirm_selection(
        &self,
        target: PaymentTarget,
    ) -> Result<UpgradeQuote, PaymentError> {
        {
            let inner = self.lock_inner();
            if inner.in_flight || !matches!(inner.state, FlowState::Select | FlowState::Payment) {
                return Err(PaymentError::WrongState(inner.state));
            }
        }
        tier_catalog::validate_purchase(self.current_tier, &target)?;
        if !self.wallet.connected() {
            return Err(PaymentError::WalletNotConnected);
        }
        let payer = self.wallet.public_key();

        let referral = self.read_referral(&payer).await?;
        let has_referral = referral.is_some();

        let prorate = match &target {
            PaymentTarget::Tier(tier) if self.current_tier.is_paid() => {
                Some(self.backend.prorate_quote(&payer, *tier).await?)
            }
            _ => None,
        };

        let quote = tier_catalog::resolve_quote(&target, prorate.as_ref());
        let amount_lamports = sol_to_lamports(round_sol(quote.amount_due_sol()))
            .map_err(|e| PaymentError::Misconfigured(format!("invalid payment amount: {}", e)))?;

        let intent = PaymentIntent {
            target: target.clone(),
            amount_lamports,
            is_prorated: quote.is_prorated,
            payer,
            referral,
            created_at: Utc::now(),
        };

        let mut inner = self.lock_inner();
        if let Some(record) = &inner.record {
            if !record.matches(&intent) {
                debug!(
                    signature = %record.signature,
                    "discarding the transaction record of a different purchase"
                );
                inner.record = None;
            }
        }
        inner.intent = Some(intent);
        inner.state = FlowState::Payment;
        info!(
            purchase = %target,
            payer = %payer,
            amount_lamports,
            prorated = quote.is_prorated,
            has_referral,
            "payment intent created"
        );
        Ok(quote)
    }

    async fn read_referral(
        &self,
        payer: &Pubkey,
    ) -> Result<Option<ReferralShare>, PaymentError> {
        let info = self.backend.referral_info(payer).await?;
        if !info.has_referrer {
            return Ok(None);
        }
        let (Some(wallet), Some(rate)) = (info.referrer_wallet.as_deref(), info.commission_rate)
        else {
            warn!("referral info is missing the wallet or rate, skipping the split");
            return Ok(None);
        };
        let referrer = wallet.parse::<Pubkey>().map_err(|_| {
            PaymentError::Misconfigured(format!("referrer wallet is not a valid address: {}", wallet))
        })?;
        Ok(Some(ReferralShare {
            referrer,
            commission_rate: rate,
            referral_code: info.referral_code,
        }))
    }

    /// Drives one payment cycle from the payment step to a terminal state.
    /// A call while another one is running is refused by the latch.
    pub async fn send_payment(&self) -> SendOutcome {
        let intent = {
            let mut inner = self.lock_inner();
            if inner.in_flight {
                debug!("send ignored, an attempt is already in flight");
                return SendOutcome::AlreadyInFlight;
            }
            if inner.state != FlowState::Payment {
                return SendOutcome::NotReady(inner.state);
            }
            let Some(intent) = inner.intent.clone() else {
                return SendOutcome::NotReady(inner.state);
            };
            inner.in_flight = true;
            inner.state = FlowState::Processing;
            intent
        };
        info!(
            purchase = %intent.target,
            payer = %intent.payer,
            amount_lamports = intent.amount_lamports,
            "processing payment"
        );

        let result = self.run_attempts(&intent).await;

        let mut inner = self.lock_inner();
        inner.in_flight = false;
        match result {
            Ok(receipt) => {
                inner.state = FlowState::Success;
                inner.receipt = Some(receipt.clone());
                info!(
                    purchase = %receipt.target,
                    payer = %intent.payer,
                    signature = %receipt.signature,
                    attempts = receipt.attempts,
                    "payment confirmed"
                );
                SendOutcome::Success(receipt)
            }
            Err(err) => {
                inner.state = FlowState::Failed;
                inner.last_error = Some(err.clone());
                error!(
                    purchase = %intent.target,
                    payer = %intent.payer,
                    signature = ?inner.record.as_ref().map(|r| r.signature.to_string()),
                    recovery = ?err.recovery(),
                    "payment failed: {}", err
                );
                SendOutcome::Failed(err)
            }
        }
    }

    async fn run_attempts(&self, intent: &PaymentIntent) -> Result<PaymentReceipt, PaymentError> {
        let mut backoff = Backoff::new(RETRY_BACKOFF_BASE, RETRY_BACKOFF_MAX);
        let mut attempt = 1u32;
        loop {
            match self.attempt_payment(intent, attempt).await {
                Ok(receipt) => return Ok(receipt),
                Err(err) if err.is_retryable() && attempt < MAX_SEND_ATTEMPTS => {
                    let delay = backoff.next_delay();
                    warn!(
                        attempt,
                        retry_in_secs = delay.as_secs(),
                        "payment attempt failed, retrying: {}", err
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(attempt, "payment attempt failed: {}", err);
                    return Err(err);
                }
            }
        }
    }

    async fn attempt_payment(
        &self,
        intent: &PaymentIntent,
        attempt: u32,
    ) -> Result<PaymentReceipt, PaymentError> {
        let existing = self.lock_inner().record.clone();
        let signature = match existing {
            Some(record) => {
                info!(
                    signature = %record.signature,
                    "reusing the captured signature, skipping broadcast"
                );
                record.signature
            }
            None => self.broadcast_transaction(intent, attempt).await?,
        };

        let accepted = match self.verify_with_retry(intent, &signature).await {
            Ok(accepted) => accepted,
            Err(PaymentError::AlreadyProcessed) => {
                info!(%signature, "payment was already processed, treating as success");
                return Ok(receipt_for(intent, signature, None, attempt));
            }
            Err(err) => return Err(err),
        };

        self.poll_until_confirmed(&signature).await?;
        Ok(receipt_for(intent, signature, accepted.payment_id, attempt))
    }

    async fn broadcast_transaction(
        &self,
        intent: &PaymentIntent,
        attempt: u32,
    ) -> Result<Signature, PaymentError> {
        let treasury = self.treasury.ok_or_else(|| {
            PaymentError::Misconfigured("payment address is not configured".to_string())
        })?;
        if !self.wallet.connected() {
            return Err(PaymentError::WalletNotConnected);
        }

        let available = self.chain.balance_of(&intent.payer).await?;
        if available < intent.amount_lamports {
            return Err(PaymentError::InsufficientBalance {
                required: intent.amount_lamports,
                available,
            });
        }

        let mut tx = transfer_builder::build_payment_transaction(
            &intent.payer,
            &treasury,
            intent.amount_lamports,
            intent.referral_params().as_ref(),
        )
        .map_err(|e| PaymentError::Misconfigured(format!("cannot build the payment: {}", e)))?;

        let blockhash = self.chain.latest_blockhash().await?;
        self.wallet.sign_transaction(&mut tx, blockhash)?;
        let signed_signature = tx.signatures.first().copied().unwrap_or_default();

        let signature = match self.chain.send_transaction(&tx).await {
            Ok(signature) => signature,
            // The node knowing the transaction means an earlier broadcast landed.
            Err(PaymentError::AlreadyProcessed) => signed_signature,
            Err(err) => return Err(err),
        };
        validate_signature(&signature)?;

        let record = TransactionRecord::broadcast(signature, intent);
        info!(%signature, attempt, "transaction broadcast");
        self.lock_inner().record = Some(record);
        Ok(signature)
    }

    async fn verify_with_retry(
        &self,
        intent: &PaymentIntent,
        signature: &Signature,
    ) -> Result<VerifyAccepted, PaymentError> {
        let request = VerifyRequest::from_intent(intent, signature);
        let mut backoff = Backoff::new(RETRY_BACKOFF_BASE, RETRY_BACKOFF_MAX);
        for attempt in 1..=VERIFY_ATTEMPTS {
            match self.backend.verify_payment(&request).await {
                Ok(accepted) => {
                    info!(%signature, payment_id = ?accepted.payment_id, "payment verified");
                    return Ok(accepted);
                }
                // Only transport failures are worth another POST. The
                // request is idempotent on the backend, keyed by signature.
                Err(PaymentError::Network(reason)) => {
                    warn!(attempt, "verification transport failure, backing off: {}", reason);
                    backoff.wait().await;
                }
                Err(err) => return Err(err),
            }
        }
        Err(PaymentError::VerificationFailed {
            attempts: VERIFY_ATTEMPTS,
        })
    }

    async fn poll_until_confirmed(&self, signature: &Signature) -> Result<(), PaymentError> {
        let schedule = PollSchedule::new(STATUS_POLL_INTERVAL, STATUS_POLL_DEADLINE);
        let rendered = signature.to_string();
        loop {
            match self.backend.payment_status(&rendered).await {
                Ok(PaymentStatus::Confirmed) => {
                    info!(%signature, "payment status confirmed");
                    return Ok(());
                }
                Ok(PaymentStatus::Failed) => return Err(PaymentError::ConfirmationFailed),
                Ok(PaymentStatus::Pending) => {}
                // A flaky poll is just another pending tick.
                Err(err) => warn!(%signature, "status poll failed: {}", err),
            }
            if !schedule.wait_next().await {
                return Err(PaymentError::StatusPollTimeout {
                    waited_secs: STATUS_POLL_DEADLINE.as_secs(),
                });
            }
        }
    }

    /// Explicit user recovery from the failed state. The captured signature
    /// survives so a retried purchase verifies the landed transaction
    /// instead of broadcasting a second one.
    pub fn try_again(&self) -> bool {
        let mut inner = self.lock_inner();
        if inner.state != FlowState::Failed {
            return false;
        }
        info!(
            cleared_error = ?inner.last_error.as_ref().map(|e| e.to_string()),
            kept_signature = ?inner.record.as_ref().map(|r| r.signature.to_string()),
            "flow reset for another attempt"
        );
        inner.last_error = None;
        inner.intent = None;
        inner.state = FlowState::Select;
        true
    }

    /// Tears the flow down. Refused while processing: a broadcast
    /// transaction must not be abandoned without tracking its outcome.
    pub fn close(&self) -> bool {
        let mut inner = self.lock_inner();
        if inner.state == FlowState::Processing {
            warn!("close refused while a payment is processing");
            return false;
        }
        *inner = FlowInner::default();
        debug!("flow closed");
        true
    }
}

fn receipt_for(
    intent: &PaymentIntent,
    signature: Signature,
    payment_id: Option<String>,
    attempts: u32,
) -> PaymentReceipt {
    PaymentReceipt {
        payment_id,
        signature,
        amount_lamports: intent.amount_lamports,
        target: intent.target.clone(),
        attempts,
        completed_at: Utc::now(),
    }
}

/// Broadcast must hand back a plausible signature before verification runs.
fn validate_signature(signature: &Signature) -> Result<(), PaymentError> {
    if *signature == Signature::default() || signature.to_string().len() < MIN_SIGNATURE_LEN {
        return Err(PaymentError::MalformedSignature);
    }
    Ok(())
}
