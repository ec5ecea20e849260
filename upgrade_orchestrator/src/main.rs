mod backend;
mod cfg;
mod chain;
mod error;
mod flow;
mod intent;
mod schedule;
mod wallet;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use solana_sdk::pubkey::Pubkey;
use tracing_subscriber::EnvFilter;

use tier_catalog::{tier_config, CreditPack, PaymentTarget, SubscriptionTier};

use crate::backend::HttpBackend;
use crate::cfg::Cfg;
use crate::chain::JsonRpcChain;
use crate::error::RecoveryAction;
use crate::flow::{FlowParams, SendOutcome, UpgradeFlow};
use crate::wallet::{KeypairWallet, WalletSigner};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Cfg::parse();

    let wallet = load_wallet(&cfg)?;
    println!("🔑 Wallet: {}", wallet.public_key());

    let treasury = cfg
        .treasury
        .as_deref()
        .map(|raw| raw.parse::<Pubkey>())
        .transpose()
        .map_err(|e| anyhow!("Invalid treasury wallet address: {}", e))?;

    let current_tier: SubscriptionTier = cfg
        .current_tier
        .parse()
        .context("Invalid current tier")?;
    let target = resolve_target(&cfg)?;

    let flow = UpgradeFlow::new(FlowParams {
        wallet,
        chain: JsonRpcChain::new(&cfg.solana_url),
        backend: HttpBackend::new(&cfg.backend_url),
        current_tier,
        treasury,
    });

    println!("📋 Current plan: {}", tier_config(current_tier).display_name);
    let quote = flow.confirm_selection(target.clone()).await?;
    let amount = quote.amount_due_sol();
    if quote.is_prorated {
        println!(
            "💵 Amount due: {} SOL (prorated, {} days left on the current plan)",
            amount,
            quote.days_remaining.unwrap_or(0)
        );
    } else {
        println!("💵 Amount due: {} SOL", amount);
    }

    match flow.send_payment().await {
        SendOutcome::Success(receipt) => {
            println!("✅ Payment confirmed");
            println!("   Signature: {}", receipt.signature);
            if let Some(payment_id) = &receipt.payment_id {
                println!("   Payment id: {}", payment_id);
            }
            match &target {
                PaymentTarget::Tier(tier) => {
                    println!("🎉 {} is now active", tier_config(*tier).display_name);
                }
                PaymentTarget::CreditPacks(pack) => {
                    println!(
                        "🎉 Added {} messages and {} premium messages",
                        pack.messages(),
                        pack.premium_messages()
                    );
                }
            }
            Ok(())
        }
        SendOutcome::Failed(err) => {
            println!("❌ Payment failed: {}", err);
            if let Some(signature) = flow.captured_signature() {
                println!("   Signature: {}", signature);
            }
            match err.recovery() {
                RecoveryAction::TryAgain => println!("🔁 Try the purchase again"),
                RecoveryAction::CheckBalance => println!("💰 Top up the wallet and try again"),
                RecoveryAction::CheckNetworkStatus => {
                    println!("🌐 Check the network status and try again")
                }
                RecoveryAction::ContactSupport => {
                    println!("📞 Contact support with the signature above")
                }
                RecoveryAction::None => {}
            }
            Err(err.into())
        }
        SendOutcome::AlreadyInFlight | SendOutcome::NotReady(_) => {
            Err(anyhow!("payment flow is not ready to send"))
        }
    }
}

fn load_wallet(cfg: &Cfg) -> Result<KeypairWallet> {
    if let Some(path) = &cfg.wallet_file {
        return KeypairWallet::from_file(path);
    }
    if let Some(key) = &cfg.wallet_key {
        return Ok(KeypairWallet::from_base58(key));
    }
    Err(anyhow!("Provide --wallet-file or --wallet-key"))
}

fn resolve_target(cfg: &Cfg) -> Result<PaymentTarget> {
    match (&cfg.tier, cfg.packs) {
        (Some(tier), None) => Ok(PaymentTarget::Tier(tier.parse()?)),
        (None, Some(quantity)) => Ok(PaymentTarget::CreditPacks(CreditPack { quantity })),
        (None, None) => Err(anyhow!(
            "Choose a purchase: --tier <pro|pro_plus> or --packs <n>"
        )),
        (Some(_), Some(_)) => Err(anyhow!("--tier and --packs are mutually exclusive")),
    }
}
