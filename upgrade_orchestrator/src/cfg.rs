use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about = "Drives a subscription upgrade payment end to end")]
pub struct Cfg {
    #[arg(long, env = "SOLANA_URL", default_value = "https://api.devnet.solana.com")]
    pub solana_url: String,

    #[arg(long, env = "BACKEND_URL", default_value = "http://127.0.0.1:8787")]
    pub backend_url: String,

    /// Path to a Solana keypair file.
    #[arg(long, env = "WALLET_FILE")]
    pub wallet_file: Option<String>,

    /// Base58 encoded keypair, an alternative to --wallet-file.
    #[arg(long, env = "WALLET_KEY")]
    pub wallet_key: Option<String>,

    /// Treasury wallet that receives the payment.
    #[arg(long, env = "TREASURY_WALLET")]
    pub treasury: Option<String>,

    /// Plan the wallet is currently on.
    #[arg(long, env = "CURRENT_TIER", default_value = "free")]
    pub current_tier: String,

    /// Paid plan to buy.
    #[arg(long)]
    pub tier: Option<String>,

    /// Number of credit packs to buy instead of a plan.
    #[arg(long)]
    pub packs: Option<u32>,
}
