use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about = "In-memory stand-in for the payments backend")]
pub struct Cfg {
    #[arg(long, env = "PORT", default_value_t = 8787)]
    pub port: u16,

    /// Status polls a payment stays pending before it confirms.
    #[arg(long, env = "CONFIRM_AFTER_POLLS", default_value_t = 2)]
    pub confirm_after_polls: u32,

    /// Days left on the current billing period, used for prorate quotes.
    #[arg(long, env = "DAYS_REMAINING", default_value_t = 12)]
    pub days_remaining: u32,

    /// Referrer credited with a commission on every purchase.
    #[arg(long, env = "REFERRER_WALLET")]
    pub referrer_wallet: Option<String>,

    #[arg(long, env = "REFERRAL_COMMISSION_RATE", default_value_t = 0.05)]
    pub referral_commission_rate: f64,

    #[arg(long, env = "REFERRAL_CODE", default_value = "ANUBIS")]
    pub referral_code: String,

    /// Pre-seeded subscriptions, formatted wallet:tier.
    #[arg(long = "seed-subscription", env = "SEED_SUBSCRIPTIONS", value_delimiter = ',')]
    pub seed_subscriptions: Vec<String>,
}
