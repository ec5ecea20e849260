use anyhow::{Result, anyhow};

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Payment amounts are quoted with 6 decimal places of SOL precision,
/// i.e. a granularity of 1000 lamports.
const MICRO_SOL_PER_SOL: f64 = 1_000_000.0;

pub fn sol_to_lamports(sol: f64) -> Result<u64> {
    if !sol.is_finite() || sol < 0.0 {
        return Err(anyhow!("Invalid SOL amount: {}", sol));
    }
    let lamports = sol * LAMPORTS_PER_SOL as f64;
    if lamports > u64::MAX as f64 {
        return Err(anyhow!("The amount {} SOL does not fit into lamports", sol));
    }
    Ok(lamports.round() as u64)
}

pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

/// Rounds a SOL amount to micro-SOL, the precision payments are quoted in.
pub fn round_sol(sol: f64) -> f64 {
    (sol * MICRO_SOL_PER_SOL).round() / MICRO_SOL_PER_SOL
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferralSplit {
    pub main: u64,
    pub referral: u64,
}

/// Splits a payment into the main and referral-commission legs.
///
/// The referral leg is rounded to micro-SOL; the main leg is derived by
/// subtraction so the two legs always recombine into the original amount.
pub fn split_referral(amount_lamports: u64, commission_rate: f64) -> Result<ReferralSplit> {
    if !commission_rate.is_finite() || !(0.0..1.0).contains(&commission_rate) {
        return Err(anyhow!("Invalid commission rate: {}", commission_rate));
    }
    let commission_sol = round_sol(lamports_to_sol(amount_lamports) * commission_rate);
    let referral = sol_to_lamports(commission_sol)?.min(amount_lamports);
    Ok(ReferralSplit {
        main: amount_lamports - referral,
        referral,
    })
}
