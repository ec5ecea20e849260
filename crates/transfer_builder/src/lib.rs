use anyhow::{Result, anyhow};
use lamports_util::split_referral;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::Transaction;
use solana_system_interface::instruction as system_instruction;

/// Referral leg of a payment: a share of the amount routed to the
/// referrer's wallet inside the same transaction as the main transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct Referral {
    pub referrer: Pubkey,
    pub commission_rate: f64,
}

/// Builds the unsigned payment transaction.
///
/// Without a referral this is a single transfer of `amount_lamports` to the
/// treasury. With one, the commission leg is carved out and both transfers
/// ride in one transaction so they land or fail atomically. No signing, no
/// balance checks and no network calls happen here; the recent blockhash is
/// applied by the caller at signing time.
pub fn build_payment_transaction(
    payer: &Pubkey,
    treasury: &Pubkey,
    amount_lamports: u64,
    referral: Option<&Referral>,
) -> Result<Transaction> {
    if amount_lamports == 0 {
        return Err(anyhow!("Payment amount must be greater than zero"));
    }

    let mut instructions: Vec<Instruction> = Vec::with_capacity(2);
    match referral {
        Some(referral) => {
            let split = split_referral(amount_lamports, referral.commission_rate)?;
            instructions.push(system_instruction::transfer(payer, treasury, split.main));
            if split.referral > 0 {
                instructions.push(system_instruction::transfer(
                    payer,
                    &referral.referrer,
                    split.referral,
                ));
            }
        }
        None => {
            instructions.push(system_instruction::transfer(payer, treasury, amount_lamports));
        }
    }

    Ok(Transaction::new_with_payer(&instructions, Some(payer)))
}
