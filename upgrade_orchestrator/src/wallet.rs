use anyhow::{anyhow, Result};
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{read_keypair_file, Keypair};
use solana_sdk::signer::Signer;
use solana_sdk::transaction::Transaction;

use crate::error::PaymentError;

/// Wallet boundary. The flow only ever asks whether a wallet is connected,
/// for its public key, and for a signature; a user declining to sign
/// surfaces as `WalletRejected`.
pub trait WalletSigner {
    fn connected(&self) -> bool;
    fn public_key(&self) -> Pubkey;
    fn sign_transaction(
        &self,
        tx: &mut Transaction,
        recent_blockhash: Hash,
    ) -> Result<(), PaymentError>;
}

/// Local keypair wallet used by the CLI driver.
pub struct KeypairWallet {
    keypair: Keypair,
}

impl KeypairWallet {
    pub fn from_base58<T: AsRef<str>>(key: T) -> Self {
        Self {
            keypair: Keypair::from_base58_string(key.as_ref()),
        }
    }

    pub fn from_file<T: AsRef<str>>(path: T) -> Result<Self> {
        let keypair = read_keypair_file(path.as_ref())
            .map_err(|e| anyhow!("Failed to read Solana wallet file: {}", e))?;
        Ok(Self { keypair })
    }
}

impl WalletSigner for KeypairWallet {
    fn connected(&self) -> bool {
        true
    }

    fn public_key(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    fn sign_transaction(
        &self,
        tx: &mut Transaction,
        recent_blockhash: Hash,
    ) -> Result<(), PaymentError> {
        tx.try_sign(&[&self.keypair], recent_blockhash)
            .map_err(|e| {
                PaymentError::Misconfigured(format!("cannot sign with the configured wallet: {}", e))
            })
    }
}
