//! Per-room wallet custody and the on-chain send path.
//!
//! Keys are generated locally, encrypted at rest, and decrypted only
//! inside [`WalletService::send_token`]'s scope, feeding the signer
//! straight into the chain RPC. The cleartext key never reaches logs,
//! console entries, or executor envelopes.

pub mod chain;
pub mod crypto;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::B256;
use alloy::signers::local::PrivateKeySigner;
use parking_lot::Mutex;

use qr_domain::model::{TxStatus, TxType, Wallet, WalletTransaction};
use qr_domain::{Error, Result};
use qr_store::{Store, WalletSeed};

pub use chain::{ChainRpc, MockChain, NoChain, TokenInfo, TokenTable, TransferReceipt, TransferRequest};

const CHAIN_RPC_TIMEOUT: Duration = Duration::from_secs(60);

pub struct WalletService {
    store: Store,
    chain: Arc<dyn ChainRpc>,
    tokens: TokenTable,
    key: [u8; 32],
    default_network: String,
    /// One send at a time per room, so key handling never runs in parallel.
    send_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl WalletService {
    pub fn new(
        store: Store,
        chain: Arc<dyn ChainRpc>,
        tokens: TokenTable,
        secret: &str,
        default_network: impl Into<String>,
    ) -> Self {
        Self {
            store,
            chain,
            tokens,
            key: crypto::derive_key(secret),
            default_network: default_network.into(),
            send_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Generate a fresh keypair, encrypted and ready for insertion. Used
    /// by room birth so the wallet row joins the same transaction.
    pub fn generate_seed(&self) -> Result<WalletSeed> {
        let signer = PrivateKeySigner::random();
        let address = signer.address().to_string();
        let encrypted_key = crypto::encrypt(&self.key, signer.to_bytes().as_slice())?;
        Ok(WalletSeed {
            address,
            encrypted_key,
            chain: self.default_network.clone(),
        })
    }

    /// Create the room's wallet. Idempotent-with-conflict: the second
    /// call fails with `already_exists` and the first row is untouched.
    pub fn create_room_wallet(&self, room_id: i64) -> Result<Wallet> {
        if self.store.wallet_for_room(room_id)?.is_some() {
            return Err(Error::AlreadyExists(format!("wallet for room {room_id}")));
        }
        let seed = self.generate_seed()?;
        let wallet = self.store.insert_wallet(room_id, &seed)?;
        tracing::info!(room_id, address = %wallet.address, "room wallet created");
        Ok(wallet)
    }

    pub fn wallet(&self, room_id: i64) -> Result<Wallet> {
        self.store
            .wallet_for_room(room_id)?
            .ok_or_else(|| Error::not_found(format!("wallet for room {room_id}")))
    }

    /// Submit an on-chain transfer. The transaction row is logged either
    /// way: `confirmed` with its hash on success, `failed` on RPC error
    /// with the original error surfaced to the caller.
    pub async fn send_token(
        &self,
        room_id: i64,
        to: &str,
        amount: &str,
        token: &str,
        network: Option<&str>,
        description: Option<&str>,
    ) -> Result<WalletTransaction> {
        validate_amount(amount)?;
        validate_address(to)?;
        let network = network.unwrap_or(&self.default_network).to_string();
        let token_info = self.tokens.lookup(&network, token)?.clone();
        let wallet = self.wallet(room_id)?;

        let lock = {
            let mut locks = self.send_locks.lock();
            locks
                .entry(room_id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        let outcome = {
            // Cleartext key exists only inside this block.
            let key_bytes = crypto::decrypt(&self.key, &wallet.encrypted_key)?;
            if key_bytes.len() != 32 {
                return Err(Error::internal("wallet key blob has unexpected length"));
            }
            let signer = PrivateKeySigner::from_bytes(&B256::from_slice(&key_bytes))
                .map_err(|_| Error::internal("wallet key is not a valid signing key"))?;
            let request = TransferRequest {
                signer,
                to: to.to_string(),
                amount: amount.to_string(),
                token: token_info,
                network: network.clone(),
            };
            match tokio::time::timeout(CHAIN_RPC_TIMEOUT, self.chain.transfer(request)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout("chain rpc".into())),
            }
        };

        match outcome {
            Ok(receipt) => {
                let tx = self.store.add_wallet_transaction(
                    wallet.id,
                    TxType::Send,
                    amount,
                    Some(to),
                    Some(&receipt.tx_hash),
                    description,
                    TxStatus::Confirmed,
                )?;
                self.store.record_activity(
                    room_id,
                    "wallet",
                    &format!("sent {amount} {token} to {to}"),
                    None,
                    Some(&serde_json::json!({ "tx_hash": receipt.tx_hash, "network": network })),
                )?;
                Ok(tx)
            }
            Err(e) => {
                self.store.add_wallet_transaction(
                    wallet.id,
                    TxType::Send,
                    amount,
                    Some(to),
                    None,
                    description,
                    TxStatus::Failed,
                )?;
                self.store.record_activity(
                    room_id,
                    "wallet",
                    &format!("send of {amount} {token} to {to} failed"),
                    None,
                    None,
                )?;
                Err(e)
            }
        }
    }

    pub async fn balance(&self, room_id: i64, token: &str, network: Option<&str>) -> Result<String> {
        let network = network.unwrap_or(&self.default_network);
        let token_info = self.tokens.lookup(network, token)?;
        let wallet = self.wallet(room_id)?;
        self.chain.balance(&wallet.address, token_info, network).await
    }

    pub fn history(&self, room_id: i64, limit: usize) -> Result<Vec<WalletTransaction>> {
        let wallet = self.wallet(room_id)?;
        self.store.wallet_transactions(wallet.id, limit)
    }
}

fn validate_amount(amount: &str) -> Result<()> {
    let ok = !amount.is_empty()
        && amount.chars().all(|c| c.is_ascii_digit() || c == '.')
        && amount.matches('.').count() <= 1
        && amount.chars().any(|c| c.is_ascii_digit())
        && amount.parse::<f64>().map(|v| v > 0.0).unwrap_or(false);
    if ok {
        Ok(())
    } else {
        Err(Error::invalid_input(format!("amount {amount:?} is not a positive decimal")))
    }
}

fn validate_address(address: &str) -> Result<()> {
    let hex_part = address.strip_prefix("0x").unwrap_or("");
    if hex_part.len() == 40 && hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(Error::invalid_input(format!("{address:?} is not a 0x address")))
    }
}
