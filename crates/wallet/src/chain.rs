//! The chain RPC collaborator boundary.
//!
//! The engine knows the token address and decimals for each supported
//! (network, token) pair and nothing else about chain mechanics; a
//! `ChainRpc` implementation owns the actual submission.

use std::collections::HashMap;

use alloy::signers::local::PrivateKeySigner;
use serde::{Deserialize, Serialize};

use qr_domain::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Token contract address; empty for the network's native token.
    pub address: String,
    pub decimals: u8,
}

/// Configuration table of supported (network, token) pairs.
#[derive(Clone, Debug, Default)]
pub struct TokenTable {
    entries: HashMap<(String, String), TokenInfo>,
}

impl TokenTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in pairs the engine ships with.
    pub fn builtin() -> Self {
        let mut t = Self::new();
        t.insert("base", "eth", TokenInfo { address: String::new(), decimals: 18 });
        t.insert(
            "base",
            "usdc",
            TokenInfo {
                address: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".into(),
                decimals: 6,
            },
        );
        t.insert("base-sepolia", "eth", TokenInfo { address: String::new(), decimals: 18 });
        t.insert(
            "base-sepolia",
            "usdc",
            TokenInfo {
                address: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".into(),
                decimals: 6,
            },
        );
        t
    }

    pub fn insert(&mut self, network: &str, token: &str, info: TokenInfo) {
        self.entries
            .insert((network.to_string(), token.to_string()), info);
    }

    pub fn lookup(&self, network: &str, token: &str) -> Result<&TokenInfo> {
        self.entries
            .get(&(network.to_string(), token.to_string()))
            .ok_or_else(|| {
                Error::invalid_input(format!("unsupported token {token:?} on network {network:?}"))
            })
    }
}

pub struct TransferRequest {
    /// Decrypted signer; lives only for the duration of the send call.
    pub signer: PrivateKeySigner,
    pub to: String,
    /// Decimal string, in whole-token units.
    pub amount: String,
    pub token: TokenInfo,
    pub network: String,
}

#[derive(Clone, Debug)]
pub struct TransferReceipt {
    pub tx_hash: String,
}

#[async_trait::async_trait]
pub trait ChainRpc: Send + Sync {
    async fn transfer(&self, req: TransferRequest) -> Result<TransferReceipt>;

    /// Balance of `address` for a token, as a decimal string.
    async fn balance(&self, address: &str, token: &TokenInfo, network: &str) -> Result<String>;
}

/// Stand-in used when no RPC endpoint is configured: every send fails
/// with `chain_failed`, balances read as zero.
pub struct NoChain;

#[async_trait::async_trait]
impl ChainRpc for NoChain {
    async fn transfer(&self, _req: TransferRequest) -> Result<TransferReceipt> {
        Err(Error::ChainFailed("no chain rpc configured".into()))
    }

    async fn balance(&self, _address: &str, _token: &TokenInfo, _network: &str) -> Result<String> {
        Ok("0".into())
    }
}

/// Scriptable chain for tests: records transfers, optionally failing.
#[derive(Default)]
pub struct MockChain {
    pub fail_with: parking_lot::Mutex<Option<String>>,
    pub transfers: parking_lot::Mutex<Vec<(String, String, String)>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, msg: &str) {
        *self.fail_with.lock() = Some(msg.to_string());
    }
}

#[async_trait::async_trait]
impl ChainRpc for MockChain {
    async fn transfer(&self, req: TransferRequest) -> Result<TransferReceipt> {
        if let Some(msg) = self.fail_with.lock().take() {
            return Err(Error::ChainFailed(msg));
        }
        self.transfers
            .lock()
            .push((req.to.clone(), req.amount.clone(), req.network.clone()));
        Ok(TransferReceipt {
            tx_hash: format!("0x{:064x}", self.transfers.lock().len()),
        })
    }

    async fn balance(&self, _address: &str, _token: &TokenInfo, _network: &str) -> Result<String> {
        Ok("100".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_has_base_usdc() {
        let t = TokenTable::builtin();
        let info = t.lookup("base", "usdc").unwrap();
        assert_eq!(info.decimals, 6);
        assert!(info.address.starts_with("0x"));
    }

    #[test]
    fn unknown_pair_is_invalid_input() {
        let t = TokenTable::builtin();
        let err = t.lookup("base", "doge").unwrap_err();
        assert_eq!(err.kind(), qr_domain::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn no_chain_fails_sends_but_reads_zero_balance() {
        let chain = NoChain;
        let err = chain
            .transfer(TransferRequest {
                signer: PrivateKeySigner::random(),
                to: "0xdead".into(),
                amount: "1".into(),
                token: TokenInfo { address: String::new(), decimals: 18 },
                network: "base".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), qr_domain::ErrorKind::ChainFailed);
        assert_eq!(
            chain
                .balance("0xdead", &TokenInfo { address: String::new(), decimals: 18 }, "base")
                .await
                .unwrap(),
            "0"
        );
    }
}
