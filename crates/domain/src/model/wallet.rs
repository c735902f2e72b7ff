//! Per-room wallets and their transaction log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::text_enum;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Wallet {
    pub id: i64,
    /// One wallet per room, enforced by a unique index.
    pub room_id: i64,
    /// `0x`-prefixed, 42-char EIP-55 address.
    pub address: String,
    /// AES-256-GCM ciphertext (nonce-prefixed). Never serialized outward.
    #[serde(skip_serializing)]
    pub encrypted_key: Vec<u8>,
    /// Network tag, e.g. "base" or "base-sepolia".
    pub chain: String,
    /// Optional on-chain identity registration.
    pub identity_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    Fund,
    Send,
    Receive,
}

text_enum!(TxType {
    Fund => "fund",
    Send => "send",
    Receive => "receive",
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

text_enum!(TxStatus {
    Pending => "pending",
    Confirmed => "confirmed",
    Failed => "failed",
});

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: i64,
    pub wallet_id: i64,
    pub tx_type: TxType,
    /// Decimal string; the core never does token arithmetic.
    pub amount: String,
    pub counterparty: Option<String>,
    pub tx_hash: Option<String>,
    pub description: Option<String>,
    pub status: TxStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypted_key_never_serialized() {
        let w = Wallet {
            id: 1,
            room_id: 1,
            address: "0x".to_string() + &"ab".repeat(20),
            encrypted_key: vec![1, 2, 3],
            chain: "base".into(),
            identity_id: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&w).unwrap();
        assert!(!json.contains("encrypted_key"));
    }

    #[test]
    fn tx_enums_text_roundtrip() {
        for t in [TxType::Fund, TxType::Send, TxType::Receive] {
            assert_eq!(TxType::parse(t.as_str()), Some(t));
        }
        for s in [TxStatus::Pending, TxStatus::Confirmed, TxStatus::Failed] {
            assert_eq!(TxStatus::parse(s.as_str()), Some(s));
        }
    }
}
