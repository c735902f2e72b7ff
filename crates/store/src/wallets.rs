//! Wallet rows and their transaction log. Key material arrives here
//! already encrypted; this module never sees cleartext.

use chrono::Utc;
use rusqlite::{OptionalExtension, Row, Transaction};

use qr_domain::model::{TxStatus, TxType, Wallet, WalletTransaction};
use qr_domain::{Error, Result};

use crate::{col_enum, map_sqlite, parse_ts, ts, Store};

/// A freshly generated, already-encrypted keypair ready for insertion.
#[derive(Clone)]
pub struct WalletSeed {
    pub address: String,
    pub encrypted_key: Vec<u8>,
    pub chain: String,
}

const WALLET_COLS: &str = "id, room_id, address, encrypted_key, chain, identity_id, created_at";

fn row_to_wallet(row: &Row) -> rusqlite::Result<Wallet> {
    let created_at: String = row.get("created_at")?;
    Ok(Wallet {
        id: row.get("id")?,
        room_id: row.get("room_id")?,
        address: row.get("address")?,
        encrypted_key: row.get("encrypted_key")?,
        chain: row.get("chain")?,
        identity_id: row.get("identity_id")?,
        created_at: parse_ts(&created_at),
    })
}

/// Insert within an existing transaction (room birth shares one).
pub(crate) fn insert_wallet_tx(tx: &Transaction, room_id: i64, seed: &WalletSeed) -> Result<i64> {
    tx.execute(
        "INSERT INTO wallets (room_id, address, encrypted_key, chain, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![room_id, seed.address, seed.encrypted_key, seed.chain, ts(Utc::now())],
    )
    .map_err(map_sqlite)?;
    Ok(tx.last_insert_rowid())
}

impl Store {
    /// Insert a wallet row. A second wallet for the same room surfaces as
    /// `already_exists`, leaving the first row untouched.
    pub fn insert_wallet(&self, room_id: i64, seed: &WalletSeed) -> Result<Wallet> {
        let id = self.write(|tx| insert_wallet_tx(tx, room_id, seed))?;
        self.wallet(id)?
            .ok_or_else(|| Error::internal("wallet vanished after insert"))
    }

    pub fn wallet(&self, id: i64) -> Result<Option<Wallet>> {
        self.read(|c| {
            c.query_row(
                &format!("SELECT {WALLET_COLS} FROM wallets WHERE id = ?1"),
                [id],
                row_to_wallet,
            )
            .optional()
            .map_err(map_sqlite)
        })
    }

    pub fn wallet_for_room(&self, room_id: i64) -> Result<Option<Wallet>> {
        self.read(|c| {
            c.query_row(
                &format!("SELECT {WALLET_COLS} FROM wallets WHERE room_id = ?1"),
                [room_id],
                row_to_wallet,
            )
            .optional()
            .map_err(map_sqlite)
        })
    }

    pub fn set_wallet_identity(&self, id: i64, identity_id: &str) -> Result<()> {
        self.write(|tx| {
            tx.execute(
                "UPDATE wallets SET identity_id = ?1 WHERE id = ?2",
                rusqlite::params![identity_id, id],
            )
            .map_err(map_sqlite)?;
            Ok(())
        })
    }

    pub fn add_wallet_transaction(
        &self,
        wallet_id: i64,
        tx_type: TxType,
        amount: &str,
        counterparty: Option<&str>,
        tx_hash: Option<&str>,
        description: Option<&str>,
        status: TxStatus,
    ) -> Result<WalletTransaction> {
        let id = self.write(|tx| {
            tx.execute(
                "INSERT INTO wallet_transactions
                     (wallet_id, tx_type, amount, counterparty, tx_hash, description,
                      status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    wallet_id,
                    tx_type.as_str(),
                    amount,
                    counterparty,
                    tx_hash,
                    description,
                    status.as_str(),
                    ts(Utc::now())
                ],
            )
            .map_err(map_sqlite)?;
            Ok(tx.last_insert_rowid())
        })?;
        self.read(|c| {
            c.query_row(
                "SELECT id, wallet_id, tx_type, amount, counterparty, tx_hash, description,
                        status, created_at
                 FROM wallet_transactions WHERE id = ?1",
                [id],
                row_to_wallet_tx,
            )
            .map_err(map_sqlite)
        })
    }

    pub fn wallet_transactions(&self, wallet_id: i64, limit: usize) -> Result<Vec<WalletTransaction>> {
        self.read(|c| {
            let mut stmt = c
                .prepare(
                    "SELECT id, wallet_id, tx_type, amount, counterparty, tx_hash, description,
                            status, created_at
                     FROM wallet_transactions WHERE wallet_id = ?1
                     ORDER BY id DESC LIMIT ?2",
                )
                .map_err(map_sqlite)?;
            let mapped = stmt
                .query_map(rusqlite::params![wallet_id, limit as i64], row_to_wallet_tx)
                .map_err(map_sqlite)?;
            let mut out = Vec::new();
            for t in mapped {
                out.push(t.map_err(map_sqlite)?);
            }
            Ok(out)
        })
    }
}

fn row_to_wallet_tx(row: &Row) -> rusqlite::Result<WalletTransaction> {
    let tx_type: String = row.get("tx_type")?;
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    Ok(WalletTransaction {
        id: row.get("id")?,
        wallet_id: row.get("wallet_id")?,
        tx_type: col_enum(TxType::parse, &tx_type, "tx type")?,
        amount: row.get("amount")?,
        counterparty: row.get("counterparty")?,
        tx_hash: row.get("tx_hash")?,
        description: row.get("description")?,
        status: col_enum(TxStatus::parse, &status, "tx status")?,
        created_at: parse_ts(&created_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::seeded;

    fn seed() -> WalletSeed {
        WalletSeed {
            address: format!("0x{}", "ab".repeat(20)),
            encrypted_key: vec![9; 60],
            chain: "base".into(),
        }
    }

    #[test]
    fn one_wallet_per_room() {
        let (store, room, _) = seeded("R");
        let w = store.insert_wallet(room.id, &seed()).unwrap();
        assert_eq!(w.address.len(), 42);

        let err = store.insert_wallet(room.id, &seed()).unwrap_err();
        assert_eq!(err.kind(), qr_domain::ErrorKind::AlreadyExists);

        // First row unchanged.
        let again = store.wallet_for_room(room.id).unwrap().unwrap();
        assert_eq!(again.id, w.id);
        assert_eq!(again.encrypted_key, w.encrypted_key);
    }

    #[test]
    fn transaction_log_newest_first() {
        let (store, room, _) = seeded("R");
        let w = store.insert_wallet(room.id, &seed()).unwrap();
        store
            .add_wallet_transaction(w.id, TxType::Fund, "10", None, None, None, TxStatus::Confirmed)
            .unwrap();
        store
            .add_wallet_transaction(
                w.id,
                TxType::Send,
                "2.5",
                Some("0xdead"),
                Some("0xhash"),
                Some("server rent"),
                TxStatus::Confirmed,
            )
            .unwrap();
        let txs = store.wallet_transactions(w.id, 10).unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].tx_type, TxType::Send);
        assert_eq!(txs[0].amount, "2.5");
    }

    #[test]
    fn failed_send_is_recorded() {
        let (store, room, _) = seeded("R");
        let w = store.insert_wallet(room.id, &seed()).unwrap();
        store
            .add_wallet_transaction(
                w.id,
                TxType::Send,
                "1",
                Some("0xdead"),
                None,
                None,
                TxStatus::Failed,
            )
            .unwrap();
        let txs = store.wallet_transactions(w.id, 10).unwrap();
        assert_eq!(txs[0].status, TxStatus::Failed);
        assert!(txs[0].tx_hash.is_none());
    }
}
