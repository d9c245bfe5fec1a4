//! In-flight transactions on one replica, one per key.

use hashbrown::HashMap;

use crate::error::LedgerError;

use super::TxnId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub txn: TxnId,
    /// Value before the optimistic apply. `None` if the key was absent.
    pub pre_image: Option<String>,
}

#[derive(Debug, Default)]
pub struct Ledger {
    records: HashMap<String, TransactionRecord>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a record for `key`. Refused while another one is open.
    pub fn open(
        &mut self,
        key: &str,
        txn: TxnId,
        pre_image: Option<String>,
    ) -> Result<(), LedgerError> {
        if let Some(rec) = self.records.get(key) {
            return Err(LedgerError::VoteRejected {
                key: key.to_string(),
                held: rec.txn,
            });
        }
        self.records
            .insert(key.to_string(), TransactionRecord { txn, pre_image });
        Ok(())
    }

    /// Remove and return the record `txn` holds on `key`.
    ///
    /// A record held by another transaction is left where it is.
    pub fn close(&mut self, key: &str, txn: TxnId) -> Result<TransactionRecord, LedgerError> {
        match self.records.get(key) {
            None => Err(LedgerError::NoRecord {
                key: key.to_string(),
            }),
            Some(rec) if rec.txn != txn => Err(LedgerError::ForeignRecord {
                key: key.to_string(),
                held: rec.txn,
                txn,
            }),
            Some(_) => self.records.remove(key).ok_or_else(|| LedgerError::NoRecord {
                key: key.to_string(),
            }),
        }
    }

    pub fn is_open(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }
}
