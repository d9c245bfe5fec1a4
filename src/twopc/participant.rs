//! A replica taking part in two-phase commit.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::{
    error::{CommError, LedgerError},
    net::{reply, KvService},
    store::{Command, Store},
};

use super::{coordinator::Coordinator, ledger::Ledger, CancelToken, Participant, TxnId};

pub struct TxnReplica {
    port: u16,
    store: Store,
    /// Lock order: ledger, then store.
    ledger: Mutex<Ledger>,
    coordinator: Arc<Coordinator>,
}

impl TxnReplica {
    pub fn new(port: u16, coordinator: Arc<Coordinator>) -> Self {
        info!(port, "2PC replica started");
        Self {
            port,
            store: Store::new(),
            ledger: Mutex::new(Ledger::new()),
            coordinator,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Served locally. May observe a value that phase two later rolls back.
    pub fn lookup(&self, key: &str) -> Option<String> {
        self.store.get(key)
    }

    pub fn in_flight(&self, key: &str) -> bool {
        self.ledger.lock().is_open(key)
    }

    fn vote(&self, txn: TxnId, command: &Command, cancel: &CancelToken) -> Result<(), LedgerError> {
        let key = command.key();
        let mut ledger = self.ledger.lock();
        if cancel.is_cancelled() {
            return Err(LedgerError::Cancelled {
                key: key.to_string(),
            });
        }
        ledger.open(key, txn, self.store.get(key))?;
        self.store.apply(command);
        Ok(())
    }
}

impl Participant for TxnReplica {
    fn can_commit(
        &self,
        txn: TxnId,
        command: &Command,
        cancel: &CancelToken,
    ) -> Result<bool, CommError> {
        match self.vote(txn, command, cancel) {
            Ok(()) => {
                debug!(port = self.port, %txn, %command, "voted to commit");
                Ok(true)
            }
            Err(e) => {
                info!(port = self.port, %txn, reason = %e, "voted to abort");
                Ok(false)
            }
        }
    }

    fn do_commit(&self, txn: TxnId, key: &str) -> Result<bool, CommError> {
        match self.ledger.lock().close(key, txn) {
            Ok(_) => {
                info!(port = self.port, %txn, key, "committed");
                Ok(true)
            }
            // Already committed, nothing left to do.
            Err(LedgerError::NoRecord { .. }) => {
                debug!(port = self.port, %txn, key, "commit with no open record");
                Ok(true)
            }
            Err(e) => {
                error!(port = self.port, %txn, key, error = %e, "commit failed");
                Ok(false)
            }
        }
    }

    fn do_abort(&self, txn: TxnId, key: &str) -> Result<bool, CommError> {
        let mut ledger = self.ledger.lock();
        match ledger.close(key, txn) {
            Ok(rec) => {
                self.store.restore(key, rec.pre_image);
                info!(
                    port = self.port,
                    %txn,
                    key,
                    current = ?self.store.get(key),
                    "aborted"
                );
                Ok(true)
            }
            // This replica voted no, or never got the vote: nothing of ours to undo.
            Err(e @ (LedgerError::NoRecord { .. } | LedgerError::ForeignRecord { .. })) => {
                debug!(port = self.port, %txn, key, reason = %e, "abort is a no-op");
                Ok(true)
            }
            Err(e) => {
                error!(port = self.port, %txn, key, error = %e, "abort failed");
                Ok(false)
            }
        }
    }
}

impl KvService for TxnReplica {
    fn get(&self, key: &str) -> String {
        info!(port = self.port, key, "GET");
        reply::get(key, self.lookup(key))
    }

    fn put(&self, key: &str, value: &str) -> String {
        info!(port = self.port, key, value, "PUT");
        let ok = self.coordinator.update(key, value);
        let res = reply::put(key, ok);
        info!(port = self.port, response = %res, current = ?self.lookup(key), "sending response");
        res
    }

    fn delete(&self, key: &str) -> String {
        info!(port = self.port, key, "DELETE");
        if !self.store.contains(key) {
            return reply::absent(key);
        }
        let res = reply::delete(key, self.coordinator.delete(key));
        info!(port = self.port, response = %res, "sending response");
        res
    }
}
