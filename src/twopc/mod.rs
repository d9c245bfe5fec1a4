//! Keep replicas consistent with a coordinator-driven two-phase commit.
//!
//! A write arriving at any replica is handed to the [`coordinator::Coordinator`],
//! which asks every participant `can_commit` and then tells all of them to
//! `do_commit` or `do_abort`. Participants apply optimistically in phase one
//! and keep the pre-image in their [`ledger::Ledger`] so an abort can undo it.

pub mod coordinator;
pub mod dir;
pub mod ledger;
pub mod participant;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use serde_derive::{Deserialize, Serialize};

use crate::{error::CommError, id::ProposalId, store::Command};

/// Correlates the two phases of one transaction.
pub type TxnId = ProposalId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Put,
    Delete,
}

impl Operation {
    /// `None` for a put without a value.
    pub fn command(self, key: &str, value: Option<&str>) -> Option<Command> {
        match (self, value) {
            (Operation::Put, Some(v)) => Some(Command::put(key, v)),
            (Operation::Put, None) => None,
            (Operation::Delete, _) => Some(Command::delete(key)),
        }
    }
}

/// Set by the coordinator when it stops waiting for a vote.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What the coordinator needs from a replica.
///
/// `Err` is a transport failure; the coordinator treats it like a `false`.
pub trait Participant: Send + Sync {
    fn can_commit(
        &self,
        txn: TxnId,
        command: &Command,
        cancel: &CancelToken,
    ) -> Result<bool, CommError>;

    fn do_commit(&self, txn: TxnId, key: &str) -> Result<bool, CommError>;

    fn do_abort(&self, txn: TxnId, key: &str) -> Result<bool, CommError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_to_command() {
        assert_eq!(
            Operation::Put.command("a", Some("1")),
            Some(Command::put("a", "1"))
        );
        assert_eq!(Operation::Put.command("a", None), None);
        assert_eq!(
            Operation::Delete.command("a", Some("ignored")),
            Some(Command::delete("a"))
        );
    }

    #[test]
    fn cancel_is_shared() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }
}
