//! Error types for replikv.
//!
//! Protocol failures are data, not control flow: each of these is turned into a
//! vote, a refusal or a quorum count by whoever detects it.

use std::io;

use thiserror::Error;

use crate::id::ProposalId;

/// Why an acceptor declined a `prepare` or `accept`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Refusal {
    /// The id is lower than something this acceptor already promised or accepted.
    #[error("proposal {id} is stale (promised {promised:?}, accepted {accepted:?})")]
    Stale {
        id: ProposalId,
        promised: Option<ProposalId>,
        accepted: Option<ProposalId>,
    },

    /// The failure injector has this acceptor down.
    #[error("acceptor is unavailable")]
    Unavailable,

    /// The acceptor could not be reached at all.
    #[error("acceptor unreachable: {0}")]
    Unreachable(String),
}

/// Transaction ledger outcomes that are not a clean open/close.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Another transaction already holds the key.
    #[error("key {key:?} is held by transaction {held}")]
    VoteRejected { key: String, held: ProposalId },

    /// The coordinator gave up on this call before it ran.
    #[error("vote for key {key:?} was cancelled")]
    Cancelled { key: String },

    /// Nothing is open for the key.
    #[error("no transaction open for key {key:?}")]
    NoRecord { key: String },

    /// The key is held, but by somebody else.
    #[error("key {key:?} is held by transaction {held}, not {txn}")]
    ForeignRecord {
        key: String,
        held: ProposalId,
        txn: ProposalId,
    },
}

/// Failure talking to a 2PC participant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommError {
    #[error("participant unreachable: {0}")]
    Unreachable(String),

    #[error("participant did not answer in time")]
    TimedOut,
}

/// A proposer round that did not reach a majority.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaxosError {
    #[error("prepare reached {promises} of {replicas} replicas, no majority")]
    NoPrepareQuorum { promises: usize, replicas: usize },

    #[error("accept reached {accepts} of {replicas} replicas, no majority")]
    NoAcceptQuorum { accepts: usize, replicas: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("nothing bound at {0}")]
    NotBound(String),

    #[error("{0} is already bound")]
    AlreadyBound(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Front end transport errors.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("network error: {0}")]
    Io(#[from] io::Error),

    #[error("bad message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("cannot parse request: {0:?}")]
    BadRequest(String),

    #[error("no response in time")]
    TimedOut,

    #[error("connection closed")]
    Disconnected,
}
