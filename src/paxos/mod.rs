//! Achieve consensus on single-key writes with leaderless Paxos.
//!
//! Whichever replica receives a write acts as proposer for it. Acceptors that
//! accept broadcast the value to every learner, so nobody sends a separate
//! "chosen" message.

pub mod acceptor;
pub mod dir;
pub mod leader;
pub mod liveness;
pub mod replica;

use serde_derive::{Deserialize, Serialize};

use crate::{error::Refusal, id::ProposalId, store::Command};

/// Answer to `prepare(id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparePromise {
    pub id: ProposalId,
    /// Highest proposal this acceptor accepted before promising, with its command.
    pub accepted: Option<(ProposalId, Command)>,
}

impl PreparePromise {
    pub fn accepted_id(&self) -> Option<ProposalId> {
        self.accepted.as_ref().map(|(id, _)| *id)
    }
}

/// Answer to `accept(id, command)`, and what learners are told.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedProposal {
    pub id: ProposalId,
    pub command: Command,
}

/// The acceptor and learner roles, as seen by other replicas.
pub trait PaxosPeer: Send + Sync {
    fn prepare(&self, id: ProposalId) -> Result<PreparePromise, Refusal>;

    fn accept(&self, id: ProposalId, command: Command) -> Result<AcceptedProposal, Refusal>;

    /// Fire and forget.
    fn update_learner(&self, proposal: &AcceptedProposal);
}
