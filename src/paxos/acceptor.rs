use crate::{error::Refusal, id::ProposalId, store::Command};

use super::{AcceptedProposal, PreparePromise};

/// Round state of one acceptor. Callers serialize access to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acceptor {
    /// Highest id promised so far.
    pub promised: Option<ProposalId>,
    /// Last accepted id, with the command that came with it.
    pub accepted: Option<(ProposalId, Command)>,
}

impl Acceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepted_id(&self) -> Option<ProposalId> {
        self.accepted.as_ref().map(|(id, _)| *id)
    }

    fn stale(&self, id: ProposalId) -> Refusal {
        Refusal::Stale {
            id,
            promised: self.promised,
            accepted: self.accepted_id(),
        }
    }

    /// Promise. Never for an id below one already promised.
    pub fn receive_p1(&mut self, id: ProposalId) -> Result<PreparePromise, Refusal> {
        if self.promised.is_some_and(|p| id < p) {
            return Err(self.stale(id));
        }
        self.promised = Some(id);
        Ok(PreparePromise {
            id,
            accepted: self.accepted.clone(),
        })
    }

    /// Accept, unless something newer was promised or accepted.
    pub fn receive_p2(
        &mut self,
        id: ProposalId,
        command: Command,
    ) -> Result<AcceptedProposal, Refusal> {
        if self.promised.is_some_and(|p| id < p) || self.accepted_id().is_some_and(|a| id < a) {
            return Err(self.stale(id));
        }
        self.accepted = Some((id, command.clone()));
        Ok(AcceptedProposal { id, command })
    }

    /// A value was learned: start over for the next round.
    ///
    /// A late report of an older round must not wipe a newer promise, so the
    /// reset only happens when `id` is at least as new as everything here.
    pub fn learned(&mut self, id: ProposalId) -> bool {
        let newest = self.promised.max(self.accepted_id());
        if newest.is_some_and(|n| id < n) {
            return false;
        }
        self.promised = None;
        self.accepted = None;
        true
    }
}
