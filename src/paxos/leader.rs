//! The proposer side of a round.
//!
//! The scout runs phase one (prepare) and the commander runs phase two
//! (accept). Neither retries: an unreachable or refusing acceptor just does
//! not count.

use std::sync::Weak;

use itertools::Itertools;
use tracing::{debug, info, warn};

use crate::{error::PaxosError, error::Refusal, id::ProposalId, store::Command};

use super::{AcceptedProposal, PaxosPeer, PreparePromise};

/// A round that reached a majority in both phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundOutcome {
    pub id: ProposalId,
    /// The command that went through, which may not be the one we started with.
    pub command: Command,
    pub promises: usize,
    pub accepts: usize,
}

fn has_majority(votes: usize, replicas: usize) -> bool {
    votes > replicas / 2
}

fn call<T>(
    peer: &Weak<dyn PaxosPeer>,
    f: impl FnOnce(&dyn PaxosPeer) -> Result<T, Refusal>,
) -> Result<T, Refusal> {
    match peer.upgrade() {
        Some(p) => f(p.as_ref()),
        None => Err(Refusal::Unreachable("replica is gone".into())),
    }
}

/// Phase one: ask every acceptor to promise `id`.
pub fn scout(id: ProposalId, peers: &[Weak<dyn PaxosPeer>]) -> (Vec<PreparePromise>, Vec<Refusal>) {
    peers
        .iter()
        .map(|p| call(p, |p| p.prepare(id)))
        .partition_result()
}

/// Phase two: ask every acceptor to accept `command` under `id`.
pub fn commander(
    id: ProposalId,
    command: &Command,
    peers: &[Weak<dyn PaxosPeer>],
) -> (Vec<AcceptedProposal>, Vec<Refusal>) {
    peers
        .iter()
        .map(|p| call(p, |p| p.accept(id, command.clone())))
        .partition_result()
}

/// If any acceptor already accepted something, the value from the highest
/// accepted id wins over `own`.
pub fn choose_command(own: Command, promises: &[PreparePromise]) -> Command {
    promises
        .iter()
        .filter_map(|p| p.accepted.as_ref())
        .max_by_key(|(id, _)| *id)
        .map(|(_, cmd)| cmd.clone())
        .unwrap_or(own)
}

/// Drive one full round as proposer.
pub fn run_round(
    port: u16,
    id: ProposalId,
    command: Command,
    peers: &[Weak<dyn PaxosPeer>],
) -> Result<RoundOutcome, PaxosError> {
    let replicas = peers.len();

    let (promises, refusals) = scout(id, peers);
    for r in &refusals {
        debug!(port, %id, reason = %r, "prepare refused");
    }
    if !has_majority(promises.len(), replicas) {
        warn!(port, %id, promises = promises.len(), replicas, "majority not received, aborting");
        return Err(PaxosError::NoPrepareQuorum {
            promises: promises.len(),
            replicas,
        });
    }
    info!(port, %id, promises = promises.len(), "majority received, accepting phase initiating");

    let chosen = choose_command(command.clone(), &promises);
    if chosen != command {
        info!(port, %id, adopted = %chosen, dropped = %command, "adopting previously accepted command");
    }

    let (accepts, refusals) = commander(id, &chosen, peers);
    for r in &refusals {
        debug!(port, %id, reason = %r, "accept refused");
    }
    if !has_majority(accepts.len(), replicas) {
        warn!(port, %id, accepts = accepts.len(), replicas, "majority did not accept");
        return Err(PaxosError::NoAcceptQuorum {
            accepts: accepts.len(),
            replicas,
        });
    }
    info!(port, %id, command = %chosen, "consensus reached");

    Ok(RoundOutcome {
        id,
        command: chosen,
        promises: promises.len(),
        accepts: accepts.len(),
    })
}
