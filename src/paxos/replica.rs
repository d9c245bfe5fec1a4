use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::{
    error::{PaxosError, Refusal},
    id::{IdGenerator, ProposalId},
    net::{reply, KvService},
    store::{Command, Store},
};

use super::{
    acceptor::Acceptor,
    leader::{self, RoundOutcome},
    liveness::Availability,
    AcceptedProposal, PaxosPeer, PreparePromise,
};

/// Proposer, acceptor and learner in one.
pub struct PaxosReplica {
    port: u16,
    store: Store,
    /// prepare/accept decisions for this replica go through this lock, one at a time.
    acceptor: Mutex<Acceptor>,
    availability: Availability,
    /// Everyone taking part, including ourselves.
    peers: RwLock<Vec<Weak<dyn PaxosPeer>>>,
    ids: IdGenerator,
}

impl PaxosReplica {
    pub fn new(port: u16) -> Self {
        info!(port, "Paxos replica started");
        Self {
            port,
            store: Store::new(),
            acceptor: Mutex::new(Acceptor::new()),
            availability: Availability::new(),
            peers: RwLock::new(vec![]),
            ids: IdGenerator::new(port),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Switch shared with this replica's failure loop.
    pub fn availability(&self) -> Availability {
        self.availability.clone()
    }

    /// Round state, for inspection.
    pub fn acceptor_state(&self) -> Acceptor {
        self.acceptor.lock().clone()
    }

    pub fn lookup(&self, key: &str) -> Option<String> {
        self.store.get(key)
    }

    pub fn update_connected_servers(&self, servers: &[Arc<dyn PaxosPeer>]) {
        *self.peers.write() = servers.iter().map(Arc::downgrade).collect();
        debug!(port = self.port, peers = servers.len(), "connected servers updated");
    }

    /// Run a round for `command` under a fresh id.
    pub fn propose(&self, command: Command) -> Result<RoundOutcome, PaxosError> {
        self.run_round(self.ids.next(), command)
    }

    pub fn run_round(&self, id: ProposalId, command: Command) -> Result<RoundOutcome, PaxosError> {
        let peers = self.peers.read().clone();
        leader::run_round(self.port, id, command, &peers)
    }

    fn write(&self, command: Command) -> bool {
        match self.propose(command) {
            Ok(_) => true,
            Err(e) => {
                warn!(port = self.port, error = %e, "round failed");
                false
            }
        }
    }
}

impl PaxosPeer for PaxosReplica {
    fn prepare(&self, id: ProposalId) -> Result<PreparePromise, Refusal> {
        if !self.availability.is_up() {
            info!(port = self.port, %id, "acceptor thread not running, skipping prepare request");
            return Err(Refusal::Unavailable);
        }
        self.acceptor.lock().receive_p1(id)
    }

    fn accept(&self, id: ProposalId, command: Command) -> Result<AcceptedProposal, Refusal> {
        if !self.availability.is_up() {
            info!(port = self.port, %id, "acceptor thread not running, skipping accept request");
            return Err(Refusal::Unavailable);
        }
        let accepted = self.acceptor.lock().receive_p2(id, command)?;

        let peers = self.peers.read().clone();
        for p in &peers {
            match p.upgrade() {
                Some(p) => p.update_learner(&accepted),
                None => warn!(port = self.port, %id, "learner is gone"),
            }
        }
        Ok(accepted)
    }

    fn update_learner(&self, proposal: &AcceptedProposal) {
        self.store.apply(&proposal.command);
        let reset = self.acceptor.lock().learned(proposal.id);
        debug!(port = self.port, id = %proposal.id, command = %proposal.command, reset, "learned");
    }
}

impl KvService for PaxosReplica {
    fn get(&self, key: &str) -> String {
        info!(port = self.port, key, "GET");
        reply::get(key, self.lookup(key))
    }

    fn put(&self, key: &str, value: &str) -> String {
        info!(port = self.port, key, value, "PUT");
        let res = reply::put(key, self.write(Command::put(key, value)));
        info!(port = self.port, response = %res, current = ?self.lookup(key), "sending response");
        res
    }

    fn delete(&self, key: &str) -> String {
        info!(port = self.port, key, "DELETE");
        if !self.store.contains(key) {
            return reply::absent(key);
        }
        let res = reply::delete(key, self.write(Command::delete(key)));
        info!(port = self.port, response = %res, "sending response");
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_acceptor_refuses() {
        let r = PaxosReplica::new(1);
        r.availability().set_down();
        assert_eq!(r.prepare(ProposalId(1)), Err(Refusal::Unavailable));
        assert_eq!(
            r.accept(ProposalId(1), Command::put("a", "b")),
            Err(Refusal::Unavailable)
        );
        // Refusing leaves round state alone.
        assert_eq!(r.acceptor_state(), Acceptor::new());
        r.availability().set_up();
        assert!(r.prepare(ProposalId(1)).is_ok());
    }

    #[test]
    fn lone_replica_is_its_own_majority() {
        let r = Arc::new(PaxosReplica::new(1));
        r.update_connected_servers(&[r.clone() as Arc<dyn PaxosPeer>]);
        let out = r.propose(Command::put("a", "b")).unwrap();
        assert_eq!((out.promises, out.accepts), (1, 1));
        assert_eq!(r.lookup("a").as_deref(), Some("b"));
        // The learner reset the round.
        assert_eq!(r.acceptor_state(), Acceptor::new());
    }

    #[test]
    fn no_peers_means_no_majority() {
        let r = PaxosReplica::new(1);
        assert_eq!(
            r.propose(Command::put("a", "b")),
            Err(PaxosError::NoPrepareQuorum {
                promises: 0,
                replicas: 0
            })
        );
        assert_eq!(r.put("a", "b"), reply::put("a", false));
    }

    #[test]
    fn accept_without_peers_keeps_state() {
        let r = PaxosReplica::new(1);
        r.accept(ProposalId(10), Command::put("x", "1")).unwrap();
        assert_eq!(r.acceptor_state().accepted_id(), Some(ProposalId(10)));
        assert!(r.lookup("x").is_none());
        assert!(matches!(
            r.accept(ProposalId(5), Command::put("x", "2")),
            Err(Refusal::Stale { .. })
        ));
    }
}
