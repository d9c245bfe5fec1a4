//! Two-phase commit across every registered replica.
//!
//! Failure model: participants may vote no or stop answering in phase one.
//! A participant that fails during phase two is logged and left as is; there
//! is no retry or compensation for it.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::unbounded;
use tracing::{debug, info, warn};

use crate::{
    error::CommError,
    id::IdGenerator,
    registry::{Endpoint, Registry},
    store::Command,
};

use super::{CancelToken, Operation, Participant, TxnId};

pub struct Coordinator {
    registry: Arc<Registry<dyn Participant>>,
    endpoints: Vec<Endpoint>,
    timeout: Duration,
    ids: IdGenerator,
}

impl Coordinator {
    pub fn new(
        registry: Arc<Registry<dyn Participant>>,
        endpoints: Vec<Endpoint>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            endpoints,
            timeout,
            // Sole source of transaction ids.
            ids: IdGenerator::new(0),
        }
    }

    pub fn update(&self, key: &str, value: &str) -> bool {
        self.propose(key, Operation::Put, Some(value))
    }

    pub fn delete(&self, key: &str) -> bool {
        self.propose(key, Operation::Delete, None)
    }

    /// Run one transaction for `key`. True iff every participant voted yes.
    pub fn propose(&self, key: &str, op: Operation, value: Option<&str>) -> bool {
        let Some(command) = op.command(key, value) else {
            warn!(key, "put without a value, nothing to propose");
            return false;
        };
        let txn = self.ids.next();
        info!(%txn, %command, "starting two-phase commit");
        let failed = self.phase_one(txn, &command);
        self.phase_two(txn, key, failed)
    }

    /// Ask everyone concurrently. Returns the number of no/missing votes.
    fn phase_one(&self, txn: TxnId, command: &Command) -> usize {
        let (tx, rx) = unbounded();
        let tokens = self
            .endpoints
            .iter()
            .enumerate()
            .map(|(i, ep)| {
                let token = CancelToken::new();
                match self.registry.lookup(ep) {
                    Ok(p) => {
                        let (vote_tx, cmd, t) = (tx.clone(), command.clone(), token.clone());
                        let spawned = thread::Builder::new()
                            .name(format!("can-commit-{}", ep.port))
                            .spawn(move || {
                                let _ = vote_tx.send((i, p.can_commit(txn, &cmd, &t)));
                            });
                        if let Err(e) = spawned {
                            let _ = tx.send((i, Err(CommError::Unreachable(e.to_string()))));
                        }
                    }
                    Err(e) => {
                        let _ = tx.send((i, Err(CommError::Unreachable(e.to_string()))));
                    }
                }
                token
            })
            .collect::<Vec<_>>();
        drop(tx);

        let deadline = Instant::now() + self.timeout;
        let mut votes = vec![None; self.endpoints.len()];
        let mut pending = votes.len();
        while pending > 0 {
            let Ok((i, res)) = rx.recv_deadline(deadline) else {
                break;
            };
            pending -= 1;
            votes[i] = Some(match res {
                Ok(true) => true,
                Ok(false) => {
                    info!(%txn, replica = %self.endpoints[i], "received can not commit");
                    false
                }
                Err(e) => {
                    warn!(%txn, replica = %self.endpoints[i], error = %e, "no vote");
                    false
                }
            });
        }

        for (i, _) in votes.iter().enumerate().filter(|(_, v)| v.is_none()) {
            tokens[i].cancel();
            warn!(
                %txn,
                replica = %self.endpoints[i],
                error = %CommError::TimedOut,
                "did not receive acknowledgement to commit, cancelled"
            );
        }

        votes.iter().filter(|v| **v != Some(true)).count()
    }

    /// Commit if nobody dissented, otherwise abort. Everyone gets the decision.
    fn phase_two(&self, txn: TxnId, key: &str, failed: usize) -> bool {
        let commit = failed == 0;
        let op = if commit { "commit" } else { "abort" };

        let mut nacks = 0;
        for ep in &self.endpoints {
            let acked = self
                .registry
                .lookup(ep)
                .map_err(|e| CommError::Unreachable(e.to_string()))
                .and_then(|p| {
                    if commit {
                        p.do_commit(txn, key)
                    } else {
                        p.do_abort(txn, key)
                    }
                });
            match acked {
                Ok(true) => debug!(%txn, replica = %ep, "acknowledged {op}"),
                Ok(false) => {
                    nacks += 1;
                    warn!(%txn, replica = %ep, "could not acknowledge {op}");
                }
                Err(e) => {
                    nacks += 1;
                    warn!(%txn, replica = %ep, error = %e, "could not acknowledge {op}");
                }
            }
        }
        if nacks > 0 {
            warn!(%txn, nacks, "phase two incomplete, replicas may disagree on {key}");
        }

        info!(%txn, key, failed, "transaction {}", if commit { "committed" } else { "aborted" });
        commit
    }

    /// Unbind every participant. Failures are logged and skipped.
    pub fn shutdown(&self) {
        for ep in &self.endpoints {
            if let Err(e) = self.registry.unbind(ep) {
                warn!(replica = %ep, error = %e, "error during replica shutdown");
            }
        }
        info!("all replicas shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::twopc::participant::TxnReplica;

    fn cluster(n: u16) -> (Arc<Coordinator>, Vec<Arc<TxnReplica>>) {
        let registry: Arc<Registry<dyn Participant>> = Arc::new(Registry::new());
        let eps = (0..n).map(|i| Endpoint::store(7000 + i)).collect::<Vec<_>>();
        let coord = Arc::new(Coordinator::new(
            registry.clone(),
            eps.clone(),
            Duration::from_millis(200),
        ));
        let reps = eps
            .iter()
            .map(|ep| {
                let r = Arc::new(TxnReplica::new(ep.port, coord.clone()));
                registry.bind(ep.clone(), r.clone()).unwrap();
                r
            })
            .collect();
        (coord, reps)
    }

    #[test]
    fn commit_everywhere() {
        let (coord, reps) = cluster(3);
        assert!(coord.update("a", "1"));
        for r in &reps {
            assert_eq!(r.lookup("a").as_deref(), Some("1"));
            assert!(!r.in_flight("a"));
        }
    }

    #[test]
    fn put_without_value_is_refused() {
        let (coord, reps) = cluster(2);
        assert!(!coord.propose("a", Operation::Put, None));
        assert!(reps.iter().all(|r| r.lookup("a").is_none()));
    }

    #[test]
    fn missing_participant_aborts() {
        let (coord, reps) = cluster(3);
        assert!(coord.update("a", "1"));
        coord.registry.unbind(&Endpoint::store(7001)).unwrap();

        assert!(!coord.update("a", "2"));
        assert_eq!(reps[0].lookup("a").as_deref(), Some("1"));
        assert_eq!(reps[2].lookup("a").as_deref(), Some("1"));
    }

    #[test]
    fn shutdown_unbinds_all() {
        let (coord, _reps) = cluster(3);
        coord.registry.unbind(&Endpoint::store(7000)).unwrap();
        coord.shutdown();
        assert!(coord.registry.is_empty());
    }
}
