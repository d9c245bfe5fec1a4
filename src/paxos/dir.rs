use std::{io, sync::Arc};

use tracing::{info, warn};

use crate::{
    error::RegistryError,
    registry::{Endpoint, Registry},
    Config,
};

use super::{
    liveness::{FailureLoop, FailureLoopHandle, FailureTiming, LivenessGate},
    replica::PaxosReplica,
    PaxosPeer,
};

pub struct Cluster {
    pub registry: Arc<Registry<PaxosReplica>>,
    pub replicas: Vec<Arc<PaxosReplica>>,
    pub gate: Arc<LivenessGate>,
}

/// Tell every replica about every other one, itself included.
pub fn connect_all(replicas: &[Arc<PaxosReplica>]) {
    let peers = replicas
        .iter()
        .map(|r| r.clone() as Arc<dyn PaxosPeer>)
        .collect::<Vec<_>>();
    for r in replicas {
        r.update_connected_servers(&peers);
    }
}

pub fn cluster_init(cfg: &Config) -> Result<Cluster, RegistryError> {
    let registry = Arc::new(Registry::new());
    let mut replicas = vec![];
    for port in cfg.ports() {
        let rep = Arc::new(PaxosReplica::new(port));
        registry.bind(Endpoint::store(port), rep.clone())?;
        replicas.push(rep);
    }
    connect_all(&replicas);

    Ok(Cluster {
        registry,
        replicas,
        gate: Arc::new(LivenessGate::new(cfg.max_sleeping)),
    })
}

impl Cluster {
    /// Start one failure loop per replica, all sharing the cluster's gate.
    pub fn failure_init(&self, timing: &FailureTiming) -> io::Result<Vec<FailureLoopHandle>> {
        self.replicas
            .iter()
            .map(|r| {
                FailureLoop::spawn(
                    r.port(),
                    self.gate.clone(),
                    r.availability(),
                    timing.clone(),
                )
            })
            .collect()
    }

    pub fn shutdown(&self) {
        for r in &self.replicas {
            let ep = Endpoint::store(r.port());
            if let Err(e) = self.registry.unbind(&ep) {
                warn!(replica = %ep, error = %e, "error during replica shutdown");
            }
        }
        info!("all replicas shut down");
    }
}
