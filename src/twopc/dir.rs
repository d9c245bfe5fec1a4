use std::sync::Arc;

use crate::{
    error::RegistryError,
    registry::{Endpoint, Registry},
    Config,
};

use super::{coordinator::Coordinator, participant::TxnReplica, Participant};

/// Everything one process needs to run a 2PC cluster.
pub struct Cluster {
    pub registry: Arc<Registry<dyn Participant>>,
    pub coordinator: Arc<Coordinator>,
    pub replicas: Vec<Arc<TxnReplica>>,
}

pub fn get_all_endpoints(cfg: &Config) -> Vec<Endpoint> {
    cfg.ports().into_iter().map(Endpoint::store).collect()
}

/// Build the coordinator and one replica per port, and publish the replicas.
pub fn cluster_init(cfg: &Config) -> Result<Cluster, RegistryError> {
    let registry: Arc<Registry<dyn Participant>> = Arc::new(Registry::new());
    let endpoints = get_all_endpoints(cfg);
    let coordinator = Arc::new(Coordinator::new(
        registry.clone(),
        endpoints.clone(),
        cfg.commit_timeout(),
    ));

    let mut replicas = vec![];
    for ep in endpoints {
        let rep = Arc::new(TxnReplica::new(ep.port, coordinator.clone()));
        registry.bind(ep, rep.clone())?;
        replicas.push(rep);
    }

    Ok(Cluster {
        registry,
        coordinator,
        replicas,
    })
}
