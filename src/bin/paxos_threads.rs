//! Run with
//! ```sh
//! cargo r --bin paxos_threads -- [config.json]
//! ```
//!
//! Starts every Paxos replica in this process, each with its own front end
//! and failure loop. Type `exit` to stop.

use std::{env, io, process, sync::Arc};

use replikv::{
    init_logging,
    net::{self, KvService},
    paxos::{dir::cluster_init, liveness::FailureTiming},
    wait_for_exit, Config,
};
use tracing::{error, info};

fn main() {
    init_logging();
    let cfg = match Config::from_arg(env::args().nth(1)) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "bad config");
            process::exit(1);
        }
    };

    let cluster = match cluster_init(&cfg) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "replica set up failed");
            process::exit(1);
        }
    };

    let mut frontends = vec![];
    for r in &cluster.replicas {
        let service: Arc<dyn KvService> = r.clone();
        match net::listen_with_retry(service, r.port()) {
            Ok(f) => {
                info!(replica = r.port(), addr = %f.addr(), "serving clients");
                frontends.push(f)
            }
            Err(e) => {
                error!(port = r.port(), error = %e, "exiting since server not set up");
                process::exit(1);
            }
        }
    }

    let loops = if cfg.inject_failures {
        match cluster.failure_init(&FailureTiming::from(&cfg)) {
            Ok(h) => h,
            Err(e) => {
                error!(error = %e, "could not start failure loops");
                process::exit(1);
            }
        }
    } else {
        vec![]
    };
    info!(replicas = cluster.replicas.len(), max_sleeping = cfg.max_sleeping, "cluster up");

    wait_for_exit(io::stdin().lock());

    for h in loops {
        h.stop();
    }
    drop(frontends);
    cluster.shutdown();
    println!("Main thread exiting");
}
