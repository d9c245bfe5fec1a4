use std::{fs, io::BufRead, path::Path, sync::Once, time::Duration};

use serde_derive::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

pub mod error;
pub mod id;
pub mod net;
pub mod paxos;
pub mod registry;
pub mod store;
pub mod twopc;

use error::ConfigError;

pub const LOOPBACK: [u8; 4] = [127, 0, 0, 1];

/// Strict majority of `n`.
pub fn quorum(n: usize) -> usize {
    n / 2 + 1
}

/// Cluster parameters, read from a JSON file. Anything missing takes the default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub replicas: usize,
    pub base_port: u16,
    /// Per-call bound on 2PC phase one votes.
    pub commit_timeout_ms: u64,
    /// How many acceptors the failure injector may hold down at once.
    pub max_sleeping: usize,
    pub inject_failures: bool,
    pub failure_interval_ms: [u64; 2],
    pub restart_delay_ms: [u64; 2],
    pub request_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            replicas: 5,
            base_port: 5000,
            commit_timeout_ms: 1000,
            max_sleeping: 2,
            inject_failures: true,
            failure_interval_ms: [5000, 10000],
            restart_delay_ms: [2000, 5000],
            request_timeout_ms: 5000,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let buf = fs::read_to_string(path)?;
        let cfg: Config = serde_json::from_str(&buf)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// `load` if a path was given, defaults otherwise.
    pub fn from_arg(path: Option<String>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.replicas == 0 {
            return Err(ConfigError::Invalid("need at least one replica".into()));
        }
        if self.replicas - 1 > usize::from(u16::MAX - self.base_port) {
            return Err(ConfigError::Invalid(format!(
                "{} replicas from port {} run past {}",
                self.replicas,
                self.base_port,
                u16::MAX
            )));
        }
        if self.failure_interval_ms[0] > self.failure_interval_ms[1]
            || self.restart_delay_ms[0] > self.restart_delay_ms[1]
        {
            return Err(ConfigError::Invalid("interval bounds are inverted".into()));
        }
        // The injector must never take a majority down with it.
        if self.inject_failures
            && self.replicas.saturating_sub(self.max_sleeping) < quorum(self.replicas)
        {
            return Err(ConfigError::Invalid(format!(
                "{} sleeping acceptors out of {} leaves no majority",
                self.max_sleeping, self.replicas
            )));
        }
        Ok(())
    }

    /// One port per replica. Stops short at `u16::MAX`, which `validate` rejects.
    pub fn ports(&self) -> Vec<u16> {
        (0..self.replicas)
            .map_while(|i| {
                u16::try_from(i)
                    .ok()
                    .and_then(|i| self.base_port.checked_add(i))
            })
            .collect()
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Install the fmt subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .try_init();
    });
}

/// Block until the operator types `exit` (any case) or input ends.
pub fn wait_for_exit(input: impl BufRead) {
    println!("The server will close when user inputs \"exit\"");
    for line in input.lines() {
        match line {
            Ok(l) if l.trim().eq_ignore_ascii_case("exit") => return,
            Ok(_) => println!("The server will close when user inputs \"exit\""),
            Err(e) => {
                tracing::warn!(error = %e, "operator input error");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_is_strict_majority() {
        assert_eq!(quorum(1), 1);
        assert_eq!(quorum(4), 3);
        assert_eq!(quorum(5), 3);
    }

    #[test]
    fn partial_config_takes_defaults() {
        let cfg: Config = serde_json::from_str(r#"{ "replicas": 7, "base_port": 6000 }"#).unwrap();
        assert_eq!(cfg.replicas, 7);
        assert_eq!(cfg.commit_timeout_ms, 1000);
        assert_eq!(cfg.max_sleeping, 2);
        assert_eq!(cfg.ports()[6], 6006);
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_unsafe_sleep_bound() {
        let cfg = Config {
            replicas: 5,
            max_sleeping: 3,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        let cfg = Config {
            inject_failures: false,
            ..cfg
        };
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_ports_past_the_end() {
        let cfg = Config {
            base_port: 65534,
            replicas: 5,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
        assert_eq!(cfg.ports(), vec![65534, 65535]);

        let cfg = Config {
            base_port: 65531,
            ..cfg
        };
        cfg.validate().unwrap();
        assert_eq!(cfg.ports().last(), Some(&65535));
    }

    #[test]
    fn rejects_inverted_ranges() {
        let cfg = Config {
            restart_delay_ms: [10, 1],
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn exit_ends_operator_loop() {
        // Returns at "exit" without reading further.
        wait_for_exit(std::io::Cursor::new("hello\n  EXIT \nnever read\n"));
        wait_for_exit(std::io::Cursor::new(""));
    }

    #[test]
    fn load_from_file() {
        let path = std::env::temp_dir().join(format!("replikv-cfg-{}.json", std::process::id()));
        fs::write(&path, r#"{ "commit_timeout_ms": 250 }"#).unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.commit_timeout(), Duration::from_millis(250));
        fs::remove_file(&path).unwrap();

        assert!(matches!(Config::load(&path), Err(ConfigError::Io(_))));
    }
}
