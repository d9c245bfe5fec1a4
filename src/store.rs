//! The replicated key-value map and the commands that mutate it.

use std::fmt;

use hashbrown::HashMap;
use parking_lot::RwLock;
use serde_derive::{Deserialize, Serialize};

/// A mutation carried as data, so it can cross the wire and be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    Put { key: String, value: String },
    Delete { key: String },
}

impl Command {
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Command::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Command::Delete { key: key.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            Command::Put { key, .. } | Command::Delete { key } => key,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Put { key, value } => write!(f, "put {key}={value}"),
            Command::Delete { key } => write!(f, "remove {key}"),
        }
    }
}

/// Apply `command` to `map`, returning what was there before.
pub fn apply(map: &mut HashMap<String, String>, command: &Command) -> Option<String> {
    match command {
        Command::Put { key, value } => map.insert(key.clone(), value.clone()),
        Command::Delete { key } => map.remove(key),
    }
}

/// One replica's map. Only the protocols write to it.
#[derive(Debug, Default)]
pub struct Store {
    map: RwLock<HashMap<String, String>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.read().contains_key(key)
    }

    pub fn apply(&self, command: &Command) -> Option<String> {
        apply(&mut self.map.write(), command)
    }

    /// Put back a pre-image: `None` means the key did not exist.
    pub fn restore(&self, key: &str, pre_image: Option<String>) {
        let mut map = self.map.write();
        match pre_image {
            Some(v) => {
                map.insert(key.to_string(), v);
            }
            None => {
                map.remove(key);
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_delete() {
        let store = Store::new();
        assert_eq!(store.apply(&Command::put("a", "1")), None);
        assert_eq!(store.apply(&Command::put("a", "2")), Some("1".to_string()));
        assert_eq!(store.get("a").as_deref(), Some("2"));
        assert_eq!(store.apply(&Command::delete("a")), Some("2".to_string()));
        assert!(!store.contains("a"));
        assert_eq!(store.apply(&Command::delete("a")), None);
    }

    #[test]
    fn restore_pre_image() {
        let store = Store::new();
        store.apply(&Command::put("a", "1"));
        store.apply(&Command::put("a", "2"));
        store.restore("a", Some("1".into()));
        assert_eq!(store.get("a").as_deref(), Some("1"));

        store.apply(&Command::put("b", "x"));
        store.restore("b", None);
        assert!(!store.contains("b"));
        assert!(store.contains("a"));
    }

    #[test]
    fn command_serde() {
        let cmd = Command::put("k", "v");
        let buf = serde_json::to_vec(&cmd).unwrap();
        assert_eq!(serde_json::from_slice::<Command>(&buf).unwrap(), cmd);
        assert_eq!(cmd.key(), "k");
        assert_eq!(Command::delete("k").to_string(), "remove k");
    }
}
