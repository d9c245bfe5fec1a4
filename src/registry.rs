//! Publishing replicas under a logical name and port, and finding them again.

use std::{fmt, sync::Arc};

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::error::RegistryError;

/// Name every replica is published under.
pub const STORE: &str = "Store";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub name: String,
    pub port: u16,
}

impl Endpoint {
    pub fn store(port: u16) -> Self {
        Self {
            name: STORE.to_string(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.port)
    }
}

pub struct Registry<T: ?Sized> {
    entries: RwLock<HashMap<Endpoint, Arc<T>>>,
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: ?Sized> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, endpoint: Endpoint, obj: Arc<T>) -> Result<(), RegistryError> {
        let mut entries = self.entries.write();
        if entries.contains_key(&endpoint) {
            return Err(RegistryError::AlreadyBound(endpoint.to_string()));
        }
        entries.insert(endpoint, obj);
        Ok(())
    }

    pub fn lookup(&self, endpoint: &Endpoint) -> Result<Arc<T>, RegistryError> {
        self.entries
            .read()
            .get(endpoint)
            .cloned()
            .ok_or_else(|| RegistryError::NotBound(endpoint.to_string()))
    }

    pub fn unbind(&self, endpoint: &Endpoint) -> Result<Arc<T>, RegistryError> {
        self.entries
            .write()
            .remove(endpoint)
            .ok_or_else(|| RegistryError::NotBound(endpoint.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_lookup_unbind() {
        let reg = Registry::<str>::new();
        let ep = Endpoint::store(5000);
        reg.bind(ep.clone(), Arc::from("a")).unwrap();
        assert_eq!(
            reg.bind(ep.clone(), Arc::from("b")),
            Err(RegistryError::AlreadyBound("Store@5000".into()))
        );
        assert_eq!(&*reg.lookup(&ep).unwrap(), "a");

        reg.unbind(&ep).unwrap();
        assert!(reg.is_empty());
        assert_eq!(
            reg.lookup(&ep).err(),
            Some(RegistryError::NotBound("Store@5000".into()))
        );
        assert!(reg.unbind(&ep).is_err());
    }
}
