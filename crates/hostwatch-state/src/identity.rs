//! Machine identity record

use hostwatch_core::Result;
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::{Record, StateStore};

/// Stable identifier of this host, persisted in the state directory
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MachineIdentity(String);

impl MachineIdentity {
    /// Fresh random identity; not persisted
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read the persisted identity, if any
    pub fn load(store: &StateStore) -> Result<Option<Self>> {
        let Some(bytes) = store.read_record(Record::MachineId)? else {
            return Ok(None);
        };
        let id = String::from_utf8_lossy(&bytes).trim().to_string();
        if id.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self(id)))
    }

    /// Return the persisted identity, creating one when missing
    ///
    /// With `regenerate` the old record is discarded first and a new identity
    /// is always written.
    pub fn resolve(store: &StateStore, regenerate: bool) -> Result<Self> {
        if regenerate {
            store.delete_record(Record::MachineId)?;
        } else if let Some(existing) = Self::load(store)? {
            debug!("Using existing machine id {}", existing);
            return Ok(existing);
        }

        let identity = Self::generate();
        store.write_record(Record::MachineId, identity.0.as_bytes())?;
        info!("Generated new machine id {}", identity);
        Ok(identity)
    }
}

impl std::fmt::Display for MachineIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_is_stable() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());

        let first = MachineIdentity::resolve(&store, false).unwrap();
        let second = MachineIdentity::resolve(&store, false).unwrap();
        assert_eq!(first, second);
        assert!(Uuid::parse_str(first.as_str()).is_ok());
    }

    #[test]
    fn test_regenerate_replaces_identity() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());

        let first = MachineIdentity::resolve(&store, false).unwrap();
        let second = MachineIdentity::resolve(&store, true).unwrap();
        assert_ne!(first, second);
        assert_eq!(MachineIdentity::load(&store).unwrap(), Some(second));
    }

    #[test]
    fn test_blank_record_is_regenerated() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        store.write_record(Record::MachineId, b"  \n").unwrap();

        assert_eq!(MachineIdentity::load(&store).unwrap(), None);
        let id = MachineIdentity::resolve(&store, false).unwrap();
        assert!(!id.as_str().is_empty());
    }

    #[test]
    fn test_load_trims_whitespace() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        store.write_record(Record::MachineId, b"host-token\n").unwrap();

        let id = MachineIdentity::load(&store).unwrap().unwrap();
        assert_eq!(id.as_str(), "host-token");
    }
}
