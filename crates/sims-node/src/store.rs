//! JSON-file parameter store
//!
//! Host stand-in for flash parameter storage. The whole file is rewritten on
//! every commit through a temporary file and a rename, so a crash leaves
//! either the old or the new contents.

use sims_core::{MeshError, ParamStore, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

type Namespaces = BTreeMap<String, BTreeMap<String, u32>>;

/// Parameter store persisted as `{ namespace: { key: value } }`
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Namespaces,
}

impl JsonFileStore {
    /// Open `path`, starting empty if it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| MeshError::Storage(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == ErrorKind::NotFound => Namespaces::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "Parameter store opened");
        Ok(Self { path, values })
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn commit(&self) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.values)
            .map_err(|e| MeshError::Storage(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ParamStore for JsonFileStore {
    fn get_u32(&self, namespace: &str, key: &str) -> Result<Option<u32>> {
        Ok(self
            .values
            .get(namespace)
            .and_then(|keys| keys.get(key))
            .copied())
    }

    fn set_u32(&mut self, namespace: &str, key: &str, value: u32) -> Result<()> {
        self.values
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sims_core::identity::{NVS_KEY_DEVICE_ID, NVS_NAMESPACE};
    use sims_core::DeviceIdentity;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("node.json")).unwrap();
        assert_eq!(store.get_u32("sims-mesh", "deviceId").unwrap(), None);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");

        let mut store = JsonFileStore::open(&path).unwrap();
        store.set_u32("sims-mesh", "deviceId", 0x2800_0001).unwrap();
        store.set_u32("other", "deviceId", 7).unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get_u32("sims-mesh", "deviceId").unwrap(),
            Some(0x2800_0001)
        );
        assert_eq!(reopened.get_u32("other", "deviceId").unwrap(), Some(7));
        assert_eq!(reopened.get_u32("sims-mesh", "missing").unwrap(), None);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");
        fs::write(&path, "{ not json").unwrap();

        let err = JsonFileStore::open(&path).unwrap_err();
        assert_eq!(err.error_code(), "STORAGE_ERROR");
    }

    #[test]
    fn test_identity_persists_across_boots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");
        let mac = [0x24, 0x6f, 0x28, 0xAB, 0xCD, 0xEF];

        let first =
            DeviceIdentity::load_or_create(Box::new(JsonFileStore::open(&path).unwrap()), mac);
        assert_eq!(first.id(), 0x28AB_CDEF);

        let mut second =
            DeviceIdentity::load_or_create(Box::new(JsonFileStore::open(&path).unwrap()), [0; 6]);
        assert_eq!(second.id(), 0x28AB_CDEF);
        second.set(0x1234_5678).unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(
            store.get_u32(NVS_NAMESPACE, NVS_KEY_DEVICE_ID).unwrap(),
            Some(0x1234_5678)
        );
    }
}
