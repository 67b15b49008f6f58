//! On-disk secret storage
//!
//! Account credentials and the device GUID are opaque blobs keyed by string,
//! persisted as a JSON map of base64 values at `<data_dir>/keychain.json`.
//! The file is restricted to the owning user on Unix. Encryption at rest is
//! left to the platform; callers should treat this file like an SSH key.

use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug)]
pub struct FileKeychain {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileKeychain {
    /// Open the keychain file, creating an empty store if it doesn't exist.
    ///
    /// A corrupt file fails with `Error::Storage`; callers deciding whether a
    /// session exists treat that as "no session" rather than fatal.
    pub fn open(path: PathBuf) -> Result<Self> {
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|e| Error::Storage(format!("failed to read {}: {}", path.display(), e)))?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw).map_err(|e| {
                    Error::Storage(format!("corrupt keychain {}: {}", path.display(), e))
                })?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// An empty keychain at `path`, ignoring any existing content.
    ///
    /// Used when an existing file is corrupt: the session degrades to
    /// signed-out and the next write replaces the file.
    pub fn fresh(path: PathBuf) -> Self {
        Self {
            path,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Result<Vec<u8>> {
        let entries = self.entries.lock().expect("keychain lock poisoned");
        let encoded = entries
            .get(key)
            .ok_or_else(|| Error::Storage(format!("no keychain entry for '{}'", key)))?;
        BASE64
            .decode(encoded)
            .map_err(|_| Error::Storage(format!("corrupt keychain entry '{}'", key)))
    }

    pub fn set(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut entries = self.entries.lock().expect("keychain lock poisoned");
        entries.insert(key.to_string(), BASE64.encode(data));
        self.persist(&entries)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("keychain lock poisoned");
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        let entries = self.entries.lock().expect("keychain lock poisoned");
        entries.contains_key(key)
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("failed to create data dir: {}", e)))?;
        }
        let payload = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, payload)
            .map_err(|e| Error::Storage(format!("failed to write keychain: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600));
        }

        Ok(())
    }
}
