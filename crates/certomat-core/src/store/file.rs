// # File Certificate Store
//
// File-based implementation of CertificateStore with crash recovery.
//
// ## Crash Recovery
//
// - Atomic writes: write-then-rename
// - Corruption detection: JSON validation on load
// - Automatic backup: keeps a .backup of the last known good state
// - Recovery: falls back to the backup if corruption is detected
//
// The store file contains private keys; on Unix it is written with 0600
// permissions.
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "certificates": {
//     "example.test,www.example.test": {
//       "domains": ["example.test", "www.example.test"],
//       "issued_at": "2025-01-09T12:00:00Z",
//       "expires_at": "2025-04-09T12:00:00Z",
//       ...
//     }
//   }
// }
// ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::{CertificateStore, StoredCertificate};

/// Store file format version, for future migration
const STORE_FILE_VERSION: &str = "1.0";

/// File-based certificate store with crash recovery
#[derive(Debug)]
pub struct FileCertificateStore {
    path: PathBuf,
    state: Arc<RwLock<StoreState>>,
}

#[derive(Debug)]
struct StoreState {
    certificates: HashMap<String, StoredCertificate>,
    dirty: bool,
}

/// Serializable store file format
#[derive(serde::Serialize, serde::Deserialize)]
struct StoreFileFormat {
    version: String,
    certificates: HashMap<String, StoredCertificate>,
}

impl FileCertificateStore {
    /// Create or load a file store
    ///
    /// Loads existing state, recovering from the backup on corruption, and
    /// creates parent directories as needed.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::store(format!(
                        "failed to create store directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let certificates = Self::load_with_recovery(&path).await?;
        Ok(Self {
            path,
            state: Arc::new(RwLock::new(StoreState {
                certificates,
                dirty: false,
            })),
        })
    }

    /// Load from file, falling back to the backup on corruption
    async fn load_with_recovery(path: &Path) -> Result<HashMap<String, StoredCertificate>, Error> {
        match Self::load(path).await {
            Ok(certificates) => {
                tracing::debug!(
                    "loaded certificate store: {} certificate(s)",
                    certificates.len()
                );
                Ok(certificates)
            }
            Err(Error::Json(parse_err)) => {
                tracing::warn!(
                    "certificate store appears corrupted ({parse_err}), attempting backup recovery"
                );
                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("no backup file found, starting with an empty store");
                    return Ok(HashMap::new());
                }
                match Self::load(&backup_path).await {
                    Ok(certificates) => {
                        tracing::info!(
                            "recovered certificate store from backup: {} certificate(s)",
                            certificates.len()
                        );
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!("failed to restore store file from backup: {restore_err}");
                        }
                        Ok(certificates)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "backup also unreadable ({backup_err}), starting with an empty store"
                        );
                        Ok(HashMap::new())
                    }
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Load from a single file
    async fn load(path: &Path) -> Result<HashMap<String, StoredCertificate>, Error> {
        if !path.exists() {
            tracing::debug!("certificate store file does not exist: {}", path.display());
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| Error::store(format!("failed to read {}: {e}", path.display())))?;

        let file: StoreFileFormat = serde_json::from_str(&content)?;
        if file.version != STORE_FILE_VERSION {
            tracing::warn!(
                "certificate store version mismatch: expected {STORE_FILE_VERSION}, got {}; loading anyway",
                file.version
            );
        }
        Ok(file.certificates)
    }

    /// Write the store to disk atomically
    async fn write(&self) -> Result<(), Error> {
        let json = {
            let state = self.state.read().await;
            let file = StoreFileFormat {
                version: STORE_FILE_VERSION.to_string(),
                certificates: state.certificates.clone(),
            };
            serde_json::to_string_pretty(&file)?
        };

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::store(format!("failed to create {}: {e}", temp_path.display()))
            })?;
            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::store(format!("failed to write {}: {e}", temp_path.display()))
            })?;
            file.flush().await.map_err(|e| {
                Error::store(format!("failed to flush {}: {e}", temp_path.display()))
            })?;
        }

        // The store holds private keys: owner-only access.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| {
                    Error::store(format!(
                        "failed to set permissions on {}: {e}",
                        temp_path.display()
                    ))
                })?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("failed to create store backup: {e}");
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::store(format!(
                "failed to rename {} to {}: {e}",
                temp_path.display(),
                self.path.display()
            ))
        })?;

        self.state.write().await.dirty = false;
        tracing::trace!("certificate store written: {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl CertificateStore for FileCertificateStore {
    async fn get(&self, set_key: &str) -> Result<Option<StoredCertificate>, Error> {
        Ok(self.state.read().await.certificates.get(set_key).cloned())
    }

    async fn put(&self, set_key: &str, certificate: &StoredCertificate) -> Result<(), Error> {
        {
            let mut state = self.state.write().await;
            state
                .certificates
                .insert(set_key.to_string(), certificate.clone());
            state.dirty = true;
        }
        // Immediate write: certificate material must survive a crash.
        self.write().await
    }

    async fn delete(&self, set_key: &str) -> Result<(), Error> {
        {
            let mut state = self.state.write().await;
            state.certificates.remove(set_key);
            state.dirty = true;
        }
        self.write().await
    }

    async fn list(&self) -> Result<Vec<String>, Error> {
        Ok(self.state.read().await.certificates.keys().cloned().collect())
    }

    async fn flush(&self) -> Result<(), Error> {
        let dirty = self.state.read().await.dirty;
        if dirty { self.write().await } else { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn sample(domain: &str, lifetime_days: i64) -> StoredCertificate {
        let now = Utc::now();
        StoredCertificate {
            domains: vec![domain.to_string()],
            issued_at: now,
            expires_at: now + chrono::Duration::days(lifetime_days),
            chain_pem: "chain".to_string(),
            private_key_pem: "key".to_string(),
            requested_at: now,
        }
    }

    #[tokio::test]
    async fn persists_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("certs.json");

        let store = FileCertificateStore::new(&path).await.unwrap();
        store.put("example.test", &sample("example.test", 90)).await.unwrap();
        assert!(path.exists());

        let store2 = FileCertificateStore::new(&path).await.unwrap();
        let loaded = store2.get("example.test").await.unwrap().unwrap();
        assert_eq!(loaded.domains, vec!["example.test"]);
    }

    #[tokio::test]
    async fn recovers_from_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("certs.json");

        let store = FileCertificateStore::new(&path).await.unwrap();
        store.put("example.test", &sample("example.test", 90)).await.unwrap();
        // Second write creates the backup.
        store.put("other.test", &sample("other.test", 90)).await.unwrap();

        let backup = FileCertificateStore::backup_path(&path);
        assert!(backup.exists(), "backup should exist after second write");

        fs::write(&path, b"not json").await.unwrap();

        let store2 = FileCertificateStore::new(&path).await.unwrap();
        // Backup holds the state before the last write.
        assert!(store2.get("example.test").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("certs.json");

        let store = FileCertificateStore::new(&path).await.unwrap();
        store.put("example.test", &sample("example.test", 90)).await.unwrap();
        store.delete("example.test").await.unwrap();

        let store2 = FileCertificateStore::new(&path).await.unwrap();
        assert!(store2.get("example.test").await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn store_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("certs.json");

        let store = FileCertificateStore::new(&path).await.unwrap();
        store.put("example.test", &sample("example.test", 90)).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
