// # Memory Certificate Store
//
// In-memory implementation of CertificateStore.
//
// ## Crash Behavior
//
// All state is lost on restart. The first scan after a restart sees an
// empty store, so renewal tracking starts over; certificates themselves are
// not affected (they live with their consumers).
//
// ## When to Use
//
// - Testing
// - One-shot `issue` invocations where nothing needs to survive the process

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::{CertificateStore, StoredCertificate};

/// In-memory certificate store
#[derive(Debug, Clone, Default)]
pub struct MemoryCertificateStore {
    inner: Arc<RwLock<HashMap<String, StoredCertificate>>>,
}

impl MemoryCertificateStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of certificates in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl CertificateStore for MemoryCertificateStore {
    async fn get(&self, set_key: &str) -> Result<Option<StoredCertificate>, Error> {
        Ok(self.inner.read().await.get(set_key).cloned())
    }

    async fn put(&self, set_key: &str, certificate: &StoredCertificate) -> Result<(), Error> {
        self.inner
            .write()
            .await
            .insert(set_key.to_string(), certificate.clone());
        Ok(())
    }

    async fn delete(&self, set_key: &str) -> Result<(), Error> {
        self.inner.write().await.remove(set_key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, Error> {
        Ok(self.inner.read().await.keys().cloned().collect())
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}
