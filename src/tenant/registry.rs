//! Tenant registry abstraction.
//!
//! The registry is the control-plane source of truth for which tenants exist,
//! their status and where their databases live. It is read-only from the
//! point of view of this crate.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::RegistryError;

use super::host::validate_slug;
use super::record::{TenantRecord, TenantStatus};

// =============================================================================
// TenantRegistry Trait
// =============================================================================

/// Point lookups and listing over the tenant registry.
#[async_trait]
pub trait TenantRegistry: Send + Sync {
    /// Find the record for a slug, if one exists.
    async fn find_by_slug(&self, slug: &str) -> Result<Option<TenantRecord>, RegistryError>;

    /// List every record. Used to detect status changes by polling.
    async fn list(&self) -> Result<Vec<TenantRecord>, RegistryError>;
}

#[async_trait]
impl<R: TenantRegistry + ?Sized> TenantRegistry for Arc<R> {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<TenantRecord>, RegistryError> {
        (**self).find_by_slug(slug).await
    }

    async fn list(&self) -> Result<Vec<TenantRecord>, RegistryError> {
        (**self).list().await
    }
}

// =============================================================================
// InMemoryRegistry
// =============================================================================

/// Registry held in process memory.
///
/// Useful for tests and for small deployments that ship the tenant list as a
/// JSON file.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    records: RwLock<HashMap<String, TenantRecord>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a set of records.
    pub fn from_records(records: impl IntoIterator<Item = TenantRecord>) -> Self {
        Self {
            records: RwLock::new(
                records
                    .into_iter()
                    .map(|record| (record.slug.clone(), record))
                    .collect(),
            ),
        }
    }

    /// Parse a JSON array of records.
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let records: Vec<TenantRecord> =
            serde_json::from_str(json).map_err(|e| RegistryError::InvalidData(e.to_string()))?;

        for record in &records {
            validate_slug(&record.slug).map_err(|reason| {
                RegistryError::InvalidData(format!("slug {:?}: {}", record.slug, reason))
            })?;
        }

        Ok(Self::from_records(records))
    }

    /// Load a JSON array of records from disk.
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RegistryError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Insert or replace a record.
    pub async fn insert(&self, record: TenantRecord) {
        self.records
            .write()
            .await
            .insert(record.slug.clone(), record);
    }

    /// Remove a record. Returns the removed record, if any.
    pub async fn remove(&self, slug: &str) -> Option<TenantRecord> {
        self.records.write().await.remove(slug)
    }

    /// Change a tenant's status. Returns false if the slug is unknown.
    pub async fn set_status(&self, slug: &str, status: TenantStatus) -> bool {
        match self.records.write().await.get_mut(slug) {
            Some(record) => {
                record.status = status;
                true
            }
            None => false,
        }
    }

    /// Number of records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl TenantRegistry for InMemoryRegistry {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<TenantRecord>, RegistryError> {
        Ok(self.records.read().await.get(slug).cloned())
    }

    async fn list(&self) -> Result<Vec<TenantRecord>, RegistryError> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}
