//! In-memory fakes for storage traits
//!
//! Provides `MemoryReleaseStore` and `MemoryPreferenceStore` that satisfy
//! the trait contracts without any external dependencies. The CLI uses them
//! for one-shot local verification; tests use them everywhere.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::*;

fn poisoned<T>(_: std::sync::PoisonError<T>) -> StorageError {
    StorageError::Backend("in-memory store lock poisoned".to_string())
}

// ---------------------------------------------------------------------------
// MemoryReleaseStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Tables {
    releases: HashMap<String, Release>,
    /// Insertion order, used to list releases oldest first
    release_order: Vec<String>,
    products: HashMap<String, Product>,
}

/// In-memory release/product store with compare-and-swap saves.
#[derive(Debug, Default)]
pub struct MemoryReleaseStore {
    tables: Mutex<Tables>,
}

impl MemoryReleaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> StorageResult<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(poisoned)
    }
}

#[async_trait]
impl ReleaseStore for MemoryReleaseStore {
    async fn insert_release(&self, release: Release) -> StorageResult<Release> {
        let mut tables = self.tables()?;
        if tables.releases.contains_key(release.id.as_str()) {
            return Err(StorageError::AlreadyExists {
                id: release.id.0.clone(),
            });
        }
        tables.release_order.push(release.id.0.clone());
        tables
            .releases
            .insert(release.id.0.clone(), release.clone());
        Ok(release)
    }

    async fn load_release(&self, id: &ReleaseId) -> StorageResult<Release> {
        let tables = self.tables()?;
        tables
            .releases
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StorageError::ReleaseNotFound {
                release_id: id.0.clone(),
            })
    }

    async fn save_release(&self, release: &Release) -> StorageResult<SaveOutcome> {
        let mut tables = self.tables()?;
        let stored = tables
            .releases
            .get_mut(release.id.as_str())
            .ok_or_else(|| StorageError::ReleaseNotFound {
                release_id: release.id.0.clone(),
            })?;
        if stored.revision != release.revision {
            debug!(
                release_id = %release.id,
                expected = release.revision,
                current = stored.revision,
                "stale release write rejected"
            );
            return Ok(SaveOutcome::StaleWrite {
                current_revision: stored.revision,
            });
        }
        let revision = release.revision + 1;
        *stored = Release {
            revision,
            ..release.clone()
        };
        Ok(SaveOutcome::Saved { revision })
    }

    async fn current_release(&self, product_id: &ProductId) -> StorageResult<Option<Release>> {
        let tables = self.tables()?;
        Ok(tables
            .releases
            .values()
            .filter(|r| r.product_id == *product_id && r.approved && r.is_current)
            .max_by_key(|r| r.updated_at)
            .cloned())
    }

    async fn list_releases(&self, product_id: &ProductId) -> StorageResult<Vec<Release>> {
        let tables = self.tables()?;
        Ok(tables
            .release_order
            .iter()
            .filter_map(|id| tables.releases.get(id))
            .filter(|r| r.product_id == *product_id)
            .cloned()
            .collect())
    }

    async fn insert_product(&self, product: Product) -> StorageResult<Product> {
        let mut tables = self.tables()?;
        if tables.products.contains_key(product.id.as_str()) {
            return Err(StorageError::AlreadyExists {
                id: product.id.0.clone(),
            });
        }
        tables
            .products
            .insert(product.id.0.clone(), product.clone());
        Ok(product)
    }

    async fn load_product(&self, id: &ProductId) -> StorageResult<Product> {
        let tables = self.tables()?;
        tables
            .products
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StorageError::ProductNotFound {
                product_id: id.0.clone(),
            })
    }

    async fn save_product(&self, product: &Product) -> StorageResult<SaveOutcome> {
        let mut tables = self.tables()?;
        let stored = tables
            .products
            .get_mut(product.id.as_str())
            .ok_or_else(|| StorageError::ProductNotFound {
                product_id: product.id.0.clone(),
            })?;
        if stored.revision != product.revision {
            debug!(
                product_id = %product.id,
                expected = product.revision,
                current = stored.revision,
                "stale product write rejected"
            );
            return Ok(SaveOutcome::StaleWrite {
                current_revision: stored.revision,
            });
        }
        let revision = product.revision + 1;
        *stored = Product {
            revision,
            ..product.clone()
        };
        Ok(SaveOutcome::Saved { revision })
    }
}

// ---------------------------------------------------------------------------
// MemoryPreferenceStore
// ---------------------------------------------------------------------------

/// In-memory notification preferences keyed by account id.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    prefs: Mutex<HashMap<String, NotificationPreferences>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preferences for an account, replacing any previous value.
    pub fn set(&self, account: &AccountId, prefs: NotificationPreferences) -> StorageResult<()> {
        let mut map = self.prefs.lock().map_err(poisoned)?;
        map.insert(account.0.clone(), prefs);
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn preferences(
        &self,
        account: &AccountId,
    ) -> StorageResult<Option<NotificationPreferences>> {
        let map = self.prefs.lock().map_err(poisoned)?;
        Ok(map.get(account.as_str()).copied())
    }
}
