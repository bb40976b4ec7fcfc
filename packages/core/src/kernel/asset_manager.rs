//! The asset-manager plugin contract (§6).
//!
//! Backend adapters (the actual cloud APIs that resize volumes, shares,
//! etc.) are external plugins; only their contract is fixed here, following
//! `kernel/traits.rs`'s `Base*` service traits (`BaseWebScraper`,
//! `BaseEmbeddingService`, …) — a small `async_trait` interface plus a
//! dispatch-table-by-string registry (`kernel/jobs/registry.rs`'s pattern).

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::model::resource::Resource;

/// A single observation of an asset's size and per-metric usage.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetStatus {
    pub size: u64,
    /// Usage expressed as a fraction of `size`, keyed by metric name.
    pub usage: BTreeMap<String, f64>,
    pub strict_minimum_size: Option<u64>,
    pub strict_maximum_size: Option<u64>,
}

/// Static capability description returned by `AssetManager::info`.
#[derive(Debug, Clone)]
pub struct AssetManagerInfo {
    pub usage_metrics: Vec<String>,
}

/// Errors an `AssetManager` implementation can return.
///
/// `AssetNotFound` and `UserError` are type-tagged per §9 so callers can
/// discriminate without string matching; `Other` covers everything
/// transient (network blips, backend 5xxs, timeouts) that the caller
/// should retry.
#[derive(Debug, Error)]
pub enum AssetManagerError {
    #[error("asset {0} not found")]
    AssetNotFound(Uuid),

    #[error("rejected by backend: {0}")]
    UserError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The plugin contract a backend adapter implements for one asset type.
///
/// Implementations are selected by the resource's `asset_type` string via
/// an `AssetManagerRegistry`; no inheritance or generics are required on
/// the caller side.
#[async_trait]
pub trait AssetManager: Send + Sync {
    /// Lists the identifiers of assets that currently exist for `resource`'s scope.
    async fn list_assets(&self, resource: &Resource) -> Result<Vec<Uuid>, AssetManagerError>;

    /// Fetches the current status of one asset. `previous` is the last
    /// accepted observation, if any, which some backends use to short-circuit
    /// an expensive lookup.
    async fn get_asset_status(
        &self,
        resource: &Resource,
        asset_uuid: Uuid,
        previous: Option<&AssetStatus>,
    ) -> Result<AssetStatus, AssetManagerError>;

    /// Requests a size change. Returns `Ok(())` once the backend has
    /// accepted (not necessarily completed) the change.
    async fn set_asset_size(
        &self,
        resource: &Resource,
        asset_uuid: Uuid,
        old_size: u64,
        new_size: u64,
    ) -> Result<(), AssetManagerError>;

    /// Static capability description (which usage metrics this backend reports).
    fn info(&self) -> AssetManagerInfo;
}

/// A safe default for asset types with no registered plugin: every call
/// fails, `list_assets`/`get_asset_status` as not-found, `set_asset_size`
/// as a user error so no pending operation is ever silently retried forever.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAssetManager;

#[async_trait]
impl AssetManager for NullAssetManager {
    async fn list_assets(&self, _resource: &Resource) -> Result<Vec<Uuid>, AssetManagerError> {
        Ok(Vec::new())
    }

    async fn get_asset_status(
        &self,
        _resource: &Resource,
        asset_uuid: Uuid,
        _previous: Option<&AssetStatus>,
    ) -> Result<AssetStatus, AssetManagerError> {
        Err(AssetManagerError::AssetNotFound(asset_uuid))
    }

    async fn set_asset_size(
        &self,
        _resource: &Resource,
        _asset_uuid: Uuid,
        _old_size: u64,
        _new_size: u64,
    ) -> Result<(), AssetManagerError> {
        Err(AssetManagerError::UserError(
            "no asset manager registered for this asset type".to_string(),
        ))
    }

    fn info(&self) -> AssetManagerInfo {
        AssetManagerInfo {
            usage_metrics: Vec::new(),
        }
    }
}

/// Runtime-initialized `asset_type -> AssetManager` dispatch table.
///
/// Mirrors `JobRegistry`'s by-string lookup; resources not found here
/// (a type with no registered plugin) fall back to `NullAssetManager`.
#[derive(Clone)]
pub struct AssetManagerRegistry {
    managers: HashMap<String, Arc<dyn AssetManager>>,
    fallback: Arc<dyn AssetManager>,
}

impl AssetManagerRegistry {
    pub fn new() -> Self {
        Self {
            managers: HashMap::new(),
            fallback: Arc::new(NullAssetManager),
        }
    }

    /// Registers `manager` as the handler for `asset_type`.
    pub fn register(&mut self, asset_type: impl Into<String>, manager: Arc<dyn AssetManager>) {
        self.managers.insert(asset_type.into(), manager);
    }

    /// Resolves the manager for `asset_type`, falling back to
    /// `NullAssetManager` when nothing is registered.
    pub fn resolve(&self, asset_type: &str) -> Arc<dyn AssetManager> {
        self.managers
            .get(asset_type)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Default for AssetManagerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_asset_manager_rejects_everything() {
        let manager = NullAssetManager;
        let resource = Resource::default_for_test();
        let err = manager
            .set_asset_size(&resource, Uuid::nil(), 1, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, AssetManagerError::UserError(_)));
    }

    #[test]
    fn registry_falls_back_to_null_manager() {
        let registry = AssetManagerRegistry::new();
        let manager = registry.resolve("nonexistent");
        assert!(manager.info().usage_metrics.is_empty());
    }
}
