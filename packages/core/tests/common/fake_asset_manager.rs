//! In-memory `AssetManager` test double (§6.1 [FULL]).
//!
//! Backs S1-S6 of §8: tests mutate the map between scrape ticks to script
//! usage changes, and configure `set_asset_size`'s behavior to exercise the
//! three outcome paths resize-execution must classify.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use autoscaler_core::kernel::{AssetManager, AssetManagerError, AssetManagerInfo, AssetStatus};
use autoscaler_core::model::Resource;
use uuid::Uuid;

#[derive(Debug, Clone)]
enum SetSizeBehavior {
    Succeed,
    UserError(String),
    Other(String),
}

pub struct FakeAssetManager {
    assets: Mutex<HashMap<Uuid, AssetStatus>>,
    set_size_behavior: Mutex<SetSizeBehavior>,
}

impl FakeAssetManager {
    pub fn new() -> Self {
        Self {
            assets: Mutex::new(HashMap::new()),
            set_size_behavior: Mutex::new(SetSizeBehavior::Succeed),
        }
    }

    /// Adds or replaces an asset's observed status, as if the backend now
    /// reports this for `uuid`.
    pub fn set_status(&self, uuid: Uuid, status: AssetStatus) {
        self.assets.lock().unwrap().insert(uuid, status);
    }

    pub fn remove(&self, uuid: Uuid) {
        self.assets.lock().unwrap().remove(&uuid);
    }

    /// Makes the next (and all subsequent, until reconfigured) `set_asset_size`
    /// calls succeed.
    pub fn configure_set_size_to_succeed(&self) {
        *self.set_size_behavior.lock().unwrap() = SetSizeBehavior::Succeed;
    }

    /// Makes `set_asset_size` return a `UserError` (no retry expected).
    pub fn configure_set_size_to_reject(&self, message: impl Into<String>) {
        *self.set_size_behavior.lock().unwrap() = SetSizeBehavior::UserError(message.into());
    }

    /// Makes `set_asset_size` return a transient (retryable) error.
    pub fn configure_set_size_to_fail(&self, message: impl Into<String>) {
        *self.set_size_behavior.lock().unwrap() = SetSizeBehavior::Other(message.into());
    }
}

impl Default for FakeAssetManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssetManager for FakeAssetManager {
    async fn list_assets(&self, _resource: &Resource) -> Result<Vec<Uuid>, AssetManagerError> {
        Ok(self.assets.lock().unwrap().keys().copied().collect())
    }

    async fn get_asset_status(
        &self,
        _resource: &Resource,
        asset_uuid: Uuid,
        _previous: Option<&AssetStatus>,
    ) -> Result<AssetStatus, AssetManagerError> {
        self.assets
            .lock()
            .unwrap()
            .get(&asset_uuid)
            .cloned()
            .ok_or(AssetManagerError::AssetNotFound(asset_uuid))
    }

    async fn set_asset_size(
        &self,
        _resource: &Resource,
        _asset_uuid: Uuid,
        _old_size: u64,
        _new_size: u64,
    ) -> Result<(), AssetManagerError> {
        match self.set_size_behavior.lock().unwrap().clone() {
            SetSizeBehavior::Succeed => Ok(()),
            SetSizeBehavior::UserError(message) => Err(AssetManagerError::UserError(message)),
            SetSizeBehavior::Other(message) => Err(AssetManagerError::Other(anyhow::anyhow!(message))),
        }
    }

    fn info(&self) -> AssetManagerInfo {
        AssetManagerInfo {
            usage_metrics: vec!["space".to_string()],
        }
    }
}
