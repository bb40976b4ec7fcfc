//! Dependency-injection container and the seams it is built from:
//! the `Record` CRUD trait, the `AssetManager` plugin contract, the
//! `Service` run-loop trait, and the metrics facade.

pub mod asset_manager;
pub mod kernel;
pub mod metrics;
pub mod record;
pub mod service;

pub use asset_manager::{
    AssetManager, AssetManagerError, AssetManagerInfo, AssetManagerRegistry, AssetStatus,
    NullAssetManager,
};
pub use kernel::AppKernel;
pub use record::Record;
pub use service::{run_until_shutdown, Service};
