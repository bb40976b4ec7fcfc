pub mod fake_asset_manager;
pub mod harness;

pub use fake_asset_manager::FakeAssetManager;
pub use harness::TestHarness;
