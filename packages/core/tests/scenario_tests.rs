//! Concrete scenarios S1-S6 from §8, driven against a real Postgres
//! container with a `FakeClock` and a `FakeAssetManager` standing in for the
//! backend plugin.

mod common;

use std::sync::Arc;
use std::time::Duration;

use autoscaler_core::common::{Id, MetricMap};
use autoscaler_core::jobs::harness::JobKind;
use autoscaler_core::jobs::{AssetScrapeJob, ResizeExecutionJob};
use autoscaler_core::kernel::asset_manager::AssetStatus;
use autoscaler_core::kernel::{AssetManagerRegistry, Record};
use autoscaler_core::model::{Asset, FinishedOperation, Outcome, PendingOperation, Reason, Resource};
use sqlx::PgPool;
use test_context::test_context;
use uuid::Uuid;

use common::{FakeAssetManager, TestHarness};

const LOW: f64 = 20.0;
const HIGH: f64 = 80.0;
const CRITICAL: f64 = 95.0;
const DELAY_SECS: i64 = 3600;

async fn seed_resource(pool: &PgPool) -> Resource {
    Resource::builder()
        .scope_uuid(Uuid::new_v4())
        .asset_type("volume".to_string())
        .low_threshold_percent(MetricMap::from_iter([("space".to_string(), LOW)]))
        .high_threshold_percent(MetricMap::from_iter([("space".to_string(), HIGH)]))
        .critical_threshold_percent(MetricMap::from_iter([("space".to_string(), CRITICAL)]))
        .low_delay_seconds(DELAY_SECS)
        .high_delay_seconds(DELAY_SECS)
        .size_step_percent(20.0)
        .build()
        .insert(pool)
        .await
        .unwrap()
}

async fn seed_asset(pool: &PgPool, resource: &Resource, size: i64, usage_fraction: f64) -> Asset {
    Asset::builder()
        .resource_id(resource.id)
        .uuid(Uuid::new_v4())
        .size(size)
        .usage(MetricMap::from_iter([("space".to_string(), usage_fraction)]))
        .never_scraped(false)
        .build()
        .insert(pool)
        .await
        .unwrap()
}

fn status(size: i64, usage_fraction: f64) -> AssetStatus {
    AssetStatus {
        size: size as u64,
        usage: std::collections::BTreeMap::from([("space".to_string(), usage_fraction)]),
        strict_minimum_size: None,
        strict_maximum_size: None,
    }
}

async fn run_asset_scrape(
    pool: &PgPool,
    manager: Arc<FakeAssetManager>,
    clock: Arc<dyn autoscaler_core::common::Clock>,
) {
    let mut registry = AssetManagerRegistry::new();
    registry.register("volume", manager);
    let job = AssetScrapeJob::new(registry, clock, Duration::from_secs(300), Duration::from_secs(3600));

    let mut tx = pool.begin().await.unwrap();
    let item = job.discover(&mut tx).await.unwrap().expect("an asset was due");
    job.process(item, tx).await.unwrap();
}

async fn run_resize_execution(
    pool: &PgPool,
    manager: Arc<FakeAssetManager>,
    clock: Arc<dyn autoscaler_core::common::Clock>,
) -> anyhow::Result<()> {
    let mut registry = AssetManagerRegistry::new();
    registry.register("volume", manager);
    let job = ResizeExecutionJob::new(registry, clock, Duration::from_secs(5), 3, Duration::from_secs(300));

    let mut tx = pool.begin().await.unwrap();
    let item = job.discover(&mut tx).await.unwrap().expect("a greenlit op was due");
    job.process(item, tx).await
}

#[test_context(TestHarness)]
#[tokio::test]
async fn s1_normal_upsize_to_greenlit(ctx: &TestHarness) {
    let resource = seed_resource(&ctx.db_pool).await;
    let asset = seed_asset(&ctx.db_pool, &resource, 1000, 0.5).await;
    let manager = Arc::new(FakeAssetManager::new());
    let clock = ctx.clock();

    manager.set_status(asset.uuid, status(1000, 0.80));
    run_asset_scrape(&ctx.db_pool, manager.clone(), clock.clone()).await;

    let pending = PendingOperation::find_by_asset_id(asset.id, &ctx.db_pool)
        .await
        .unwrap()
        .expect("a high op was proposed");
    assert_eq!(pending.reason, Reason::High);
    assert_eq!(pending.new_size, 1200);
    assert!(pending.confirmed_at.is_none());

    ctx.clock.advance(Duration::from_secs(40 * 60));
    manager.set_status(asset.uuid, status(1000, 0.82));
    run_asset_scrape(&ctx.db_pool, manager.clone(), clock.clone()).await;

    let pending = PendingOperation::find_by_asset_id(asset.id, &ctx.db_pool)
        .await
        .unwrap()
        .expect("still pending");
    assert!(pending.confirmed_at.is_none(), "still within delay at t=40m");

    ctx.clock.advance(Duration::from_secs(40 * 60));
    manager.set_status(asset.uuid, status(1000, 0.84));
    run_asset_scrape(&ctx.db_pool, manager.clone(), clock.clone()).await;

    let pending = PendingOperation::find_by_asset_id(asset.id, &ctx.db_pool)
        .await
        .unwrap()
        .expect("still pending after confirmation");
    assert_eq!(pending.confirmed_at, pending.greenlit_at);
    assert!(pending.confirmed_at.is_some(), "delay elapsed at t=80m");

    ctx.clock.advance(Duration::from_secs(40 * 60));
    manager.set_status(asset.uuid, status(1000, 0.78));
    run_asset_scrape(&ctx.db_pool, manager.clone(), clock.clone()).await;

    let still_pending = PendingOperation::find_by_asset_id(asset.id, &ctx.db_pool)
        .await
        .unwrap()
        .expect("a greenlit op is untouched by later scrapes");
    assert_eq!(still_pending.id, pending.id);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn s2_upsize_cancellation(ctx: &TestHarness) {
    let resource = seed_resource(&ctx.db_pool).await;
    let asset = seed_asset(&ctx.db_pool, &resource, 1000, 0.5).await;
    let manager = Arc::new(FakeAssetManager::new());
    let clock = ctx.clock();

    manager.set_status(asset.uuid, status(1000, 0.80));
    run_asset_scrape(&ctx.db_pool, manager.clone(), clock.clone()).await;
    let original = PendingOperation::find_by_asset_id(asset.id, &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();

    ctx.clock.advance(Duration::from_secs(40 * 60));
    manager.set_status(asset.uuid, status(1000, 0.79));
    run_asset_scrape(&ctx.db_pool, manager.clone(), clock.clone()).await;

    let pending = PendingOperation::find_by_asset_id(asset.id, &ctx.db_pool)
        .await
        .unwrap();
    assert!(pending.is_none(), "op is cancelled once usage drops below the high threshold");

    let finished: FinishedOperation = sqlx::query_as(
        "SELECT asset_id, reason, old_size, new_size, usage, created_at, confirmed_at, greenlit_at, greenlit_by_user_uuid, errored_attempts, retry_at, finished_at, outcome, error_message FROM finished_operations WHERE asset_id = $1",
    )
    .bind(asset.id)
    .fetch_one(&ctx.db_pool)
    .await
    .unwrap();
    assert_eq!(finished.outcome, Outcome::Cancelled);
    assert_eq!(finished.created_at, original.created_at);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn s3_critical_replaces_high(ctx: &TestHarness) {
    let resource = seed_resource(&ctx.db_pool).await;
    let asset = seed_asset(&ctx.db_pool, &resource, 1000, 0.5).await;
    let manager = Arc::new(FakeAssetManager::new());
    let clock = ctx.clock();

    manager.set_status(asset.uuid, status(1000, 0.90));
    run_asset_scrape(&ctx.db_pool, manager.clone(), clock.clone()).await;
    let high_op = PendingOperation::find_by_asset_id(asset.id, &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(high_op.reason, Reason::High);

    ctx.clock.advance(Duration::from_secs(10 * 60));
    manager.set_status(asset.uuid, status(1000, 0.96));
    run_asset_scrape(&ctx.db_pool, manager.clone(), clock.clone()).await;

    let critical_op = PendingOperation::find_by_asset_id(asset.id, &ctx.db_pool)
        .await
        .unwrap()
        .expect("a critical op replaces the high op");
    assert_eq!(critical_op.reason, Reason::Critical);
    assert_eq!(critical_op.confirmed_at, Some(critical_op.created_at));
    assert_eq!(critical_op.greenlit_at, Some(critical_op.created_at));

    let finished: FinishedOperation = sqlx::query_as(
        "SELECT asset_id, reason, old_size, new_size, usage, created_at, confirmed_at, greenlit_at, greenlit_by_user_uuid, errored_attempts, retry_at, finished_at, outcome, error_message FROM finished_operations WHERE asset_id = $1",
    )
    .bind(asset.id)
    .fetch_one(&ctx.db_pool)
    .await
    .unwrap();
    assert_eq!(finished.outcome, Outcome::Cancelled);
    assert_eq!(finished.reason, Reason::High);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn s4_external_resize_while_pending(ctx: &TestHarness) {
    let resource = seed_resource(&ctx.db_pool).await;
    let asset = seed_asset(&ctx.db_pool, &resource, 1000, 0.5).await;
    let manager = Arc::new(FakeAssetManager::new());
    let clock = ctx.clock();

    manager.set_status(asset.uuid, status(1000, 0.80));
    run_asset_scrape(&ctx.db_pool, manager.clone(), clock.clone()).await;
    let pending = PendingOperation::find_by_asset_id(asset.id, &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((pending.old_size, pending.new_size), (1000, 1200));

    manager.set_status(asset.uuid, status(1100, 0.90));
    run_asset_scrape(&ctx.db_pool, manager.clone(), clock.clone()).await;

    let asset_row = Asset::find_by_id(asset.id, &ctx.db_pool).await.unwrap().unwrap();
    assert_eq!(asset_row.size, 1100);

    let updated = PendingOperation::find_by_asset_id(asset.id, &ctx.db_pool)
        .await
        .unwrap()
        .expect("the same op, resized");
    assert_eq!(updated.id, pending.id);
    assert_eq!(updated.new_size, 1320);
    assert_eq!(updated.created_at, pending.created_at);
    assert_eq!(updated.confirmed_at, pending.confirmed_at);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn s5_successful_resize_cycle(ctx: &TestHarness) {
    let resource = seed_resource(&ctx.db_pool).await;
    let asset = seed_asset(&ctx.db_pool, &resource, 1000, 0.5).await;
    let manager = Arc::new(FakeAssetManager::new());
    let clock = ctx.clock();

    let mut op = PendingOperation::builder()
        .asset_id(asset.id)
        .reason(Reason::High)
        .old_size(1000i64)
        .new_size(1200i64)
        .created_at(clock.now())
        .build();
    op.confirm(clock.now());
    op.insert(&ctx.db_pool).await.unwrap();

    manager.configure_set_size_to_succeed();
    run_resize_execution(&ctx.db_pool, manager.clone(), clock.clone())
        .await
        .unwrap();

    assert!(PendingOperation::find_by_asset_id(asset.id, &ctx.db_pool)
        .await
        .unwrap()
        .is_none());

    let finished: FinishedOperation = sqlx::query_as(
        "SELECT asset_id, reason, old_size, new_size, usage, created_at, confirmed_at, greenlit_at, greenlit_by_user_uuid, errored_attempts, retry_at, finished_at, outcome, error_message FROM finished_operations WHERE asset_id = $1",
    )
    .bind(asset.id)
    .fetch_one(&ctx.db_pool)
    .await
    .unwrap();
    assert_eq!(finished.outcome, Outcome::Succeeded);

    let asset_row = Asset::find_by_id(asset.id, &ctx.db_pool).await.unwrap().unwrap();
    assert_eq!(asset_row.expected_size, Some(1200));
    assert_eq!(asset_row.resized_at, Some(clock.now()));

    manager.set_status(asset.uuid, status(1200, 0.60));
    run_asset_scrape(&ctx.db_pool, manager.clone(), clock.clone()).await;

    let asset_row = Asset::find_by_id(asset.id, &ctx.db_pool).await.unwrap().unwrap();
    assert_eq!(asset_row.expected_size, None);
    assert_eq!(asset_row.resized_at, None);
    assert_eq!(asset_row.size, 1200);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn s6_errored_with_retries(ctx: &TestHarness) {
    let resource = seed_resource(&ctx.db_pool).await;
    let asset = seed_asset(&ctx.db_pool, &resource, 1000, 0.5).await;
    let manager = Arc::new(FakeAssetManager::new());
    let clock = ctx.clock();

    let mut op = PendingOperation::builder()
        .asset_id(asset.id)
        .reason(Reason::High)
        .old_size(1000i64)
        .new_size(1200i64)
        .created_at(clock.now())
        .build();
    op.confirm(clock.now());
    op.insert(&ctx.db_pool).await.unwrap();

    manager.configure_set_size_to_fail("backend timeout");

    for attempt in 1..=3 {
        run_resize_execution(&ctx.db_pool, manager.clone(), clock.clone())
            .await
            .expect_err("a transient failure propagates as an error");

        let retried = PendingOperation::find_by_asset_id(asset.id, &ctx.db_pool)
            .await
            .unwrap()
            .expect("reinserted for retry");
        assert_eq!(retried.errored_attempts, attempt);
        assert_eq!(retried.retry_at, Some(clock.now() + chrono::Duration::minutes(5)));

        // Before retry_at, nothing is claimable.
        let mut tx = ctx.db_pool.begin().await.unwrap();
        assert!(PendingOperation::claim_and_delete_next(clock.now(), &mut *tx)
            .await
            .unwrap()
            .is_none());
        tx.rollback().await.unwrap();

        ctx.clock.advance(Duration::from_secs(5 * 60));
    }

    run_resize_execution(&ctx.db_pool, manager.clone(), clock.clone())
        .await
        .unwrap();

    assert!(PendingOperation::find_by_asset_id(asset.id, &ctx.db_pool)
        .await
        .unwrap()
        .is_none());

    let finished: FinishedOperation = sqlx::query_as(
        "SELECT asset_id, reason, old_size, new_size, usage, created_at, confirmed_at, greenlit_at, greenlit_by_user_uuid, errored_attempts, retry_at, finished_at, outcome, error_message FROM finished_operations WHERE asset_id = $1",
    )
    .bind(asset.id)
    .fetch_one(&ctx.db_pool)
    .await
    .unwrap();
    assert_eq!(finished.outcome, Outcome::Errored);
    assert_eq!(finished.errored_attempts, 3);
}
