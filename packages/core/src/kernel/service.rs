//! The `Service` trait long-running job loops implement, plus a small
//! runner that drives a set of them until a shutdown signal fires.
//!
//! Grounded on `kernel/jobs/worker.rs`'s `impl Service for JobWorker` (the
//! `service_host` module it was built against did not make it into the
//! retrieved pack; this reconstructs the trait and a `run_until_shutdown`
//! helper from that single call site plus `runner.rs`'s Ctrl-C wiring).

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A long-running background process driven by a shared cancellation token.
#[async_trait::async_trait]
pub trait Service: Send {
    /// A short name used in logs.
    fn name(&self) -> &'static str;

    /// Runs until `shutdown` is cancelled. Implementations must check
    /// `shutdown` at every suspension point and return promptly once it
    /// fires.
    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

/// Runs every service concurrently, cancelling all of them as soon as one
/// returns (successfully or not) or Ctrl-C is received.
pub async fn run_until_shutdown(services: Vec<Box<dyn Service>>) -> Result<()> {
    let shutdown = CancellationToken::new();

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal");
            shutdown.cancel();
        });
    }

    let shutdown = Arc::new(shutdown);
    let mut handles = Vec::with_capacity(services.len());
    for service in services {
        let name = service.name();
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            let result = service.run((*shutdown).clone()).await;
            if let Err(ref err) = result {
                tracing::error!(service = name, error = %err, "service exited with error");
            } else {
                info!(service = name, "service stopped");
            }
            result
        }));
    }

    // If any service ends (cleanly or not), tell the rest to wind down.
    let (first, _index, rest) = futures::future::select_all(handles).await;
    shutdown.cancel();
    for handle in rest {
        let _ = handle.await;
    }
    first??;
    Ok(())
}
