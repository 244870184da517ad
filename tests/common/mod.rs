//! Shared utilities for integration testing.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use instance_manager::membership::ClientError;
use instance_manager::{MembershipClient, MembershipConfig, MemoryRegistry, Shutdown};

pub const SERVICE: &str = "test-service";

/// A running client wired to an in-memory registry.
pub struct Harness {
    pub registry: Arc<MemoryRegistry>,
    pub client: MembershipClient,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), ClientError>>,
}

impl Harness {
    /// Stop the client and return what `run` returned.
    pub async fn stop(self) -> Result<(), ClientError> {
        self.shutdown.trigger();
        self.handle.await.expect("client task panicked")
    }
}

/// Membership config with fast timers for tests.
pub fn fast_config(poll_ms: u64, hold_ms: u64) -> MembershipConfig {
    MembershipConfig {
        poll_interval_ms: poll_ms,
        hold_duration_ms: hold_ms,
        ..MembershipConfig::new(SERVICE)
    }
}

/// Start a client for `config` against a fresh in-memory registry.
pub fn start_client(config: MembershipConfig) -> Harness {
    let registry = Arc::new(MemoryRegistry::new());
    let client = MembershipClient::new(config, registry.clone()).expect("valid config");
    let shutdown = Shutdown::new();

    let handle = tokio::spawn({
        let client = client.clone();
        let signal = shutdown.subscribe();
        async move { client.run(signal).await }
    });

    Harness {
        registry,
        client,
        shutdown,
        handle,
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Assert `condition` holds for the whole of `window`.
#[allow(dead_code)]
pub async fn holds_for(window: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + window;
    while tokio::time::Instant::now() < deadline {
        if !condition() {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Run `f` with a timeout, panicking if it does not finish.
#[allow(dead_code)]
pub async fn within<F: Future>(timeout: Duration, f: F) -> F::Output {
    tokio::time::timeout(timeout, f)
        .await
        .expect("operation timed out")
}
