//! Helpers shared between the unit tests.

use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::Signal;
use tokio::sync::Notify;

use crate::backend::StoreClient;
use crate::Backend;
use crate::ClientError;
use crate::Executor;

/// Installs a test subscriber once; safe to call from every test.
pub fn enable_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// An executor that supervises nothing.
pub fn noop_executor() -> Executor {
    Executor::new(
        None,
        None,
        Signal::SIGTERM,
        Duration::from_secs(1),
        Duration::ZERO,
    )
}

/// An executor around a real shell command with a short kill timeout.
pub fn shell_executor(command: &str) -> Executor {
    Executor::new(
        Some(command.to_string()),
        None,
        Signal::SIGTERM,
        Duration::from_secs(2),
        Duration::ZERO,
    )
}

/// An in-memory KV client the test can mutate; every mutation wakes one
/// pending watch. `fail_next` injects transient `get_values` failures.
#[derive(Default)]
pub struct TestKv {
    data: parking_lot::Mutex<HashMap<String, String>>,
    notify: Notify,
    failures: AtomicUsize,
}

impl TestKv {
    pub fn with_pairs(pairs: &[(&str, &str)]) -> Arc<Self> {
        let kv = Arc::new(Self::default());
        for (k, v) in pairs {
            kv.data.lock().insert(k.to_string(), v.to_string());
        }
        kv
    }

    /// Inserts a pair and signals one pending watcher.
    pub fn set(
        &self,
        key: &str,
        value: &str,
    ) {
        self.data.lock().insert(key.to_string(), value.to_string());
        self.notify.notify_one();
    }

    /// The next `n` `get_values` calls fail with a transient error.
    pub fn fail_next(
        &self,
        n: usize,
    ) {
        self.failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreClient for TestKv {
    async fn get_values(
        &self,
        _keys: &[String],
    ) -> Result<HashMap<String, String>, ClientError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ClientError::Request("injected failure".to_string()));
        }
        Ok(self.data.lock().clone())
    }

    async fn watch_prefix(
        &self,
        _prefix: &str,
        _keys: &[String],
    ) -> Result<(), ClientError> {
        self.notify.notified().await;
        Ok(())
    }
}

/// Wraps a [`TestKv`] in a backend with default policy flags.
pub fn test_backend(
    name: &str,
    kv: &Arc<TestKv>,
) -> Backend {
    let client: Arc<dyn StoreClient> = kv.clone();
    Backend::new(name, client)
}
