//! Backends: pluggable sources of KV data.
//!
//! A [`StoreClient`] is the capability a concrete protocol implements:
//! snapshot reads plus an optional blocking change watch. A [`Backend`]
//! wraps one client with its read policy (prefix, keys, interval, watch,
//! onetime) and an owned [`Store`] holding the client's latest snapshot.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::interval_at;
use tokio::time::sleep;
use tokio::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use tracing::warn;

use crate::constants::WATCH_RETRY_PAUSE;
use crate::BackendError;
use crate::ClientError;
use crate::Store;

mod env;
mod file;

pub use env::EnvClient;
pub use file::FileClient;

#[cfg(test)]
mod backend_test;

/// Capability contract a concrete KV protocol implements.
///
/// Keys handed to `get_values` are absolute and already prefixed; the
/// snapshot keys returned still carry that prefix.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Current snapshot for the given absolute keys.
    async fn get_values(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, String>, ClientError>;

    /// Resolves once a change under `prefix` has been observed.
    ///
    /// [`ClientError::WatchUnsupported`] is fatal for the calling watch
    /// task; any other error is transient and the watch is re-armed.
    async fn watch_prefix(
        &self,
        prefix: &str,
        keys: &[String],
    ) -> Result<(), ClientError>;

    /// Releases the connection. Idempotent.
    fn close(&self) {}
}

/// True when `key` falls under at least one of the requested key paths.
/// A requested path of `/` matches everything.
pub(crate) fn key_matches_any(
    key: &str,
    requested: &[String],
) -> bool {
    requested.iter().any(|r| {
        let r = Store::normalize(r);
        r == "/" || key == r || key.starts_with(&format!("{r}/"))
    })
}

/// One configured KV source: a client plus its read policy and private
/// snapshot store. Clones share the client and the store.
#[derive(Clone)]
pub struct Backend {
    pub name: String,
    pub prefix: String,
    pub keys: Vec<String>,
    /// Polling interval in seconds; 0 disables polling.
    pub interval: u64,
    pub watch: bool,
    pub onetime: bool,
    client: Arc<dyn StoreClient>,
    store: Store,
}

impl Debug for Backend {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .field("keys", &self.keys)
            .field("interval", &self.interval)
            .field("watch", &self.watch)
            .field("onetime", &self.onetime)
            .finish()
    }
}

impl Backend {
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn StoreClient>,
    ) -> Self {
        Self {
            name: name.into(),
            prefix: String::new(),
            keys: vec!["/".to_string()],
            interval: 0,
            watch: false,
            onetime: false,
            client,
            store: Store::new(),
        }
    }

    /// Key prefix applied on reads and stripped from snapshot keys.
    /// An empty or root prefix means keys pass through untouched.
    pub fn with_prefix(
        mut self,
        prefix: &str,
    ) -> Self {
        let normalized = Store::normalize(prefix);
        self.prefix = if normalized == "/" { String::new() } else { normalized };
        self
    }

    pub fn with_keys(
        mut self,
        keys: Vec<String>,
    ) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_interval(
        mut self,
        secs: u64,
    ) -> Self {
        self.interval = secs;
        self
    }

    pub fn with_watch(
        mut self,
        watch: bool,
    ) -> Self {
        self.watch = watch;
        self
    }

    pub fn with_onetime(
        mut self,
        onetime: bool,
    ) -> Self {
        self.onetime = onetime;
        self
    }

    /// This backend's private snapshot store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn close(&self) {
        debug!(backend = %self.name, "closing client connection");
        self.client.close();
    }

    /// The configured key patterns with the prefix applied.
    pub(crate) fn prefixed_keys(&self) -> Vec<String> {
        self.keys
            .iter()
            .map(|k| Store::normalize(&format!("{}/{}", self.prefix, k)))
            .collect()
    }

    /// Re-reads all KV pairs from the client and replaces the private
    /// store's contents with the prefix-stripped result.
    pub(crate) async fn refresh(&self) -> Result<(), BackendError> {
        debug!(backend = %self.name, key_prefix = %self.prefix, "retrieving keys");

        let keys = self.prefixed_keys();
        let values = self
            .client
            .get_values(&keys)
            .await
            .map_err(|e| BackendError::new(&self.name, format!("get_values failed: {e}")))?;

        self.store.purge();
        for (key, value) in values {
            let trimmed = key.strip_prefix(&self.prefix).unwrap_or(&key);
            self.store.set(trimmed, value);
        }

        Ok(())
    }

    /// Watch task: emits this backend on `process_tx` for every observed
    /// change until `shutdown` fires. Transient client errors go to
    /// `err_tx` followed by a short pause.
    pub(crate) async fn watch(
        self,
        mut shutdown: watch::Receiver<()>,
        process_tx: mpsc::Sender<Backend>,
        err_tx: mpsc::Sender<BackendError>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return,
                result = self.client.watch_prefix(&self.prefix, &self.keys) => match result {
                    Ok(()) => {
                        tokio::select! {
                            biased;
                            _ = shutdown.changed() => return,
                            sent = process_tx.send(self.clone()) => {
                                if sent.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(ClientError::WatchUnsupported) => {
                        warn!(backend = %self.name, "watch not supported, stopping watch task");
                        return;
                    }
                    Err(e) => {
                        let err = BackendError::new(&self.name, e.to_string());
                        tokio::select! {
                            biased;
                            _ = shutdown.changed() => return,
                            sent = err_tx.send(err) => {
                                if sent.is_err() {
                                    return;
                                }
                            }
                        }
                        tokio::select! {
                            biased;
                            _ = shutdown.changed() => return,
                            _ = sleep(WATCH_RETRY_PAUSE) => {}
                        }
                    }
                },
            }
        }
    }

    /// Interval task: emits this backend every `interval` seconds. The
    /// first tick fires one full period after start; the initial process
    /// has already covered t=0.
    pub(crate) async fn tick(
        self,
        mut shutdown: watch::Receiver<()>,
        process_tx: mpsc::Sender<Backend>,
    ) {
        let period = Duration::from_secs(self.interval);
        let mut ticker = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return,
                _ = ticker.tick() => {
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => return,
                        sent = process_tx.send(self.clone()) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}
