//! The resource monitor: the per-resource engine that merges backend KV
//! views, renders templates, supervises the child process, and keeps
//! everything converged until shutdown.
//!
//! Concurrency model: watch and interval tasks per backend plus the
//! executor watchdog all funnel into one `select!` dispatch loop. That
//! loop is the only writer of the merged store and the only caller of
//! staging and reload, so merge, render, and reload are strictly
//! serialized within a resource while resources progress in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use nix::sys::signal::Signal;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::config::ResourceConfig;
use crate::constants::DEFAULT_INTERVAL_SECS;
use crate::constants::ERROR_CHANNEL_CAPACITY;
use crate::constants::RETRY_JITTER_MAX;
use crate::template::Renderer;
use crate::utils::time::random_duration;
use crate::Backend;
use crate::BackendError;
use crate::Error;
use crate::Executor;
use crate::ReapLock;
use crate::ResourceError;
use crate::Result;
use crate::Store;


/// Signal senders of the currently running resources, keyed by resource
/// name. The binary uses this to fan incoming signals out to children.
pub type SignalRegistry = Arc<parking_lot::Mutex<HashMap<String, mpsc::Sender<Signal>>>>;

/// A named unit bundling backends, template renderers, and an optional
/// child process.
#[derive(Debug)]
pub struct Resource {
    name: String,
    backends: Vec<Backend>,
    renderers: Vec<Renderer>,
    store: Store,
    exec: Arc<Executor>,

    signal_tx: mpsc::Sender<Signal>,
    signal_rx: Option<mpsc::Receiver<Signal>>,

    failed: bool,
}

impl Resource {
    /// Builds a resource and applies the construction invariants: at
    /// least one backend, no empty template sources, and backends that
    /// would otherwise never refresh get a 60 second interval.
    ///
    /// On a validation failure all backend connections are closed before
    /// the error is returned.
    pub fn new(
        name: impl Into<String>,
        mut backends: Vec<Backend>,
        renderers: Vec<Renderer>,
        exec: Executor,
    ) -> Result<Self> {
        let name = name.into();

        if backends.is_empty() {
            return Err(ResourceError::NoBackends.into());
        }

        if renderers.iter().any(|r| r.src.as_os_str().is_empty()) {
            for backend in &backends {
                backend.close();
            }
            return Err(ResourceError::EmptySrc.into());
        }

        for backend in &mut backends {
            if backend.interval == 0 && !backend.onetime && !backend.watch {
                warn!(
                    resource = %name,
                    backend = %backend.name,
                    "interval needs to be > 0, setting interval to {DEFAULT_INTERVAL_SECS}"
                );
                backend.interval = DEFAULT_INTERVAL_SECS;
            }
        }

        // lossy by design: coalesced signals are fine
        let (signal_tx, signal_rx) = mpsc::channel(1);

        Ok(Self {
            name,
            backends,
            renderers,
            store: Store::new(),
            exec: Arc::new(exec),
            signal_tx,
            signal_rx: Some(signal_rx),
            failed: false,
        })
    }

    /// Builds a resource from its configuration: connects all backends,
    /// wires the shared reap lock into every renderer, and constructs
    /// the executor.
    pub fn from_config(
        config: &ResourceConfig,
        reap_lock: ReapLock,
    ) -> Result<Self> {
        let backends = config.connect_backends()?;
        let mut renderers = config.renderers()?;
        for renderer in &mut renderers {
            renderer.set_reap_lock(reap_lock.clone());
        }
        let exec = config.exec.build()?;

        Self::new(&config.name, backends, renderers, exec)
    }

    /// Sender half of the resource's (bounded, lossy) signal channel.
    pub fn signal_sender(&self) -> mpsc::Sender<Signal> {
        self.signal_tx.clone()
    }

    /// True when the last `monitor` run ended because the child process
    /// died unexpectedly rather than through shutdown. The supervisor
    /// rebuilds the resource in that case.
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Closes all backend connections. No further operation on the
    /// resource is valid afterwards.
    pub fn close(&self) {
        for backend in &self.backends {
            backend.close();
        }
    }

    /// The merged view the templates render from.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Re-fetches the given backends, rebuilds the merged store from
    /// every backend's snapshot, and re-renders all templates. Returns
    /// whether any destination changed.
    ///
    /// Only the passed backends hit their client; the others contribute
    /// whatever their store held from their last event.
    async fn process(
        &mut self,
        backends: &[Backend],
    ) -> Result<bool> {
        for backend in backends {
            backend.refresh().await.map_err(Error::Backend)?;
        }
        self.merge_stores();
        self.create_stage_file_and_sync().await
    }

    /// Rebuilds the merged store from all backend snapshots, in
    /// declaration order. Later backends win key collisions.
    fn merge_stores(&self) {
        self.store.purge();
        for backend in &self.backends {
            for kv in backend.store().get_all_kvs() {
                if self.store.exists(&kv.key) {
                    warn!(
                        resource = %self.name,
                        backend = %backend.name,
                        key = %kv.key,
                        "key collision, overwriting"
                    );
                }
                self.store.set(&kv.key, kv.value);
            }
        }
    }

    async fn create_stage_file_and_sync(&mut self) -> Result<bool> {
        let store = self.store.clone();
        let mut changed = false;
        for renderer in &mut self.renderers {
            renderer.create_stage_file(&store).await?;
            changed |= renderer.sync_files().await?;
        }
        Ok(changed)
    }

    fn log_process_error(
        &self,
        err: &Error,
    ) {
        match err {
            Error::Backend(e) => {
                error!(resource = %self.name, backend = %e.backend, error = %e, "process failed")
            }
            other => error!(resource = %self.name, error = %other, "process failed"),
        }
    }

    /// Monitors all backends for changes and keeps destinations and the
    /// child process converged until `shutdown` fires or the child dies
    /// unexpectedly (which sets [`failed`](Self::failed)).
    pub async fn monitor(
        &mut self,
        mut shutdown: watch::Receiver<()>,
    ) {
        self.failed = false;

        // Initial convergence. Retried forever with a random delay so
        // resources sharing a backend do not hammer it in lockstep; a
        // retry always re-fetches ALL backends, never a stale subset.
        loop {
            let all = self.backends.clone();
            let result = tokio::select! {
                biased;
                _ = shutdown.changed() => return,
                result = self.process(&all) => result,
            };

            match result {
                Ok(_) => break,
                Err(e) => {
                    self.log_process_error(&e);
                    let delay = random_duration(RETRY_JITTER_MAX);
                    error!(
                        resource = %self.name,
                        delay_secs = delay.as_secs(),
                        "initial sync failed, trying again with all backends"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => return,
                        _ = sleep(delay) => {}
                    }
                }
            }
        }

        // Start the child. A spawn failure marks the resource failed so
        // the supervisor can rebuild it; nothing else has started yet.
        if let Err(e) = self.exec.spawn_child().await {
            error!(resource = %self.name, error = %e, "failed to spawn child process");
            self.failed = true;
            return;
        }

        // Fan out watchers, interval tickers, and the executor watchdog.
        let (cancel_tx, cancel_rx) = watch::channel(());
        let (process_tx, mut process_rx) = mpsc::channel::<Backend>(1);
        let (err_tx, mut err_rx) = mpsc::channel::<BackendError>(ERROR_CHANNEL_CAPACITY);
        let (failed_tx, mut failed_rx) = mpsc::channel::<()>(1);
        let mut workers: Vec<JoinHandle<()>> = Vec::new();

        {
            // The watchdog keeps a process sender alive so the dispatch
            // loop's channel only closes once supervision itself ends.
            let exec = self.exec.clone();
            let cancel = cancel_rx.clone();
            let keep_open = process_tx.clone();
            workers.push(tokio::spawn(async move {
                let _keep_open = keep_open;
                if exec.wait(cancel).await {
                    let _ = failed_tx.send(()).await;
                }
            }));
        }

        for backend in &self.backends {
            if backend.onetime {
                continue;
            }
            if backend.watch {
                workers.push(tokio::spawn(backend.clone().watch(
                    cancel_rx.clone(),
                    process_tx.clone(),
                    err_tx.clone(),
                )));
            }
            if backend.interval > 0 {
                workers.push(tokio::spawn(
                    backend.clone().tick(cancel_rx.clone(), process_tx.clone()),
                ));
            }
        }
        drop(process_tx);
        drop(err_tx);

        let mut signal_rx = match self.signal_rx.take() {
            Some(rx) => rx,
            None => {
                let (tx, rx) = mpsc::channel(1);
                self.signal_tx = tx;
                rx
            }
        };

        info!(resource = %self.name, "monitoring backends for changes");

        // Dispatch loop. Single-threaded per resource: a reload is only
        // issued after its triggering process completed, and no two
        // reloads overlap.
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(()) = failed_rx.recv() => {
                    error!(resource = %self.name, "child process exited unexpectedly");
                    self.failed = true;
                    break;
                }
                Some(signal) = signal_rx.recv() => {
                    if let Err(e) = self.exec.signal_child(signal).await {
                        warn!(resource = %self.name, error = %e, "failed to forward signal");
                    }
                }
                Some(err) = err_rx.recv() => {
                    error!(resource = %self.name, backend = %err.backend, "backend error: {}", err.message);
                }
                event = process_rx.recv() => match event {
                    Some(backend) => {
                        debug!(resource = %self.name, backend = %backend.name, "processing backend event");
                        match self.process(std::slice::from_ref(&backend)).await {
                            Ok(true) => {
                                if let Err(e) = self.exec.reload().await {
                                    error!(resource = %self.name, error = %e, "reload failed");
                                }
                            }
                            Ok(false) => {}
                            Err(e) => self.log_process_error(&e),
                        }
                    }
                    None => break,
                },
            }
        }

        // Shutdown ordering: cancel the workers, drain the process
        // channel so blocked senders can observe the cancel, join
        // everything, then stop the child.
        let _ = cancel_tx.send(());
        let drain = tokio::spawn(async move { while process_rx.recv().await.is_some() {} });
        for worker in workers {
            let _ = worker.await;
        }
        let _ = drain.await;
        self.exec.stop_child().await;

        self.signal_rx = Some(signal_rx);
    }
}

/// Runs one resource until shutdown, rebuilding it whenever the monitor
/// ends with a failed child. The resource's signal sender is published in
/// `signals` for the lifetime of each incarnation.
pub async fn supervise(
    config: ResourceConfig,
    reap_lock: ReapLock,
    shutdown: watch::Receiver<()>,
    signals: SignalRegistry,
) {
    let name = config.name.clone();
    loop {
        let mut resource = match Resource::from_config(&config, reap_lock.clone()) {
            Ok(resource) => resource,
            Err(e) => {
                error!(resource = %name, error = %e, "failed to build resource");
                break;
            }
        };

        signals.lock().insert(name.clone(), resource.signal_sender());
        resource.monitor(shutdown.clone()).await;
        resource.close();

        if !resource.failed() {
            break;
        }
        warn!(resource = %name, "restarting failed resource");
    }
    signals.lock().remove(&name);
}
