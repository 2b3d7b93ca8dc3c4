use std::env;

use consync::config::{AppConfig, LogSettings};
use consync::resource::supervise;
use consync::{ReapLock, Result, SignalRegistry};
use nix::sys::signal::Signal;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = env::args().nth(1);
    let config = AppConfig::load(config_path.as_deref())?;

    // Initializing Logs
    let _guard = init_observability(&config.log);

    // Initializing Shutdown Signal
    let (graceful_tx, graceful_rx) = watch::channel(());
    let reap_lock = ReapLock::default();
    let signals = SignalRegistry::default();

    if config.resources.is_empty() {
        warn!("no resources configured, nothing to do");
    }

    let mut resources = Vec::new();
    for resource in config.resources {
        resources.push(tokio::spawn(supervise(
            resource,
            reap_lock.clone(),
            graceful_rx.clone(),
            signals.clone(),
        )));
    }

    info!("consync started, waiting for shutdown signal");
    tokio::spawn(forward_sighup(signals.clone()));
    tokio::spawn(graceful_shutdown(graceful_tx));

    for resource in resources {
        let _ = resource.await;
    }

    info!("all resources stopped, exiting");
    Ok(())
}

/// Broadcasts shutdown once SIGINT or SIGTERM arrives.
async fn graceful_shutdown(graceful_tx: watch::Sender<()>) {
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to register SIGINT handler: {e}");
            return;
        }
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to register SIGTERM handler: {e}");
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected");
        },
    }

    if graceful_tx.send(()).is_err() {
        warn!("no resources left to notify of shutdown");
    }
}

/// Forwards SIGHUP to every running resource's signal channel. The
/// channels are lossy on purpose; an already-pending signal coalesces.
async fn forward_sighup(signals: SignalRegistry) {
    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to register SIGHUP handler: {e}");
            return;
        }
    };

    while sighup.recv().await.is_some() {
        info!("SIGHUP received, forwarding to resources");
        for (name, tx) in signals.lock().iter() {
            if tx.try_send(Signal::SIGHUP).is_err() {
                warn!(resource = %name, "signal channel busy, SIGHUP coalesced");
            }
        }
    }
}

fn init_observability(log: &LogSettings) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));

    match &log.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, "consync.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).init();
            Some(guard)
        }
        None => {
            let layer = tracing_subscriber::fmt::layer().with_filter(filter);
            tracing_subscriber::registry().with(layer).init();
            None
        }
    }
}
