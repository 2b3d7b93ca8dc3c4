//! Child process supervision.
//!
//! The executor owns the resource's downstream process: spawn, reload
//! (signal or exec-replacement), arbitrary signal forwarding, and a
//! graceful stop that escalates to SIGKILL after a timeout. Every spawn
//! hands the child to a dedicated waiter task, so exits are always
//! reaped and broadcast; the executor itself only keeps the pid for
//! signalling.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::kill;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::utils::time::random_duration;
use crate::ExecError;
use crate::ResourceError;


/// Parses a signal from a name (`SIGHUP`, `hup`) or a number (`1`).
pub(crate) fn parse_signal(value: &str) -> Result<Signal, ResourceError> {
    let v = value.trim();
    if let Ok(n) = v.parse::<i32>() {
        return Signal::try_from(n).map_err(|_| ResourceError::InvalidSignal(value.to_string()));
    }

    let mut name = v.to_uppercase();
    if !name.starts_with("SIG") {
        name = format!("SIG{name}");
    }
    Signal::from_str(&name).map_err(|_| ResourceError::InvalidSignal(value.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Idle,
    Running,
    Stopping,
    Stopped,
    Failed,
}

#[derive(Debug)]
struct ChildExit {
    pid: i32,
    expected: bool,
    code: Option<i32>,
}

#[derive(Debug)]
struct ExecInner {
    state: ExecState,
    pid: Option<Pid>,
    /// Flips to true when the current child has exited.
    exited: Option<watch::Receiver<bool>>,
    /// Set while a stop sequence is in flight; exits observed in this
    /// window are expected.
    stopping: bool,
}

#[derive(Debug)]
pub struct Executor {
    command: Option<String>,
    reload_signal: Option<Signal>,
    kill_signal: Signal,
    kill_timeout: Duration,
    splay: Duration,

    inner: Arc<Mutex<ExecInner>>,
    exit_tx: mpsc::UnboundedSender<ChildExit>,
    exit_rx: Mutex<mpsc::UnboundedReceiver<ChildExit>>,
}

impl Executor {
    pub fn new(
        command: Option<String>,
        reload_signal: Option<Signal>,
        kill_signal: Signal,
        kill_timeout: Duration,
        splay: Duration,
    ) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        Self {
            command: command.filter(|c| !c.trim().is_empty()),
            reload_signal,
            kill_signal,
            kill_timeout,
            splay,
            inner: Arc::new(Mutex::new(ExecInner {
                state: ExecState::Idle,
                pid: None,
                exited: None,
                stopping: false,
            })),
            exit_tx,
            exit_rx: Mutex::new(exit_rx),
        }
    }

    pub async fn state(&self) -> ExecState {
        self.inner.lock().await.state
    }

    #[cfg(test)]
    pub(crate) async fn child_pid(&self) -> Option<i32> {
        self.inner.lock().await.pid.map(Pid::as_raw)
    }

    /// Starts the configured child. Without a command the executor acts
    /// as a no-op supervisor and transitions straight to `Running`.
    pub async fn spawn_child(&self) -> Result<(), ExecError> {
        let mut inner = self.inner.lock().await;

        let Some(command) = &self.command else {
            inner.state = ExecState::Running;
            return Ok(());
        };

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .spawn()
            .map_err(|source| {
                inner.state = ExecState::Failed;
                ExecError::Spawn {
                    command: command.clone(),
                    source,
                }
            })?;

        let pid = child.id().map(|p| Pid::from_raw(p as i32));
        let (exited_tx, exited_rx) = watch::channel(false);

        inner.state = ExecState::Running;
        inner.pid = pid;
        inner.exited = Some(exited_rx);
        info!(?pid, %command, "child process spawned");

        let inner_ref = self.inner.clone();
        let exit_tx = self.exit_tx.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            let code = status.as_ref().ok().and_then(|s| s.code());

            let mut inner = inner_ref.lock().await;
            let expected = inner.stopping;
            if inner.pid == pid {
                inner.pid = None;
            }
            debug!(?pid, ?code, expected, "child process exited");

            let _ = exited_tx.send(true);
            if let Some(pid) = pid {
                let _ = exit_tx.send(ChildExit {
                    pid: pid.as_raw(),
                    expected,
                    code,
                });
            }
        });

        Ok(())
    }

    /// Blocks until the child exits on its own or `shutdown` fires.
    ///
    /// Returns `true` when the child terminated while shutdown had not
    /// been requested — the unexpected-death case the resource treats as
    /// a failure. A shutdown request stops the child (kill sequence) and
    /// returns `false`. Expected exits from exec-replacement reloads are
    /// skipped over.
    pub async fn wait(
        &self,
        mut shutdown: watch::Receiver<()>,
    ) -> bool {
        {
            let mut exit_rx = self.exit_rx.lock().await;
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    exit = exit_rx.recv() => match exit {
                        Some(exit) if !exit.expected => {
                            warn!(pid = exit.pid, code = ?exit.code, "child process died unexpectedly");
                            return true;
                        }
                        Some(exit) => {
                            debug!(pid = exit.pid, "child stopped as part of a reload");
                        }
                        None => return false,
                    },
                }
            }
        }

        self.stop_child().await;
        false
    }

    /// Notifies the child of new configuration: either the configured
    /// reload signal (after a random `[0, splay)` delay) or a full stop
    /// and respawn.
    pub async fn reload(&self) -> Result<(), ExecError> {
        match self.reload_signal {
            Some(signal) => {
                if !self.splay.is_zero() {
                    let delay = random_duration(self.splay);
                    debug!(?delay, "delaying reload signal");
                    sleep(delay).await;
                }
                self.signal_child(signal).await
            }
            None => {
                self.stop_child().await;
                self.spawn_child().await
            }
        }
    }

    /// Forwards `signal` to the child when it is running; silently drops
    /// it otherwise.
    pub async fn signal_child(
        &self,
        signal: Signal,
    ) -> Result<(), ExecError> {
        let inner = self.inner.lock().await;
        match (inner.state, inner.pid) {
            (ExecState::Running, Some(pid)) => {
                debug!(%signal, ?pid, "forwarding signal to child");
                kill(pid, signal).map_err(|source| ExecError::Signal {
                    pid: pid.as_raw(),
                    source,
                })
            }
            _ => {
                debug!(%signal, state = ?inner.state, "dropping signal, no running child");
                Ok(())
            }
        }
    }

    /// Stops the child: kill signal, then up to `kill_timeout` of grace,
    /// then SIGKILL. Idempotent.
    pub async fn stop_child(&self) {
        let (pid, mut exited) = {
            let mut inner = self.inner.lock().await;
            if inner.state != ExecState::Running {
                return;
            }
            inner.state = ExecState::Stopping;
            inner.stopping = true;

            match (inner.pid, inner.exited.clone()) {
                (Some(pid), Some(exited)) => (pid, exited),
                _ => {
                    // no-op supervisor or the child is already gone
                    inner.state = ExecState::Stopped;
                    inner.stopping = false;
                    return;
                }
            }
        };

        info!(?pid, signal = %self.kill_signal, "stopping child process");
        if let Err(e) = kill(pid, self.kill_signal) {
            debug!(?pid, error = %e, "kill signal not delivered, child may have exited");
        }

        if timeout(self.kill_timeout, exited.wait_for(|exited| *exited))
            .await
            .is_err()
        {
            error!(?pid, timeout = ?self.kill_timeout, "child did not stop in time, sending SIGKILL");
            if let Err(e) = kill(pid, Signal::SIGKILL) {
                debug!(?pid, error = %e, "SIGKILL not delivered, child may have exited");
            }
            let _ = exited.wait_for(|exited| *exited).await;
        }

        let mut inner = self.inner.lock().await;
        inner.state = ExecState::Stopped;
        inner.stopping = false;
    }
}
