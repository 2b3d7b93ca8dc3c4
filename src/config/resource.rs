//! Per-resource configuration: backends, templates, and the child
//! process definition.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use serde::Deserialize;
use serde::Serialize;

use crate::backend::EnvClient;
use crate::backend::FileClient;
use crate::backend::StoreClient;
use crate::constants::DEFAULT_KILL_TIMEOUT_SECS;
use crate::exec::parse_signal;
use crate::template::Renderer;
use crate::Backend;
use crate::Executor;
use crate::ResourceError;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Name added to all log lines of this resource.
    pub name: String,

    #[serde(default, rename = "backend")]
    pub backends: Vec<BackendSettings>,

    #[serde(default, rename = "template")]
    pub templates: Vec<TemplateSettings>,

    #[serde(default)]
    pub exec: ExecSettings,
}

impl ResourceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(ResourceError::NoBackends.into());
        }
        for template in &self.templates {
            if template.src.as_os_str().is_empty() {
                return Err(ResourceError::EmptySrc.into());
            }
            template.parse_mode()?;
        }
        self.exec.parse_signals()?;
        Ok(())
    }

    /// Establishes a connection for every configured backend.
    pub fn connect_backends(&self) -> Result<Vec<Backend>> {
        self.backends.iter().map(BackendSettings::connect).collect()
    }

    pub fn renderers(&self) -> Result<Vec<Renderer>> {
        self.templates.iter().map(TemplateSettings::build).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Display name; defaults to the source kind.
    #[serde(default)]
    pub name: Option<String>,

    /// Key prefix applied on reads and stripped from stored keys.
    #[serde(default)]
    pub prefix: String,

    #[serde(default = "default_keys")]
    pub keys: Vec<String>,

    /// Polling interval in seconds; 0 disables polling.
    #[serde(default)]
    pub interval: u64,

    #[serde(default)]
    pub watch: bool,

    /// Participate in the initial sync only.
    #[serde(default)]
    pub onetime: bool,

    #[serde(flatten)]
    pub source: SourceSettings,
}

/// The concrete KV source behind a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceSettings {
    /// Process environment variables (`DB_HOST` → `/db/host`).
    Env,
    /// A structured file (TOML/YAML/JSON) flattened into KV paths.
    File {
        path: PathBuf,
        #[serde(default = "default_file_poll_ms")]
        poll_ms: u64,
    },
}

impl BackendSettings {
    pub fn connect(&self) -> Result<Backend> {
        let (client, kind): (Arc<dyn StoreClient>, &str) = match &self.source {
            SourceSettings::Env => (Arc::new(EnvClient::new()), "env"),
            SourceSettings::File { path, poll_ms } => (
                Arc::new(FileClient::new(path, Duration::from_millis(*poll_ms))),
                "file",
            ),
        };

        Ok(Backend::new(
            self.name.clone().unwrap_or_else(|| kind.to_string()),
            client,
        )
        .with_prefix(&self.prefix)
        .with_keys(self.keys.clone())
        .with_interval(self.interval)
        .with_watch(self.watch)
        .with_onetime(self.onetime))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSettings {
    /// Absolute path of the source template.
    pub src: PathBuf,
    /// Destination the rendered output is swapped into.
    pub dst: PathBuf,

    /// Octal mode string, e.g. `"0644"`.
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Owner overrides; unset inherits from the current destination.
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default)]
    pub gid: Option<u32>,

    /// Validation command; `{{ src }}` expands to the staged file path.
    #[serde(default)]
    pub check_cmd: Option<String>,

    /// Post-swap command.
    #[serde(default)]
    pub reload_cmd: Option<String>,
}

impl TemplateSettings {
    fn parse_mode(&self) -> Result<u32> {
        let digits = self.mode.trim_start_matches("0o");
        u32::from_str_radix(digits, 8)
            .map_err(|_| ResourceError::InvalidFileMode(self.mode.clone()).into())
    }

    pub fn build(&self) -> Result<Renderer> {
        let mut renderer = Renderer::new(&self.src, &self.dst)
            .with_mode(self.parse_mode()?)
            .with_owner(self.uid, self.gid);
        if let Some(cmd) = &self.check_cmd {
            renderer = renderer.with_check_cmd(cmd);
        }
        if let Some(cmd) = &self.reload_cmd {
            renderer = renderer.with_reload_cmd(cmd);
        }
        Ok(renderer)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecSettings {
    /// Child command; empty means supervise nothing.
    #[serde(default)]
    pub command: Option<String>,

    /// Signal sent on reload; unset means stop-and-respawn.
    #[serde(default)]
    pub reload_signal: Option<String>,

    /// Signal starting the stop sequence. Defaults to SIGTERM.
    #[serde(default)]
    pub kill_signal: Option<String>,

    /// Grace period in seconds before SIGKILL.
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout: u64,

    /// Upper bound in seconds of the random reload delay.
    #[serde(default)]
    pub splay: u64,
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self {
            command: None,
            reload_signal: None,
            kill_signal: None,
            kill_timeout: default_kill_timeout(),
            splay: 0,
        }
    }
}

impl ExecSettings {
    fn parse_signals(&self) -> Result<(Option<Signal>, Signal)> {
        let reload = self
            .reload_signal
            .as_deref()
            .map(parse_signal)
            .transpose()?;
        let kill = self
            .kill_signal
            .as_deref()
            .map(parse_signal)
            .transpose()?
            .unwrap_or(Signal::SIGTERM);
        Ok((reload, kill))
    }

    pub fn build(&self) -> Result<Executor> {
        let (reload_signal, kill_signal) = self.parse_signals()?;
        Ok(Executor::new(
            self.command.clone(),
            reload_signal,
            kill_signal,
            Duration::from_secs(self.kill_timeout),
            Duration::from_secs(self.splay),
        ))
    }
}

fn default_keys() -> Vec<String> {
    vec!["/".to_string()]
}

fn default_file_poll_ms() -> u64 {
    1000
}

fn default_mode() -> String {
    "0644".to_string()
}

fn default_kill_timeout() -> u64 {
    DEFAULT_KILL_TIMEOUT_SECS
}
