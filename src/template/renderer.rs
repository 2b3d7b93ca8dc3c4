//! One (source template, destination) pipeline.
//!
//! Rendering stages into a dotfile next to the destination, compares
//! contents, optionally validates via a check command, then swaps with
//! an atomic rename. Commands run under the shared reap lock in read
//! mode so an external zombie reaper cannot race short-lived children.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use minijinja::context;
use minijinja::Environment;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::debug;
use tracing::info;

use super::template_env;
use crate::utils::file_io::owner_of;
use crate::utils::file_io::same_contents;
use crate::utils::file_io::set_file_meta;
use crate::utils::file_io::stage_file_for;
use crate::RenderError;
use crate::Store;

/// Shared reader-writer lock coordinating short-lived child commands
/// with an external process reaper.
pub type ReapLock = Arc<RwLock<()>>;

#[derive(Debug)]
pub struct Renderer {
    /// Absolute path of the source template. Must be non-empty.
    pub src: PathBuf,
    /// Destination path the rendered output is swapped into.
    pub dst: PathBuf,
    /// Mode applied to the staged file before the swap.
    pub mode: u32,
    /// Owner overrides; `None` inherits from the current destination.
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// Validation command template; `{{ src }}` expands to the staged path.
    pub check_cmd: Option<String>,
    /// Post-swap command, best-effort.
    pub reload_cmd: Option<String>,

    reap_lock: ReapLock,
    stage: Option<NamedTempFile>,
}

impl Renderer {
    pub fn new(
        src: impl Into<PathBuf>,
        dst: impl Into<PathBuf>,
    ) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            mode: 0o644,
            uid: None,
            gid: None,
            check_cmd: None,
            reload_cmd: None,
            reap_lock: Arc::new(RwLock::new(())),
            stage: None,
        }
    }

    pub fn with_mode(
        mut self,
        mode: u32,
    ) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_owner(
        mut self,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    pub fn with_check_cmd(
        mut self,
        cmd: impl Into<String>,
    ) -> Self {
        self.check_cmd = Some(cmd.into());
        self
    }

    pub fn with_reload_cmd(
        mut self,
        cmd: impl Into<String>,
    ) -> Self {
        self.reload_cmd = Some(cmd.into());
        self
    }

    pub(crate) fn set_reap_lock(
        &mut self,
        lock: ReapLock,
    ) {
        self.reap_lock = lock;
    }

    /// Renders `src` against the store and writes the result to a staged
    /// temp file in `dst`'s directory, with mode and ownership applied.
    /// The staged file is held on the renderer until [`sync_files`].
    ///
    /// [`sync_files`]: Self::sync_files
    pub(crate) async fn create_stage_file(
        &mut self,
        store: &Store,
    ) -> Result<(), RenderError> {
        let source = tokio::fs::read_to_string(&self.src)
            .await
            .map_err(|source| RenderError::Source {
                path: self.src.clone(),
                source,
            })?;

        let env = template_env(store);
        let rendered = env
            .render_str(&source, context! {})
            .map_err(|e| RenderError::Template {
                path: self.src.clone(),
                source: Box::new(e),
            })?;

        debug!(src = %self.src.display(), dst = %self.dst.display(), "staging rendered template");

        let mut stage = stage_file_for(&self.dst)?;
        stage
            .as_file_mut()
            .write_all(rendered.as_bytes())
            .and_then(|_| stage.as_file_mut().flush())
            .map_err(|source| RenderError::Stage {
                path: self.dst.clone(),
                source,
            })?;

        set_file_meta(stage.path(), self.mode, self.uid, self.gid, owner_of(&self.dst)).map_err(
            |source| RenderError::Stage {
                path: self.dst.clone(),
                source,
            },
        )?;

        self.stage = Some(stage);
        Ok(())
    }

    /// Compares the staged file with the destination and swaps it in when
    /// they differ. Returns whether the destination changed.
    ///
    /// A failing check command removes the staged file and leaves the
    /// destination untouched. A failing reload command is an error, but
    /// the swap has already happened by then.
    pub(crate) async fn sync_files(&mut self) -> Result<bool, RenderError> {
        let stage = self.stage.take().ok_or_else(|| {
            RenderError::Io(std::io::Error::other("sync_files called without a staged file"))
        })?;

        if self.dst.exists() {
            if same_contents(stage.path(), &self.dst)? {
                debug!(dst = %self.dst.display(), "target config in sync");
                return Ok(false);
            }

            if let Some(cmd) = &self.check_cmd {
                let command = Environment::new()
                    .render_str(cmd, context! { src => stage.path().to_string_lossy() })
                    .map_err(|e| RenderError::Template {
                        path: self.dst.clone(),
                        source: Box::new(e),
                    })?;

                debug!(%command, "running check command");
                let code = self.run_command(&command).await?;
                if code != Some(0) {
                    return Err(RenderError::CheckFailed {
                        dst: self.dst.clone(),
                        code,
                    });
                }
            }
        }

        info!(dst = %self.dst.display(), "target config out of sync, overwriting");
        if let Err(e) = stage.persist(&self.dst) {
            let source = e.error;
            let staged = match e.file.into_temp_path().keep() {
                Ok(path) => path,
                Err(keep_err) => keep_err.path.to_path_buf(),
            };
            return Err(RenderError::Swap {
                dst: self.dst.clone(),
                staged,
                source,
            });
        }

        if let Some(cmd) = &self.reload_cmd {
            debug!(command = %cmd, "running reload command");
            let code = self.run_command(cmd).await?;
            if code != Some(0) {
                return Err(RenderError::ReloadFailed {
                    dst: self.dst.clone(),
                    code,
                });
            }
        }

        Ok(true)
    }

    /// Runs a shell command with inherited stdio, holding the reap lock
    /// in read mode for the duration.
    async fn run_command(
        &self,
        command: &str,
    ) -> Result<Option<i32>, RenderError> {
        let _reaper_guard = self.reap_lock.read().await;
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .status()
            .await
            .map_err(|source| RenderError::Command {
                command: command.to_string(),
                source,
            })?;
        Ok(status.code())
    }
}
