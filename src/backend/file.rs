//! File backend.
//!
//! Flattens a structured configuration file (TOML, YAML, JSON — whatever
//! the `config` crate recognizes by extension) into path-style keys:
//! `[database] host = "db1"` becomes `/database/host = "db1"`. Array
//! elements get their index as a path segment. Changes are detected by
//! polling the file's modification time.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;

use async_trait::async_trait;
use config::Config;
use config::File;
use config::Map;
use config::Value;
use config::ValueKind;
use tokio::time::sleep;
use tokio::time::Duration;

use super::StoreClient;
use crate::ClientError;

#[derive(Debug, Clone)]
pub struct FileClient {
    path: PathBuf,
    poll: Duration,
}

impl FileClient {
    pub fn new(
        path: impl Into<PathBuf>,
        poll: Duration,
    ) -> Self {
        Self {
            path: path.into(),
            poll,
        }
    }

    fn load_flat(path: &Path) -> Result<HashMap<String, String>, ClientError> {
        let parsed: Map<String, Value> = Config::builder()
            .add_source(File::from(path.to_path_buf()))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ClientError::Request(format!("failed to read {}: {e}", path.display())))?;

        let mut flat = HashMap::new();
        for (key, value) in parsed {
            flatten(&format!("/{key}"), &value.kind, &mut flat);
        }
        Ok(flat)
    }

    fn modified(path: &Path) -> Result<SystemTime, ClientError> {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|e| ClientError::Request(format!("failed to stat {}: {e}", path.display())))
    }
}

fn flatten(
    prefix: &str,
    value: &ValueKind,
    out: &mut HashMap<String, String>,
) {
    match value {
        ValueKind::Table(table) => {
            for (key, value) in table {
                flatten(&format!("{prefix}/{key}"), &value.kind, out);
            }
        }
        ValueKind::Array(items) => {
            for (index, value) in items.iter().enumerate() {
                flatten(&format!("{prefix}/{index}"), &value.kind, out);
            }
        }
        ValueKind::Nil => {}
        ValueKind::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        scalar => {
            out.insert(prefix.to_string(), scalar.to_string());
        }
    }
}

#[async_trait]
impl StoreClient for FileClient {
    async fn get_values(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, String>, ClientError> {
        Ok(Self::load_flat(&self.path)?
            .into_iter()
            .filter(|(k, _)| super::key_matches_any(k, keys))
            .collect())
    }

    async fn watch_prefix(
        &self,
        _prefix: &str,
        _keys: &[String],
    ) -> Result<(), ClientError> {
        let initial = Self::modified(&self.path)?;
        loop {
            sleep(self.poll).await;
            if Self::modified(&self.path)? != initial {
                return Ok(());
            }
        }
    }
}
