//! Environment variable backend.
//!
//! Translates the process environment into path-style keys: `DB_HOST`
//! becomes `/db/host`. There is no change notification for environment
//! variables, so watching is unsupported; polling still works.

use std::collections::HashMap;

use async_trait::async_trait;

use super::StoreClient;
use crate::ClientError;
use crate::Store;

#[derive(Debug, Default)]
pub struct EnvClient;

impl EnvClient {
    pub fn new() -> Self {
        Self
    }

    fn env_as_paths() -> HashMap<String, String> {
        std::env::vars()
            .map(|(name, value)| {
                let key = Store::normalize(&name.to_lowercase().replace('_', "/"));
                (key, value)
            })
            .collect()
    }
}

#[async_trait]
impl StoreClient for EnvClient {
    async fn get_values(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, String>, ClientError> {
        Ok(Self::env_as_paths()
            .into_iter()
            .filter(|(k, _)| super::key_matches_any(k, keys))
            .collect())
    }

    async fn watch_prefix(
        &self,
        _prefix: &str,
        _keys: &[String],
    ) -> Result<(), ClientError> {
        Err(ClientError::WatchUnsupported)
    }
}
