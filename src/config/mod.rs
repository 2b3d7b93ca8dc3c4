//! Application configuration.
//!
//! Hierarchical loading with the usual precedence:
//! 1. Hard-coded defaults
//! 2. A configuration file (explicit path argument, or `CONFIG_PATH`)
//! 3. Environment variables with a `CONSYNC__` prefix (highest priority)

mod resource;

pub use resource::BackendSettings;
pub use resource::ExecSettings;
pub use resource::ResourceConfig;
pub use resource::SourceSettings;
pub use resource::TemplateSettings;

#[cfg(test)]
mod resource_test;

use std::env;
use std::path::PathBuf;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Logging destination and verbosity.
    #[serde(default)]
    pub log: LogSettings,

    /// The monitored resources.
    #[serde(default, rename = "resource")]
    pub resources: Vec<ResourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// Default tracing filter, overridable via `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file directory; logs go to stdout when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

impl AppConfig {
    /// Loads the merged configuration. `path` wins over the
    /// `CONFIG_PATH` environment variable; environment overrides win
    /// over both.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        } else if let Ok(path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&path));
        }

        builder = builder.add_source(
            Environment::with_prefix("CONSYNC")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every resource. Configuration errors are fatal; a
    /// resource with an invalid definition never starts.
    pub fn validate(&self) -> Result<()> {
        for resource in &self.resources {
            resource.validate()?;
        }
        Ok(())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
