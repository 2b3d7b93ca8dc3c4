//! # consync
//!
//! Keeps local configuration files continuously synchronized with values
//! from one or more key-value backends and supervises the downstream
//! process consuming them.
//!
//! A [`Resource`] binds a group of backends (with key prefixes and
//! polling or watch semantics) to one or more template/destination pairs
//! and an optional child process. [`Resource::monitor`] pulls and watches
//! key updates, renders templates, atomically swaps destinations on
//! change, optionally validates via a check command, reloads the child,
//! and recovers from transient backend failures.
//!
//! ```no_run
//! use consync::config::AppConfig;
//! use consync::resource::supervise;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> consync::Result<()> {
//!     let config = AppConfig::load(None)?;
//!     let (shutdown_tx, shutdown_rx) = watch::channel(());
//!     let reap_lock = consync::ReapLock::default();
//!     let signals = consync::SignalRegistry::default();
//!
//!     let mut tasks = Vec::new();
//!     for resource in config.resources {
//!         tasks.push(tokio::spawn(supervise(
//!             resource,
//!             reap_lock.clone(),
//!             shutdown_rx.clone(),
//!             signals.clone(),
//!         )));
//!     }
//!     for task in tasks {
//!         let _ = task.await;
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod exec;
pub mod resource;
pub mod store;
pub mod template;

mod constants;
mod errors;

#[doc(hidden)]
pub mod utils;

pub use backend::Backend;
pub use backend::EnvClient;
pub use backend::FileClient;
pub use backend::StoreClient;
pub use config::AppConfig;
pub use errors::*;
pub use exec::ExecState;
pub use exec::Executor;
pub use resource::supervise;
pub use resource::Resource;
pub use resource::SignalRegistry;
pub use store::KvPair;
pub use store::Store;
pub use template::ReapLock;
pub use template::Renderer;

//-----------------------------------------------------------
// Test utils
#[cfg(test)]
#[doc(hidden)]
pub mod test_utils;
