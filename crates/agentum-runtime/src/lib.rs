mod config;
mod hub;
mod lifecycle;
mod registry;
mod runner;
mod supervisor;
mod writer;

pub mod error;

pub use config::{AgentConfig, LimitsConfig, ServiceConfig, resolve_config_dir};
pub use error::{Error, Result};
pub use hub::{EventHub, Subscription};
pub use lifecycle::SessionLifecycle;
pub use registry::Registry;
pub use runner::{RunRequest, Runtime, TaskRunner};
pub use supervisor::{CancelHandle, ExecutionParams, Supervisor};
pub use writer::run_writer;

use std::sync::{Arc, Mutex};

/// Store handle shared between async tasks; all calls go through
/// `tokio::task::spawn_blocking`.
pub type SharedStore = Arc<Mutex<agentum_store::Database>>;

/// Run a synchronous store closure on the blocking pool.
pub(crate) async fn with_store<T, F>(store: &SharedStore, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&agentum_store::Database) -> agentum_store::Result<T> + Send + 'static,
{
    let store = store.clone();
    let result = tokio::task::spawn_blocking(move || {
        let db = store.lock().expect("store mutex poisoned");
        f(&db)
    })
    .await
    .map_err(|e| Error::Internal(format!("Store task aborted: {}", e)))?;
    result.map_err(Error::from)
}
