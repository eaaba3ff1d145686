pub mod clear_queue;
pub mod collect;
pub mod list_queue;
pub mod process;
pub mod process_erratum;
pub mod process_issue;

use anyhow::Result;
use std::path::PathBuf;
use tracing::debug;

use shepherd_core::config::{SupervisorConfig, load_config};
use shepherd_core::queue::WorkQueue;

/// Flags every command sees.
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    pub dry_run: bool,
    pub ignore_needs_attention: bool,
    pub config: Option<PathBuf>,
}

impl GlobalArgs {
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be read or parsed.
    pub fn load_config(&self) -> Result<SupervisorConfig> {
        load_config(self.config.as_deref())
    }
}

/// Open the queue at the configured path with the configured timing.
///
/// # Errors
///
/// Returns an error if the queue database cannot be opened.
pub fn open_queue(config: &SupervisorConfig) -> Result<WorkQueue> {
    debug!(path = %config.queue.db_path.display(), "opening work queue");
    Ok(WorkQueue::open(&config.queue.db_path)?
        .with_timing(config.queue.retry_delay(), config.queue.poll_interval()))
}
