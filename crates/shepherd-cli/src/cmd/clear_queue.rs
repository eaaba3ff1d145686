use anyhow::Result;
use tracing::info;

use super::{GlobalArgs, open_queue};

/// Drop every queued item. Needs no credentials.
///
/// # Errors
///
/// Returns an error if the queue cannot be opened or cleared.
pub fn run_clear_queue(global: &GlobalArgs) -> Result<()> {
    let config = global.load_config()?;
    let queue = open_queue(&config)?;
    let removed = queue.remove_all_work_items()?;
    info!(removed, "queue cleared");
    println!("Removed {removed} work items");
    Ok(())
}
