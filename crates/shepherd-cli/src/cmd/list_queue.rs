use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;

use shepherd_core::model::WorkItem;

use super::{GlobalArgs, open_queue};

/// Arguments for `shepherd list-queue`.
#[derive(Args, Debug)]
pub struct ListQueueArgs {
    /// Emit JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct QueuedItem {
    kind: &'static str,
    key: String,
    ready_at: DateTime<Utc>,
}

fn render_table(items: &[(WorkItem, DateTime<Utc>)], now: DateTime<Utc>) -> String {
    let width = items
        .iter()
        .map(|(item, _)| item.to_string().len())
        .max()
        .unwrap_or(0)
        .max("ITEM".len());
    let mut out = format!("{:<width$}  READY AT\n", "ITEM");
    for (item, ready_at) in items {
        let when = ready_at.format("%Y-%m-%d %H:%M:%S UTC");
        let marker = if *ready_at <= now { "  (ready)" } else { "" };
        out.push_str(&format!("{:<width$}  {when}{marker}\n", item.to_string()));
    }
    out
}

/// Show queued items, earliest ready first. Needs no credentials.
///
/// # Errors
///
/// Returns an error if the queue cannot be read.
pub fn run_list_queue(args: &ListQueueArgs, global: &GlobalArgs) -> Result<()> {
    let config = global.load_config()?;
    let items = open_queue(&config)?.list()?;

    if args.json {
        let rows: Vec<QueuedItem> = items
            .iter()
            .map(|(item, ready_at)| QueuedItem {
                kind: item.kind.as_str(),
                key: item.key.clone(),
                ready_at: *ready_at,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if items.is_empty() {
        println!("Work queue is empty");
    } else {
        print!("{}", render_table(&items, Utc::now()));
    }
    Ok(())
}
