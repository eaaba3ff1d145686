use anyhow::Result;
use clap::Args;
use std::time::Duration;
use tracing::{error, info};

use shepherd_core::collect::{CollectorSettings, collect_and_schedule};
use shepherd_core::config::{Credentials, Token};
use shepherd_core::error::ErrorCode;

use super::{GlobalArgs, open_queue};
use crate::clients::Clients;

/// Arguments for `shepherd collect`.
#[derive(Args, Debug)]
pub struct CollectArgs {
    /// Collect once and exit.
    #[arg(long)]
    pub once: bool,

    /// Seconds between collection passes.
    #[arg(long, default_value_t = 1200)]
    pub repeat_delay: u64,
}

/// Tokens the collector calls out with.
pub const NEEDED_TOKENS: &[Token] = &[Token::IssueTracker, Token::AdvisoryTracker];

/// Queue every issue and advisory in flight that is not queued yet.
///
/// # Errors
///
/// Returns an error if credentials are missing, the queue cannot be opened,
/// or a single pass (`--once`) fails.
pub fn run_collect(args: &CollectArgs, global: &GlobalArgs) -> Result<()> {
    let config = global.load_config()?;
    let clients = Clients::connect(&config, &Credentials::from_env(), NEEDED_TOKENS, global.dry_run)?;
    let queue = open_queue(&config)?;
    let settings = CollectorSettings {
        query: config.issues.collector_query.clone(),
        attention_project: config.issues.attention_project.clone(),
    };

    if args.once {
        let fresh = collect_and_schedule(&queue, clients.services(), &settings)?;
        println!("Scheduled {} new work items", fresh.len());
        return Ok(());
    }

    let delay = Duration::from_secs(args.repeat_delay);
    loop {
        if let Err(err) = collect_and_schedule(&queue, clients.services(), &settings) {
            let code = ErrorCode::classify(&err);
            let detail = format!("{err:#}");
            error!(code = code.code(), error = %detail, "collection failed");
        }
        info!(seconds = args.repeat_delay, "sleeping until next collection");
        std::thread::sleep(delay);
    }
}
