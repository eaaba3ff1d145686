use anyhow::Result;
use clap::Args;

use shepherd_core::config::{Credentials, Token};
use shepherd_core::dispatch::process_item;
use shepherd_core::error::{CodedError, ErrorCode};
use shepherd_core::model::WorkItem;
use shepherd_core::model::issue::issue_key_from_arg;

use super::GlobalArgs;
use crate::clients::Clients;

/// Arguments for `shepherd process-issue`.
#[derive(Args, Debug)]
pub struct ProcessIssueArgs {
    /// Issue key or browse URL.
    pub issue: String,
}

/// Run one issue step directly, bypassing the queue.
///
/// # Errors
///
/// Returns an error if the argument is empty, credentials are missing, or
/// the step fails.
pub fn run_process_issue(args: &ProcessIssueArgs, global: &GlobalArgs) -> Result<()> {
    let key = issue_key_from_arg(&args.issue);
    if key.is_empty() {
        return Err(CodedError::new(ErrorCode::InvalidWorkItem, "issue key is empty").into());
    }
    let item = WorkItem::issue(key);

    let config = global.load_config()?;
    let clients = Clients::connect(&config, &Credentials::from_env(), &Token::ALL, global.dry_run)?;
    let settings = config.handler_settings(global.ignore_needs_attention)?;

    let result = process_item(clients.services(), &settings, &item)?;
    println!("{item}: {result}");
    Ok(())
}
