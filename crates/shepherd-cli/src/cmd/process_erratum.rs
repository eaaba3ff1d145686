use anyhow::Result;
use clap::Args;

use shepherd_core::config::{Credentials, Token};
use shepherd_core::dispatch::process_item;
use shepherd_core::error::{CodedError, ErrorCode};
use shepherd_core::model::WorkItem;
use shepherd_core::model::advisory::advisory_id_from_arg;

use super::GlobalArgs;
use crate::clients::Clients;

/// Arguments for `shepherd process-erratum`.
#[derive(Args, Debug)]
pub struct ProcessErratumArgs {
    /// Advisory id or advisory URL.
    pub erratum: String,
}

/// Run one advisory step directly, bypassing the queue.
///
/// # Errors
///
/// Returns an error if the argument holds no advisory id, credentials are
/// missing, or the step fails.
pub fn run_process_erratum(args: &ProcessErratumArgs, global: &GlobalArgs) -> Result<()> {
    let Some(id) = advisory_id_from_arg(&args.erratum) else {
        return Err(CodedError::new(
            ErrorCode::InvalidWorkItem,
            format!("'{}' is not an advisory id or URL", args.erratum),
        )
        .into());
    };
    let item = WorkItem::erratum(id);

    let config = global.load_config()?;
    let clients = Clients::connect(&config, &Credentials::from_env(), &Token::ALL, global.dry_run)?;
    let settings = config.handler_settings(global.ignore_needs_attention)?;

    let result = process_item(clients.services(), &settings, &item)?;
    println!("{item}: {result}");
    Ok(())
}
