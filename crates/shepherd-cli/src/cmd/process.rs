use anyhow::Result;
use clap::Args;

use shepherd_core::config::{Credentials, Token};
use shepherd_core::dispatch::{Dispatcher, ERROR_PAUSE};

use super::{GlobalArgs, open_queue};
use crate::clients::Clients;

/// Arguments for `shepherd process`.
#[derive(Args, Debug)]
pub struct ProcessArgs {
    /// Wait for one ready item, process it, and exit.
    #[arg(long)]
    pub once: bool,
}

/// Drain the queue, forever unless `--once`.
///
/// # Errors
///
/// Returns an error if credentials are missing, the queue cannot be opened,
/// or the single item (`--once`) fails.
pub fn run_process(args: &ProcessArgs, global: &GlobalArgs) -> Result<()> {
    let config = global.load_config()?;
    let clients = Clients::connect(&config, &Credentials::from_env(), &Token::ALL, global.dry_run)?;
    let queue = open_queue(&config)?;
    let settings = config.handler_settings(global.ignore_needs_attention)?;
    let dispatcher = Dispatcher::new(&queue, clients.services(), &settings);

    if args.once {
        let (item, result) = dispatcher.process_next()?;
        println!("{item}: {result}");
        return Ok(());
    }
    dispatcher.run_forever(ERROR_PAUSE)
}
