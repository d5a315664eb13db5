//! `semvec`: embedding normalization and bulk reprocessing for semantic
//! search indices.

mod app;
mod cli;
mod config;
mod config_handlers;
mod handlers;

use anyhow::Context;
use clap::Parser;

use crate::app::Services;
use crate::cli::{CliArgs, Command};
use crate::config::SemvecConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    app::init_logging(args.verbose, args.quiet);

    let config_path = args.config.as_deref();
    let command = match args.command {
        Command::Config(action) => {
            config_handlers::handle_config_command(config_path, action)?;
            return Ok(());
        }
        command => command,
    };

    let config = SemvecConfig::load(config_path).context("loading configuration")?;
    let services = Services::build(&config)
        .await
        .context("starting semvec services")?;

    match command {
        Command::Serve { host, port } => handlers::serve(&config, &services, host, port).await?,
        Command::Pipeline(action) => handlers::pipeline(&services, action).await?,
        Command::Schema(action) => handlers::schema(&services, action).await?,
        Command::Reprocess(reprocess) => handlers::reprocess(&services, reprocess).await?,
        Command::Jobs(action) => handlers::jobs(&services, action).await?,
        Command::Search(search) => handlers::search(&services, search).await?,
        Command::Config(_) => {}
    }
    Ok(())
}
