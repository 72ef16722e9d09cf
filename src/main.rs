mod cmd;
mod config;
mod context;
mod domain;
mod error;
mod infra;
mod logging;
mod poller;
mod services;
#[cfg(test)]
mod testing;
mod workflow;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::cmd::config::{self as config_cmd, ConfigArgs};
use crate::cmd::ticket::{
    self, ApproveArgs, CreateArgs, DeleteArgs, EditArgs, ListArgs, ShowArgs, WatchArgs,
};
use crate::config::AppConfig;
use crate::context::AppContext;
use crate::error::AppResult;
use crate::infra::http::{ApiAuth, TicketApiClient};

#[derive(Parser)]
#[command(
    name = "ticketwatch",
    author,
    version,
    about = "Browse tickets and follow their status from the terminal"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll a ticket until it leaves the pending states.
    Watch(WatchArgs),
    /// List tickets, optionally filtered by a search string.
    List(ListArgs),
    /// Show a single ticket.
    Show(ShowArgs),
    /// Create a ticket.
    Create(CreateArgs),
    /// Update the description, generated code or test cases of a ticket.
    Edit(EditArgs),
    /// Delete a ticket after confirmation.
    Delete(DeleteArgs),
    /// Approve a ticket.
    Approve(ApproveArgs),
    /// Manage CLI configuration.
    Config(ConfigArgs),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> AppResult<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose)?;

    match cli.command {
        Commands::Config(args) => config_cmd::run(args.command),
        command => {
            let context = build_context()?;
            run_ticket_command(&context, command).await
        }
    }
}

async fn run_ticket_command(context: &AppContext, command: Commands) -> AppResult<()> {
    match command {
        Commands::Watch(args) => ticket::run_watch(context, args).await,
        Commands::List(args) => ticket::run_list(context, args).await,
        Commands::Show(args) => ticket::run_show(context, args).await,
        Commands::Create(args) => ticket::run_create(context, args).await,
        Commands::Edit(args) => ticket::run_edit(context, args).await,
        Commands::Delete(args) => ticket::run_delete(context, args).await,
        Commands::Approve(args) => ticket::run_approve(context, args).await,
        Commands::Config(args) => config_cmd::run(args.command),
    }
}

fn build_context() -> AppResult<AppContext> {
    let config = AppConfig::load()?;

    if config.api_base_url.is_none() {
        eprintln!(
            "Warning: ticket API base URL not configured; run `ticketwatch config init` or set {}.",
            config::ENV_API_URL
        );
    }

    let auth = ApiAuth::from_parts(config.api_user.clone(), config.api_token.clone());
    let backend = Arc::new(TicketApiClient::new(config.api_base_url.clone(), auth)?);
    Ok(AppContext::new(config, backend))
}
