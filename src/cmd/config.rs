use std::io::{self, Write};

use clap::{Args, Subcommand};

use crate::config::{StoredConfig, config_file_path};
use crate::error::{AppError, AppResult};
use crate::poller::DEFAULT_POLL_INTERVAL;

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    /// Run the interactive configuration wizard.
    Init,
    /// Show the stored configuration (secrets masked).
    Show,
}

pub fn run(command: ConfigCommand) -> AppResult<()> {
    match command {
        ConfigCommand::Init => run_init(),
        ConfigCommand::Show => run_show(),
    }
}

fn run_init() -> AppResult<()> {
    let mut cfg = StoredConfig::load()?;

    println!("Configuring ticketwatch.");
    println!("Press Enter to keep the current value, '-' to clear it.");
    println!("Secrets are stored in the local config file; protect your filesystem accordingly.");
    println!();

    apply_prompt(
        "Ticket API base URL (e.g., http://localhost:5000)",
        &mut cfg.api_base_url,
        false,
    )?;
    apply_prompt("API user (leave empty for bearer tokens)", &mut cfg.api_user, false)?;
    apply_prompt("API token", &mut cfg.api_token, true)?;

    let mut interval = cfg.poll_interval_ms.map(|ms| ms.to_string());
    apply_prompt("Poll interval in milliseconds", &mut interval, false)?;
    cfg.poll_interval_ms = match interval {
        Some(raw) => Some(parse_interval(&raw)?),
        None => None,
    };

    cfg.save()?;

    let path = config_file_path()?;
    println!("\nConfiguration saved to {}", path.display());
    Ok(())
}

fn run_show() -> AppResult<()> {
    let cfg = StoredConfig::load()?;
    let path = config_file_path()?;

    println!("Configuration file: {}", path.display());
    println!("API base URL: {}", display_value(&cfg.api_base_url));
    println!("API user: {}", display_value(&cfg.api_user));
    println!("API token: {}", mask_secret(&cfg.api_token));
    println!(
        "Poll interval: {}",
        cfg.poll_interval_ms
            .map(|ms| format!("{ms} ms"))
            .unwrap_or_else(|| format!("<default {} ms>", DEFAULT_POLL_INTERVAL.as_millis()))
    );

    Ok(())
}

fn parse_interval(raw: &str) -> AppResult<u64> {
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(AppError::Configuration(format!(
            "poll interval must be a positive number of milliseconds, got '{raw}'"
        ))),
        Ok(ms) => Ok(ms),
    }
}

fn apply_prompt(field: &str, target: &mut Option<String>, secret: bool) -> AppResult<()> {
    match prompt(field, target.as_deref(), secret)? {
        PromptAction::Keep => {}
        PromptAction::Clear => *target = None,
        PromptAction::Set(value) => *target = Some(value),
    }
    Ok(())
}

fn prompt(field: &str, current: Option<&str>, secret: bool) -> AppResult<PromptAction> {
    let mut stdout = io::stdout();

    match (current, secret) {
        (Some(_), true) => write!(stdout, "{field} [****] (Enter to keep, '-' to clear): ")?,
        (Some(value), false) => {
            write!(stdout, "{field} [{value}] (Enter to keep, '-' to clear): ")?
        }
        (None, _) => write!(stdout, "{field} (Enter to skip): ")?,
    }
    stdout.flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let trimmed = input.trim();

    if trimmed.is_empty() {
        Ok(PromptAction::Keep)
    } else if trimmed == "-" {
        Ok(PromptAction::Clear)
    } else {
        Ok(PromptAction::Set(trimmed.to_string()))
    }
}

fn display_value(value: &Option<String>) -> String {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "<not set>".to_string())
}

fn mask_secret(value: &Option<String>) -> String {
    match value {
        Some(token) if token.chars().count() > 6 => {
            let prefix = token.chars().take(3).collect::<String>();
            let mut suffix = token.chars().rev().take(3).collect::<Vec<_>>();
            suffix.reverse();
            format!("{prefix}***{}", suffix.into_iter().collect::<String>())
        }
        Some(token) if !token.is_empty() => "***".to_string(),
        _ => "<not set>".to_string(),
    }
}

enum PromptAction {
    Keep,
    Clear,
    Set(String),
}
