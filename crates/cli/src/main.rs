// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 CoSign Client Contributors

// CoSign CLI
// Command-line tool for checking CoSign cookies against the configured daemons

mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use serde_json::json;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cosign_client::{CheckResponse, Client, Error as CosignError};

use config::{CliConfig, EXAMPLE_CONFIG};

/// Exit status for a logged-out user
const EXIT_LOGGED_OUT: u8 = 2;
/// Exit status when no daemon knows the cookie
const EXIT_NOT_FOUND: u8 = 3;

#[derive(Parser)]
#[command(name = "cosign-check")]
#[command(about = "CoSign daemon client", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file (default: $COSIGN_CONFIG or ~/.config/cosign/client.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a cookie against the daemons
    Check {
        /// Cookie value (without the cookie name)
        cookie: String,

        /// The cookie is a service cookie rather than a login cookie
        #[arg(short, long)]
        service_cookie: bool,

        /// Output as JSON for scripting
        #[arg(short, long)]
        json: bool,
    },

    /// Connect to every daemon and report whether the bootstrap succeeds
    Ping,

    /// Show the configuration in use
    Config {
        /// Print an example configuration file instead
        #[arg(long)]
        example: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {:#}", "Error:".red().bold(), err);
            ExitCode::from(exit_status(&err))
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "cosign_client=debug,cosign_cli=debug"
    } else {
        "cosign_client=info,cosign_cli=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Map library errors onto distinct exit statuses
fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<CosignError>() {
        Some(CosignError::LoggedOut) => EXIT_LOGGED_OUT,
        Some(CosignError::NotFound { .. }) => EXIT_NOT_FOUND,
        _ => 1,
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Check {
            cookie,
            service_cookie,
            json,
        } => {
            let config = CliConfig::load(cli.config.as_deref())?;
            check_cookie(&config, &cookie, service_cookie, json).await?;
        }
        Commands::Ping => {
            let config = CliConfig::load(cli.config.as_deref())?;
            ping_daemons(&config).await?;
        }
        Commands::Config { example } => {
            if example {
                print!("{}", EXAMPLE_CONFIG);
            } else {
                show_config(cli.config.as_deref())?;
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn connect(config: &CliConfig) -> Result<Client> {
    let client_config = config
        .cosign
        .build()
        .context("Failed to prepare the TLS configuration")?;

    let client = Client::dial(&client_config).await.map_err(|e| {
        let hint = if e.is_credential_error() {
            " (check cert_file/key_file)"
        } else {
            ""
        };
        anyhow::Error::new(e).context(format!(
            "Unable to connect to the CoSign daemon at {}{}",
            config.cosign.daemon_host, hint
        ))
    })?;

    debug!("Connected to {} daemon(s)", client.daemons().len());
    Ok(client)
}

async fn check_cookie(config: &CliConfig, cookie: &str, service_cookie: bool, json: bool) -> Result<()> {
    let mut client = connect(config).await?;

    let result = client.check(cookie, service_cookie).await;
    if let Err(e) = client.quit().await {
        debug!("QUIT failed: {}", e);
    }

    let response = result?;
    if json {
        let body = json!({
            "status": "success",
            "data": response,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        print_response(&response);
    }

    Ok(())
}

fn print_response(response: &CheckResponse) {
    println!("{}", "✓ Cookie is valid".green().bold());

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Field").add_attribute(Attribute::Bold).fg(Color::Cyan),
        Cell::new("Value").add_attribute(Attribute::Bold).fg(Color::Cyan),
    ]);

    let kind = if response.service_cookie {
        "service"
    } else {
        "login"
    };
    table.add_row(vec!["Principal", response.principal.as_str()]);
    table.add_row(vec!["IP", response.ip.as_str()]);
    table.add_row(vec!["Realm", response.realm.as_str()]);
    table.add_row(vec!["Factors".to_string(), response.factors.join(", ")]);
    table.add_row(vec!["Cookie", kind]);

    println!("{table}");
}

async fn ping_daemons(config: &CliConfig) -> Result<()> {
    let mut client = connect(config).await?;

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Daemon").add_attribute(Attribute::Bold).fg(Color::Cyan),
        Cell::new("State").add_attribute(Attribute::Bold).fg(Color::Cyan),
    ]);
    for daemon in client.daemons() {
        let state = if daemon.ready {
            Cell::new("ready").fg(Color::Green)
        } else {
            Cell::new("closed").fg(Color::Red)
        };
        table.add_row(vec![Cell::new(daemon.address), state]);
    }
    println!("{table}");

    client.quit().await.context("QUIT failed")?;
    println!("{}", "✓ All daemons answered".green().bold());
    Ok(())
}

fn show_config(path: Option<&std::path::Path>) -> Result<()> {
    let config_path = CliConfig::config_path(path)?;
    println!("{} {}", "Config file:".bold(), config_path.display());

    let config = CliConfig::load(path)?;
    let cosign = &config.cosign;
    let port = cosign
        .daemon_port
        .map(|p| p.to_string())
        .unwrap_or_else(|| "default".to_string());
    let show = |p: &Option<PathBuf>| {
        p.as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string())
    };

    println!("  daemon_host: {}", cosign.daemon_host);
    println!("  daemon_port: {}", port);
    println!("  service:     {}", cosign.service);
    println!("  server_name: {}", cosign.effective_server_name());
    println!("  ca_file:     {}", show(&cosign.ca_file));
    println!("  cert_file:   {}", show(&cosign.cert_file));
    println!("  key_file:    {}", show(&cosign.key_file));
    if cosign.insecure {
        println!("  insecure:    {}", "true (server certificate not verified)".yellow());
    } else {
        println!("  insecure:    false");
    }
    Ok(())
}
