//! `ville-gateway` – bridges the Ville simulation backend and its field
//! agents over MQTT.
//!
//! # Commands
//!
//! - `ville-gateway [run] [--no-broker]` – start the broker (unless disabled),
//!   run the gateway until Ctrl-C / SIGTERM, then shut everything down.
//! - `ville-gateway config check|show|init` – configuration management.
//! - `ville-gateway schema <kind>` – print the JSON Schema of a payload.
//! - `ville-gateway transform <x> <y> [--inverse]` – convert one point.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use colored::Colorize;
use ville_cli::config::{self, Config, DEFAULT_CONFIG_FILE};
use ville_cli::service::Gateway;
use ville_cli::{shutdown_signal, telemetry};
use ville_types::{Point2D, SchemaKind};

/// Ville MQTT gateway
#[derive(Parser)]
#[command(name = "ville-gateway")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "VILLE_CONFIG",
        value_name = "FILE",
        default_value = DEFAULT_CONFIG_FILE
    )]
    config: PathBuf,

    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, env = "VILLE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway (default)
    Run {
        /// Connect to an already running broker instead of launching one
        #[arg(long)]
        no_broker: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Print the JSON Schema of a message kind
    Schema {
        /// backend-movement, field-command, field-environment or
        /// backend-environment
        kind: SchemaKind,
    },

    /// Convert a simulation point to the field frame (or back)
    #[command(allow_negative_numbers = true)]
    Transform {
        x: f64,
        y: f64,
        /// Convert a field point back to the simulation frame
        #[arg(long)]
        inverse: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Validate the configuration without starting anything
    Check,
    /// Print the effective configuration as TOML
    Show,
    /// Write the default configuration to the config path
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let _guard = telemetry::init_tracing("ville-gateway", &cli.log_level);

    match cli.command.unwrap_or(Commands::Run { no_broker: false }) {
        Commands::Run { no_broker } => {
            let cfg = config::load_from(&cli.config)?;
            let runtime = tokio::runtime::Runtime::new().context("starting Tokio runtime")?;
            runtime.block_on(run(cfg, no_broker))
        }
        Commands::Config { command } => handle_config(command, &cli.config),
        Commands::Schema { kind } => {
            let schema = serde_json::to_string_pretty(&kind.json_schema())?;
            println!("{schema}");
            Ok(())
        }
        Commands::Transform { x, y, inverse } => {
            let cfg = config::load_from(&cli.config)?;
            let transform = cfg.build_transform()?;
            let input = Point2D::new(x, y);
            let (output, direction) = if inverse {
                (transform.invert(input), "field → simulation")
            } else {
                (transform.convert(input), "simulation → field")
            };
            println!(
                "  {} ({:.3}, {:.3}) → ({:.3}, {:.3})  rounded {}",
                direction.dimmed(),
                input.x,
                input.y,
                output.x,
                output.y,
                output.round_to_grid().to_string().bold()
            );
            Ok(())
        }
    }
}

async fn run(cfg: Config, no_broker: bool) -> Result<()> {
    let manage = cfg.broker.manage && !no_broker;
    let gateway = Gateway::new(cfg, manage);
    let stats = gateway.run(shutdown_signal()).await?;
    println!(
        "  {} handled {} message(s), rejected {}",
        "✓".green().bold(),
        stats.handled,
        stats.rejected
    );
    Ok(())
}

fn handle_config(command: ConfigCommand, path: &Path) -> Result<()> {
    match command {
        ConfigCommand::Check => {
            let cfg = config::load_from(path)?;
            cfg.validate()
                .with_context(|| format!("{} is invalid", path.display()))?;
            println!("  {} {} is valid", "✓".green().bold(), path.display());
            println!("    broker     {}:{}", cfg.broker.host, cfg.broker.port);
            println!("    maze       {}", cfg.gateway.maze);
            println!("    agents     {}", cfg.agents.len());
        }
        ConfigCommand::Show => {
            let cfg = config::load_from(path)?;
            print!("{}", config::to_toml(&cfg)?);
        }
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            config::save_to(&Config::default(), path)?;
            println!("  {} wrote {}", "✓".green().bold(), path.display().to_string().bold());
        }
    }
    Ok(())
}
