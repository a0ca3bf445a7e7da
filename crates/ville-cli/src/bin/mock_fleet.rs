//! `ville-mock-fleet` – simulated robots answering gateway movement
//! commands with environment reports.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use ville_cli::config::{self, DEFAULT_CONFIG_FILE};
use ville_cli::{shutdown_signal, telemetry};
use ville_middleware::mock_fleet::{self, MockFleet};
use ville_middleware::{DeliverySource, MqttSettings, Transport, mqtt};

/// Simulated field agents for the Ville gateway
#[derive(Parser)]
#[command(name = "ville-mock-fleet")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the gateway configuration file (broker and topics)
    #[arg(short, long, env = "VILLE_CONFIG", value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Field agent id to simulate; repeat for several.  Defaults to every
    /// id in the config's agent table.
    #[arg(long = "agent", value_name = "ID")]
    agents: Vec<String>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, env = "VILLE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _guard = telemetry::init_tracing("ville-mock-fleet", &cli.log_level);

    let cfg = config::load_from(&cli.config)?;
    let ids = if cli.agents.is_empty() {
        cfg.agents.values().cloned().collect()
    } else {
        cli.agents
    };

    let settings = MqttSettings {
        client_id: "ville-mock-fleet".to_string(),
        ..cfg.mqtt_settings()
    };
    let runtime = tokio::runtime::Runtime::new().context("starting Tokio runtime")?;
    runtime.block_on(async move {
        let (transport, mut deliveries) = mqtt::connect(&settings)
            .await
            .with_context(|| format!("connecting to {}:{}", settings.host, settings.port))?;

        let fleet = mock_fleet::run(
            MockFleet::new(ids),
            &mut deliveries,
            &transport,
            &cfg.topics.field_command,
            &cfg.topics.field_environment,
            shutdown_signal(),
        )
        .await?;
        info!(agents = fleet.len(), "mock fleet stopped");

        if let Err(e) = transport.disconnect().await {
            warn!(error = %e, "disconnect failed");
        }
        let _ = tokio::time::timeout(Duration::from_secs(2), async {
            while deliveries.next_delivery().await.is_some() {}
        })
        .await;
        Ok::<(), anyhow::Error>(())
    })
}
