//! Sensor Window Agent CLI
//!
//! Sliding-window aggregation of MQTT sensor readings.

use clap::{Parser, Subcommand};
use sensor_window_agent::{
    config::{parse_window_secs, Config},
    raw_to_level, Agent, LevelScale, VERSION,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sensor-window")]
#[command(version = VERSION)]
#[command(about = "Sliding-window aggregation of MQTT sensor readings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to the feed and serve window aggregates
    Run {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Show the effective configuration
    Config {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Convert a raw reading to a level
    Level {
        /// Raw sensor value
        #[arg(allow_negative_numbers = true)]
        raw: f64,

        /// Raw value mapped to the lowest level
        #[arg(long, default_value = "120")]
        min: f64,

        /// Raw value mapped to the highest level
        #[arg(long, default_value = "1023")]
        max: f64,
    },
}

/// Command-line overrides, applied after the config file and environment.
#[derive(clap::Args)]
struct Overrides {
    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// MQTT broker host
    #[arg(long)]
    broker: Option<String>,

    /// MQTT broker port
    #[arg(long)]
    port: Option<u16>,

    /// Topic carrying sensor readings
    #[arg(long)]
    topic: Option<String>,

    /// Window length in seconds
    #[arg(long)]
    window: Option<String>,

    /// Reading field to average
    #[arg(long)]
    field: Option<String>,

    /// Address for the query interface
    #[arg(long)]
    http_host: Option<String>,

    /// Port for the query interface
    #[arg(long)]
    http_port: Option<u16>,
}

impl Overrides {
    /// Defaults, then file, then environment, then flags.
    fn resolve(self) -> anyhow::Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        config.apply_env()?;

        if let Some(host) = self.broker {
            config.broker.host = host;
        }
        if let Some(port) = self.port {
            config.broker.port = port;
        }
        if let Some(topic) = self.topic {
            config.broker.topic = topic;
        }
        if let Some(window) = self.window {
            config.window_duration = parse_window_secs(&window)?;
        }
        if let Some(field) = self.field {
            config.field = field;
        }
        if let Some(host) = self.http_host {
            config.server.host = host;
        }
        if let Some(port) = self.http_port {
            config.server.port = port;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { overrides } => overrides.resolve().and_then(cmd_run),
        Commands::Config { overrides } => overrides.resolve().and_then(cmd_config),
        Commands::Level { raw, min, max } => cmd_level(raw, min, max),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn cmd_run(config: Config) -> anyhow::Result<()> {
    println!("Sensor Window Agent v{VERSION}");
    println!();
    println!(
        "  Broker: {}:{} (topic '{}')",
        config.broker.host, config.broker.port, config.broker.topic
    );
    println!("  Window duration: {:?}", config.window_duration);
    println!("  Field: {}", config.field);
    match &config.level {
        Some(scale) => println!("  Level scale: [{}, {}]", scale.min, scale.max),
        None => println!("  Level scale: disabled"),
    }
    println!(
        "  Query interface: http://{}:{}/data",
        config.server.host, config.server.port
    );
    println!();
    println!("Press Ctrl+C to stop.");
    println!();

    let agent = Agent::new(config)?;
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async move {
        let running = agent.start().await?;

        tokio::signal::ctrl_c().await?;
        println!();
        println!("Stopping...");

        let stats = running.stats().clone();
        running.shutdown().await;

        println!();
        println!("{}", stats.summary());
        Ok::<(), anyhow::Error>(())
    })
}

fn cmd_config(config: Config) -> anyhow::Result<()> {
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_level(raw: f64, min: f64, max: f64) -> anyhow::Result<()> {
    let scale = LevelScale::new(min, max)?;
    println!("{}", raw_to_level(raw, scale.min, scale.max));
    Ok(())
}
