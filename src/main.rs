use clap::{Args, Parser, Subcommand};
use mqtt_relay::{
    broker::mqtt::MqttConnector,
    config::{ConfigManager, EnvConfigManager, RelayConfig},
    logger::{LogConfig, init_tracing},
    server::RelayServer,
    session::SessionSettings,
};
use std::{path::PathBuf, sync::Arc};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "mqtt_relay",
    about = "Relays MQTT telemetry to browser clients over WebSocket",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the relay (default)
    Run(RunArgs),

    /// Load the configuration, print it with secrets masked and exit
    CheckConfig(CheckConfigArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// `.env` file to seed the environment from
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Log level or EnvFilter directive (e.g. error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write a daily rolling log file into this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// OpenTelemetry OTLP/HTTP endpoint for logs and metrics (e.g. http://localhost:4318)
    #[arg(long)]
    otel_endpoint: Option<String>,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            env_file: PathBuf::from(".env"),
            log_level: "info".to_string(),
            log_dir: None,
            otel_endpoint: None,
        }
    }
}

#[derive(Args, Debug)]
struct CheckConfigArgs {
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run(args).await,
        Commands::CheckConfig(args) => {
            let config_mgr = ConfigManager(EnvConfigManager::new(Some(args.env_file)));
            let config = RelayConfig::load(&config_mgr).await?;
            println!("{}", config.redacted());
            println!("✅ configuration is valid.");
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let telemetry = init_tracing(&LogConfig::new(args.log_level, args.log_dir, args.otel_endpoint))?;

    let config_mgr = ConfigManager(EnvConfigManager::new(Some(args.env_file)));
    let config = match RelayConfig::load(&config_mgr).await {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {}", e);
            telemetry.shutdown();
            return Err(e.into());
        }
    };
    info!(
        "MQTT relay starting up, broker {}:{}",
        config.broker.host, config.broker.port
    );
    if config.web_password.is_none() {
        info!("WEB_PASSWORD not set, clients connect without credentials");
    }

    let connector = Arc::new(MqttConnector::new(config.broker.clone()));
    let settings = SessionSettings { reconnect_delay: config.reconnect_delay };
    let server = RelayServer::bind(config.listen_addr.as_str(), connector, settings, config.web_password.clone()).await?;
    let shutdown = server.shutdown_handle();
    info!("MQTT relay running on {}; press Ctrl‐C to exit", server.local_addr()?);

    let serving = tokio::spawn(server.serve());

    tokio::signal::ctrl_c().await?;
    info!("MQTT relay shutting down");
    let _ = shutdown.send(());
    if let Err(e) = serving.await {
        error!("relay server task failed: {}", e);
    }

    telemetry.shutdown();
    println!("Goodbye!");
    Ok(())
}
