//! CP02 control/aggregation CLI
//!
//! Connects to a CP02-series fast-charging station over BLE, or fronts a
//! fleet of remote gateways over MQTT, and exposes both behind the same
//! JSON action dispatcher and client-facing HTTP/WS interface.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::RwLock;
use tracing::info;

mod cli;
use cli::{Cli, Commands};

use cp02::config::Config;
use cp02::dispatcher;
use cp02::state::{AppState, DeviceHandle};
use cp02_aggregator::{BusAdapter, BusConfig, GatewayRegistry, HistoryStore};
use cp02_transport::supervisor::SupervisorConfig;
use cp02_transport::token_store::TokenStore;
use cp02_transport::Supervisor;

fn init_tracing(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter.to_string()))
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let path = cli.config.clone().unwrap_or_else(Config::default_path);
    Config::load(&path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Adapter { address: None }) => {
            let config = load_config(&cli)?;
            init_tracing(&config.log_filter);
            run_adapter(config, None).await
        }
        Some(Commands::Adapter { address }) => {
            let config = load_config(&cli)?;
            init_tracing(&config.log_filter);
            run_adapter(config, address).await
        }
        Some(Commands::Aggregator) => {
            let config = load_config(&cli)?;
            init_tracing(&config.log_filter);
            run_aggregator(config).await
        }
        Some(Commands::Actions) => {
            for action in dispatcher::list_actions() {
                println!("{action}");
            }
            Ok(())
        }
        Some(Commands::Call { action, params }) => {
            let config = load_config(&cli)?;
            init_tracing(&config.log_filter);
            run_call(config, &action, &params).await
        }
        Some(Commands::InitConfig) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            Config::default().save(&path)?;
            println!("wrote default config to {}", path.display());
            Ok(())
        }
    }
}

/// Scans for and connects to a station, starts the client interface, and
/// serves until interrupted.
async fn run_adapter(config: Config, address: Option<String>) -> anyhow::Result<()> {
    let token_store = Arc::new(tokio::sync::Mutex::new(TokenStore::open(&config.token_storage_path)?));
    let supervisor = Arc::new(
        Supervisor::new(
            SupervisorConfig {
                max_reconnect_attempts: config.reconnect_max_attempts,
                backoff_base: Duration::from_millis(config.reconnect_backoff_base_ms),
                backoff_max: Duration::from_millis(config.reconnect_backoff_max_ms),
                token_refresh_interval: Duration::from_secs(config.token_refresh_interval),
            },
            token_store,
        )
        .await?,
    );

    let address = match address {
        Some(address) => address,
        None => {
            info!("scanning for a station to connect to");
            let found = supervisor.scan(Duration::from_secs(5)).await?;
            found
                .into_iter()
                .next()
                .ok_or_else(|| anyhow::anyhow!("no CP02 station found while scanning"))?
                .address
        }
    };

    info!(%address, "connecting");
    let (session, token_manager) = supervisor.connect(&address).await?;
    let history = Arc::new(HistoryStore::open(&config.history_db_path.to_string_lossy()).await?);

    let state = Arc::new(AppState {
        config: config.clone(),
        supervisor: Some(supervisor),
        device: RwLock::new(Some(DeviceHandle { session, token_manager })),
        registry: None,
        history: Some(history),
        bus: None,
    });

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    cp02::server::serve(state, addr).await
}

/// Runs with no local BLE session, fronting remote gateways reporting over
/// MQTT and serving the same client interface against the aggregated view.
async fn run_aggregator(config: Config) -> anyhow::Result<()> {
    let registry = Arc::new(GatewayRegistry::new(Duration::from_secs(config.gateway_timeout_seconds)));
    let history = Arc::new(HistoryStore::open(&config.history_db_path.to_string_lossy()).await?);
    let bus = BusAdapter::connect(
        BusConfig {
            host: config.mqtt_host.clone(),
            port: config.mqtt_port,
            username: config.mqtt_user.clone(),
            password: config.mqtt_password.clone(),
            topic_prefix: config.mqtt_topic_prefix.clone(),
            keepalive: Duration::from_secs(config.mqtt_keepalive),
            command_timeout: Duration::from_secs(10),
            reconnect_backoff: Duration::from_millis(config.bus_reconnect_backoff_ms),
        },
        registry.clone(),
    )
    .await?;

    let state = Arc::new(AppState {
        config: config.clone(),
        supervisor: None,
        device: RwLock::new(None),
        registry: Some(registry),
        history: Some(history),
        bus: Some(bus),
    });

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    cp02::server::serve(state, addr).await
}

/// One-shot local call, used for scripting against an already-persisted
/// connection's token; mostly useful for smoke-testing the dispatcher.
async fn run_call(config: Config, action: &str, params: &str) -> anyhow::Result<()> {
    let params: serde_json::Value = serde_json::from_str(params)?;
    let token_store = Arc::new(tokio::sync::Mutex::new(TokenStore::open(&config.token_storage_path)?));
    let supervisor = Supervisor::new(SupervisorConfig::default(), token_store).await?;
    let found = supervisor
        .scan(Duration::from_secs(5))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("no CP02 station found while scanning"))?;
    let (session, token_manager) = supervisor.connect(&found.address).await?;

    let state = AppState {
        config,
        supervisor: None,
        device: RwLock::new(Some(DeviceHandle { session, token_manager })),
        registry: None,
        history: None,
        bus: None,
    };

    let result = dispatcher::dispatch(&state, action, params).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
