//! Barista Machine Runtime
//!
//! Connects one appliance to the vendor cloud and logs machine events
//! as they arrive on the telemetry channel.

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};

use barista_core::config::{default_identity_path, load_config};
use barista_crypto::InstallationKey;
use barista_machine::MachineController;

#[derive(Parser, Debug)]
#[command(name = "barista-machine")]
#[command(version, about = "Barista machine runtime - vendor cloud session layer")]
struct Args {
    /// Path to a JSON settings file
    #[arg(long, env = "BARISTA_SETTINGS")]
    settings: Option<PathBuf>,

    /// Vendor cloud host for REST and WebSocket endpoints
    #[arg(long, env = "BARISTA_CLOUD_HOST")]
    host: Option<String>,

    /// Account username (email)
    #[arg(long, env = "BARISTA_USERNAME")]
    username: Option<String>,

    /// Account password
    #[arg(long, env = "BARISTA_PASSWORD")]
    password: Option<String>,

    /// Machine serial number
    #[arg(long, env = "BARISTA_SERIAL_NUMBER")]
    serial: Option<String>,

    /// Path to the installation identity record
    #[arg(long, env = "BARISTA_IDENTITY_PATH")]
    identity_path: Option<PathBuf>,

    /// Scheduler tick interval in milliseconds
    #[arg(long, default_value_t = 250, env = "BARISTA_TICK_MS")]
    tick_ms: u64,

    /// Log level filter (e.g. "info", "debug", "warn")
    #[arg(long, default_value = "info", env = "BARISTA_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation)
    #[arg(long, env = "BARISTA_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.settings.as_deref())?;
    if let Some(host) = args.host {
        config.cloud.host = host;
    }
    if let Some(username) = args.username {
        config.cloud.username = username;
    }
    if let Some(password) = args.password {
        config.cloud.password = password;
    }
    if let Some(serial) = args.serial {
        config.machine.serial_number = serial;
    }
    if let Some(path) = args.identity_path {
        config.machine.identity_path = Some(path);
    }

    let log_filter = format!(
        "barista_machine={level},barista_core={level},barista_crypto={level}",
        level = args.log_level
    );
    barista_core::tracing_init::init_tracing(&log_filter, args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.cloud.host,
        serial_number = %config.machine.serial_number,
        "Starting barista-machine"
    );

    if config.cloud.username.is_empty() || config.cloud.password.is_empty() {
        anyhow::bail!("Cloud credentials missing: set --username/--password or BARISTA_USERNAME/BARISTA_PASSWORD");
    }
    if config.machine.serial_number.is_empty() {
        anyhow::bail!("Machine serial number missing: set --serial or BARISTA_SERIAL_NUMBER");
    }

    let identity_path = config
        .machine
        .identity_path
        .clone()
        .or_else(default_identity_path)
        .ok_or_else(|| anyhow::anyhow!("Cannot determine identity path"))?;
    let identity = InstallationKey::load_or_generate(&identity_path)?;
    info!(
        installation_id = %identity.installation_id(),
        path = %identity_path.display(),
        "Installation identity ready"
    );

    let (mut controller, mut events) = MachineController::new(&config, identity);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(?event, "Machine event");
        }
    });

    if let Err(e) = controller.connect_websocket().await {
        warn!(error = %e, "Initial WebSocket connect failed, will retry");
    }

    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(args.tick_ms));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                controller.tick().await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C shutdown signal");
                controller.disconnect_websocket().await;
                info!("Runtime stopped");
                return Ok(());
            }
        }
    }
}
