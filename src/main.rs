//! LED matrix engine server.
//!
//! ## Architecture
//! - **Matrix worker** (std::thread): owns the `MatrixController`, runs
//!   mode transitions, policy re-evaluation and capture restarts
//! - **Frame producers**: the controller's timer thread and the audio
//!   capture callback
//! - **HTTP server** (tokio/axum): settings surface; sends commands to the
//!   worker via channel
//!
//! ## Usage
//! ```sh
//! anime-matrix-rs --config matrix.json --media-dir ./media --simulate
//! ```

use anime_matrix_rs::PanelConfig;
use anime_matrix_rs::audio;
use anime_matrix_rs::config::{ConfigStore, JsonConfigStore};
use anime_matrix_rs::controller::{ControlCommand, MatrixController, control_loop};
use anime_matrix_rs::device::{SharedDevice, SimulatedDevice};
use anime_matrix_rs::power::{PowerSource, SysfsPowerSource};
use anime_matrix_rs::server::{self, AppState};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

/// LED matrix engine: modes, pictures, clock and audio spectrum
#[derive(Parser)]
#[command(name = "anime-matrix-rs")]
#[command(about = "Control and rendering engine for an LED matrix panel")]
#[command(version)]
struct Args {
    /// Settings file (JSON); created on first write
    #[arg(long, default_value = "matrix.json")]
    config: PathBuf,

    /// Directory pictures are served from
    #[arg(long, default_value = ".")]
    media_dir: PathBuf,

    /// Port to listen on
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Number of rows on the LED panel
    #[arg(long, default_value = "64")]
    rows: u32,

    /// Number of columns on the LED panel
    #[arg(long, default_value = "64")]
    cols: u32,

    /// Path to BDF font directory (clock face)
    #[arg(long, default_value = "fonts/bdf")]
    fonts_dir: PathBuf,

    /// Drive an in-memory panel instead of hardware
    #[arg(long)]
    simulate: bool,

    /// Where power supplies are listed
    #[arg(long, default_value = "/sys/class/power_supply")]
    power_supply_dir: PathBuf,
}

#[cfg(feature = "hardware")]
fn open_hardware(panel: PanelConfig, fonts_dir: PathBuf) -> Option<SharedDevice> {
    use anime_matrix_rs::hardware::RpiMatrixDevice;

    match RpiMatrixDevice::open(panel, fonts_dir) {
        Ok(device) => Some(Arc::new(Mutex::new(device))),
        Err(e) => {
            tracing::error!("Failed to initialize LED matrix: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "hardware"))]
fn open_hardware(_panel: PanelConfig, _fonts_dir: PathBuf) -> Option<SharedDevice> {
    tracing::warn!("Built without the 'hardware' feature; pass --simulate for a virtual panel");
    None
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_ansi(false) // Disable ANSI color codes for systemd/journald
        .compact()
        .init();

    let args = Args::parse();
    let panel = PanelConfig::new(args.rows, args.cols);

    let media_dir = args.media_dir.canonicalize().unwrap_or_else(|_| {
        tracing::warn!("Could not canonicalize media dir, using as-is");
        args.media_dir.clone()
    });

    tracing::info!("LED Matrix engine v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Panel: {}x{}", panel.cols, panel.rows);
    tracing::info!("Settings: {}", args.config.display());
    tracing::info!("Media dir: {}", media_dir.display());
    tracing::info!("Port: {}", args.port);

    let config: Arc<dyn ConfigStore> = Arc::new(JsonConfigStore::open(&args.config)?);
    let power: Arc<dyn PowerSource> = Arc::new(SysfsPowerSource::new(&args.power_supply_dir));

    let device: Option<SharedDevice> = if args.simulate {
        tracing::info!("Using simulated panel");
        Some(Arc::new(Mutex::new(SimulatedDevice::new(panel))))
    } else {
        open_hardware(panel, args.fonts_dir.clone())
    };

    // Worker channel: HTTP handlers and the endpoint watcher send, the
    // worker thread receives.
    let (tx, rx) = mpsc::channel();
    let controller = MatrixController::new(
        device,
        Arc::clone(&config),
        power,
        audio::default_backend(),
        tx.clone(),
    );
    let status = controller.status();

    let worker = std::thread::Builder::new()
        .name("matrix-worker".into())
        .spawn(move || control_loop(rx, controller))?;

    tx.send(ControlCommand::Apply { wake: true })?;

    let app = server::create_router(AppState {
        command_tx: tx.clone(),
        status,
        config,
        media_dir,
    });

    let addr = format!("0.0.0.0:{}", args.port);
    tracing::info!("Listening on http://{}", addr);
    tracing::info!("API Documentation: http://localhost:{}/docs", args.port);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = tx.send(ControlCommand::Shutdown);
    if worker.join().is_err() {
        tracing::error!("Matrix worker panicked");
    }
    Ok(())
}
