// src/main.rs - Focus rail controller: hardware, live preview and HTTP control surface
use clap::Parser;
use focus_rail::camera::{FrameHub, SimulatedCamera};
use focus_rail::config::{self, Config};
use focus_rail::{hardware, rail, web};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "focus-rail", about = "Motorized focus rail controller for macro focus bracketing.")]
struct Args {
    /// Configuration file; built-in defaults are used if it does not exist
    #[arg(short, long, default_value = "focus-rail.toml")]
    config: PathBuf,

    /// Listen address, overrides `server.bind`
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt().with_max_level(args.log_level).init();

    tracing::info!("Starting focus rail controller");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = if args.config.exists() {
        tracing::info!("Loading configuration from: {}", args.config.display());
        config::load_config(&args.config)?
    } else {
        tracing::warn!(
            "Configuration file {} not found, using defaults",
            args.config.display()
        );
        let config = Config::default();
        config.validate()?;
        config
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    tracing::info!(
        "Speed limit: {} Hz, acceleration limit: {} steps/s²",
        config.motor.max_speed_hz,
        config.motor.max_acceleration
    );
    tracing::info!("Bursts are written under {}", config.burst.output_dir.display());

    // No partial start-up: without the driver there is nothing to serve.
    let backend = match hardware::connect(&config) {
        Ok(backend) => backend,
        Err(e) => {
            tracing::error!("Failed to initialize hardware: {}", e);
            return Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>);
        }
    };

    let frames = FrameHub::new();
    let focus_rail = rail::FocusRail::from_config(&config, backend, frames.clone());
    let camera = SimulatedCamera::new(
        config.camera.clone(),
        focus_rail.controller().status_handle(),
        frames.clone(),
    )
    .spawn();

    // Set up a channel between the Axum handlers and the motion executor.
    let (rail_tx, executor) = rail::spawn_executor(focus_rail.clone(), 16);
    let app = web::create_router(focus_rail.clone(), rail_tx, frames.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("Web API listening on http://{}", listener.local_addr()?);
    let stopping = focus_rail.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown requested");
            // Halt any motion and end open preview streams so the server can drain.
            stopping.emergency_stop();
            frames.close();
        })
        .await?;

    executor.abort();
    camera.abort();
    focus_rail.controller().shutdown()?;
    tracing::info!("Focus rail stopped");
    Ok(())
}
