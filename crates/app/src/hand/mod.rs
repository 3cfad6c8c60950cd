//! Webcam hand-landmark streaming service.
//!
//! The module is split into focused submodules:
//! - `config`: CLI parsing and fixed service constants.
//! - `data`: shared pose/frame state and the loop stop flag.
//! - `detector`: seam to the external hand-landmark detector.
//! - `pose`: pose summary derivation (wrist position, finger flags).
//! - `annotation`: skeleton overlay, mirroring, JPEG encoding.
//! - `pipeline`: the capture-and-annotate loop.
//! - `server`: Actix Web endpoints.
//! - `telemetry`: tracing and metrics plumbing.

use anyhow::Result;
use tracing::info;

pub use config::HandConfig;

mod annotation;
mod config;
mod data;
mod detector;
mod pipeline;
mod pose;
mod server;
mod telemetry;

/// Wire up telemetry, shared state, and the HTTP server, then block until
/// Ctrl+C.
pub fn run(config: HandConfig) -> Result<()> {
    telemetry::init_tracing(config.verbose);
    let _ = telemetry::init_metrics_recorder();

    let shared = pipeline::PipelineShared::default();
    let server = server::spawn_server(config, shared.clone())?;
    info!(
        "listening on http://{}:{} (/video_feed, /hand_data, /stop_camera)",
        config::BIND_ADDR.0,
        config::BIND_ADDR.1
    );

    let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
    let control = shared.control.clone();
    ctrlc::set_handler(move || {
        control.request_stop();
        let _ = stop_tx.send(());
    })?;

    let _ = stop_rx.recv();
    info!("shutting down");
    server.stop();
    Ok(())
}
