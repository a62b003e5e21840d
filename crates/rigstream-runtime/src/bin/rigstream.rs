//! rigstream headless receiver
//!
//! Usage: `rigstream [config.json]`
//!
//! Listens for a motion-capture peer and retargets its frames onto the
//! bundled rigs held in memory. Set `RIGSTREAM_LOG_FORMAT=json` for JSON
//! log lines and `RUST_LOG` for filtering.

use std::process::ExitCode;

use rigstream_core::{ReceiverConfig, RigError, RigResult};
use rigstream_runtime::telemetry::{init_logging, LogFormat};
use rigstream_runtime::{driver, MemoryHost, Session};

fn load_config() -> RigResult<ReceiverConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| RigError::InvalidConfig(format!("{}: {}", path, e)))?;
            ReceiverConfig::from_json_str(&text)
        }
        None => Ok(ReceiverConfig::default()),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Could not listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn run() -> RigResult<()> {
    let config = load_config()?;
    let mut host = MemoryHost::new();
    let mut session = Session::new(config);

    let port = session.start(&mut host).await?;
    tracing::info!("Peers can connect on port {}", port);

    let result = driver::run(&mut session, &mut host, shutdown_signal()).await;

    match serde_json::to_string(session.stats()) {
        Ok(stats) => tracing::info!("Session stats: {}", stats),
        Err(e) => tracing::debug!("Could not serialize stats: {}", e),
    }
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let format = std::env::var("RIGSTREAM_LOG_FORMAT")
        .map(|name| LogFormat::from_name(&name))
        .unwrap_or_default();
    init_logging(format);

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
