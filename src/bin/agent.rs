//! Remote probe agent.
//!
//! Deploy this at another vantage point and list it as an `agent` origin in
//! the manager's config. It exposes one endpoint, `POST /probe`, running the
//! same local probe ladder the manager uses.

use std::process::ExitCode;

use clap::Parser;
use log::{error, info};
use tokio::net::TcpListener;

use v2mgr::logging;
use v2mgr::probe::agent_router;

#[derive(Debug, Parser)]
#[command(name = "v2mgr-agent", version, about = "Remote probe agent for v2mgr")]
struct AgentCli {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:8081")]
    listen: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = AgentCli::parse();
    let _ = logging::init(log::LevelFilter::Info);
    let _ = rustls::crypto::ring::default_provider().install_default();

    let listener = match TcpListener::bind(&cli.listen).await {
        Ok(l) => l,
        Err(e) => {
            error!("agent_bind addr={} err={e}", cli.listen);
            return ExitCode::from(2);
        }
    };
    info!("agent_listen addr={}", cli.listen);
    if let Err(e) = axum::serve(listener, agent_router()).await {
        error!("agent_serve err={e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
