//! Reachability probing.
//!
//! A probe answers one question: does anything accept connections at this
//! endpoint right now? It is not a protocol handshake and never
//! authenticates. Probes run from one or more origins (the local process,
//! or remote agents reached over HTTP) and the orchestrator aggregates the
//! per-origin results into a single consensus outcome.

mod agent;
mod local;

pub use agent::{agent_router, AgentOrigin, ProbeRequest, ProbeResponse};
pub use local::LocalOrigin;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::OriginCfg;

/// Transport descriptor for one endpoint, as recovered by the light-parser.
#[derive(Debug, Clone, Default)]
pub struct Node {
    pub id: String,
    pub raw: String,
    pub proto: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub tls: bool,
    pub sni: String,
}

/// Outcome of a single probe. Failures are encoded here, never raised.
#[derive(Debug, Clone, Default)]
pub struct ProbeResult {
    pub success: bool,
    pub latency: Duration,
    pub method: String,
    pub err: String,
}

impl ProbeResult {
    pub fn failed(err: impl Into<String>) -> Self {
        Self {
            success: false,
            err: err.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProbeOptions {
    pub timeout: Duration,
}

/// A vantage point that can execute probes.
#[async_trait]
pub trait Origin: Send + Sync {
    fn name(&self) -> &str;
    async fn probe_node(&self, node: &Node, opt: ProbeOptions) -> ProbeResult;
}

/// Instantiates origins from config. Unknown types and agent entries without
/// a URL are skipped.
pub fn build_origins(cfgs: &[OriginCfg]) -> Result<Vec<Box<dyn Origin>>> {
    let mut origins: Vec<Box<dyn Origin>> = Vec::new();
    for o in cfgs {
        match o.kind.as_str() {
            "local" => origins.push(Box::new(LocalOrigin::new()?)),
            "agent" if !o.url.is_empty() => {
                origins.push(Box::new(AgentOrigin::new(&o.name, &o.url, &o.token)?))
            }
            other => {
                log::warn!("origin_skipped name={} type={}", o.name, other);
            }
        }
    }
    Ok(origins)
}
