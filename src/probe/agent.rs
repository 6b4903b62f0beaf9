//! Remote probe agents.
//!
//! An agent is a small HTTP service running at another vantage point. The
//! manager POSTs a node descriptor to `{url}/probe` and the agent runs the
//! same local probe ladder there. [`agent_router`] is that service's handler,
//! served by the `v2mgr-agent` binary and reused directly in tests.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::{LocalOrigin, Node, Origin, ProbeOptions, ProbeResult};

/// Wire request for `POST /probe`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProbeRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub raw: String,
    #[serde(default)]
    pub proto: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub sni: String,
    #[serde(default)]
    pub timeout_ms: u64,
}

/// Wire response from `POST /probe`. Explicit fields, not an untyped bag.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProbeResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub latency_ms: i64,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub err: String,
}

/// A remote vantage point reached over HTTP.
pub struct AgentOrigin {
    label: String,
    url: String,
    token: String,
    client: reqwest::Client,
}

impl AgentOrigin {
    pub fn new(label: &str, url: &str, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            label: label.to_string(),
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }
}

#[async_trait]
impl Origin for AgentOrigin {
    fn name(&self) -> &str {
        &self.label
    }

    async fn probe_node(&self, n: &Node, opt: ProbeOptions) -> ProbeResult {
        let req = ProbeRequest {
            id: n.id.clone(),
            raw: n.raw.clone(),
            proto: n.proto.clone(),
            host: n.host.clone(),
            port: n.port,
            path: n.path.clone(),
            tls: n.tls,
            sni: n.sni.clone(),
            timeout_ms: opt.timeout.as_millis() as u64,
        };
        // the agent enforces the probe deadline itself; allow it 2s of slack
        let mut http_req = self
            .client
            .post(format!("{}/probe", self.url))
            .timeout(opt.timeout + Duration::from_secs(2))
            .json(&req);
        if !self.token.is_empty() {
            http_req = http_req.bearer_auth(&self.token);
        }
        let resp = match http_req.send().await {
            Ok(r) => r,
            Err(e) => return ProbeResult::failed(e.to_string()),
        };
        let status = resp.status().as_u16();
        if status >= 400 {
            return ProbeResult::failed(format!("agent_http_{status}"));
        }
        let body: ProbeResponse = match resp.json().await {
            Ok(b) => b,
            Err(e) => return ProbeResult::failed(e.to_string()),
        };
        ProbeResult {
            success: body.success,
            latency: Duration::from_millis(body.latency_ms.max(0) as u64),
            method: format!("agent:{}", body.method),
            err: body.err,
        }
    }
}

/// Router for the agent service: `POST /probe` running the local ladder.
pub fn agent_router() -> Router {
    Router::new().route("/probe", post(probe_handler))
}

async fn probe_handler(body: String) -> Response {
    let req: ProbeRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(_) => return (StatusCode::BAD_REQUEST, "bad_json").into_response(),
    };
    let origin = match LocalOrigin::new() {
        Ok(o) => o,
        Err(e) => {
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };
    let node = Node {
        id: req.id,
        raw: req.raw,
        proto: req.proto,
        host: req.host,
        port: req.port,
        path: req.path,
        tls: req.tls,
        sni: req.sni,
    };
    let res = origin
        .probe_node(
            &node,
            ProbeOptions {
                timeout: Duration::from_millis(req.timeout_ms),
            },
        )
        .await;
    Json(ProbeResponse {
        success: res.success,
        latency_ms: res.latency.as_millis() as i64,
        method: res.method,
        err: res.err,
    })
    .into_response()
}
