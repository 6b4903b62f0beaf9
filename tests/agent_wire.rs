//! The agent wire contract, exercised end to end: the manager-side
//! AgentOrigin talking to the real agent router.

use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use v2mgr::probe::{agent_router, AgentOrigin, Node, Origin, ProbeOptions};

async fn spawn_agent() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, agent_router()).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_agent_probes_untestable_node_as_safe() {
    let base = spawn_agent().await;
    let origin = AgentOrigin::new("eu", &base, "").unwrap();

    let node = Node {
        id: "n".into(),
        raw: "vmess://opaque".into(),
        proto: "vmess".into(),
        ..Default::default()
    };
    let res = origin
        .probe_node(
            &node,
            ProbeOptions {
                timeout: Duration::from_millis(500),
            },
        )
        .await;

    assert!(res.success);
    assert_eq!(res.method, "agent:untested");
    assert_eq!(res.latency, Duration::ZERO);
    assert_eq!(res.err, "");
}

#[tokio::test]
async fn test_agent_probe_reaches_real_listener() {
    let base = spawn_agent().await;

    // a target for the agent's tcp probe
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = target.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let _ = target.accept().await;
        }
    });

    let origin = AgentOrigin::new("eu", &base, "token123").unwrap();
    let node = Node {
        id: "n".into(),
        host: "127.0.0.1".into(),
        port,
        ..Default::default()
    };
    let res = origin
        .probe_node(
            &node,
            ProbeOptions {
                timeout: Duration::from_secs(2),
            },
        )
        .await;

    assert!(res.success, "err: {}", res.err);
    assert_eq!(res.method, "agent:tcp");
}

#[tokio::test]
async fn test_agent_rejects_malformed_json() {
    let base = spawn_agent().await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/probe"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(resp.text().await.unwrap(), "bad_json");
}

#[tokio::test]
async fn test_agent_response_has_the_contract_fields() {
    let base = spawn_agent().await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/probe"))
        .json(&serde_json::json!({
            "id": "n", "raw": "vmess://x", "proto": "vmess",
            "host": "", "port": 0, "path": "", "tls": false, "sni": "",
            "timeout_ms": 200,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["method"], "untested");
    assert!(body["latency_ms"].is_number());
    assert!(body["err"].is_string());
}
