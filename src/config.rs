//! YAML configuration.
//!
//! Every section is optional in the file; [`Config::load`] fills the
//! operational defaults so the rest of the crate never re-checks them.
//! Validation is separate from loading; `config-test` runs both without
//! touching storage.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServiceCfg {
    pub http_listen: String,
    pub metrics_path: String,
    pub healthz_path: String,
    pub dry_run: bool,
    pub log_level: String,
    pub data_dir: String,
    pub snapshots_dir: String,
    pub max_deletions_per_day: u32,
    pub concurrency: i64,
    pub reprobe_schedule_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SubscriptionsCfg {
    pub sources: Vec<String>,
    pub fetch_interval_seconds: u64,
    pub per_source_limit: usize,
    pub merged_limit: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProbeCfg {
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OriginCfg {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub token: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DecisionCfg {
    pub min_attempts_for_decision: u64,
    pub decision_confidence_z: f64,
    pub quarantine_consecutive_failures: u64,
    pub delete_lower_bound_threshold: f64,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityCfg {
    pub allow_delete: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ApiCfg {
    pub rate_limit_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub service: ServiceCfg,
    pub subscriptions: SubscriptionsCfg,
    pub probe: ProbeCfg,
    pub origins: Vec<OriginCfg>,
    pub decision: DecisionCfg,
    pub security: SecurityCfg,
    pub api: ApiCfg,
}

impl Config {
    /// Reads and parses the YAML file, then applies operational defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let mut cfg: Config = serde_yaml::from_str(&body)
            .with_context(|| format!("parse config {}", path.display()))?;
        cfg.apply_defaults();
        Ok(cfg)
    }

    /// Fills operational defaults for anything the file left unset. `load`
    /// calls this; programmatic construction should too.
    pub fn apply_defaults(&mut self) {
        let s = &mut self.service;
        if s.http_listen.is_empty() {
            s.http_listen = "127.0.0.1:8080".to_string();
        }
        if s.metrics_path.is_empty() {
            s.metrics_path = "/metrics".to_string();
        }
        if s.healthz_path.is_empty() {
            s.healthz_path = "/healthz".to_string();
        }
        if s.log_level.is_empty() {
            s.log_level = "info".to_string();
        }
        if s.data_dir.is_empty() {
            s.data_dir = "./data".to_string();
        }
        if s.snapshots_dir.is_empty() {
            s.snapshots_dir = "./snapshots".to_string();
        }
        if s.concurrency <= 0 {
            s.concurrency = 100;
        }
        if s.reprobe_schedule_seconds == 0 {
            s.reprobe_schedule_seconds = 300;
        }
        if self.subscriptions.fetch_interval_seconds == 0 {
            self.subscriptions.fetch_interval_seconds = 600;
        }
        if self.probe.timeout_ms == 0 {
            self.probe.timeout_ms = 5000;
        }
        let d = &mut self.decision;
        if d.decision_confidence_z == 0.0 {
            d.decision_confidence_z = 2.575829;
        }
        // zero thresholds would quarantine every node on its first round and
        // admit deletion with no evidence at all
        if d.min_attempts_for_decision == 0 {
            d.min_attempts_for_decision = 200;
        }
        if d.quarantine_consecutive_failures == 0 {
            d.quarantine_consecutive_failures = 10;
        }
        if d.delete_lower_bound_threshold == 0.0 {
            d.delete_lower_bound_threshold = 0.95;
        }
    }

    /// Sanity checks beyond what serde enforces.
    pub fn validate(&self) -> Result<()> {
        self.service
            .http_listen
            .parse::<SocketAddr>()
            .with_context(|| format!("service.http_listen: {}", self.service.http_listen))?;
        if !self.service.metrics_path.starts_with('/') {
            bail!("service.metrics_path must start with '/'");
        }
        if !self.service.healthz_path.starts_with('/') {
            bail!("service.healthz_path must start with '/'");
        }
        if self.decision.decision_confidence_z <= 0.0 {
            bail!("decision.decision_confidence_z must be > 0");
        }
        let lb = self.decision.delete_lower_bound_threshold;
        if !(0.0..=1.0).contains(&lb) {
            bail!("decision.delete_lower_bound_threshold must be in [0, 1]");
        }
        for o in &self.origins {
            match o.kind.as_str() {
                "local" => {}
                "agent" => {
                    if o.url.is_empty() {
                        bail!("origin '{}': agent origins need a url", o.name);
                    }
                }
                other => bail!("origin '{}': unknown type '{}'", o.name, other),
            }
        }
        Ok(())
    }

    pub fn concurrency(&self) -> usize {
        self.service.concurrency as usize
    }

    pub fn db_path(&self) -> PathBuf {
        Path::new(&self.service.data_dir).join("db.bolt")
    }

    pub fn log_level(&self) -> log::LevelFilter {
        match self.service.log_level.as_str() {
            "debug" => log::LevelFilter::Debug,
            "warn" => log::LevelFilter::Warn,
            "error" => log::LevelFilter::Error,
            _ => log::LevelFilter::Info,
        }
    }
}
