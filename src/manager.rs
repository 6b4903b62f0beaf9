//! The control loop: merge → probe → decide → act.
//!
//! The manager owns two independent periodic tasks. The fetch task pulls
//! subscription feeds and upserts config records; the reprobe task fans every
//! live config out through a bounded worker pool, aggregates a consensus
//! outcome across all origins, folds it into the node's stats, and applies
//! the resulting verdict. Destructive verdicts pass three gates: dry-run,
//! the allow_delete switch, and a persisted daily deletion budget.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveTime, Utc};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::decision::{evaluate, Action, Decision, DecisionInput};
use crate::metrics;
use crate::parser::{config_id, parse_minimal};
use crate::probe::{build_origins, Node, Origin, ProbeOptions, ProbeResult};
use crate::storage::{ConfigRecord, DayCounters, Store, StoreError};
use crate::subscription::{extract_nodes, Fetcher};

/// Brief counts for the `status` command.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatusSummary {
    pub total: usize,
    pub active: usize,
    pub quarantined: usize,
    pub deleted: usize,
}

pub struct Manager {
    cfg: Config,
    store: Arc<Store>,
    origins: Vec<Box<dyn Origin>>,
    fetcher: Fetcher,
    /// Daily deletion budget. The lock spans the whole delete path so the
    /// loop and the admin API cannot race past the cap.
    day: Mutex<DayCounters>,
}

fn midnight_utc(t: DateTime<Utc>) -> i64 {
    t.date_naive().and_time(NaiveTime::MIN).and_utc().timestamp()
}

/// Resets the counters when `now` has crossed into a new UTC day.
fn rolled_over(day: DayCounters, now: DateTime<Utc>) -> DayCounters {
    let midnight = midnight_utc(now);
    if midnight != day.day_start_unix {
        DayCounters {
            day_start_unix: midnight,
            deletions_today: 0,
        }
    } else {
        day
    }
}

impl Manager {
    pub fn new(cfg: Config, store: Arc<Store>) -> Result<Self> {
        let origins = build_origins(&cfg.origins)?;
        if origins.is_empty() {
            warn!("no origins configured; every probe round will record failure");
        }
        let fetcher = Fetcher::new()?;
        let day = match store.load_day_counters() {
            Ok(Some(d)) => rolled_over(d, Utc::now()),
            Ok(None) => DayCounters {
                day_start_unix: midnight_utc(Utc::now()),
                deletions_today: 0,
            },
            Err(e) => {
                warn!("day_counters_load_failed err={e}");
                DayCounters {
                    day_start_unix: midnight_utc(Utc::now()),
                    deletions_today: 0,
                }
            }
        };
        Ok(Self {
            cfg,
            store,
            origins,
            fetcher,
            day: Mutex::new(day),
        })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn list_configs(&self) -> Result<Vec<ConfigRecord>, StoreError> {
        self.store.list_configs()
    }

    pub fn status(&self) -> Result<StatusSummary, StoreError> {
        let configs = self.store.list_configs()?;
        let quarantined = configs.iter().filter(|c| c.quarantine && !c.deleted).count();
        let deleted = configs.iter().filter(|c| c.deleted).count();
        Ok(StatusSummary {
            total: configs.len(),
            active: configs.len() - deleted,
            quarantined,
            deleted,
        })
    }

    pub async fn reprobe(&self, id: &str) -> Result<Decision> {
        let c = self.store.get_config(id)?;
        self.probe_once_and_decide(c).await
    }

    pub fn quarantine(&self, id: &str) -> Result<()> {
        let mut c = self.store.get_config(id)?;
        c.quarantine = true;
        self.store.put_config(&c)?;
        Ok(())
    }

    /// Tombstones a config. Gated on dry-run, allow_delete and the daily
    /// budget; the snapshot is the rollback artifact, so a failed snapshot
    /// aborts the delete before the tombstone flips.
    pub async fn delete(&self, id: &str) -> Result<()> {
        if self.cfg.service.dry_run || !self.cfg.security.allow_delete {
            bail!("delete_disabled_dryrun_or_security");
        }
        let mut day = self.day.lock().await;
        *day = rolled_over(*day, Utc::now());
        if day.deletions_today >= self.cfg.service.max_deletions_per_day {
            bail!("deletions_throttled");
        }
        let mut c = self.store.get_config(id)?;
        self.store
            .snapshot_config(&c, Path::new(&self.cfg.service.snapshots_dir))?;
        c.deleted = true;
        self.store.put_config(&c)?;
        day.deletions_today += 1;
        if let Err(e) = self.store.save_day_counters(*day) {
            warn!("day_counters_persist_failed err={e}");
        }
        metrics::record_deletion();
        Ok(())
    }

    pub fn rollback(&self, id: &str) -> Result<()> {
        let mut c = self.store.get_config(id)?;
        c.deleted = false;
        self.store.put_config(&c)?;
        Ok(())
    }

    /// One ingest round: fetch every source, extract and cap, dedupe across
    /// sources in order, upsert the survivors. Returns how many records were
    /// written. Individual source failures are logged and skipped.
    pub async fn merge_and_store(&self) -> usize {
        let subs = &self.cfg.subscriptions;
        let mut all: Vec<String> = Vec::new();
        for url in &subs.sources {
            let txt = match self.fetcher.fetch(url).await {
                Ok(t) => t,
                Err(e) => {
                    warn!("fetch_failed url={url} err={e}");
                    continue;
                }
            };
            let mut nodes = extract_nodes(&txt);
            if subs.per_source_limit > 0 && nodes.len() > subs.per_source_limit {
                nodes.truncate(subs.per_source_limit);
            }
            all.extend(nodes);
        }

        let mut seen = HashSet::new();
        let mut candidates: Vec<String> = Vec::new();
        for n in all {
            if seen.insert(n.clone()) {
                candidates.push(n);
            }
            if subs.merged_limit > 0 && candidates.len() >= subs.merged_limit {
                break;
            }
        }

        let mut stored = 0;
        for raw in candidates {
            let id = config_id(&raw);
            let parsed = parse_minimal(&raw);
            // operator flags survive re-ingest; only the descriptor refreshes
            let rec = match self.store.get_config(&id) {
                Ok(mut existing) => {
                    existing.raw = raw;
                    existing.proto = parsed.proto;
                    existing.host = parsed.host;
                    existing.port = parsed.port;
                    existing
                }
                Err(StoreError::NotFound) => ConfigRecord {
                    id: id.clone(),
                    raw,
                    proto: parsed.proto,
                    host: parsed.host,
                    port: parsed.port,
                    quarantine: false,
                    deleted: false,
                },
                Err(e) => {
                    warn!("config_load_failed id={id} err={e}");
                    continue;
                }
            };
            if let Err(e) = self.store.put_config(&rec) {
                warn!("config_store_failed id={} err={e}", rec.id);
                continue;
            }
            stored += 1;
        }
        stored
    }

    /// Runs one consensus round for a config, updates its stats, and applies
    /// the verdict. The round is a success only when at least one origin was
    /// tried and every tried origin succeeded.
    pub async fn probe_once_and_decide(&self, c: ConfigRecord) -> Result<Decision> {
        let timeout = Duration::from_millis(self.cfg.probe.timeout_ms);
        let deadline = tokio::time::Instant::now() + timeout;
        let opt = ProbeOptions { timeout };
        let node = Node {
            id: c.id.clone(),
            raw: c.raw.clone(),
            proto: c.proto.clone(),
            host: c.host.clone(),
            port: c.port,
            ..Default::default()
        };

        let mut success_all = true;
        let mut tried = 0usize;
        for origin in &self.origins {
            tried += 1;
            let res = match tokio::time::timeout_at(deadline, origin.probe_node(&node, opt)).await
            {
                Ok(r) => r,
                Err(_) => ProbeResult::failed("deadline_exceeded"),
            };
            metrics::record_probe(res.success, res.latency);
            if !res.success {
                success_all = false;
                debug!(
                    "probe_failed id={} origin={} err={}",
                    c.id,
                    origin.name(),
                    res.err
                );
            }
        }

        let stats = self
            .store
            .update_stats_for_probe(&c.id, success_all && tried > 0)?;
        let dec = evaluate(DecisionInput {
            stats: &stats,
            z: self.cfg.decision.decision_confidence_z,
            min_attempts: self.cfg.decision.min_attempts_for_decision,
            delete_lb: self.cfg.decision.delete_lower_bound_threshold,
            consec_fail_to_q: self.cfg.decision.quarantine_consecutive_failures,
        });

        match dec.action {
            Action::Quarantine => {
                let mut c = c;
                c.quarantine = true;
                self.store.put_config(&c)?;
                metrics::record_quarantine();
                warn!("quarantine id={} reason={}", c.id, dec.reason);
            }
            Action::Delete => {
                if !self.cfg.service.dry_run && self.cfg.security.allow_delete {
                    match self.delete(&c.id).await {
                        Ok(()) => {
                            warn!("deleted id={} failure_lb={:.6}", c.id, dec.failure_lb)
                        }
                        Err(e) => error!("delete_failed id={} err={e}", c.id),
                    }
                } else {
                    warn!(
                        "would_delete_dryrun_or_disabled id={} failure_lb={:.6}",
                        c.id, dec.failure_lb
                    );
                }
            }
            Action::Keep => {}
        }
        Ok(dec)
    }

    /// One reprobe tick: every non-deleted config through the bounded pool.
    /// Does not return until all dispatched probes have completed.
    pub async fn reprobe_round(self: &Arc<Self>, cancel: &CancellationToken) {
        let configs = match self.store.list_configs() {
            Ok(c) => c,
            Err(e) => {
                warn!("list_configs_failed err={e}");
                return;
            }
        };
        let sem = Arc::new(Semaphore::new(self.cfg.concurrency()));
        let mut tasks = FuturesUnordered::new();
        for c in configs.into_iter().filter(|c| !c.deleted) {
            if cancel.is_cancelled() {
                break;
            }
            let permit = match sem.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let mgr = Arc::clone(self);
            let id = c.id.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = mgr.probe_once_and_decide(c).await {
                    warn!("probe_round_failed id={id} err={e}");
                }
            }));
        }
        while let Some(res) = tasks.next().await {
            if let Err(join_err) = res {
                warn!("probe_task_panicked err={join_err:?}");
            }
        }
    }

    /// Runs the control loop until cancelled. The initial fetch happens once
    /// before either ticker starts; the two tickers then run as independent
    /// tasks so a slow reprobe round cannot starve ingest.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let stored = self.merge_and_store().await;
        info!("initial_fetch stored={stored}");

        let fetch = {
            let mgr = Arc::clone(&self);
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                let period = Duration::from_secs(mgr.cfg.subscriptions.fetch_interval_seconds);
                let mut ticker =
                    tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            let stored = mgr.merge_and_store().await;
                            info!("fetch_round stored={stored}");
                        }
                    }
                }
            })
        };

        let reprobe = {
            let mgr = Arc::clone(&self);
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                let period = Duration::from_secs(mgr.cfg.service.reprobe_schedule_seconds);
                let mut ticker =
                    tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => mgr.reprobe_round(&cancel).await,
                    }
                }
            })
        };

        let _ = tokio::join!(fetch, reprobe);
        info!("manager_stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_rollover_resets_on_new_utc_day() {
        let yesterday = Utc.with_ymd_and_hms(2025, 3, 1, 23, 59, 0).unwrap();
        let today = Utc.with_ymd_and_hms(2025, 3, 2, 0, 1, 0).unwrap();
        let day = DayCounters {
            day_start_unix: midnight_utc(yesterday),
            deletions_today: 7,
        };
        let rolled = rolled_over(day, today);
        assert_eq!(rolled.deletions_today, 0);
        assert_eq!(rolled.day_start_unix, midnight_utc(today));
    }

    #[test]
    fn test_rollover_is_a_noop_within_the_day() {
        let morning = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2025, 3, 1, 22, 30, 0).unwrap();
        let day = DayCounters {
            day_start_unix: midnight_utc(morning),
            deletions_today: 3,
        };
        assert_eq!(rolled_over(day, evening), day);
    }

    #[test]
    fn test_midnight_utc_is_start_of_day() {
        let t = Utc.with_ymd_and_hms(2025, 3, 1, 15, 42, 7).unwrap();
        let midnight = midnight_utc(t);
        assert_eq!(midnight % 86_400, 0);
        assert!(midnight <= t.timestamp());
        assert!(t.timestamp() - midnight < 86_400);
    }
}
