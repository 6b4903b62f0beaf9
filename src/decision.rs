//! Verdict engine.
//!
//! Pure mapping from a node's rolling stats to keep / quarantine / delete.
//! Two paths lead away from "keep": a fast path for nodes that are failing
//! right now (consecutive-failure streak, volume-independent), and a
//! high-confidence path for nodes whose failure rate is statistically proven
//! (Wilson lower bound over a sufficient sample).

use serde::Serialize;

use crate::stats::wilson_lower;
use crate::storage::StatsRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Keep,
    Quarantine,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Keep => "keep",
            Action::Quarantine => "quarantine",
            Action::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub stats: &'a StatsRecord,
    /// Normal quantile for the Wilson interval (2.575829 ~ 99%).
    pub z: f64,
    /// Sample floor before the delete path is allowed to fire.
    pub min_attempts: u64,
    /// Failure-rate lower bound at which deletion is justified.
    pub delete_lb: f64,
    /// Consecutive-failure streak that triggers quarantine.
    pub consec_fail_to_q: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub action: Action,
    pub failure_lb: f64,
    pub reason: &'static str,
}

/// Evaluates one node. First match wins.
pub fn evaluate(input: DecisionInput<'_>) -> Decision {
    let s = input.stats;
    if s.attempts == 0 {
        return Decision {
            action: Action::Keep,
            failure_lb: 0.0,
            reason: "no_attempts",
        };
    }
    let failure_lb = wilson_lower(s.failures, s.attempts, input.z);
    if s.consecutive_failures >= input.consec_fail_to_q {
        return Decision {
            action: Action::Quarantine,
            failure_lb,
            reason: "consecutive_failures",
        };
    }
    if s.attempts >= input.min_attempts && failure_lb >= input.delete_lb {
        return Decision {
            action: Action::Delete,
            failure_lb,
            reason: "high_failure_lb",
        };
    }
    Decision {
        action: Action::Keep,
        failure_lb,
        reason: "normal",
    }
}
