//! v2mgr: subscription node manager.
//!
//! Harvests proxy endpoints from subscription feeds, probes each from one or
//! more vantage points, and retires dead ones with statistical confidence.
//! The control plane is the interesting part: a merge→probe→decide→act loop
//! with unanimous multi-origin consensus, Wilson-lower-bound admission of
//! deletion, and a persistent state machine that survives restarts.
//!
//! The [`manager::Manager`] drives everything; [`storage::Store`] is the
//! single source of truth shared between the loop and the admin API.

pub mod api;
pub mod cli;
pub mod config;
pub mod decision;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod parser;
pub mod probe;
pub mod stats;
pub mod storage;
pub mod subscription;

pub use config::Config;
pub use decision::{evaluate, Action, Decision, DecisionInput};
pub use manager::{Manager, StatusSummary};
pub use parser::{config_id, parse_minimal};
pub use stats::wilson_lower;
pub use storage::{ConfigRecord, DayCounters, StatsRecord, Store, StoreError};
