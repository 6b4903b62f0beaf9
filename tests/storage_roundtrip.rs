//! Store behavior against a real database file: record round-trips, the
//! atomic stats fold, snapshots, and the persisted daily counters.

use tempfile::TempDir;
use v2mgr::storage::{ConfigRecord, DayCounters, StatsRecord, Store, StoreError};

fn open_store(dir: &TempDir) -> Store {
    Store::open(&dir.path().join("db.bolt")).expect("open store")
}

fn sample_config(id: &str) -> ConfigRecord {
    ConfigRecord {
        id: id.to_string(),
        raw: "trojan://pw@node.example:8443".to_string(),
        proto: "trojan".to_string(),
        host: "pw@node.example".to_string(),
        port: 8443,
        quarantine: false,
        deleted: false,
    }
}

#[test]
fn test_config_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let c = sample_config("abc");
    store.put_config(&c).unwrap();
    assert_eq!(store.get_config("abc").unwrap(), c);

    let all = store.list_configs().unwrap();
    assert_eq!(all, vec![c]);
}

#[test]
fn test_get_missing_config_is_not_found() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    assert!(matches!(
        store.get_config("nope"),
        Err(StoreError::NotFound)
    ));
    assert!(matches!(store.get_stats("nope"), Err(StoreError::NotFound)));
}

#[test]
fn test_put_config_overwrites_by_id() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let mut c = sample_config("abc");
    store.put_config(&c).unwrap();
    c.quarantine = true;
    store.put_config(&c).unwrap();

    assert_eq!(store.list_configs().unwrap().len(), 1);
    assert!(store.get_config("abc").unwrap().quarantine);
}

#[test]
fn test_stats_fold_keeps_attempt_invariant() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    // lazily created on first probe
    let s = store.update_stats_for_probe("x", false).unwrap();
    assert_eq!((s.attempts, s.successes, s.failures), (1, 0, 1));
    assert_eq!(s.consecutive_failures, 1);
    assert!(s.last_failure_unix > 0);
    assert_eq!(s.last_success_unix, 0);

    let s = store.update_stats_for_probe("x", false).unwrap();
    assert_eq!((s.attempts, s.successes, s.failures), (2, 0, 2));
    assert_eq!(s.consecutive_failures, 2);

    // any success resets the streak
    let s = store.update_stats_for_probe("x", true).unwrap();
    assert_eq!((s.attempts, s.successes, s.failures), (3, 1, 2));
    assert_eq!(s.consecutive_failures, 0);
    assert!(s.last_success_unix > 0);

    for step in [true, false, true, false, false] {
        let s = store.update_stats_for_probe("x", step).unwrap();
        assert_eq!(s.attempts, s.successes + s.failures);
    }

    let persisted = store.get_stats("x").unwrap();
    assert_eq!(persisted.attempts, 8);
    assert_eq!(persisted.attempts, persisted.successes + persisted.failures);
}

#[test]
fn test_stats_records_are_isolated_per_id() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    store.update_stats_for_probe("a", false).unwrap();
    let b = store.update_stats_for_probe("b", true).unwrap();
    assert_eq!(b.attempts, 1);
    assert_eq!(b.consecutive_failures, 0);
    assert_eq!(store.get_stats("a").unwrap().failures, 1);
}

#[test]
fn test_explicit_stats_put_round_trips() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let s = StatsRecord {
        id: "y".into(),
        attempts: 10,
        successes: 4,
        failures: 6,
        consecutive_failures: 2,
        last_success_unix: 1_700_000_000,
        last_failure_unix: 1_700_000_100,
    };
    store.put_stats(&s).unwrap();
    assert_eq!(store.get_stats("y").unwrap(), s);
}

#[test]
fn test_snapshot_writes_pretty_json_with_tight_permissions() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let snap_dir = dir.path().join("snaps");

    let c = sample_config("abc");
    let path = store.snapshot_config(&c, &snap_dir).unwrap();

    let name = path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("abc_"), "unexpected snapshot name {name}");
    assert!(name.ends_with(".json"));

    let body = std::fs::read_to_string(&path).unwrap();
    assert!(body.contains('\n'), "snapshot should be pretty-printed");
    let restored: ConfigRecord = serde_json::from_str(&body).unwrap();
    assert_eq!(restored, c);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(&snap_dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o755);
    }
}

#[test]
fn test_day_counters_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.bolt");

    {
        let store = Store::open(&path).unwrap();
        assert!(store.load_day_counters().unwrap().is_none());
        store
            .save_day_counters(DayCounters {
                day_start_unix: 1_700_000_000,
                deletions_today: 5,
            })
            .unwrap();
    }

    let store = Store::open(&path).unwrap();
    let counters = store.load_day_counters().unwrap().unwrap();
    assert_eq!(counters.day_start_unix, 1_700_000_000);
    assert_eq!(counters.deletions_today, 5);
}

#[test]
fn test_open_creates_missing_data_dir() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("a/b/db.bolt");
    let store = Store::open(&nested).unwrap();
    store.put_config(&sample_config("abc")).unwrap();
    assert!(nested.exists());
}
