//! Store Contract Tests
//!
//! Every engine must behave identically for the operations the collector
//! relies on. Each test runs against the memory engine and against a
//! SQLite database in a temp directory.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use meshwatch_common::liveness::{expire_stale, mark_offline, touch};
use meshwatch_common::model::{BatadvNeighbours, Neighbours, NodeInfo, NodeStatus, Statistics};
use meshwatch_common::store::{MemoryStore, NodeStore, SqliteStore};
use meshwatch_common::StoreError;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn engines() -> Vec<(Arc<dyn NodeStore>, Option<TempDir>)> {
    let dir = TempDir::new().unwrap();
    let sqlite = SqliteStore::open_at(dir.path().join("nodes.db")).unwrap();
    vec![
        (
            Arc::new(MemoryStore::new(128, Duration::from_secs(3600))) as Arc<dyn NodeStore>,
            None,
        ),
        (Arc::new(sqlite) as Arc<dyn NodeStore>, Some(dir)),
    ]
}

fn nodeinfo(node_id: &str, mac: &str) -> NodeInfo {
    let mut info = NodeInfo {
        node_id: node_id.to_string(),
        hostname: format!("host-{node_id}"),
        ..Default::default()
    };
    info.network.mac = mac.to_string();
    info
}

// ============================================================================
// Get / put / get-all
// ============================================================================

#[test]
fn test_missing_id_is_not_found() {
    for (store, _dir) in engines() {
        let engine = store.engine();
        assert!(
            matches!(store.get_nodeinfo("nope"), Err(StoreError::NotFound { .. })),
            "{engine}: nodeinfo"
        );
        assert!(store.get_statistics("nope").unwrap_err().is_not_found(), "{engine}");
        assert!(store.get_status("nope").unwrap_err().is_not_found(), "{engine}");
        assert!(store.get_neighbours("nope").unwrap_err().is_not_found(), "{engine}");
    }
}

#[test]
fn test_empty_store_lists_are_empty() {
    for (store, _dir) in engines() {
        assert!(store.all_nodeinfos().unwrap().is_empty());
        assert!(store.all_statistics().unwrap().is_empty());
        assert!(store.all_statuses().unwrap().is_empty());
        assert!(store.all_neighbours().unwrap().is_empty());
        assert!(store.gateways().unwrap().is_empty());
    }
}

#[test]
fn test_put_replaces_wholesale() {
    for (store, _dir) in engines() {
        let mut first = Statistics {
            node_id: "n1".into(),
            uptime: 10.0,
            ..Default::default()
        };
        first.clients.total = 3;
        store.put_statistics(&first).unwrap();

        let second = Statistics {
            node_id: "n1".into(),
            uptime: 20.0,
            ..Default::default()
        };
        store.put_statistics(&second).unwrap();

        let stored = store.get_statistics("n1").unwrap();
        assert_eq!(stored, second, "{}: no field merging", store.engine());
        assert_eq!(store.all_statistics().unwrap().len(), 1);
    }
}

#[test]
fn test_entities_are_independent() {
    for (store, _dir) in engines() {
        let mut batadv = BTreeMap::new();
        batadv.insert("aa".to_string(), BatadvNeighbours::default());
        store
            .put_neighbours(&Neighbours {
                node_id: "n1".into(),
                batadv,
            })
            .unwrap();

        assert!(store.get_neighbours("n1").is_ok());
        assert!(store.get_nodeinfo("n1").unwrap_err().is_not_found());
        assert!(store.get_status("n1").unwrap_err().is_not_found());
    }
}

#[test]
fn test_all_nodeinfos_round_trip() {
    for (store, _dir) in engines() {
        store.put_nodeinfo(&nodeinfo("b", "bb")).unwrap();
        store.put_nodeinfo(&nodeinfo("a", "aa")).unwrap();
        let ids: Vec<String> = store
            .all_nodeinfos()
            .unwrap()
            .into_iter()
            .map(|info| info.node_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.get_nodeinfo("a").unwrap().hostname, "host-a");
    }
}

#[test]
fn test_gateway_set() {
    for (store, _dir) in engines() {
        store.put_gateway("aa").unwrap();
        store.put_gateway("aa").unwrap();
        store.put_gateway("bb").unwrap();
        assert!(store.is_gateway("aa").unwrap());
        assert_eq!(store.gateways().unwrap(), vec!["aa", "bb"]);

        store.remove_gateway("aa").unwrap();
        store.remove_gateway("never-added").unwrap();
        assert!(!store.is_gateway("aa").unwrap());
    }
}

// ============================================================================
// Liveness
// ============================================================================

#[test]
fn test_first_observation_is_online() {
    for (store, _dir) in engines() {
        let now = Utc::now();
        touch(store.as_ref(), "n1", now, false).unwrap();
        let status = store.get_status("n1").unwrap();
        assert!(status.online);
        assert_eq!(status.firstseen, status.lastseen);
    }
}

#[test]
fn test_silent_node_goes_offline_exactly_once() {
    for (store, _dir) in engines() {
        let seen = Utc.with_ymd_and_hms(2021, 3, 1, 10, 0, 0).unwrap();
        touch(store.as_ref(), "quiet", seen, false).unwrap();
        touch(store.as_ref(), "chatty", seen + ChronoDuration::minutes(14), false).unwrap();

        let calls = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            store.on_offline(Arc::new(move |id: &str| {
                calls.lock().unwrap().push(id.to_string());
            }));
        }

        let window = Duration::from_secs(300 * 3);
        let now = seen + ChronoDuration::minutes(16);
        assert_eq!(mark_offline(store.as_ref(), now, window).unwrap(), vec!["quiet"]);
        assert_eq!(mark_offline(store.as_ref(), now, window).unwrap(), Vec::<String>::new());

        assert!(!store.get_status("quiet").unwrap().online);
        assert!(store.get_status("chatty").unwrap().online);
        assert_eq!(*calls.lock().unwrap(), vec!["quiet", "quiet"], "{}", store.engine());
    }
}

#[test]
fn test_offline_node_comes_back() {
    for (store, _dir) in engines() {
        let seen = Utc.with_ymd_and_hms(2021, 3, 1, 10, 0, 0).unwrap();
        touch(store.as_ref(), "n1", seen, false).unwrap();
        let later = seen + ChronoDuration::hours(1);
        mark_offline(store.as_ref(), later, Duration::from_secs(900)).unwrap();
        assert!(!store.get_status("n1").unwrap().online);

        let back = touch(store.as_ref(), "n1", later, false).unwrap();
        assert!(back.online);
        assert_eq!(back.firstseen, "2021-03-01T10:00:00Z");
        assert_eq!(back.lastseen, "2021-03-01T11:00:00Z");
    }
}

#[test]
fn test_expiry_deletes_all_entities() {
    for (store, _dir) in engines() {
        let seen = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        store.put_nodeinfo(&nodeinfo("old", "aa:aa")).unwrap();
        store
            .put_statistics(&Statistics {
                node_id: "old".into(),
                ..Default::default()
            })
            .unwrap();
        store
            .put_neighbours(&Neighbours {
                node_id: "old".into(),
                ..Default::default()
            })
            .unwrap();
        store.put_gateway("aa:aa").unwrap();
        store.put_gateway("bb:bb").unwrap();
        touch(store.as_ref(), "old", seen, true).unwrap();

        store.put_nodeinfo(&nodeinfo("recent", "cc:cc")).unwrap();
        touch(store.as_ref(), "recent", seen + ChronoDuration::days(300), false).unwrap();

        let expired_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&expired_calls);
        store.on_expired(Arc::new(move |id: &str| {
            assert_eq!(id, "old");
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let now = seen + ChronoDuration::days(366);
        let max_age = Duration::from_secs(365 * 24 * 3600);
        assert_eq!(expire_stale(store.as_ref(), now, max_age).unwrap(), vec!["old"]);
        assert_eq!(expired_calls.load(Ordering::SeqCst), 1);

        assert!(store.get_nodeinfo("old").unwrap_err().is_not_found());
        assert!(store.get_statistics("old").unwrap_err().is_not_found());
        assert!(store.get_status("old").unwrap_err().is_not_found());
        assert!(store.get_neighbours("old").unwrap_err().is_not_found());
        assert!(!store.is_gateway("aa:aa").unwrap());
        assert!(store.is_gateway("bb:bb").unwrap());
        assert!(store.get_nodeinfo("recent").is_ok());
    }
}

#[test]
fn test_expiry_rechecks_a_node_heard_from_after_the_scan() {
    for (store, _dir) in engines() {
        let engine = store.engine();
        let seen = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let now = seen + ChronoDuration::days(400);
        let max_age = ChronoDuration::days(365);
        store.put_nodeinfo(&nodeinfo("back", "dd:dd")).unwrap();
        touch(store.as_ref(), "back", seen, false).unwrap();

        let is_expired = |status: &NodeStatus| status.is_silent_for(now, max_age).unwrap_or(false);
        let candidates: Vec<String> = store
            .all_statuses()
            .unwrap()
            .into_iter()
            .filter(|status| is_expired(status))
            .map(|status| status.node_id)
            .collect();
        assert_eq!(candidates, vec!["back"], "{engine}");

        // Telemetry arrives between the scan and the delete.
        touch(store.as_ref(), "back", now, false).unwrap();

        assert!(!store.expire_node("back", &is_expired).unwrap(), "{engine}");
        assert!(store.get_nodeinfo("back").is_ok(), "{engine}");
        assert!(store.get_status("back").unwrap().online, "{engine}");
    }
}

#[test]
fn test_legacy_lastseen_participates_in_liveness() {
    for (store, _dir) in engines() {
        store
            .put_status(&NodeStatus {
                node_id: "legacy".into(),
                firstseen: "2015-11-20T08:15:42".into(),
                lastseen: "2015-11-21T08:15:42".into(),
                online: true,
                gateway: false,
            })
            .unwrap();
        let now = Utc.with_ymd_and_hms(2015, 11, 21, 9, 0, 0).unwrap();
        assert_eq!(
            mark_offline(store.as_ref(), now, Duration::from_secs(900)).unwrap(),
            vec!["legacy"]
        );
    }
}

#[test]
fn test_concurrent_touches_lose_no_update() {
    for (store, _dir) in engines() {
        let base = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        let at = base + ChronoDuration::seconds(i * 100 + j);
                        touch(store.as_ref(), "shared", at, false).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let status = store.get_status("shared").unwrap();
        // Highest timestamp written by any thread: 7 * 100 + 24
        assert_eq!(status.lastseen, "2021-01-01T00:12:04Z");
        assert!(status.online);
    }
}
