//! Core infrastructure tests.

mod common;

use common::*;
use partkv::cli::commands::describe_entry;
use partkv::core::config::{Config, ConfigOverrides};
use partkv::core::runtime::{ComponentHealth, Placement, Runtime};
use partkv::error::result_code;
use partkv::raft::codec::{self, LogOp};
use partkv::raft::LogEntry;
use partkv::{HostAddr, MetaChange, PartMeta, ReadPolicy, ResultCode, StoreError};

// ============================================================================
// Config tests
// ============================================================================

#[test]
fn parse_minimal_config() {
    let file = config_file(
        r#"
[store]
local_addr = "10.1.2.3:44500"
"#,
    );
    let config = load_config(&file);

    assert_eq!(config.local_addr().unwrap(), "10.1.2.3:44500".parse().unwrap());
    assert_eq!(config.store.read_policy, ReadPolicy::AnyReplica);
    assert_eq!(config.replication.append_buffer_size, 1024);
    assert_eq!(config.telemetry.log_level, "info");
    assert_eq!(config.placement.mode, "memory");
    assert!(config.placement.parts.is_empty());
}

#[test]
fn validate_rejects_bad_values() {
    let cases = [
        ("[store]\nlocal_addr = \"localhost\"", "local_addr"),
        ("[store]\nlocal_addr = \"127.0.0.1:65535\"", "port"),
        ("[store]\nlocal_addr = \"0.0.0.0:0\"", "unset"),
        ("[replication]\nappend_buffer_size = 0", "append_buffer_size"),
        ("[telemetry]\nlog_level = \"loud\"", "log_level"),
        ("[placement]\nmode = \"zookeeper\"", "mode"),
        (
            "[[placement.parts]]\nspace = 1\npart = 1\n[[placement.parts]]\nspace = 1\npart = 1",
            "more than once",
        ),
        (
            "[[placement.parts]]\nspace = 1\npart = 1\npeers = [\"nowhere\"]",
            "peers",
        ),
    ];
    for (content, needle) in cases {
        let err = Config::from_toml(content).unwrap_err();
        assert!(
            format!("{err:#}").contains(needle),
            "expected {needle:?} in error for {content:?}, got: {err:#}"
        );
    }
}

#[test]
fn missing_config_file_is_an_error() {
    let dir = temp_test_dir();
    let err = Config::from_file(&dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
}

#[test]
fn overrides_replace_file_values() {
    let mut config = Config::from_toml("[store]\ndata_paths = [\"/a\", \"/b\"]").unwrap();
    config.apply_overrides(&ConfigOverrides {
        log_level: Some("trace".to_string()),
        local_addr: Some("127.0.0.1:7000".to_string()),
        data_path: Some("/override".to_string()),
        wal_path: Some("/wal".to_string()),
    });

    assert!(config.validate().is_ok());
    assert_eq!(config.telemetry.log_level, "trace");
    assert_eq!(config.local_addr().unwrap(), HostAddr::localhost(7000));
    assert_eq!(config.store.data_paths, vec!["/override".to_string()]);
    assert_eq!(config.store.wal_path.as_deref(), Some("/wal"));
}

// ============================================================================
// Host address tests
// ============================================================================

#[test]
fn host_addr_parse_and_display() {
    let addr: HostAddr = "192.168.0.9:44500".parse().unwrap();
    assert_eq!(addr.to_string(), "192.168.0.9:44500");
    assert!("192.168.0.9".parse::<HostAddr>().is_err());
    assert!("host:1".parse::<HostAddr>().is_err());
    assert!("1.2.3.4:70000".parse::<HostAddr>().is_err());
}

#[test]
fn host_addr_port_derivation() {
    let store = HostAddr::localhost(44500);
    let raft = store.raft_addr();
    assert_eq!(raft.port, 44501);
    assert_eq!(raft.store_addr(), store);
    assert_eq!(partkv::Store::get_raft_addr(store), raft);
    assert_eq!(partkv::Store::get_store_addr(raft), store);
}

// ============================================================================
// Error tests
// ============================================================================

#[test]
fn error_codes_and_retry_classes() {
    let leader = HostAddr::localhost(9779);
    let changed = StoreError::leader_changed(leader);
    assert_eq!(changed.code(), ResultCode::LeaderChanged);
    assert_eq!(changed.leader_hint(), Some(leader));
    assert!(changed.is_retriable());
    assert_eq!(StoreError::leader_changed(HostAddr::UNSET).leader_hint(), None);

    assert_eq!(StoreError::space_not_found(1).code(), ResultCode::SpaceNotFound);
    assert!(!StoreError::space_not_found(1).is_retriable());
    assert!(!StoreError::part_not_found(1, 2).is_retriable());
    assert!(StoreError::Backpressure.is_retriable());
    assert!(!StoreError::AtomicOpFailed.is_retriable());
    assert!(!StoreError::PartitionHalted { space: 1, part: 2 }.is_retriable());

    assert_eq!(result_code(&Ok::<(), StoreError>(())), ResultCode::Succeeded);
    assert_eq!(
        result_code::<()>(&Err(StoreError::CommitTimeout)),
        ResultCode::CommitTimeout
    );
    assert_eq!(
        StoreError::part_not_found(3, 4).to_string(),
        "partition 3:4 not found"
    );
}

// ============================================================================
// Log inspection tests
// ============================================================================

#[test]
fn describe_log_entries() {
    let data = put_entry(4, "user/1", "payload");
    let described = describe_entry(&data);
    assert_eq!(described["id"], 4);
    assert_eq!(described["command"]["type"], "put");
    assert_eq!(described["command"]["key"], "user/1");
    assert_eq!(described["command"]["value_bytes"], 7);

    let range = LogOp::RemoveRange {
        start: b"a".to_vec(),
        end: b"b".to_vec(),
    };
    let described = describe_entry(&LogEntry::new(5, 2, range.encode().unwrap()));
    assert_eq!(described["command"]["type"], "remove_range");
    assert_eq!(described["term"], 2);

    let learner = HostAddr::localhost(9780);
    let described = describe_entry(&LogEntry::new(6, 2, codec::encode_learner(&learner)));
    assert_eq!(described["command"]["type"], "add_learner");
    assert_eq!(described["command"]["learner"], "127.0.0.1:9780");

    let described = describe_entry(&LogEntry::new(7, 2, Vec::new()));
    assert_eq!(described["command"]["type"], "heartbeat");

    let described = describe_entry(&LogEntry::new(8, 2, vec![0xee, 1, 2]));
    assert_eq!(described["command"]["type"], "corrupt");
}

// ============================================================================
// Runtime tests
// ============================================================================

#[tokio::test]
async fn runtime_serves_seeded_partitions() {
    let dir = temp_test_dir();
    let content = format!(
        r#"
[store]
local_addr = "127.0.0.1:19779"
data_paths = ["{data}"]
wal_path = "{wal}"

[[placement.parts]]
space = 1
part = 1

[[placement.parts]]
space = 1
part = 2
"#,
        data = dir.path().join("data").display(),
        wal = dir.path().join("wal").display(),
    );
    let mut runtime = Runtime::new(Config::from_toml(&content).unwrap()).unwrap();
    assert!(!runtime.is_ready());

    runtime.start().await.unwrap();
    assert!(runtime.is_ready());
    assert!(runtime.is_running());
    assert!(matches!(runtime.placement(), Some(Placement::Memory(_))));

    let store = std::sync::Arc::clone(runtime.store().unwrap());
    assert_eq!(store.space(1).unwrap().part_ids(), vec![1, 2]);
    store.put(1, 2, b"k".to_vec(), b"v".to_vec()).await.unwrap();
    assert_eq!(store.get(1, 2, b"k").unwrap(), Some(b"v".to_vec()));

    runtime.stop().await.unwrap();
    assert!(!runtime.is_running());
    assert_eq!(runtime.health().store, ComponentHealth::Stopped);
    assert!(store.space_ids().is_empty());
    // Shutdown flushed the engine before releasing it.
    assert!(dir.path().join("data/1/2/data.snap").exists());
}

#[tokio::test]
async fn runtime_follows_meta_changes() {
    let content = r#"
[store]
local_addr = "127.0.0.1:29779"

[placement]
mode = "meta"
"#;
    let mut runtime = Runtime::new(Config::from_toml(content).unwrap()).unwrap();
    runtime.start().await.unwrap();
    let store = std::sync::Arc::clone(runtime.store().unwrap());
    assert!(store.space_ids().is_empty());

    let changes = runtime.meta_changes().unwrap();
    let local = runtime.config().local_addr().unwrap();
    changes
        .send(MetaChange::PartAdded(PartMeta::new(3, 1, vec![local])))
        .await
        .unwrap();
    wait_until("meta partition", || store.is_leader(3, 1)).await;

    runtime.stop().await.unwrap();
    assert!(runtime.meta_changes().is_none());
}
