use mirrordb::{
    Column, CommitState, DistributedBackend, InMemoryDistributedStore, InMemoryLocalStore, LocalBackend, MirrorNode,
    NodeConfig, NodeCreationError, NodeError, NodeId, NodeOptions, OperationType, PartitionConfiguration, PartitionEntry,
    PartitionId, Row, RowKey, SessionError, TableSchema, TransactionDigest, TxId,
};
use slog::Drain;
use std::error::Error;
use std::sync::Arc;
use tokio::time::Duration;

const NAMESPACE: &str = "mirror";

#[tokio::test]
async fn autocommit_write_marks_every_other_replica_dirty() -> Result<(), Box<dyn Error>> {
    let (store, a, b, _c) = cluster().await?;

    let mut session = a.node.open_session(TxId::new("a-1"))?;
    session.set_autocommit(true).await?;
    session.insert("kv", Row::from_strs(&["1", "x"])).await?;

    assert_eq!(a.local.peek("kv", &RowKey::new("1")), Some(Row::from_strs(&["1", "x"])));
    assert!(store.peek("mirror.kv", "1").is_some());
    assert_eq!(store.keys("mirror.dirty_kv_a"), Vec::<String>::new());
    assert_eq!(store.keys("mirror.dirty_kv_b"), vec!["1".to_string()]);
    assert_eq!(store.keys("mirror.dirty_kv_c"), vec!["1".to_string()]);

    // Reading on b repairs the row from the mirror and clears b's marker only.
    let reader = b.node.open_session(TxId::new("b-1"))?;
    assert_eq!(reader.select("kv").await?, vec![Row::from_strs(&["1", "x"])]);
    assert_eq!(b.local.peek("kv", &RowKey::new("1")), Some(Row::from_strs(&["1", "x"])));
    assert!(store.keys("mirror.dirty_kv_b").is_empty());
    assert_eq!(store.keys("mirror.dirty_kv_c"), vec!["1".to_string()]);

    let again = b.node.dirty_sync().repair(b.local.as_ref(), "kv").await?;
    assert_eq!(again.repaired, 0);
    assert_eq!(reader.select("kv").await?, vec![Row::from_strs(&["1", "x"])]);

    Ok(())
}

#[tokio::test]
async fn staged_update_then_delete_commits_only_the_delete() -> Result<(), Box<dyn Error>> {
    let (store, a, b, _c) = cluster().await?;

    let mut setup = a.node.open_session(TxId::new("a-setup"))?;
    setup.set_autocommit(true).await?;
    setup.insert("kv", Row::from_strs(&["1", "x"])).await?;

    let session = a.node.open_session(TxId::new("a-tx"))?;
    assert_eq!(session.update("kv", Row::from_strs(&["1", "y"])).await?, 1);
    assert_eq!(session.delete("kv", RowKey::new("1")).await?, 1);
    let outcome = session.commit().await?;

    assert_eq!(outcome.records.len(), 1);
    let (partition, record) = &outcome.records[0];
    assert_eq!(partition, &PartitionId::new("p1"));

    let digest = TransactionDigest::decode(&a.node.redo_log().redo_record(record).await?)?;
    assert_eq!(digest.entries.len(), 1);
    assert_eq!(digest.entries[0].1.op_type, OperationType::Delete);

    assert!(store.peek("mirror.kv", "1").is_none());
    assert_eq!(a.local.peek("kv", &RowKey::new("1")), None);

    let reader = b.node.open_session(TxId::new("b-1"))?;
    assert!(reader.select("kv").await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn rollback_leaves_distributed_store_untouched() -> Result<(), Box<dyn Error>> {
    let (store, a, _b, _c) = cluster().await?;

    let session = a.node.open_session(TxId::new("a-tx"))?;
    session.insert("kv", Row::from_strs(&["1", "x"])).await?;
    session.rollback()?;

    assert_eq!(a.local.peek("kv", &RowKey::new("1")), None);
    assert!(store.peek("mirror.kv", "1").is_none());
    assert!(store.keys("mirror.dirty_kv_b").is_empty());
    assert!(store.keys("mirror.redo_records").is_empty());

    session.close()?;
    assert!(!a.node.tracker().contains(&TxId::new("a-tx")));
    Ok(())
}

#[tokio::test]
async fn commit_resumes_after_distributed_store_outage() -> Result<(), Box<dyn Error>> {
    let (store, a, _b, _c) = cluster().await?;
    let tx_id = TxId::new("a-tx");

    let session = a.node.open_session(tx_id.clone())?;
    session.insert("kv", Row::from_strs(&["1", "x"])).await?;

    store.set_unavailable(true);
    assert!(session.commit().await.is_err());

    let tracker = a.node.tracker();
    assert!(tracker.is_local_done(&tx_id)?);
    assert!(!tracker.is_remote_done(&tx_id)?);
    let commit_id = tracker.commit_id(&tx_id)?.expect("commit id assigned");
    assert!(matches!(session.rollback(), Err(SessionError::CommitInProgress(_))));

    // A new session for the same transaction picks up the unfinished commit.
    drop(session);
    let resumed = a.node.open_session(tx_id.clone())?;
    store.set_unavailable(false);
    let outcome = resumed.commit().await?;

    assert_eq!(outcome.commit_id, commit_id);
    assert!(store.peek("mirror.kv", "1").is_some());
    assert_eq!(store.keys("mirror.redo_records").len(), 1);
    assert_eq!(tracker.state(&tx_id)?, CommitState::Open);
    Ok(())
}

#[tokio::test]
async fn writes_are_refused_until_a_started_commit_completes() -> Result<(), Box<dyn Error>> {
    let (store, a, _b, _c) = cluster().await?;
    let tx_id = TxId::new("a-tx");

    let session = a.node.open_session(tx_id.clone())?;
    session.insert("kv", Row::from_strs(&["1", "x"])).await?;
    store.set_unavailable(true);
    assert!(session.commit().await.is_err());

    let err = session.insert("kv", Row::from_strs(&["2", "y"])).await.unwrap_err();
    assert!(matches!(err, SessionError::CommitInProgress(_)));
    let err = session.update("kv", Row::from_strs(&["1", "z"])).await.unwrap_err();
    assert!(matches!(err, SessionError::CommitInProgress(_)));
    let err = session.delete("kv", RowKey::new("1")).await.unwrap_err();
    assert!(matches!(err, SessionError::CommitInProgress(_)));
    assert_eq!(a.local.peek("kv", &RowKey::new("2")), None);
    assert_eq!(a.local.peek("kv", &RowKey::new("1")), Some(Row::from_strs(&["1", "x"])));

    store.set_unavailable(false);
    let outcome = session.commit().await?;
    let digest = TransactionDigest::decode(&a.node.redo_log().redo_record(&outcome.records[0].1).await?)?;
    assert_eq!(digest.entries.len(), 1);
    assert!(store.peek("mirror.kv", "1").is_some());
    assert!(store.peek("mirror.kv", "2").is_none());

    // The completed commit reopens the session for writes.
    session.insert("kv", Row::from_strs(&["2", "y"])).await?;
    session.commit().await?;
    assert!(store.peek("mirror.kv", "2").is_some());
    Ok(())
}

#[tokio::test]
async fn read_serves_stale_rows_while_store_is_down() -> Result<(), Box<dyn Error>> {
    let (store, a, b, _c) = cluster().await?;

    let mut writer = a.node.open_session(TxId::new("a-1"))?;
    writer.set_autocommit(true).await?;
    writer.insert("kv", Row::from_strs(&["1", "x"])).await?;

    store.set_unavailable(true);
    let reader = b.node.open_session(TxId::new("b-1"))?;
    assert!(reader.select("kv").await?.is_empty());

    store.set_unavailable(false);
    assert_eq!(store.keys("mirror.dirty_kv_b"), vec!["1".to_string()]);
    assert_eq!(reader.select("kv").await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn reassigning_a_table_records_its_previous_partition() -> Result<(), Box<dyn Error>> {
    let (_store, a, _b, _c) = cluster().await?;
    let p1 = PartitionId::new("p1");
    let p2 = PartitionId::new("p2");

    assert_eq!(a.node.reassign_table("kv", &p2).await?, Some(p1.clone()));
    assert_eq!(a.node.reassign_table("kv", &p2).await?, None);

    let snapshot = a.node.partitions();
    let ownership = &snapshot.ownership["kv"];
    assert_eq!(ownership.partition, Some(p2.clone()));
    assert!(ownership.previous_partitions.contains(&p1));

    let row = a.node.redo_log().table_partition("kv").await?.expect("directory row");
    assert_eq!(row.partition, p2);
    assert_eq!(row.previous_partitions.len(), 1);

    // Commits now land in the new partition.
    let session = a.node.open_session(TxId::new("a-tx"))?;
    session.insert("kv", Row::from_strs(&["1", "x"])).await?;
    let outcome = session.commit().await?;
    assert_eq!(outcome.records[0].0, p2);
    Ok(())
}

#[tokio::test]
async fn failed_reassignment_leaves_the_model_unchanged() -> Result<(), Box<dyn Error>> {
    let (store, a, _b, _c) = cluster().await?;
    let p1 = PartitionId::new("p1");
    let p2 = PartitionId::new("p2");

    store.set_unavailable(true);
    assert!(a.node.reassign_table("kv", &p2).await.is_err());
    assert_eq!(a.node.partitions().ownership["kv"].partition, Some(p1.clone()));

    store.set_unavailable(false);
    assert_eq!(a.node.redo_log().table_partition("kv").await?.expect("directory row").partition, p1);
    assert_eq!(a.node.reassign_table("kv", &p2).await?, Some(p1));

    let err = a.node.reassign_table("never_registered", &p2).await.unwrap_err();
    assert!(matches!(err, NodeError::Partition(_)));
    Ok(())
}

#[tokio::test]
async fn ownership_hand_off_chains_partition_history() -> Result<(), Box<dyn Error>> {
    let (_store, a, b, _c) = cluster().await?;
    let p1 = PartitionId::new("p1");

    let first = a.node.redo_log().partition_info(&p1).await?.latest_tit.expect("initialized");
    let second = b.node.take_ownership(&p1).await?;

    assert_eq!(a.node.redo_log().history_chain(&p1).await?, vec![first, second.clone()]);
    let info = a.node.redo_log().partition_info(&p1).await?;
    assert_eq!(info.owner, Some(NodeId::new("b")));
    assert_eq!(info.latest_tit, Some(second.clone()));

    let session = b.node.open_session(TxId::new("b-tx"))?;
    session.insert("kv", Row::from_strs(&["2", "z"])).await?;
    let outcome = session.commit().await?;

    let tit = b.node.redo_log().tit_row(&second).await?;
    assert_eq!(tit.redo, vec![outcome.records[0].1.clone()]);
    Ok(())
}

#[tokio::test]
async fn owner_replays_commits_of_every_replica() -> Result<(), Box<dyn Error>> {
    let (store, a, b, c) = cluster().await?;
    let p1 = PartitionId::new("p1");

    let writes = [(&b, "b-1", "1", "x"), (&c, "c-1", "2", "y"), (&b, "b-2", "1", "z")];
    for (node, tx, k, v) in &writes {
        let session = node.node.open_session(TxId::new(*tx))?;
        if node.local.peek("kv", &RowKey::new(*k)).is_some() {
            session.update("kv", Row::from_strs(&[*k, *v])).await?;
        } else {
            session.insert("kv", Row::from_strs(&[*k, *v])).await?;
        }
        session.commit().await?;
    }

    // Non-owners may not move the shared cursor.
    let err = b.node.replay_partition(&p1).await.unwrap_err();
    assert!(matches!(err, NodeError::NotOwner { owner: Some(ref owner), .. } if owner == &NodeId::new("a")));
    assert!(c.node.replay_partition(&p1).await.is_err());

    let report = a.node.replay_partition(&p1).await?;
    assert_eq!(report.records_applied, 3);
    assert_eq!(a.local.peek("kv", &RowKey::new("1")), Some(Row::from_strs(&["1", "z"])));
    assert_eq!(a.local.peek("kv", &RowKey::new("2")), Some(Row::from_strs(&["2", "y"])));

    let again = a.node.replay_partition(&p1).await?;
    assert_eq!(again.records_applied, 0);

    // The owner's own commit is already in its store and counts as applied.
    let session = a.node.open_session(TxId::new("a-1"))?;
    session.insert("kv", Row::from_strs(&["3", "w"])).await?;
    session.commit().await?;

    let tit = a.node.redo_log().partition_info(&p1).await?.latest_tit.expect("initialized");
    let row = a.node.redo_log().tit_row(&tit).await?;
    assert_eq!(row.redo.len(), 4);
    assert_eq!(row.latest_applied, 3);
    assert!(row.applied);
    assert_eq!(a.node.replay_partition(&p1).await?.records_applied, 0);
    assert!(store.peek("mirror.kv", "3").is_some());
    Ok(())
}

#[tokio::test]
async fn completed_session_is_reused() -> Result<(), Box<dyn Error>> {
    let (_store, a, _b, _c) = cluster().await?;
    let tx_id = TxId::new("a-tx");

    let session = a.node.open_session(tx_id.clone())?;
    session.insert("kv", Row::from_strs(&["1", "x"])).await?;
    let first = session.commit().await?;
    drop(session);

    let connection = a.node.tracker().connection(&tx_id)?;
    let session = a.node.open_session(tx_id.clone())?;
    assert_eq!(a.node.tracker().connection(&tx_id)?, connection);
    assert_eq!(a.node.tracker().state(&tx_id)?, CommitState::Open);

    session.insert("kv", Row::from_strs(&["2", "y"])).await?;
    let second = session.commit().await?;
    assert!(second.commit_id.as_u64() > first.commit_id.as_u64());
    assert_ne!(second.records[0].1, first.records[0].1);
    Ok(())
}

#[tokio::test]
async fn enabling_autocommit_commits_staged_writes() -> Result<(), Box<dyn Error>> {
    let (store, a, _b, _c) = cluster().await?;

    let mut session = a.node.open_session(TxId::new("a-tx"))?;
    session.insert("kv", Row::from_strs(&["1", "x"])).await?;
    assert!(store.peek("mirror.kv", "1").is_none());

    session.set_autocommit(true).await?;
    assert!(session.is_autocommit());
    assert!(store.peek("mirror.kv", "1").is_some());
    assert_eq!(store.keys("mirror.redo_records").len(), 1);
    Ok(())
}

#[tokio::test]
async fn node_bootstraps_from_partition_file() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("partitions.json");
    partitions("a").save_to_file(&path)?;

    let store = Arc::new(InMemoryDistributedStore::new());
    let local = Arc::new(InMemoryLocalStore::new());
    let mut config = node_config("a", &store, &local);
    config.partitions = PartitionConfiguration::read_from_file(&path)?;
    let node = mirrordb::try_create_node(config).await?;

    let info = node.redo_log().partition_info(&PartitionId::new("p1")).await?;
    assert_eq!(info.owner, Some(NodeId::new("a")));
    assert!(info.latest_tit.is_some());
    assert!(node.redo_log().table_partition("kv").await?.is_some());

    let saved = node.partition_configuration();
    assert!(saved.partitions.iter().all(|p| p.latest_tit_index.is_some()));
    Ok(())
}

#[tokio::test]
async fn node_must_be_a_replica() {
    let store = Arc::new(InMemoryDistributedStore::new());
    let local = Arc::new(InMemoryLocalStore::new());
    let config = node_config("z", &store, &local);

    let result = mirrordb::try_create_node(config).await;
    assert!(matches!(result, Err(NodeCreationError::MeNotInReplicas)));
}

#[tokio::test]
async fn shutdown_cancels_distributed_calls() -> Result<(), Box<dyn Error>> {
    let (_store, a, _b, _c) = cluster().await?;

    let mut session = a.node.open_session(TxId::new("a-1"))?;
    session.set_autocommit(true).await?;
    a.node.shutdown();

    let err = session.insert("kv", Row::from_strs(&["1", "x"])).await.unwrap_err();
    assert!(matches!(err, SessionError::Sync(_)));
    Ok(())
}

// -- Helpers --

struct TestNode {
    node: MirrorNode,
    local: Arc<InMemoryLocalStore>,
}

async fn cluster() -> Result<(Arc<InMemoryDistributedStore>, TestNode, TestNode, TestNode), Box<dyn Error>> {
    let store = Arc::new(InMemoryDistributedStore::new());
    let a = create_node("a", &store).await?;
    let b = create_node("b", &store).await?;
    let c = create_node("c", &store).await?;
    Ok((store, a, b, c))
}

async fn create_node(id: &str, store: &Arc<InMemoryDistributedStore>) -> Result<TestNode, Box<dyn Error>> {
    let local = Arc::new(InMemoryLocalStore::new());
    local.create_table(kv_schema());

    let node = mirrordb::try_create_node(node_config(id, store, &local)).await?;
    node.register_table(&kv_schema()).await?;
    Ok(TestNode { node, local })
}

fn node_config(id: &str, store: &Arc<InMemoryDistributedStore>, local: &Arc<InMemoryLocalStore>) -> NodeConfig {
    NodeConfig {
        node_id: id.to_string(),
        replicas: vec!["a".to_string(), "b".to_string(), "c".to_string()],
        namespace: NAMESPACE.to_string(),
        partitions: partitions(id),
        local: LocalBackend::InMemory(local.clone()),
        distributed: DistributedBackend::InMemory(store.clone()),
        info_logger: create_root_logger_for_stdout(id.to_string()),
        options: NodeOptions {
            remote_call_timeout: Some(Duration::from_millis(500)),
            ..NodeOptions::default()
        },
    }
}

/// Node `a` owns both partitions; `kv` starts in `p1`.
fn partitions(me: &str) -> PartitionConfiguration {
    let owner = Some(NodeId::new("a"));
    PartitionConfiguration::new(NodeId::new(me))
        .with_partition(PartitionEntry::new(PartitionId::new("p1"), owner.clone(), 3).with_table("kv"))
        .with_partition(PartitionEntry::new(PartitionId::new("p2"), owner, 3))
}

fn kv_schema() -> TableSchema {
    TableSchema::new("kv", vec![Column::key("k"), Column::value("v")])
}

fn create_root_logger_for_stdout(node_id: String) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!("NodeId" => node_id))
}
