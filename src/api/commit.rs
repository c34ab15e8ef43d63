use crate::api::node::NodeContext;
use crate::commit::TrackerError;
use crate::ids::{CommitId, PartitionId, RedoRecordId, TxId};
use crate::partition::{PartitionError, PartitionModel, RangeBound};
use crate::redolog::RedoLogError;
use crate::staging::{Operation, StagedKey, StagingError, StagingTable, TransactionDigest};
use crate::store::LocalStoreError;
use crate::sync::{MirrorChange, SyncError};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommitOutcome {
    pub commit_id: CommitId,
    /// One redo record per partition the transaction touched.
    pub records: Vec<(PartitionId, RedoRecordId)>,
}

struct PartitionCommit {
    partition: PartitionId,
    record: RedoRecordId,
    entries: Vec<(StagedKey, Operation)>,
}

/// Drives the commit of `tx_id` to completion. The local commit and the distributed half run
/// concurrently; each is skipped if an earlier attempt already finished it, so calling this again
/// after a failure resumes the commit with the same commit id and redo record ids.
pub(crate) async fn drive_commit(
    ctx: &NodeContext,
    logger: &slog::Logger,
    tx_id: &TxId,
    staging: &StagingTable,
) -> Result<CommitOutcome, CommitError> {
    ctx.tracker.mark_commit_requested(tx_id)?;
    let commit_id = ctx.tracker.get_or_assign_commit_id(tx_id)?;

    let mut commits = vec![];
    for (partition, entries) in group_by_partition(&ctx.model, staging.snapshot()?)? {
        let record = ctx
            .tracker
            .get_or_assign_redo_record_id(tx_id, &partition, || ctx.lease.next_record_id())?;
        commits.push(PartitionCommit {
            partition,
            record,
            entries,
        });
    }

    let (remote, local) = tokio::join!(commit_remote(ctx, tx_id, &commits), commit_local(ctx, tx_id));
    if let Err(e) = remote.and(local) {
        slog::warn!(logger, "Commit {:?} of {} stopped, retry to resume: {}", commit_id, tx_id, e);
        return Err(e);
    }

    if ctx.tracker.is_complete(tx_id)? {
        mark_own_records_applied(ctx, logger, &commits).await;
        staging.discard();
        ctx.tracker.reinitialize(tx_id)?;
    }

    slog::debug!(logger, "Committed {} as {:?} to {} partitions", tx_id, commit_id, commits.len());
    Ok(CommitOutcome {
        commit_id,
        records: commits.into_iter().map(|c| (c.partition, c.record)).collect(),
    })
}

fn group_by_partition(
    model: &PartitionModel,
    snapshot: Vec<(StagedKey, Operation)>,
) -> Result<BTreeMap<PartitionId, Vec<(StagedKey, Operation)>>, CommitError> {
    let mut groups: BTreeMap<PartitionId, Vec<(StagedKey, Operation)>> = BTreeMap::new();
    for (key, op) in snapshot {
        let partition = model
            .partition_for_key(&key.table, &RangeBound::from_key(&key.key))
            .or_else(|| model.owner_of(&key.table))
            .ok_or_else(|| CommitError::NoOwningPartition(key.table.clone()))?;
        groups.entry(partition).or_default().push((key, op));
    }
    Ok(groups)
}

async fn commit_remote(ctx: &NodeContext, tx_id: &TxId, commits: &[PartitionCommit]) -> Result<(), CommitError> {
    if ctx.tracker.is_remote_done(tx_id)? {
        return Ok(());
    }

    for commit in commits {
        let digest = TransactionDigest::new(commit.entries.clone());
        ctx.redo_log.append_redo_record(&commit.record, digest.encode()).await?;

        for (key, op) in &commit.entries {
            let schema = ctx.local.table_schema(&key.table)?;
            ctx.dirty.mirror_write(&schema, &key.key, &MirrorChange::from(op)).await?;
        }

        let tit = match ctx.redo_log.partition_info(&commit.partition).await?.latest_tit {
            Some(tit) => tit,
            None => {
                ctx.redo_log
                    .initialize_partition_history(&commit.partition, ctx.me.clone())
                    .await?
            }
        };
        ctx.redo_log.append_redo_to_tit(&tit, &commit.record).await?;
        ctx.model.set_latest_tit(&commit.partition, tit)?;
    }

    ctx.tracker.mark_remote_done(tx_id)?;
    Ok(())
}

/// Records committed to a partition this node owns are already in its local store. Each is marked
/// applied if it is next in line; one behind unapplied records is left for replay.
async fn mark_own_records_applied(ctx: &NodeContext, logger: &slog::Logger, commits: &[PartitionCommit]) {
    for commit in commits {
        let partition = match ctx.model.partition(&commit.partition) {
            Some(partition) if partition.owner.as_ref() == Some(&ctx.me) => partition,
            _ => continue,
        };
        let tit = match partition.latest_tit {
            Some(tit) => tit,
            None => continue,
        };
        if let Err(e) = ctx.redo_log.mark_applied(&tit, &commit.record).await {
            slog::warn!(logger, "Could not mark {:?} applied in {}: {}", commit.record, tit, e);
        }
    }
}

async fn commit_local(ctx: &NodeContext, tx_id: &TxId) -> Result<(), CommitError> {
    if ctx.tracker.is_local_done(tx_id)? {
        return Ok(());
    }

    ctx.local.commit(ctx.tracker.connection(tx_id)?)?;
    ctx.tracker.mark_local_done(tx_id)?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("No partition owns table {0}")]
    NoOwningPartition(String),

    #[error("Commit tracker failure")]
    Tracker(#[from] TrackerError),

    #[error("Staged write set is unusable")]
    Staging(#[from] StagingError),

    #[error("Redo log append failed")]
    RedoLog(#[from] RedoLogError),

    #[error("Mirror write failed")]
    Sync(#[from] SyncError),

    #[error("Local commit failed")]
    Local(#[from] LocalStoreError),

    #[error("Partition model rejected the commit")]
    Partition(#[from] PartitionError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::NodeId;
    use crate::partition::{Partition, Range};
    use crate::store::{Row, RowKey};

    fn staged(table: &str, key: &str) -> (StagedKey, Operation) {
        (
            StagedKey::new(table, RowKey::new(key)),
            Operation::insert(Row::from_strs(&[key, "v"])),
        )
    }

    fn model() -> PartitionModel {
        let model = PartitionModel::new();
        for p in &["p1", "p2"] {
            model
                .add_partition(Partition::new(PartitionId::new(*p), Some(NodeId::new("a")), 3))
                .unwrap();
        }
        model
    }

    fn keys(groups: &BTreeMap<PartitionId, Vec<(StagedKey, Operation)>>, p: &str) -> Vec<String> {
        groups[&PartitionId::new(p)]
            .iter()
            .map(|(k, _)| k.key.as_str().to_string())
            .collect()
    }

    #[test]
    fn keys_are_routed_by_the_range_containing_them() {
        let model = model();
        let lower = Range::new(PartitionId::new("p1"), RangeBound::new("b", ""), Some(RangeBound::new("m", "")));
        let upper = Range::new(PartitionId::new("p2"), RangeBound::new("m", ""), None);
        model.add_range("kv", lower).unwrap();
        model.add_range("kv", upper).unwrap();

        let groups = group_by_partition(&model, vec![staged("kv", "c"), staged("kv", "z"), staged("kv", "m")]).unwrap();
        assert_eq!(keys(&groups, "p1"), vec!["c"]);
        assert_eq!(keys(&groups, "p2"), vec!["z", "m"]);
    }

    #[test]
    fn keys_outside_every_range_go_to_the_table_owner() {
        let model = model();
        let upper = Range::new(PartitionId::new("p2"), RangeBound::new("m", ""), None);
        model.add_range("kv", upper).unwrap();
        model.assign_table_if_unowned("other", &PartitionId::new("p1")).unwrap();

        let groups = group_by_partition(&model, vec![staged("kv", "a"), staged("other", "a")]).unwrap();
        assert_eq!(keys(&groups, "p2"), vec!["a"]);
        assert_eq!(keys(&groups, "p1"), vec!["a"]);
    }

    #[test]
    fn unowned_table_cannot_be_grouped() {
        let err = group_by_partition(&model(), vec![staged("kv", "a")]).unwrap_err();
        assert!(matches!(err, CommitError::NoOwningPartition(table) if table == "kv"));
    }
}
