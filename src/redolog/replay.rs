use crate::ids::{LeaseId, PartitionId, RedoRecordId, TitId};
use crate::redolog::log::{RedoLog, RedoLogError};
use crate::redolog::rows::TitRow;
use crate::staging::TransactionDigest;
use crate::store::{upsert, LocalConnectionId, LocalStatement, LocalStore, LocalStoreError};
use std::collections::HashMap;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReplayReport {
    pub tit_rows: usize,
    pub records_applied: usize,
}

/// Applies every not-yet-applied redo record of `partition` to the local store, oldest TIT row
/// first. The TIT cursor advances after each batch, so an interrupted replay resumes where it
/// stopped.
pub async fn replay_partition(
    logger: &slog::Logger,
    log: &RedoLog,
    local: &dyn LocalStore,
    partition: &PartitionId,
    batch_size: usize,
) -> Result<ReplayReport, RedoLogError> {
    let mut report = ReplayReport::default();
    for tit in log.history_chain(partition).await? {
        let applied = replay_tit(log, local, &tit, batch_size).await?;
        if applied > 0 {
            report.tit_rows += 1;
            report.records_applied += applied;
        }
    }

    slog::info!(
        logger,
        "Replayed partition {}: {} records from {} TIT rows",
        partition,
        report.records_applied,
        report.tit_rows
    );
    Ok(report)
}

/// Returns the number of records applied.
pub async fn replay_tit(
    log: &RedoLog,
    local: &dyn LocalStore,
    tit: &TitId,
    batch_size: usize,
) -> Result<usize, RedoLogError> {
    let row = log.tit_row(tit).await?;
    if row.applied && row.unapplied().is_empty() {
        return Ok(0);
    }
    check_lease_order(&row)?;

    let mut cursor = row.latest_applied;
    let mut applied = 0;
    for batch in row.unapplied().chunks(batch_size.max(1)) {
        let mut digests = Vec::with_capacity(batch.len());
        for record in batch {
            let bytes = log.redo_record(record).await?;
            digests.push(TransactionDigest::decode(&bytes)?);
        }

        apply_digests(local, &digests)?;
        cursor += batch.len() as i64;
        applied += batch.len();
        log.advance_applied(tit, cursor).await?;
    }

    if applied == 0 {
        // Nothing pending but the flag was never set.
        log.advance_applied(tit, cursor).await?;
    }
    Ok(applied)
}

fn check_lease_order(row: &TitRow) -> Result<(), RedoLogError> {
    let mut last: HashMap<&LeaseId, u64> = HashMap::new();
    for record in row.unapplied() {
        if let Some(previous) = last.get(&record.lease_id) {
            if record.lease_counter < *previous {
                return Err(out_of_order(row, record));
            }
        }
        last.insert(&record.lease_id, record.lease_counter);
    }
    Ok(())
}

fn out_of_order(row: &TitRow, record: &RedoRecordId) -> RedoLogError {
    RedoLogError::OutOfOrder {
        tit: row.id.clone(),
        record: record.clone(),
    }
}

/// Applies digests in order inside one local transaction.
fn apply_digests(local: &dyn LocalStore, digests: &[TransactionDigest]) -> Result<(), RedoLogError> {
    let conn = local.open_connection()?;
    let result = apply_in_transaction(local, conn, digests);
    if result.is_err() {
        let _ = local.rollback(conn);
    }
    local.close_connection(conn);
    Ok(result?)
}

fn apply_in_transaction(
    local: &dyn LocalStore,
    conn: LocalConnectionId,
    digests: &[TransactionDigest],
) -> Result<(), LocalStoreError> {
    for digest in digests {
        for (key, op) in &digest.entries {
            match &op.new_value {
                Some(row) => upsert(local, conn, &key.table, row.clone())?,
                None => {
                    let delete = LocalStatement::Delete {
                        table: key.table.clone(),
                        key: key.key.clone(),
                    };
                    local.execute(conn, delete)?;
                }
            }
        }
    }
    local.commit(conn)
}
