use crate::api::node::{MirrorNode, NodeContext};
use crate::api::options::{NodeOptions, NodeOptionsValidated};
use crate::commit::TxCommitTracker;
use crate::ids::NodeId;
use crate::partition::{ConfigFileError, PartitionConfiguration, PartitionError, PartitionModel};
use crate::redolog::{Lease, PartitionInfoRow, RedoLog, RedoLogError, RedoLogTables};
use crate::store::{DistributedBackend, LocalBackend, RemoteStore};
use crate::sync::DirtySync;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub struct NodeConfig {
    pub node_id: String,
    /// Every replica of the mirrored database, including this node.
    pub replicas: Vec<String>,
    /// Prefix of every table this node creates in the distributed store.
    pub namespace: String,
    pub partitions: PartitionConfiguration,
    pub local: LocalBackend,
    pub distributed: DistributedBackend,
    pub info_logger: slog::Logger,
    pub options: NodeOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum NodeCreationError {
    #[error("Illegal options for configuring node: {0}")]
    IllegalNodeOptions(String),
    #[error("my node ID not in replica list")]
    MeNotInReplicas,
    #[error("Invalid partition configuration")]
    InvalidPartitionConfiguration(#[from] ConfigFileError),
    #[error("Partition model rejected stored state")]
    Partition(#[from] PartitionError),
    #[error("Failed to bootstrap redo log")]
    Bootstrap(#[from] RedoLogError),
}

/// Creates a node: sets up the redo log tables, publishes the configured partitions and starts a
/// history for every partition this node owns.
pub async fn try_create_node(config: NodeConfig) -> Result<MirrorNode, NodeCreationError> {
    let node_id = &config.node_id;
    if !config.replicas.iter().any(|r| r == node_id) {
        return Err(NodeCreationError::MeNotInReplicas);
    }

    let options = NodeOptionsValidated::try_from(config.options)
        .map_err(|e| NodeCreationError::IllegalNodeOptions(e.to_string()))?;
    let me = NodeId::new(config.node_id);
    let replicas = config.replicas.into_iter().map(NodeId::new).collect();

    let logger = config.info_logger.new(slog::o!("node" => me.to_string()));
    let shutdown = CancellationToken::new();
    let remote = RemoteStore::new(
        logger.clone(),
        config.distributed.into_store(),
        options.remote_call_timeout,
        options.lock_acquisition_timeout,
        shutdown.clone(),
    );

    let redo_log = RedoLog::new(logger.clone(), remote.clone(), RedoLogTables::new(&config.namespace));
    redo_log.create_structures().await?;

    let model = config.partitions.into_model()?;
    publish_partitions(&logger, &redo_log, &model, &me).await?;

    let lease = Lease::generate();
    slog::info!(logger, "Node {} started with lease {}", me, lease.id());

    let dirty = DirtySync::new(logger.clone(), remote, config.namespace, me.clone(), replicas);
    let ctx = NodeContext {
        tracker: TxCommitTracker::new(logger.clone()),
        logger,
        me,
        local: config.local.into_store(),
        redo_log,
        dirty,
        model,
        lease,
        options,
        shutdown,
        staging: Mutex::new(HashMap::new()),
    };
    Ok(MirrorNode::new(ctx))
}

/// Reconciles the configured partitions with the partition info rows of the distributed store.
/// Stored ownership wins over the configuration file.
async fn publish_partitions(
    logger: &slog::Logger,
    redo_log: &RedoLog,
    model: &PartitionModel,
    me: &NodeId,
) -> Result<(), NodeCreationError> {
    for partition in model.partitions() {
        let configured = PartitionInfoRow {
            id: partition.id.clone(),
            owner: partition.owner.clone(),
            replication_factor: partition.replication_factor,
            tables: partition.tables.clone(),
            // A TIT named only by the file may not exist in this store.
            latest_tit: None,
        };
        let stored = redo_log.ensure_partition_info_row(configured).await?;

        let owner = stored.owner.clone().or_else(|| partition.owner.clone());
        if let Some(owner) = &owner {
            if partition.owner.as_ref() != Some(owner) {
                slog::info!(logger, "Partition {} is owned by {} in the redo log", partition.id, owner);
            }
            model.set_partition_owner(&partition.id, owner.clone())?;
        }

        if owner.as_ref() == Some(me) {
            let tit = redo_log.initialize_partition_history(&partition.id, me.clone()).await?;
            model.set_latest_tit(&partition.id, tit)?;
            for table in &partition.tables {
                redo_log.create_table_to_partition_row(table, &partition.id).await?;
            }
        } else if let Some(tit) = stored.latest_tit {
            model.set_latest_tit(&partition.id, tit)?;
        }
    }
    Ok(())
}
