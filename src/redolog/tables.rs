/// Names of the distributed-store tables that hold the redo log, all under one namespace so that
/// several clusters can share a store.
#[derive(Clone, Debug)]
pub struct RedoLogTables {
    pub partition_info: String,
    pub tit: String,
    pub redo_records: String,
    pub redo_history: String,
    pub table_to_partition: String,
}

impl RedoLogTables {
    pub fn new(namespace: &str) -> Self {
        RedoLogTables {
            partition_info: format!("{}.partition_info", namespace),
            tit: format!("{}.tit", namespace),
            redo_records: format!("{}.redo_records", namespace),
            redo_history: format!("{}.redo_history", namespace),
            table_to_partition: format!("{}.table_to_partition", namespace),
        }
    }

    pub(crate) fn all(&self) -> [&str; 5] {
        [
            &self.partition_info,
            &self.tit,
            &self.redo_records,
            &self.redo_history,
            &self.table_to_partition,
        ]
    }
}
