use crate::store::distributed::DistributedStore;
use crate::store::in_memory::{InMemoryDistributedStore, InMemoryLocalStore};
use crate::store::local::LocalStore;
use std::sync::Arc;

/// Which relational store backs the node's local copy.
#[derive(Clone)]
pub enum LocalBackend {
    InMemory(Arc<InMemoryLocalStore>),
    /// Any other implementation of the local store contract, e.g. an embedded SQL engine adapter.
    External(Arc<dyn LocalStore>),
}

impl LocalBackend {
    pub(crate) fn into_store(self) -> Arc<dyn LocalStore> {
        match self {
            LocalBackend::InMemory(store) => store,
            LocalBackend::External(store) => store,
        }
    }
}

/// Which distributed store the node mirrors into. Nodes of one cluster must share it.
#[derive(Clone)]
pub enum DistributedBackend {
    InMemory(Arc<InMemoryDistributedStore>),
    External(Arc<dyn DistributedStore>),
}

impl DistributedBackend {
    pub(crate) fn into_store(self) -> Arc<dyn DistributedStore> {
        match self {
            DistributedBackend::InMemory(store) => store,
            DistributedBackend::External(store) => store,
        }
    }
}
