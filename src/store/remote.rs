use crate::store::distributed::{DistributedStore, LockId, StoreError, StoreRead, StoreWrite, StoredRow, WriteMode};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// RemoteStore is the node's handle to the distributed store. Every call is bounded by a timeout and
/// aborted when the node shuts down. An elapsed timeout is a failed step, never a success.
#[derive(Clone)]
pub struct RemoteStore {
    logger: slog::Logger,
    inner: Arc<dyn DistributedStore>,
    call_timeout: Duration,
    lock_timeout: Duration,
    shutdown: CancellationToken,
}

impl RemoteStore {
    pub(crate) fn new(
        logger: slog::Logger,
        inner: Arc<dyn DistributedStore>,
        call_timeout: Duration,
        lock_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        RemoteStore {
            logger,
            inner,
            call_timeout,
            lock_timeout,
            shutdown,
        }
    }

    pub async fn create_table(&self, table: &str) -> Result<(), StoreError> {
        self.bounded(self.call_timeout, self.inner.create_table(table))
            .await
            .unwrap_or(Err(StoreError::Timeout))
    }

    pub async fn write(&self, write: StoreWrite, mode: WriteMode) -> Result<(), StoreError> {
        // A critical write without a held lock waits for the key's lock inside the store.
        let timeout = match mode {
            WriteMode::Critical(None) => self.call_timeout + self.lock_timeout,
            _ => self.call_timeout,
        };
        self.bounded(timeout, self.inner.write(write, mode))
            .await
            .unwrap_or(Err(StoreError::Timeout))
    }

    pub async fn read(&self, read: StoreRead) -> Result<Vec<StoredRow>, StoreError> {
        self.bounded(self.call_timeout, self.inner.read(read))
            .await
            .unwrap_or(Err(StoreError::Timeout))
    }

    pub async fn acquire_lock(&self, resource: &str) -> Result<LockId, StoreError> {
        slog::debug!(self.logger, "Acquiring lock for {}", resource);
        self.bounded(self.lock_timeout, self.inner.acquire_lock(resource))
            .await
            .unwrap_or_else(|| Err(StoreError::LockTimeout(resource.to_string())))
    }

    pub async fn release_lock(&self, lock: LockId) -> Result<(), StoreError> {
        self.bounded(self.call_timeout, self.inner.release_lock(lock))
            .await
            .unwrap_or(Err(StoreError::Timeout))
    }

    /// Release that only logs on failure. Used on paths that already have a result to return.
    pub(crate) async fn release_lock_logged(&self, lock: LockId) {
        let lock_debug = format!("{:?}", lock);
        if let Err(e) = self.release_lock(lock).await {
            slog::warn!(self.logger, "Failed to release {}: {}", lock_debug, e);
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    // None if the timeout elapsed.
    async fn bounded<T, F>(&self, timeout: Duration, call: F) -> Option<Result<T, StoreError>>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Some(Err(StoreError::Cancelled)),
            result = tokio::time::timeout(timeout, call) => result.ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDistributedStore;

    fn remote(inner: Arc<InMemoryDistributedStore>, shutdown: CancellationToken) -> RemoteStore {
        RemoteStore::new(
            slog::Logger::root(slog::Discard, slog::o!()),
            inner,
            Duration::from_millis(50),
            Duration::from_millis(50),
            shutdown,
        )
    }

    #[tokio::test]
    async fn stalled_call_times_out() {
        let inner = Arc::new(InMemoryDistributedStore::new());
        let store = remote(inner.clone(), CancellationToken::new());
        store.create_table("t").await.unwrap();

        inner.set_latency(Some(Duration::from_secs(5)));
        let err = store
            .read(StoreRead::Table { table: "t".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout));
    }

    #[tokio::test]
    async fn contended_lock_times_out() {
        let inner = Arc::new(InMemoryDistributedStore::new());
        let store = remote(inner, CancellationToken::new());

        let held = store.acquire_lock("r").await.unwrap();
        let err = store.acquire_lock("r").await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(ref r) if r == "r"));

        store.release_lock(held).await.unwrap();
        store.acquire_lock("r").await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_cancels_in_flight_calls() {
        let inner = Arc::new(InMemoryDistributedStore::new());
        let shutdown = CancellationToken::new();
        let store = remote(inner.clone(), shutdown.clone());
        store.create_table("t").await.unwrap();

        inner.set_latency(Some(Duration::from_secs(5)));
        shutdown.cancel();
        let err = store
            .read(StoreRead::Table { table: "t".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
        assert!(store.is_shutdown());
    }
}
