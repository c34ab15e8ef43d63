use std::convert::TryFrom;
use tokio::time::Duration;

#[derive(Clone, Default)]
pub struct NodeOptions {
    /// Upper bound on any single call to the distributed store.
    pub remote_call_timeout: Option<Duration>,
    /// Upper bound on waiting for a distributed lock.
    pub lock_acquisition_timeout: Option<Duration>,
    /// Redo records applied per local transaction during replay.
    pub replay_batch_size: Option<usize>,
}

#[derive(Clone)]
pub(crate) struct NodeOptionsValidated {
    pub remote_call_timeout: Duration,
    pub lock_acquisition_timeout: Duration,
    pub replay_batch_size: usize,
}

impl NodeOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.remote_call_timeout == Duration::from_millis(0) {
            return Err("Remote call timeout must be greater than zero");
        }
        if self.lock_acquisition_timeout == Duration::from_millis(0) {
            return Err("Lock acquisition timeout must be greater than zero");
        }
        if self.replay_batch_size == 0 {
            return Err("Replay batch size must be at least 1");
        }

        Ok(())
    }
}

impl TryFrom<NodeOptions> for NodeOptionsValidated {
    type Error = &'static str;

    fn try_from(options: NodeOptions) -> Result<Self, Self::Error> {
        let values = NodeOptionsValidated {
            remote_call_timeout: options.remote_call_timeout.unwrap_or(Duration::from_secs(2)),
            lock_acquisition_timeout: options.lock_acquisition_timeout.unwrap_or(Duration::from_secs(5)),
            replay_batch_size: options.replay_batch_size.unwrap_or(64),
        };

        values.validate()?;
        Ok(values)
    }
}
