//! Controllable futures
//!
//! A `Gate` is the sending half of a one-shot result. Its paired `Pending`
//! future stays unresolved until the test resolves or rejects the gate, so
//! tests decide exactly when each transaction settles.

use futures::FutureExt;
use tokio::sync::oneshot;

use optimist_core::{OptimistError, OptimistResult};
use optimist_runtime::Pending;

/// Sending half of a controllable future
#[derive(Debug)]
pub struct Gate<R> {
    tx: oneshot::Sender<OptimistResult<R>>,
}

impl<R> Gate<R>
where
    R: Send + 'static,
{
    /// Create a gate and the future it controls
    ///
    /// Dropping the gate rejects the future.
    pub fn pair() -> (Gate<R>, Pending<R>) {
        let (tx, rx) = oneshot::channel();
        let pending = rx
            .map(|received| match received {
                Ok(result) => result,
                Err(_) => Err(OptimistError::TaskFailed("gate dropped".to_string())),
            })
            .boxed();

        (Gate { tx }, pending)
    }

    /// Resolve the future; false if it was already dropped
    pub fn resolve(self, value: R) -> bool {
        self.tx.send(Ok(value)).is_ok()
    }

    /// Reject the future; false if it was already dropped
    pub fn reject(self, err: OptimistError) -> bool {
        self.tx.send(Err(err)).is_ok()
    }

    /// Whether the paired future has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
