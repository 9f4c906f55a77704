//! End-to-end scenarios against a live store
//!
//! `GatedStore` pairs every transaction with a `Gate`, so a test can start
//! several transactions, interleave plain dispatches, and settle them in any
//! order it likes.

use optimist_core::{OptimistError, OptimistResult, Transform, TransactionId};
use optimist_runtime::{Store, StoreConfig, TransactionHandle, TwoStep};

use crate::Gate;

/// In-flight transaction started through a `GatedStore`
pub struct GatedTransaction<R> {
    gate: Gate<R>,
    handle: TransactionHandle,
}

impl<R> GatedTransaction<R>
where
    R: Send + 'static,
{
    pub fn id(&self) -> TransactionId {
        self.handle.id()
    }

    /// Resolve the awaited value and wait for the settle commit
    pub async fn resolve(self, value: R) -> OptimistResult<TransactionId> {
        self.gate.resolve(value);
        self.handle.settled().await
    }

    /// Reject the awaited value and wait for the failure to be handled
    pub async fn reject(self, reason: &str) -> OptimistResult<TransactionId> {
        self.gate.reject(OptimistError::task(reason));
        self.handle.settled().await
    }
}

/// Store whose transactions are settled by hand
pub struct GatedStore<T> {
    store: Store<T>,
}

impl<T> GatedStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        GatedStore {
            store: Store::new(initial),
        }
    }

    pub fn with_config(initial: T, config: StoreConfig) -> Self {
        GatedStore {
            store: Store::with_config(initial, config),
        }
    }

    pub fn store(&self) -> &Store<T> {
        &self.store
    }

    pub fn current(&self) -> T {
        self.store.current()
    }

    pub fn reduce(&self, transform: Transform<T>) {
        self.store.reduce(transform);
    }

    /// Start a transaction that settles with `settle(value)` once resolved
    ///
    /// Fails with `NoRuntime` outside a tokio runtime.
    pub fn begin<R, S>(
        &self,
        optimistic: Transform<T>,
        settle: S,
    ) -> OptimistResult<GatedTransaction<R>>
    where
        R: Send + 'static,
        S: FnOnce(R) -> Transform<T> + Send + 'static,
    {
        let (gate, pending) = Gate::pair();
        let workflow = TwoStep::new(pending, settle);
        let handle = self.store.spawn_transaction(workflow.boxed(), optimistic)?;

        Ok(GatedTransaction { gate, handle })
    }
}
