//! Store - the single commit point for one optimistic container
//!
//! All commits funnel through `Store::commit`, which applies them under one
//! lock against the current container and swaps in the result. Readers only
//! ever see whole `Arc` snapshots.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use optimist_core::{
    IdAllocator, MonotonicAllocator, OptimistError, OptimistResult, Transform, TransactionId,
};
use optimist_state::{Commit, CommitKind, ContainerState};

use crate::{
    consume_reduce, BoxWorkflow, Consumer, Sink, StoreConfig, TransactionEvent, Workflow,
};

/// Commit and transaction counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub commits: u64,
    pub optimistic: u64,
    pub settled: u64,
    pub normal: u64,
    pub failed: u64,
    pub reverted: u64,
    /// Failures whose guess was left in place
    pub kept: u64,
    pub last_transaction: Option<TransactionId>,
}

impl StoreStats {
    fn record(&mut self, kind: CommitKind) {
        self.commits += 1;
        match kind {
            CommitKind::Optimistic(id) => {
                self.optimistic += 1;
                self.last_transaction = Some(id);
            }
            CommitKind::Settle(_) => self.settled += 1,
            CommitKind::Normal => self.normal += 1,
        }
    }

    /// Transactions whose guess is committed and whose outcome is still open
    pub fn in_flight(&self) -> u64 {
        self.optimistic.saturating_sub(self.settled + self.kept)
    }
}

struct StoreInner<T> {
    state: Mutex<Arc<ContainerState<T>>>,
    updates: watch::Sender<Arc<ContainerState<T>>>,
    stats: Mutex<StoreStats>,
    consumer: Consumer,
    config: StoreConfig,
}

/// Optimistic store - cheap to clone, all clones share one container
pub struct Store<T> {
    inner: Arc<StoreInner<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Store {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Store<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a store with default configuration
    pub fn new(initial: T) -> Self {
        Self::with_config(initial, StoreConfig::default())
    }

    /// Create a store with custom configuration
    pub fn with_config(initial: T, config: StoreConfig) -> Self {
        Self::with_allocator(initial, config, MonotonicAllocator::shared())
    }

    /// Create a store with an injected id allocator
    pub fn with_allocator(initial: T, config: StoreConfig, ids: Arc<dyn IdAllocator>) -> Self {
        let container = Arc::new(ContainerState::initialize(initial));
        let (updates, _) = watch::channel(Arc::clone(&container));
        let consumer = Consumer::new(ids, config.failure_policy).with_label(&config.name);

        Store {
            inner: Arc::new(StoreInner {
                state: Mutex::new(container),
                updates,
                stats: Mutex::new(StoreStats::default()),
                consumer,
                config,
            }),
        }
    }

    /// Current value
    pub fn current(&self) -> T {
        self.inner.state.lock().current.clone()
    }

    /// Whole container snapshot
    pub fn snapshot(&self) -> Arc<ContainerState<T>> {
        Arc::clone(&self.inner.state.lock())
    }

    /// Receive every new snapshot
    pub fn subscribe(&self) -> watch::Receiver<Arc<ContainerState<T>>> {
        self.inner.updates.subscribe()
    }

    pub fn stats(&self) -> StoreStats {
        self.inner.stats.lock().clone()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn consumer(&self) -> &Consumer {
        &self.inner.consumer
    }

    /// Commit a synchronous transform
    pub fn reduce(&self, transform: Transform<T>) {
        consume_reduce(self, transform);
    }

    /// Run a transaction against this store
    ///
    /// The optimistic guess is committed before this returns; the returned
    /// future settles the transaction. Dropping the future before it
    /// completes fails the transaction under the store's failure policy.
    pub fn transact<R, W>(
        &self,
        workflow: W,
        optimistic: Transform<T>,
    ) -> impl Future<Output = OptimistResult<TransactionId>> + Send + 'static
    where
        R: Send + 'static,
        W: Workflow<T, R> + 'static,
    {
        self.inner
            .consumer
            .consume_optimistic(self.clone(), workflow, optimistic)
    }

    /// Start a transaction and detach the remainder onto the tokio runtime
    ///
    /// Fails with `NoRuntime` outside a runtime, before anything is
    /// committed. Dropping the handle does not cancel the transaction.
    pub fn spawn_transaction<R>(
        &self,
        workflow: BoxWorkflow<T, R>,
        optimistic: Transform<T>,
    ) -> OptimistResult<TransactionHandle>
    where
        R: Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| OptimistError::NoRuntime(e.to_string()))?;

        let txn = self.inner.consumer.begin(self.clone(), workflow, optimistic);
        let id = txn.id();

        Ok(TransactionHandle {
            id,
            join: runtime.spawn(txn.run()),
        })
    }
}

impl<T> Sink<T> for Store<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn commit(&self, commit: Commit<T>) {
        let kind = commit.kind();
        let mut state = self.inner.state.lock();
        let next = Arc::new(commit.apply(&state));
        *state = Arc::clone(&next);

        self.inner.stats.lock().record(kind);

        if self.inner.config.log_commits {
            tracing::trace!(
                store = %self.inner.config.name,
                kind = %kind,
                queue = next.queue.len(),
                optimistic = next.optimistic,
                "commit"
            );
        }

        // Published under the lock so subscribers see snapshots in commit order
        self.inner.updates.send_replace(next);
    }

    fn observe(&self, event: TransactionEvent<'_>) {
        let mut stats = self.inner.stats.lock();
        match event {
            TransactionEvent::Reverted(_) => stats.reverted += 1,
            TransactionEvent::Kept(_) => stats.kept += 1,
            TransactionEvent::Failed(..) => stats.failed += 1,
        }
    }
}

/// Detached transaction - await it to learn the outcome, or drop it
#[derive(Debug)]
pub struct TransactionHandle {
    id: TransactionId,
    join: JoinHandle<OptimistResult<TransactionId>>,
}

impl TransactionHandle {
    #[inline]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the transaction to settle or fail
    pub async fn settled(self) -> OptimistResult<TransactionId> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(OptimistError::TaskPanicked(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FailurePolicy, TwoStep};
    use optimist_core::{identity, transform};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn add(n: i32) -> Transform<i32> {
        transform(move |v: &i32| v + n)
    }

    fn gated() -> (oneshot::Sender<i32>, TwoStep<i32, i32>) {
        let (tx, rx) = oneshot::channel::<i32>();
        let wf = TwoStep::new(async move { rx.await.map_err(OptimistError::task) }, add);
        (tx, wf)
    }

    #[test]
    fn test_sync_reduce() {
        let store = Store::new(1);
        store.reduce(add(1));
        store.reduce(transform(|v: &i32| v * 10));

        assert_eq!(store.current(), 20);
        assert!(store.snapshot().archive.is_none());
        assert_eq!(store.stats().normal, 2);
    }

    #[test]
    fn test_identity_reduce_keeps_span_closed() {
        let store = Store::new(3);
        store.reduce(identity());

        let snap = store.snapshot();
        assert_eq!(snap.current, 3);
        assert!(!snap.optimistic);
        assert!(snap.archive.is_none());
    }

    #[tokio::test]
    async fn test_transact_with_interleaved_reduce() {
        let store = Store::new(0);
        let (tx, wf) = gated();

        let settle = store.transact(wf, add(100));
        assert_eq!(store.current(), 100);

        store.reduce(add(1));
        assert_eq!(store.current(), 101);

        tx.send(5).unwrap();
        settle.await.unwrap();

        assert_eq!(store.current(), 6);
        assert!(store.snapshot().is_consistent());
        assert_eq!(store.stats().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_spawned_transaction_and_subscriber() {
        let store = Store::new(1);
        let mut updates = store.subscribe();
        let (tx, wf) = gated();

        let handle = store
            .spawn_transaction(wf.boxed(), transform(|_: &i32| 3))
            .unwrap();
        assert_eq!(store.current(), 3);
        assert!(updates.has_changed().unwrap());
        assert_eq!(updates.borrow_and_update().current, 3);

        tx.send(1).unwrap();
        updates.changed().await.unwrap();
        assert_eq!(updates.borrow_and_update().current, 2);

        assert_eq!(handle.settled().await.unwrap(), TransactionId::new(1));
    }

    #[tokio::test]
    async fn test_failed_transaction_is_counted() {
        let store = Store::new(10);
        let wf = TwoStep::new(
            async { Err::<i32, _>(OptimistError::task("refused")) },
            add,
        );

        let result = store.transact(wf, add(5)).await;

        assert!(result.is_err());
        assert_eq!(store.current(), 10);
        let stats = store.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.reverted, 1);
    }

    #[tokio::test]
    async fn test_compat_store_keeps_guess() {
        let store = Store::with_config(10, StoreConfig::compat());
        let wf = TwoStep::new(
            async { Err::<i32, _>(OptimistError::task("refused")) },
            add,
        );

        let _ = store.transact(wf, add(5)).await;

        assert_eq!(store.config().failure_policy, FailurePolicy::KeepOptimistic);
        assert_eq!(store.current(), 15);
        let stats = store.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.reverted, 0);
        assert_eq!(stats.kept, 1);
        assert_eq!(stats.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_timed_out_transact_reverts_guess() {
        let store = Store::new(0);
        let (_tx, wf) = gated();

        let result =
            tokio::time::timeout(Duration::from_millis(5), store.transact(wf, add(100))).await;

        assert!(result.is_err());
        assert_eq!(store.current(), 0);
        assert!(!store.snapshot().is_optimistic());
        assert!(store.snapshot().is_consistent());
        let stats = store.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.reverted, 1);
        assert_eq!(stats.in_flight(), 0);
    }

    #[test]
    fn test_spawn_outside_runtime_commits_nothing() {
        let store = Store::new(7);
        let (_tx, wf) = gated();

        let err = store.spawn_transaction(wf.boxed(), add(100)).unwrap_err();

        assert!(matches!(err, OptimistError::NoRuntime(_)));
        assert_eq!(store.current(), 7);
        assert!(store.snapshot().pending_transactions().is_empty());
        assert_eq!(store.stats(), StoreStats::default());
    }

    #[tokio::test]
    async fn test_injected_allocator() {
        let store = Store::with_allocator(
            0,
            StoreConfig::default(),
            Arc::new(MonotonicAllocator::starting_at(40)),
        );
        let (tx, wf) = gated();

        let handle = store.spawn_transaction(wf.boxed(), add(1)).unwrap();
        assert_eq!(handle.id(), TransactionId::new(40));
        assert_eq!(store.stats().last_transaction, Some(TransactionId::new(40)));

        tx.send(2).unwrap();
        handle.settled().await.unwrap();
        assert_eq!(store.current(), 2);
    }
}
