//! Async workflow consumer
//!
//! Drives one workflow per transaction and turns its steps into commits:
//! the first `Await` commits the optimistic guess, the first `Yield` after it
//! settles the transaction, every other `Yield` is a plain commit.
//!
//! The prelude (id allocation, advancing to the first suspension, the
//! optimistic commit) runs eagerly in `begin`, so state reflects the guess
//! before the caller regains control. Only the awaiting remainder is async.
//!
//! A transaction dropped while its guess is showing is treated as failed and
//! the store's failure policy applies.

use std::future::Future;
use std::sync::Arc;

use tracing::Instrument;

use optimist_core::{
    identity, IdAllocator, MonotonicAllocator, OptimistError, OptimistResult, Transform,
    TransactionId,
};
use optimist_state::{apply_normal, apply_optimistic, apply_rollback_and_settle, Commit};

use crate::{BoxWorkflow, FailurePolicy, Pending, Resume, Step, Workflow};

/// Transaction lifecycle notifications delivered to a sink
#[derive(Debug)]
pub enum TransactionEvent<'a> {
    /// The guess was discarded after a failure
    Reverted(TransactionId),
    /// The guess was left in place after a failure
    Kept(TransactionId),
    /// The workflow ended without handling a failure
    Failed(TransactionId, &'a OptimistError),
}

/// Receiver of commits - owned by the binding layer
///
/// `commit` is called exactly once per commit, synchronously, and must apply
/// it against the container that is current at that moment.
pub trait Sink<T>: Send + Sync {
    fn commit(&self, commit: Commit<T>);

    /// Observe transaction lifecycle events
    fn observe(&self, _event: TransactionEvent<'_>) {}
}

impl<T, F> Sink<T> for F
where
    F: Fn(Commit<T>) + Send + Sync,
{
    fn commit(&self, commit: Commit<T>) {
        self(commit)
    }
}

/// Commit a synchronous transform
pub fn consume_reduce<T, S>(sink: &S, transform: Transform<T>)
where
    T: Clone + Send + Sync + 'static,
    S: Sink<T> + ?Sized,
{
    sink.commit(apply_normal(transform));
}

/// Workflow driver - owns the id allocator and failure policy of one store
#[derive(Clone)]
pub struct Consumer {
    ids: Arc<dyn IdAllocator>,
    policy: FailurePolicy,
    label: Arc<str>,
}

impl Consumer {
    pub fn new(ids: Arc<dyn IdAllocator>, policy: FailurePolicy) -> Self {
        Consumer {
            ids,
            policy,
            label: Arc::from("store"),
        }
    }

    /// Label attached to transaction spans
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Arc::from(label);
        self
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn consume_reduce<T, S>(&self, sink: &S, transform: Transform<T>)
    where
        T: Clone + Send + Sync + 'static,
        S: Sink<T> + ?Sized,
    {
        consume_reduce(sink, transform);
    }

    /// Run the full transaction; the prelude happens before this returns
    pub fn consume_optimistic<T, R, S, W>(
        &self,
        sink: S,
        workflow: W,
        optimistic: Transform<T>,
    ) -> impl Future<Output = OptimistResult<TransactionId>> + Send + 'static
    where
        T: Clone + Send + Sync + 'static,
        R: Send + 'static,
        S: Sink<T> + 'static,
        W: Workflow<T, R> + 'static,
    {
        self.begin(sink, Box::new(workflow), optimistic).run()
    }

    /// Allocate an id and drive the workflow to its first suspension
    pub fn begin<T, R, S>(
        &self,
        sink: S,
        workflow: BoxWorkflow<T, R>,
        optimistic: Transform<T>,
    ) -> Transaction<T, R, S>
    where
        T: Clone + Send + Sync + 'static,
        R: Send + 'static,
        S: Sink<T> + 'static,
    {
        let id = self.ids.next_id();
        let span = tracing::debug_span!("transaction", id = %id, store = %self.label);

        let _enter = span.enter();
        tracing::debug!("transaction started");

        let mut txn = Transaction {
            id,
            sink,
            workflow,
            optimistic: Some(optimistic),
            suspended: false,
            settled: false,
            closed: false,
            policy: self.policy,
            progress: Progress::Finished,
            span: span.clone(),
        };
        txn.progress = txn.advance(Resume::Start);
        txn
    }
}

impl Default for Consumer {
    fn default() -> Self {
        Consumer::new(MonotonicAllocator::shared(), FailurePolicy::default())
    }
}

enum Progress<R> {
    Suspended(Pending<R>),
    Finished,
    Failed(OptimistError),
}

/// One in-flight transaction
pub struct Transaction<T, R, S>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    S: Sink<T> + 'static,
{
    id: TransactionId,
    sink: S,
    workflow: BoxWorkflow<T, R>,
    optimistic: Option<Transform<T>>,
    suspended: bool,
    settled: bool,
    /// Outcome already reported by `finish` or `fail`
    closed: bool,
    policy: FailurePolicy,
    progress: Progress<R>,
    span: tracing::Span,
}

impl<T, R, S> Transaction<T, R, S>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    S: Sink<T> + 'static,
{
    #[inline]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Whether the optimistic guess has been committed
    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    #[inline]
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Drive the remainder of the transaction to completion
    pub fn run(mut self) -> impl Future<Output = OptimistResult<TransactionId>> + Send + 'static {
        let span = self.span.clone();
        async move {
            loop {
                match std::mem::replace(&mut self.progress, Progress::Finished) {
                    Progress::Suspended(pending) => {
                        let input = match pending.await {
                            Ok(value) => Resume::Resolved(value),
                            Err(err) => Resume::Rejected(err),
                        };
                        self.progress = self.advance(input);
                    }
                    Progress::Finished => return self.finish(),
                    Progress::Failed(err) => return Err(self.fail(err)),
                }
            }
        }
        .instrument(span)
    }

    /// Feed `input` and process steps until the workflow suspends or ends
    fn advance(&mut self, mut input: Resume<R>) -> Progress<R> {
        loop {
            match self.workflow.resume(input) {
                Step::Await(pending) => {
                    if !self.suspended {
                        self.suspended = true;
                        if let Some(optimistic) = self.optimistic.take() {
                            tracing::debug!("committing optimistic guess");
                            self.sink.commit(apply_optimistic(self.id, optimistic));
                        }
                    }
                    return Progress::Suspended(pending);
                }
                Step::Yield(transform) => {
                    if self.suspended && !self.settled {
                        self.settled = true;
                        tracing::debug!("settling");
                        self.sink
                            .commit(apply_rollback_and_settle(self.id, transform));
                    } else {
                        self.sink.commit(apply_normal(transform));
                    }
                    input = Resume::Committed;
                }
                Step::Fail(err) => return Progress::Failed(err),
                Step::Done => return Progress::Finished,
            }
        }
    }

    fn finish(&mut self) -> OptimistResult<TransactionId> {
        self.closed = true;
        if self.suspended && !self.settled {
            let err = OptimistError::ContractViolation(format!(
                "workflow for {} finished without settling",
                self.id
            ));
            tracing::error!(error = %err, "transaction left unsettled");
            self.sink.observe(TransactionEvent::Failed(self.id, &err));
            self.apply_policy();
            return Err(err);
        }

        tracing::debug!(suspended = self.suspended, "transaction finished");
        Ok(self.id)
    }

    fn fail(&mut self, err: OptimistError) -> OptimistError {
        self.closed = true;
        let err = match err {
            err @ OptimistError::TransactionFailed { .. } => err,
            err @ OptimistError::ContractViolation(_) => err,
            other => OptimistError::TransactionFailed {
                id: self.id,
                reason: other.to_string(),
            },
        };

        tracing::error!(error = %err, "transaction failed");
        self.sink.observe(TransactionEvent::Failed(self.id, &err));
        self.apply_policy();
        err
    }

    fn apply_policy(&mut self) {
        if !self.suspended || self.settled {
            return;
        }

        match self.policy {
            FailurePolicy::Revert => {
                self.settled = true;
                tracing::warn!("reverting optimistic guess");
                self.sink
                    .commit(apply_rollback_and_settle(self.id, identity()));
                self.sink.observe(TransactionEvent::Reverted(self.id));
            }
            FailurePolicy::KeepOptimistic => {
                tracing::warn!("keeping optimistic guess after failure");
                self.sink.observe(TransactionEvent::Kept(self.id));
            }
        }
    }
}

impl<T, R, S> Drop for Transaction<T, R, S>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    S: Sink<T> + 'static,
{
    fn drop(&mut self) {
        if self.closed || !self.suspended || self.settled || std::thread::panicking() {
            return;
        }

        let span = self.span.clone();
        let _enter = span.enter();

        let err = OptimistError::TransactionFailed {
            id: self.id,
            reason: "dropped before settling".to_string(),
        };
        tracing::error!(error = %err, "transaction abandoned");
        self.sink.observe(TransactionEvent::Failed(self.id, &err));
        self.apply_policy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Immediate, TwoStep};
    use optimist_core::transform;
    use optimist_state::{CommitKind, ContainerState};
    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    /// Sink over a shared container that records commit kinds
    #[derive(Clone)]
    struct Recorder {
        state: Arc<Mutex<ContainerState<i32>>>,
        kinds: Arc<Mutex<Vec<CommitKind>>>,
        reverted: Arc<Mutex<Vec<TransactionId>>>,
        kept: Arc<Mutex<Vec<TransactionId>>>,
        failed: Arc<Mutex<Vec<TransactionId>>>,
    }

    impl Recorder {
        fn new(initial: i32) -> Self {
            Recorder {
                state: Arc::new(Mutex::new(ContainerState::initialize(initial))),
                kinds: Arc::new(Mutex::new(Vec::new())),
                reverted: Arc::new(Mutex::new(Vec::new())),
                kept: Arc::new(Mutex::new(Vec::new())),
                failed: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn current(&self) -> i32 {
            self.state.lock().current
        }
    }

    impl Sink<i32> for Recorder {
        fn commit(&self, commit: Commit<i32>) {
            self.kinds.lock().push(commit.kind());
            let mut state = self.state.lock();
            *state = commit.apply(&state);
        }

        fn observe(&self, event: TransactionEvent<'_>) {
            match event {
                TransactionEvent::Reverted(id) => self.reverted.lock().push(id),
                TransactionEvent::Kept(id) => self.kept.lock().push(id),
                TransactionEvent::Failed(id, _) => self.failed.lock().push(id),
            }
        }
    }

    fn set(v: i32) -> Transform<i32> {
        transform(move |_: &i32| v)
    }

    fn consumer() -> Consumer {
        Consumer::new(Arc::new(MonotonicAllocator::new()), FailurePolicy::Revert)
    }

    #[test]
    fn test_consume_reduce() {
        let sink = Recorder::new(1);
        consume_reduce(&sink, transform(|v: &i32| v + 1));

        assert_eq!(sink.current(), 2);
        assert_eq!(*sink.kinds.lock(), vec![CommitKind::Normal]);
    }

    #[test]
    fn test_closure_sink() {
        let state = Arc::new(Mutex::new(ContainerState::initialize(0)));
        let shared = Arc::clone(&state);
        let sink = move |commit: Commit<i32>| {
            let mut s = shared.lock();
            *s = commit.apply(&s);
        };

        consume_reduce(&sink, set(4));
        assert_eq!(state.lock().current, 4);
    }

    #[tokio::test]
    async fn test_guess_visible_before_await() {
        let sink = Recorder::new(1);
        let (tx, rx) = oneshot::channel::<i32>();
        let wf = TwoStep::new(
            async move { rx.await.map_err(OptimistError::task) },
            set,
        );

        let txn = consumer().begin(sink.clone(), wf.boxed(), set(3));
        assert_eq!(txn.id(), TransactionId::new(1));
        assert!(txn.is_suspended());
        assert_eq!(sink.current(), 3);

        let run = tokio::spawn(txn.run());
        tx.send(2).unwrap();
        run.await.unwrap().unwrap();

        assert_eq!(sink.current(), 2);
        assert_eq!(
            *sink.kinds.lock(),
            vec![
                CommitKind::Optimistic(TransactionId::new(1)),
                CommitKind::Settle(TransactionId::new(1)),
            ]
        );
        assert!(sink.state.lock().archive.is_none());
    }

    #[tokio::test]
    async fn test_fast_path_never_goes_optimistic() {
        let sink = Recorder::new(1);
        let result = consumer()
            .consume_optimistic::<i32, i32, _, _>(sink.clone(), Immediate::new(set(5)), set(100))
            .await;

        assert!(result.is_ok());
        assert_eq!(sink.current(), 5);
        assert_eq!(*sink.kinds.lock(), vec![CommitKind::Normal]);
    }

    #[tokio::test]
    async fn test_rejection_reverts_by_default() {
        let sink = Recorder::new(10);
        let wf = TwoStep::new(
            async { Err::<i32, _>(OptimistError::task("offline")) },
            set,
        );

        let err = consumer()
            .consume_optimistic(sink.clone(), wf, set(99))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            OptimistError::TransactionFailed {
                id: TransactionId::new(1),
                reason: "Task failed: offline".to_string(),
            }
        );
        assert_eq!(sink.current(), 10);
        assert!(sink.state.lock().archive.is_none());
        assert_eq!(*sink.reverted.lock(), vec![TransactionId::new(1)]);
    }

    #[tokio::test]
    async fn test_rejection_keeps_guess_in_compat_mode() {
        let sink = Recorder::new(10);
        let wf = TwoStep::new(
            async { Err::<i32, _>(OptimistError::task("offline")) },
            set,
        );
        let consumer = Consumer::new(MonotonicAllocator::shared(), FailurePolicy::KeepOptimistic);

        let result = consumer.consume_optimistic(sink.clone(), wf, set(99)).await;

        assert!(result.is_err());
        assert_eq!(sink.current(), 99);
        assert!(sink.state.lock().is_optimistic());
        assert!(sink.reverted.lock().is_empty());
        assert_eq!(*sink.kept.lock(), vec![TransactionId::new(1)]);
        assert_eq!(*sink.failed.lock(), vec![TransactionId::new(1)]);
    }

    #[test]
    fn test_dropped_transaction_reverts_guess() {
        let sink = Recorder::new(1);
        let (_tx, rx) = oneshot::channel::<i32>();
        let wf = TwoStep::new(
            async move { rx.await.map_err(OptimistError::task) },
            set,
        );

        let txn = consumer().begin(sink.clone(), wf.boxed(), set(3));
        assert_eq!(sink.current(), 3);

        drop(txn);

        assert_eq!(sink.current(), 1);
        assert!(sink.state.lock().archive.is_none());
        assert_eq!(*sink.failed.lock(), vec![TransactionId::new(1)]);
        assert_eq!(*sink.reverted.lock(), vec![TransactionId::new(1)]);
    }

    #[test]
    fn test_dropped_transaction_keeps_guess_in_compat_mode() {
        let sink = Recorder::new(1);
        let (_tx, rx) = oneshot::channel::<i32>();
        let wf = TwoStep::new(
            async move { rx.await.map_err(OptimistError::task) },
            set,
        );
        let consumer = Consumer::new(MonotonicAllocator::shared(), FailurePolicy::KeepOptimistic);

        drop(consumer.begin(sink.clone(), wf.boxed(), set(3)));

        assert_eq!(sink.current(), 3);
        assert!(sink.reverted.lock().is_empty());
        assert_eq!(*sink.kept.lock(), vec![TransactionId::new(1)]);
    }

    #[tokio::test]
    async fn test_completed_transaction_reports_once() {
        let sink = Recorder::new(10);
        let wf = TwoStep::new(
            async { Err::<i32, _>(OptimistError::task("offline")) },
            set,
        );

        let result = consumer().consume_optimistic(sink.clone(), wf, set(99)).await;

        assert!(result.is_err());
        assert_eq!(*sink.failed.lock(), vec![TransactionId::new(1)]);
        assert_eq!(*sink.reverted.lock(), vec![TransactionId::new(1)]);
    }

    #[tokio::test]
    async fn test_recovered_rejection_settles() {
        let sink = Recorder::new(10);
        let wf = TwoStep::new(
            async { Err::<i32, _>(OptimistError::task("offline")) },
            set,
        )
        .recover_with(|_| transform(|v: &i32| v - 1));

        consumer()
            .consume_optimistic(sink.clone(), wf, set(99))
            .await
            .unwrap();

        assert_eq!(sink.current(), 9);
    }

    #[tokio::test]
    async fn test_unsettled_workflow_is_contract_violation() {
        let sink = Recorder::new(0);
        let mut awaited = false;
        let wf = move |_input: Resume<i32>| -> Step<i32, i32> {
            if awaited {
                Step::Done
            } else {
                awaited = true;
                Step::Await(Box::pin(async { Ok::<_, OptimistError>(1) }))
            }
        };

        let err = consumer()
            .consume_optimistic(sink.clone(), wf, set(7))
            .await
            .unwrap_err();

        assert!(matches!(err, OptimistError::ContractViolation(_)));
        assert_eq!(sink.current(), 0);
    }

    #[tokio::test]
    async fn test_multi_step_workflow() {
        let sink = Recorder::new(0);
        let mut stage = 0;
        let wf = move |input: Resume<i32>| -> Step<i32, i32> {
            stage += 1;
            match (stage, input) {
                (1, Resume::Start) => Step::Await(Box::pin(async { Ok::<_, OptimistError>(5) })),
                (2, Resume::Resolved(v)) => Step::Yield(set(v)),
                (3, Resume::Committed) => Step::Await(Box::pin(async { Ok::<_, OptimistError>(1) })),
                (4, Resume::Resolved(v)) => Step::Yield(transform(move |s: &i32| s + v)),
                _ => Step::Done,
            }
        };

        consumer()
            .consume_optimistic(sink.clone(), wf, set(50))
            .await
            .unwrap();

        assert_eq!(sink.current(), 6);
        assert_eq!(
            *sink.kinds.lock(),
            vec![
                CommitKind::Optimistic(TransactionId::new(1)),
                CommitKind::Settle(TransactionId::new(1)),
                CommitKind::Normal,
            ]
        );
    }

    #[tokio::test]
    async fn test_ids_are_per_consumer() {
        let a = consumer();
        let b = consumer();
        let sink = Recorder::new(0);

        let first = a.begin::<i32, i32, _>(sink.clone(), Box::new(Immediate::new(set(1))), set(0));
        let second = a.begin::<i32, i32, _>(sink.clone(), Box::new(Immediate::new(set(2))), set(0));
        let other = b.begin::<i32, i32, _>(sink.clone(), Box::new(Immediate::new(set(3))), set(0));

        assert_eq!(first.id(), TransactionId::new(1));
        assert_eq!(second.id(), TransactionId::new(2));
        assert_eq!(other.id(), TransactionId::new(1));
    }
}
