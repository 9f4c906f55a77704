//! Commit primitives
//!
//! Three pure builders, each producing a one-shot function from the old
//! container to the new one. Sinks apply them against whatever container is
//! current at commit time.

use std::fmt;

use optimist_core::{Transform, TransactionId};

use crate::{rollback_with_report, ContainerState, QueueEntry};

/// What a commit does to the container
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitKind {
    /// Provisional entry for a pending transaction
    Optimistic(TransactionId),
    /// Plain transform, no transaction
    Normal,
    /// Authoritative outcome replacing a transaction's guess
    Settle(TransactionId),
}

impl CommitKind {
    pub fn transaction(self) -> Option<TransactionId> {
        match self {
            CommitKind::Optimistic(id) | CommitKind::Settle(id) => Some(id),
            CommitKind::Normal => None,
        }
    }
}

impl fmt::Display for CommitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitKind::Optimistic(id) => write!(f, "optimistic({})", id),
            CommitKind::Normal => f.write_str("normal"),
            CommitKind::Settle(id) => write!(f, "settle({})", id),
        }
    }
}

type CommitFn<T> = Box<dyn FnOnce(&ContainerState<T>) -> ContainerState<T> + Send>;

/// One-shot container transition
pub struct Commit<T> {
    kind: CommitKind,
    apply: CommitFn<T>,
}

impl<T> Commit<T> {
    pub fn new<F>(kind: CommitKind, apply: F) -> Self
    where
        F: FnOnce(&ContainerState<T>) -> ContainerState<T> + Send + 'static,
    {
        Commit {
            kind,
            apply: Box::new(apply),
        }
    }

    #[inline]
    pub fn kind(&self) -> CommitKind {
        self.kind
    }

    /// Produce the next container from `state`
    pub fn apply(self, state: &ContainerState<T>) -> ContainerState<T> {
        (self.apply)(state)
    }
}

impl<T> fmt::Debug for Commit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Commit").field("kind", &self.kind).finish()
    }
}

/// Open (or extend) an optimistic span with `id`'s guess
pub fn apply_optimistic<T>(id: TransactionId, transform: Transform<T>) -> Commit<T>
where
    T: Clone + Send + Sync + 'static,
{
    Commit::new(CommitKind::Optimistic(id), move |state: &ContainerState<T>| {
        let mut queue = state.queue.clone();
        queue.push(QueueEntry::optimistic(id, transform.clone()));

        ContainerState {
            optimistic: true,
            archive: Some(state.archive.clone().unwrap_or_else(|| state.current.clone())),
            queue,
            current: transform(&state.current),
        }
    })
}

/// Apply a plain transform, logging it only while a span is open
pub fn apply_normal<T>(transform: Transform<T>) -> Commit<T>
where
    T: Clone + Send + Sync + 'static,
{
    Commit::new(CommitKind::Normal, move |state: &ContainerState<T>| {
        normal(state, &transform)
    })
}

/// Discard `id`'s guess and apply its authoritative transform on top
pub fn apply_rollback_and_settle<T>(id: TransactionId, final_transform: Transform<T>) -> Commit<T>
where
    T: Clone + Send + Sync + 'static,
{
    Commit::new(CommitKind::Settle(id), move |state: &ContainerState<T>| {
        let (rolled, report) = rollback_with_report(state, id);

        tracing::trace!(
            transaction = %id,
            replayed = report.replayed,
            retained = report.retained,
            folded = report.folded,
            discarded = report.discarded,
            "rolled back"
        );

        normal(&rolled, &final_transform)
    })
}

fn normal<T: Clone>(state: &ContainerState<T>, transform: &Transform<T>) -> ContainerState<T> {
    let queue = if state.optimistic {
        let mut queue = state.queue.clone();
        queue.push(QueueEntry::normal(transform.clone()));
        queue
    } else {
        state.queue.clone()
    };

    ContainerState {
        optimistic: state.optimistic,
        archive: state.archive.clone(),
        queue,
        current: transform(&state.current),
    }
}
