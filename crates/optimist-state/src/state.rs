//! Container state - the combined optimistic state value
//!
//! The container carries the canonical archive (save point), the replay queue,
//! the derived current value and the `optimistic` flag. It is never mutated in
//! place: every commit produces a fresh container that replaces the old one.

use std::fmt;
use std::sync::Arc;

use optimist_core::{Transform, TransactionId};

/// Queue entry - one committed transform, tagged if it is provisional
pub struct QueueEntry<T> {
    /// Owning transaction; `Some` marks an optimistic entry
    pub transaction: Option<TransactionId>,
    pub transform: Transform<T>,
}

impl<T> QueueEntry<T> {
    pub fn optimistic(id: TransactionId, transform: Transform<T>) -> Self {
        QueueEntry {
            transaction: Some(id),
            transform,
        }
    }

    pub fn normal(transform: Transform<T>) -> Self {
        QueueEntry {
            transaction: None,
            transform,
        }
    }

    #[inline]
    pub fn is_optimistic(&self) -> bool {
        self.transaction.is_some()
    }

    #[inline]
    pub fn belongs_to(&self, id: TransactionId) -> bool {
        self.transaction == Some(id)
    }

    /// Apply this entry's transform
    #[inline]
    pub fn apply(&self, state: &T) -> T {
        (self.transform)(state)
    }
}

impl<T> Clone for QueueEntry<T> {
    fn clone(&self) -> Self {
        QueueEntry {
            transaction: self.transaction,
            transform: Arc::clone(&self.transform),
        }
    }
}

impl<T> fmt::Debug for QueueEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.transaction {
            Some(id) => write!(f, "Optimistic({})", id),
            None => f.write_str("Normal"),
        }
    }
}

/// Container state - the local view plus everything needed to roll it back
#[derive(Clone)]
pub struct ContainerState<T> {
    /// Whether an optimistic span is open
    pub optimistic: bool,
    /// Save point; `None` when no optimistic span is unresolved
    pub archive: Option<T>,
    /// Entries committed since the save point, in commit order
    pub queue: Vec<QueueEntry<T>>,
    /// Derived current value
    pub current: T,
}

impl<T> ContainerState<T> {
    /// Fresh container: no span, empty queue
    pub fn initialize(initial: T) -> Self {
        ContainerState {
            optimistic: false,
            archive: None,
            queue: Vec::new(),
            current: initial,
        }
    }

    #[inline]
    pub fn current(&self) -> &T {
        &self.current
    }

    #[inline]
    pub fn archive(&self) -> Option<&T> {
        self.archive.as_ref()
    }

    #[inline]
    pub fn queue(&self) -> &[QueueEntry<T>] {
        &self.queue
    }

    #[inline]
    pub fn is_optimistic(&self) -> bool {
        self.optimistic
    }

    /// Check if a transaction still has a provisional entry
    pub fn is_pending(&self, id: TransactionId) -> bool {
        self.queue.iter().any(|e| e.belongs_to(id))
    }

    /// Transactions with provisional entries, in commit order
    pub fn pending_transactions(&self) -> Vec<TransactionId> {
        self.queue.iter().filter_map(|e| e.transaction).collect()
    }

    /// Consume the container, keeping only the current value
    pub fn into_current(self) -> T {
        self.current
    }
}

impl<T: Clone> ContainerState<T> {
    /// Recompute the current value from the save point
    ///
    /// Returns `None` when no span is open; the current value is canonical then.
    pub fn replay(&self) -> Option<T> {
        self.archive.as_ref().map(|archive| {
            self.queue
                .iter()
                .fold(archive.clone(), |acc, entry| entry.apply(&acc))
        })
    }
}

impl<T: Clone + PartialEq> ContainerState<T> {
    /// Structural invariants of the container
    ///
    /// - the archive is present exactly while the span is open
    /// - a closed span has an empty queue
    /// - current equals the queue folded over the archive
    pub fn is_consistent(&self) -> bool {
        if self.archive.is_some() != self.optimistic {
            return false;
        }

        match self.replay() {
            Some(replayed) => replayed == self.current,
            None => self.queue.is_empty(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ContainerState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerState")
            .field("optimistic", &self.optimistic)
            .field("archive", &self.archive)
            .field("queue", &self.queue)
            .field("current", &self.current)
            .finish()
    }
}
