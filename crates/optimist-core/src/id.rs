//! Transaction identity and allocation
//!
//! Every optimistic dispatch is tagged with a `TransactionId` so the rollback
//! engine can find (and discard) its provisional queue entry when it settles.
//! Ids come from an allocator owned by one store instance; they are never
//! reused within that instance.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Transaction identity - unique within one store
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub const ZERO: TransactionId = TransactionId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        TransactionId(id)
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txn({})", self.0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

/// Source of fresh transaction ids
///
/// Implementations must hand out strictly increasing ids and must be safe to
/// call from several tasks at once.
pub trait IdAllocator: Send + Sync {
    /// Allocate the next id
    fn next_id(&self) -> TransactionId;

    /// Peek at the id the next call will return, if known
    fn peek(&self) -> Option<TransactionId> {
        None
    }
}

/// Monotonic counter starting at 1
#[derive(Debug)]
pub struct MonotonicAllocator {
    next: AtomicU64,
}

impl MonotonicAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Start counting at `first`, for deterministic tests
    pub fn starting_at(first: u64) -> Self {
        MonotonicAllocator {
            next: AtomicU64::new(first),
        }
    }

    /// Shared allocator handle
    pub fn shared() -> Arc<dyn IdAllocator> {
        Arc::new(Self::new())
    }
}

impl Default for MonotonicAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator for MonotonicAllocator {
    fn next_id(&self) -> TransactionId {
        TransactionId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    fn peek(&self) -> Option<TransactionId> {
        Some(TransactionId(self.next.load(Ordering::Relaxed)))
    }
}

impl<A: IdAllocator + ?Sized> IdAllocator for Arc<A> {
    fn next_id(&self) -> TransactionId {
        (**self).next_id()
    }

    fn peek(&self) -> Option<TransactionId> {
        (**self).peek()
    }
}
