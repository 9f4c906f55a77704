//! Dispatch facade
//!
//! A factory maps each payload to a `Hint`: either a plain transform or a
//! workflow paired with its optimistic guess. The dispatcher commits the
//! former directly and detaches the latter as a transaction.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use optimist_core::{OptimistResult, Transform, TransactionId};

use crate::{BoxWorkflow, Store, TransactionHandle, Workflow};

/// What a factory produced for one payload
pub enum Hint<T, R = T> {
    /// Commit directly
    Reduce(Transform<T>),
    /// Run `workflow`, showing `optimistic` until it settles
    Optimistic {
        workflow: BoxWorkflow<T, R>,
        optimistic: Transform<T>,
    },
}

impl<T, R> Hint<T, R> {
    pub fn reduce(transform: Transform<T>) -> Self {
        Hint::Reduce(transform)
    }

    pub fn optimistic<W>(workflow: W, optimistic: Transform<T>) -> Self
    where
        W: Workflow<T, R> + 'static,
    {
        Hint::Optimistic {
            workflow: Box::new(workflow),
            optimistic,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        matches!(self, Hint::Optimistic { .. })
    }
}

impl<T, R> fmt::Debug for Hint<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hint::Reduce(_) => f.write_str("Reduce(..)"),
            Hint::Optimistic { .. } => f.write_str("Optimistic(..)"),
        }
    }
}

/// Payload to hint mapping
pub trait Factory<T, P, R = T>: Send + Sync {
    fn produce(&self, payload: P) -> Hint<T, R>;
}

impl<T, P, R, F> Factory<T, P, R> for F
where
    F: Fn(P) -> Hint<T, R> + Send + Sync,
{
    fn produce(&self, payload: P) -> Hint<T, R> {
        self(payload)
    }
}

/// Outcome of one dispatch
#[derive(Debug)]
pub enum Dispatched {
    /// A plain transform was committed
    Applied,
    /// A transaction was started; its guess is already visible
    Pending(TransactionHandle),
}

impl Dispatched {
    pub fn transaction(&self) -> Option<TransactionId> {
        match self {
            Dispatched::Applied => None,
            Dispatched::Pending(handle) => Some(handle.id()),
        }
    }

    pub fn into_handle(self) -> Option<TransactionHandle> {
        match self {
            Dispatched::Applied => None,
            Dispatched::Pending(handle) => Some(handle),
        }
    }
}

/// Factory bound to a store
pub struct Dispatcher<T, P, R, F> {
    store: Store<T>,
    factory: Arc<F>,
    _marker: PhantomData<fn(P) -> R>,
}

impl<T, P, R, F> Clone for Dispatcher<T, P, R, F> {
    fn clone(&self) -> Self {
        Dispatcher {
            store: self.store.clone(),
            factory: Arc::clone(&self.factory),
            _marker: PhantomData,
        }
    }
}

impl<T, P, R, F> Dispatcher<T, P, R, F>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    F: Factory<T, P, R>,
{
    pub fn new(store: Store<T>, factory: F) -> Self {
        Dispatcher {
            store,
            factory: Arc::new(factory),
            _marker: PhantomData,
        }
    }

    pub fn store(&self) -> &Store<T> {
        &self.store
    }

    /// Current value of the underlying store
    pub fn current(&self) -> T {
        self.store.current()
    }

    /// Map `payload` through the factory and commit or start a transaction
    ///
    /// Optimistic hints need a tokio runtime and fail with `NoRuntime`
    /// without touching the store otherwise. The returned handle may be
    /// dropped without affecting the transaction.
    pub fn dispatch(&self, payload: P) -> OptimistResult<Dispatched> {
        match self.factory.produce(payload) {
            Hint::Reduce(transform) => {
                self.store.reduce(transform);
                Ok(Dispatched::Applied)
            }
            Hint::Optimistic {
                workflow,
                optimistic,
            } => {
                let handle = self.store.spawn_transaction(workflow, optimistic)?;
                Ok(Dispatched::Pending(handle))
            }
        }
    }
}
