//! Single-value and task wrappers over the dispatch facade

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::TryFutureExt;
use tokio::sync::watch;

use optimist_core::{OptimistResult, Update};
use optimist_state::ContainerState;

use crate::{Dispatched, Dispatcher, Hint, Store, StoreConfig, TwoStep};

type Passthrough<T> = fn(Hint<T, Update<T>>) -> Hint<T, Update<T>>;

fn passthrough<T>(hint: Hint<T, Update<T>>) -> Hint<T, Update<T>> {
    hint
}

/// One optimistic value
///
/// `set` replaces it immediately. `set_async` shows a guess until the
/// future resolves to the authoritative update.
pub struct OptimisticState<T> {
    dispatcher: Dispatcher<T, Hint<T, Update<T>>, Update<T>, Passthrough<T>>,
}

impl<T> Clone for OptimisticState<T> {
    fn clone(&self) -> Self {
        OptimisticState {
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<T> OptimisticState<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        Self::with_config(initial, StoreConfig::default())
    }

    pub fn with_config(initial: T, config: StoreConfig) -> Self {
        Self::from_store(Store::with_config(initial, config))
    }

    pub fn from_store(store: Store<T>) -> Self {
        OptimisticState {
            dispatcher: Dispatcher::new(store, passthrough::<T> as Passthrough<T>),
        }
    }

    pub fn get(&self) -> T {
        self.dispatcher.current()
    }

    pub fn snapshot(&self) -> Arc<ContainerState<T>> {
        self.dispatcher.store().snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ContainerState<T>>> {
        self.dispatcher.store().subscribe()
    }

    pub fn store(&self) -> &Store<T> {
        self.dispatcher.store()
    }

    pub fn set(&self, update: Update<T>) {
        self.dispatcher.store().reduce(update.into_transform());
    }

    /// Show `optimistic` now and settle with whatever `future` resolves to
    ///
    /// Outside a tokio runtime this fails with `NoRuntime` and the value is
    /// left untouched.
    pub fn set_async<F>(&self, future: F, optimistic: Update<T>) -> OptimistResult<Dispatched>
    where
        F: Future<Output = OptimistResult<Update<T>>> + Send + 'static,
    {
        let workflow = TwoStep::new(future, Update::into_transform);
        self.dispatcher
            .dispatch(Hint::optimistic(workflow, optimistic.into_transform()))
    }
}

/// Async task whose result becomes the value, with a projected guess
///
/// `run(arg)` shows `projection(&arg)` until `task(arg)` resolves.
pub struct OptimisticTask<T, A, Tk, Op> {
    state: OptimisticState<T>,
    task: Arc<Tk>,
    projection: Arc<Op>,
    _marker: PhantomData<fn(A)>,
}

impl<T, A, Tk, Op> Clone for OptimisticTask<T, A, Tk, Op> {
    fn clone(&self) -> Self {
        OptimisticTask {
            state: self.state.clone(),
            task: Arc::clone(&self.task),
            projection: Arc::clone(&self.projection),
            _marker: PhantomData,
        }
    }
}

impl<T, A, Tk, Op, Fut> OptimisticTask<T, A, Tk, Op>
where
    T: Clone + Send + Sync + 'static,
    Tk: Fn(A) -> Fut,
    Fut: Future<Output = OptimistResult<T>> + Send + 'static,
    Op: Fn(&A) -> T,
{
    pub fn new(initial: T, task: Tk, projection: Op) -> Self {
        OptimisticTask {
            state: OptimisticState::new(initial),
            task: Arc::new(task),
            projection: Arc::new(projection),
            _marker: PhantomData,
        }
    }

    pub fn run(&self, arg: A) -> OptimistResult<Dispatched> {
        let guess = (self.projection)(&arg);
        let result = (self.task)(arg).map_ok(Update::Value);
        self.state.set_async(result, Update::Value(guess))
    }

    pub fn get(&self) -> T {
        self.state.get()
    }

    pub fn state(&self) -> &OptimisticState<T> {
        &self.state
    }
}
