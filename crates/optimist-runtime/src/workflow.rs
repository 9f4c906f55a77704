//! Workflows - resumable producers driven by the consumer
//!
//! A workflow is resumed with the outcome of its previous step and answers
//! with the next one. The usual shape is two steps: await one future, then
//! yield the authoritative transform derived from its result.

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;

use optimist_core::{OptimistError, OptimistResult, Transform};

/// Awaitable handed from a workflow to the consumer
pub type Pending<R> = BoxFuture<'static, OptimistResult<R>>;

/// What the workflow wants next
pub enum Step<T, R> {
    /// Suspend until the future settles
    Await(Pending<R>),
    /// Commit a transform
    Yield(Transform<T>),
    /// Give up; the failure was not handled
    Fail(OptimistError),
    /// Nothing left to do
    Done,
}

impl<T, R> Step<T, R> {
    pub fn label(&self) -> &'static str {
        match self {
            Step::Await(_) => "await",
            Step::Yield(_) => "yield",
            Step::Fail(_) => "fail",
            Step::Done => "done",
        }
    }
}

impl<T, R> fmt::Debug for Step<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Fail(err) => f.debug_tuple("Fail").field(err).finish(),
            other => f.write_str(other.label()),
        }
    }
}

/// How the consumer resumes the workflow
#[derive(Debug)]
pub enum Resume<R> {
    /// First call
    Start,
    /// The awaited future resolved
    Resolved(R),
    /// The awaited future rejected
    Rejected(OptimistError),
    /// The yielded transform was committed
    Committed,
}

impl<R> Resume<R> {
    pub fn label(&self) -> &'static str {
        match self {
            Resume::Start => "start",
            Resume::Resolved(_) => "resolved",
            Resume::Rejected(_) => "rejected",
            Resume::Committed => "committed",
        }
    }
}

/// Resumable step producer
pub trait Workflow<T, R>: Send {
    fn resume(&mut self, input: Resume<R>) -> Step<T, R>;
}

impl<T, R, F> Workflow<T, R> for F
where
    F: FnMut(Resume<R>) -> Step<T, R> + Send,
{
    fn resume(&mut self, input: Resume<R>) -> Step<T, R> {
        self(input)
    }
}

/// Type-erased workflow
pub type BoxWorkflow<T, R> = Box<dyn Workflow<T, R>>;

type Settle<T, R> = Box<dyn FnOnce(R) -> Transform<T> + Send>;
type Recover<T> = Box<dyn FnOnce(OptimistError) -> Transform<T> + Send>;

enum Phase<R> {
    Ready(Pending<R>),
    AwaitingResult,
    Settling,
    Finished,
}

impl<R> Phase<R> {
    fn label(&self) -> &'static str {
        match self {
            Phase::Ready(_) => "ready",
            Phase::AwaitingResult => "awaiting-result",
            Phase::Settling => "settling",
            Phase::Finished => "finished",
        }
    }
}

/// Await one future, then settle with a transform derived from its result
pub struct TwoStep<T, R> {
    phase: Phase<R>,
    settle: Option<Settle<T, R>>,
    recover: Option<Recover<T>>,
}

impl<T, R> TwoStep<T, R>
where
    T: 'static,
    R: Send + 'static,
{
    pub fn new<F, S>(future: F, settle: S) -> Self
    where
        F: Future<Output = OptimistResult<R>> + Send + 'static,
        S: FnOnce(R) -> Transform<T> + Send + 'static,
    {
        TwoStep {
            phase: Phase::Ready(future.boxed()),
            settle: Some(Box::new(settle)),
            recover: None,
        }
    }

    /// Settle with `recover(err)` instead of failing when the future rejects
    pub fn recover_with<H>(mut self, recover: H) -> Self
    where
        H: FnOnce(OptimistError) -> Transform<T> + Send + 'static,
    {
        self.recover = Some(Box::new(recover));
        self
    }

    pub fn boxed(self) -> BoxWorkflow<T, R> {
        Box::new(self)
    }
}

impl<T, R> Workflow<T, R> for TwoStep<T, R>
where
    R: Send,
{
    fn resume(&mut self, input: Resume<R>) -> Step<T, R> {
        match (std::mem::replace(&mut self.phase, Phase::Finished), input) {
            (Phase::Ready(future), Resume::Start) => {
                self.phase = Phase::AwaitingResult;
                Step::Await(future)
            }
            (Phase::AwaitingResult, Resume::Resolved(value)) => match self.settle.take() {
                Some(settle) => {
                    self.phase = Phase::Settling;
                    Step::Yield(settle(value))
                }
                None => Step::Fail(OptimistError::ContractViolation(
                    "settle already consumed".to_string(),
                )),
            },
            (Phase::AwaitingResult, Resume::Rejected(err)) => match self.recover.take() {
                Some(recover) => {
                    self.phase = Phase::Settling;
                    Step::Yield(recover(err))
                }
                None => Step::Fail(err),
            },
            (Phase::Settling, Resume::Committed) => Step::Done,
            (Phase::Finished, _) => Step::Done,
            (phase, input) => Step::Fail(OptimistError::ContractViolation(format!(
                "two-step workflow resumed with {} while {}",
                input.label(),
                phase.label()
            ))),
        }
    }
}

/// Yield one transform without suspending
pub struct Immediate<T> {
    transform: Option<Transform<T>>,
}

impl<T> Immediate<T> {
    pub fn new(transform: Transform<T>) -> Self {
        Immediate {
            transform: Some(transform),
        }
    }
}

impl<T, R> Workflow<T, R> for Immediate<T> {
    fn resume(&mut self, _input: Resume<R>) -> Step<T, R> {
        match self.transform.take() {
            Some(transform) => Step::Yield(transform),
            None => Step::Done,
        }
    }
}
