//! Scenario Fuzzer - randomized interleavings of dispatches and transactions
//!
//! Checks:
//! - The container stays consistent after every commit
//! - Once everything settles, the value equals the fold of every
//!   non-optimistic commit in commit order
//! - No optimistic guess survives its settle
//!
//! A plan is generated once from the seed and can be executed either against
//! the bare commit primitives or against a live `Store`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use optimist_core::{
    fold, identity, transform, OptimistError, OptimistResult, Transform, TransactionId,
};
use optimist_runtime::{Store, TransactionHandle, TwoStep};
use optimist_state::{apply_normal, apply_optimistic, apply_rollback_and_settle, ContainerState};

use crate::Gate;

/// Tags at or above this mark come from optimistic guesses
pub const GUESS_MARK: u64 = 1 << 32;

/// Value type the fuzzer operates on: a log of applied tags
pub type Log = Vec<u64>;

/// Fuzzer configuration
#[derive(Clone, Debug)]
pub struct FuzzerConfig {
    /// Number of planned operations before draining
    pub operations: usize,
    /// Upper bound on unsettled transactions
    pub max_in_flight: usize,
    /// Probability that an operation starts a transaction
    pub transaction_prob: f64,
    /// Probability that an operation settles a random in-flight transaction
    pub settle_prob: f64,
    /// Probability that a settle is a failure instead
    pub failure_prob: f64,
    /// Random seed
    pub seed: u64,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        FuzzerConfig {
            operations: 500,
            max_in_flight: 4,
            transaction_prob: 0.3,
            settle_prob: 0.3,
            failure_prob: 0.1,
            seed: 42,
        }
    }
}

impl FuzzerConfig {
    /// Light fuzzing for quick tests
    pub fn light() -> Self {
        FuzzerConfig {
            operations: 50,
            max_in_flight: 2,
            transaction_prob: 0.3,
            settle_prob: 0.3,
            failure_prob: 0.0,
            seed: 42,
        }
    }

    /// Heavy fuzzing for thorough testing
    pub fn heavy() -> Self {
        FuzzerConfig {
            operations: 5000,
            max_in_flight: 16,
            transaction_prob: 0.4,
            settle_prob: 0.25,
            failure_prob: 0.2,
            seed: 42,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// One planned operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    /// Plain dispatch appending `tag`
    Normal(u64),
    /// Start a transaction whose guess appends `tag | GUESS_MARK`
    Begin(u64),
    /// Settle the in-flight transaction at `slot`, appending `tag` unless it fails
    Settle { slot: usize, tag: u64, fail: bool },
}

/// Fuzzing result
#[derive(Debug, Default)]
pub struct FuzzResult {
    /// Operations executed, drain included
    pub steps: usize,
    pub transactions: u32,
    pub settled: u32,
    pub failed: u32,
    /// Steps after which the container was inconsistent
    pub inconsistent_steps: Vec<usize>,
    /// Final value matched the reference fold
    pub reference_matched: bool,
    /// Span closed and queue empty at the end
    pub closed: bool,
    /// Guess tags still present at the end
    pub leaked_guesses: usize,
}

impl FuzzResult {
    pub fn is_valid(&self) -> bool {
        self.inconsistent_steps.is_empty()
            && self.reference_matched
            && self.closed
            && self.leaked_guesses == 0
            && self.settled + self.failed == self.transactions
    }
}

fn append(tag: u64) -> Transform<Log> {
    transform(move |log: &Log| {
        let mut log = log.clone();
        log.push(tag);
        log
    })
}

fn leaked(log: &Log) -> usize {
    log.iter().filter(|tag| **tag >= GUESS_MARK).count()
}

/// Scenario fuzzer
pub struct ScenarioFuzzer {
    config: FuzzerConfig,
    rng: StdRng,
    next_tag: u64,
}

impl ScenarioFuzzer {
    /// Create a new fuzzer
    pub fn new(config: FuzzerConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        ScenarioFuzzer {
            config,
            rng,
            next_tag: 0,
        }
    }

    fn tag(&mut self) -> u64 {
        self.next_tag += 1;
        self.next_tag
    }

    /// Generate the operation sequence, ending with every transaction settled
    pub fn plan(&mut self) -> Vec<Op> {
        let mut ops = Vec::with_capacity(self.config.operations * 2);
        let mut in_flight = 0usize;

        for _ in 0..self.config.operations {
            let roll = self.rng.gen::<f64>();
            let must_settle = in_flight >= self.config.max_in_flight.max(1);

            if in_flight > 0 && (must_settle || roll < self.config.settle_prob) {
                ops.push(self.settle_op(in_flight));
                in_flight -= 1;
            } else if roll < self.config.settle_prob + self.config.transaction_prob {
                ops.push(Op::Begin(self.tag()));
                in_flight += 1;
            } else {
                ops.push(Op::Normal(self.tag()));
            }
        }

        while in_flight > 0 {
            ops.push(self.settle_op(in_flight));
            in_flight -= 1;
        }

        ops
    }

    fn settle_op(&mut self, in_flight: usize) -> Op {
        Op::Settle {
            slot: self.rng.gen_range(0..in_flight),
            tag: self.tag(),
            fail: self.rng.gen::<f64>() < self.config.failure_prob,
        }
    }

    /// Execute a fresh plan against the commit primitives alone
    pub fn run(&mut self) -> FuzzResult {
        let ops = self.plan();
        let mut result = FuzzResult::default();
        let mut state = ContainerState::initialize(Log::new());
        let mut reference: Vec<Transform<Log>> = Vec::new();
        let mut in_flight: Vec<TransactionId> = Vec::new();
        let mut next_id = 1u64;

        for (step, op) in ops.into_iter().enumerate() {
            let commit = match op {
                Op::Normal(tag) => {
                    reference.push(append(tag));
                    apply_normal(append(tag))
                }
                Op::Begin(tag) => {
                    let id = TransactionId::new(next_id);
                    next_id += 1;
                    in_flight.push(id);
                    result.transactions += 1;
                    apply_optimistic(id, append(tag | GUESS_MARK))
                }
                Op::Settle { slot, tag, fail } => {
                    let id = in_flight.remove(slot);
                    let settle = if fail {
                        result.failed += 1;
                        identity()
                    } else {
                        result.settled += 1;
                        append(tag)
                    };
                    reference.push(settle.clone());
                    apply_rollback_and_settle(id, settle)
                }
            };

            state = commit.apply(&state);
            result.steps += 1;
            if !state.is_consistent() {
                result.inconsistent_steps.push(step);
            }
        }

        self.finish(&mut result, &state, &reference);
        result
    }

    /// Execute a fresh plan against a live store with gated workflows
    ///
    /// Fails with `NoRuntime` outside a tokio runtime. Each settle waits for
    /// its transaction to finish before the next operation runs.
    pub async fn run_on_store(&mut self) -> OptimistResult<FuzzResult> {
        let ops = self.plan();
        let mut result = FuzzResult::default();
        let store = Store::new(Log::new());
        let mut reference: Vec<Transform<Log>> = Vec::new();
        let mut in_flight: Vec<(Gate<u64>, TransactionHandle)> = Vec::new();

        for (step, op) in ops.into_iter().enumerate() {
            match op {
                Op::Normal(tag) => {
                    reference.push(append(tag));
                    store.reduce(append(tag));
                }
                Op::Begin(tag) => {
                    let (gate, pending) = Gate::pair();
                    let workflow = TwoStep::new(pending, append);
                    let handle =
                        store.spawn_transaction(workflow.boxed(), append(tag | GUESS_MARK))?;
                    in_flight.push((gate, handle));
                    result.transactions += 1;
                }
                Op::Settle { slot, tag, fail } => {
                    let (gate, handle) = in_flight.remove(slot);
                    if fail {
                        gate.reject(OptimistError::task("fuzzed failure"));
                        reference.push(identity());
                    } else {
                        gate.resolve(tag);
                        reference.push(append(tag));
                    }

                    match handle.settled().await {
                        Ok(_) => result.settled += 1,
                        Err(_) => result.failed += 1,
                    }
                }
            }

            result.steps += 1;
            if !store.snapshot().is_consistent() {
                result.inconsistent_steps.push(step);
            }
        }

        self.finish(&mut result, &store.snapshot(), &reference);
        Ok(result)
    }

    fn finish(&self, result: &mut FuzzResult, state: &ContainerState<Log>, reference: &[Transform<Log>]) {
        let expected = fold(&Log::new(), reference);

        result.reference_matched = state.current == expected;
        result.closed = !state.optimistic && state.archive.is_none() && state.queue.is_empty();
        result.leaked_guesses = leaked(&state.current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fuzzer_light() {
        let mut fuzzer = ScenarioFuzzer::new(FuzzerConfig::light());
        let result = fuzzer.run();

        assert!(result.is_valid(), "light fuzz result: {:?}", result);
    }

    #[test]
    fn test_fuzzer_default_many_seeds() {
        for seed in 0..20 {
            let mut fuzzer = ScenarioFuzzer::new(FuzzerConfig::default().with_seed(seed));
            let result = fuzzer.run();

            assert!(result.is_valid(), "seed {}: {:?}", seed, result);
            assert!(result.transactions > 0);
        }
    }

    #[test]
    fn test_fuzzer_heavy() {
        let mut fuzzer = ScenarioFuzzer::new(FuzzerConfig::heavy());
        let result = fuzzer.run();

        assert!(result.is_valid());
        assert!(result.failed > 0);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let a = ScenarioFuzzer::new(FuzzerConfig::default()).plan();
        let b = ScenarioFuzzer::new(FuzzerConfig::default()).plan();
        assert_eq!(a, b);
    }

    #[test]
    fn test_plan_drains_in_flight() {
        let ops = ScenarioFuzzer::new(FuzzerConfig::heavy()).plan();
        let begins = ops.iter().filter(|op| matches!(op, Op::Begin(_))).count();
        let settles = ops.iter().filter(|op| matches!(op, Op::Settle { .. })).count();
        assert_eq!(begins, settles);
    }

    #[test]
    fn test_sync_only_plan_never_opens_span() {
        let config = FuzzerConfig {
            operations: 100,
            transaction_prob: 0.0,
            settle_prob: 0.0,
            ..FuzzerConfig::default()
        };

        let result = ScenarioFuzzer::new(config).run();
        assert_eq!(result.transactions, 0);
        assert!(result.is_valid());
    }

    #[tokio::test]
    async fn test_store_fuzz_matches_reference() {
        for seed in 0..5 {
            let mut fuzzer = ScenarioFuzzer::new(FuzzerConfig::default().with_seed(seed));
            let result = fuzzer.run_on_store().await.unwrap();

            assert!(result.is_valid(), "seed {}: {:?}", seed, result);
        }
    }

    proptest! {
        #[test]
        fn prop_any_seed_matches_reference(seed in any::<u64>(), failure_prob in 0.0f64..0.5) {
            let config = FuzzerConfig {
                failure_prob,
                ..FuzzerConfig::light().with_seed(seed)
            };
            let result = ScenarioFuzzer::new(config).run();
            prop_assert!(result.is_valid(), "{:?}", result);
        }
    }
}
