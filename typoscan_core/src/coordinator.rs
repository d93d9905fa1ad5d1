use crate::aggregator::{MatchResult, ResultAggregator, SearchOutcome, StopSignal};
use crate::error::ConfigError;
use crate::input::TargetSet;
use crate::mutator::MutationEngine;
use crate::oracle::{DerivationOracle, DerivedIdentifier, UNLABELLED_CONTEXT, derive_guarded};
use crate::sink::{AttemptRecord, AttemptRecorder};
use log::{debug, info};
use rayon::ThreadPoolBuilder;
use serde::Serialize;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

/// How long the coordinator waits for a completion before re-checking the
/// interrupt flag.
const INTERRUPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Context label logged for a variant whose derivation failed.
const ORACLE_ERROR_CONTEXT: &str = "oracle-error";

/// One worker per available CPU.
pub fn default_concurrency() -> usize {
    num_cpus::get().max(1)
}

/// Counters describing how far a search got.
///
/// Only completions observed before the outcome was decided are counted;
/// anything finishing afterwards is discarded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    pub bases_total: usize,
    pub bases_completed: usize,
    pub bases_cancelled: usize,
    pub variants_tested: u64,
    pub oracle_failures: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchReport {
    #[serde(flatten)]
    pub outcome: SearchOutcome,
    pub stats: SearchStats,
}

/// Snapshot handed to the progress callback after each observed completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchProgress {
    pub bases_total: usize,
    pub bases_done: usize,
    pub variants_tested: u64,
}

/// What one worker reports back for one base candidate.
#[derive(Debug, Default)]
struct TaskCompletion {
    result: Option<MatchResult>,
    variants_tested: u64,
    oracle_failures: u64,
    cancelled: bool,
}

/// Fans base candidates out over a fixed worker pool and stops at the first
/// match.
///
/// Each base candidate is one task. Idle workers pull the next task as soon
/// as they finish, expand the base with the [`MutationEngine`] and feed every
/// variant to the oracle. The coordinator thread observes completions in the
/// order they arrive; the first match it sees is the result, after which
/// workers stop at their next variant boundary and queued tasks are skipped.
/// A running oracle call is never interrupted.
pub struct SearchCoordinator {
    engine: MutationEngine,
    oracle: Arc<dyn DerivationOracle>,
    targets: TargetSet,
    concurrency: usize,
    recorder: Option<AttemptRecorder>,
    interrupt: StopSignal,
}

impl SearchCoordinator {
    pub fn new(
        engine: MutationEngine,
        oracle: Arc<dyn DerivationOracle>,
        targets: TargetSet,
    ) -> Self {
        Self {
            engine,
            oracle,
            targets,
            concurrency: default_concurrency(),
            recorder: None,
            interrupt: StopSignal::new(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Streams every attempt to `recorder`. Recording never blocks a worker.
    pub fn with_attempt_recorder(mut self, recorder: AttemptRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Uses `interrupt` as the external abort flag, e.g. one wired to Ctrl-C.
    pub fn with_interrupt(mut self, interrupt: StopSignal) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn search(&self, bases: &[String]) -> Result<SearchReport, ConfigError> {
        self.search_with_progress(bases, |_| {})
    }

    /// Runs the search, calling `on_progress` on the current thread after
    /// every observed completion.
    pub fn search_with_progress<F>(
        &self,
        bases: &[String],
        mut on_progress: F,
    ) -> Result<SearchReport, ConfigError>
    where
        F: FnMut(&SearchProgress),
    {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .thread_name(|i| format!("typoscan-worker-{i}"))
            .build()?;

        info!(
            "Searching {} base candidate(s) with {} worker(s), typo budget {}",
            bases.len(),
            self.concurrency,
            self.engine.budget()
        );

        let started = Instant::now();
        let stop = StopSignal::new();
        let mut aggregator = ResultAggregator::new(stop.clone());
        let mut stats = SearchStats {
            bases_total: bases.len(),
            ..SearchStats::default()
        };
        let (sender, receiver) = mpsc::channel::<TaskCompletion>();

        pool.in_place_scope(|scope| {
            for base in bases {
                let sender = sender.clone();
                let stop = &stop;
                scope.spawn(move |_| {
                    let completion = self.run_task(base, stop);
                    // The coordinator may already have stopped listening.
                    let _ = sender.send(completion);
                });
            }
            drop(sender);

            self.collect(&receiver, &mut aggregator, &mut stats, &mut on_progress);
            if aggregator.is_searching() {
                debug!("All tasks drained; waiting for workers to exit");
            } else {
                debug!("Outcome decided; waiting for in-flight oracle calls");
            }
        });

        Self::settle(&mut aggregator, &stats);
        stats.elapsed = started.elapsed();

        let outcome = aggregator.into_outcome();
        match &outcome {
            SearchOutcome::Found(_) => {
                info!("Search finished with a match in {:.2?}", stats.elapsed)
            }
            SearchOutcome::Exhausted => info!(
                "Search exhausted after {} variant(s) in {:.2?}",
                stats.variants_tested, stats.elapsed
            ),
            SearchOutcome::Interrupted => info!(
                "Search interrupted after {} variant(s) in {:.2?}",
                stats.variants_tested, stats.elapsed
            ),
        }
        Ok(SearchReport { outcome, stats })
    }

    fn collect<F>(
        &self,
        receiver: &Receiver<TaskCompletion>,
        aggregator: &mut ResultAggregator,
        stats: &mut SearchStats,
        on_progress: &mut F,
    ) where
        F: FnMut(&SearchProgress),
    {
        let mut outstanding = stats.bases_total;
        while outstanding > 0 && aggregator.is_searching() {
            match receiver.recv_timeout(INTERRUPT_POLL_INTERVAL) {
                Ok(completion) => {
                    outstanding -= 1;
                    Self::observe(completion, aggregator, stats, on_progress);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if aggregator.is_searching() && self.interrupt.is_triggered() {
                // Anything that already arrived is honoured before the interrupt.
                while aggregator.is_searching() {
                    match receiver.try_recv() {
                        Ok(completion) => {
                            outstanding -= 1;
                            Self::observe(completion, aggregator, stats, on_progress);
                        }
                        Err(_) => break,
                    }
                }
                if aggregator.mark_interrupted() {
                    info!("Interrupt received; cancelling outstanding work");
                }
            }
        }
    }

    fn observe<F>(
        completion: TaskCompletion,
        aggregator: &mut ResultAggregator,
        stats: &mut SearchStats,
        on_progress: &mut F,
    ) where
        F: FnMut(&SearchProgress),
    {
        if !aggregator.is_searching() {
            return;
        }
        stats.variants_tested += completion.variants_tested;
        stats.oracle_failures += completion.oracle_failures;
        if completion.cancelled {
            stats.bases_cancelled += 1;
        } else {
            stats.bases_completed += 1;
        }
        on_progress(&SearchProgress {
            bases_total: stats.bases_total,
            bases_done: stats.bases_completed + stats.bases_cancelled,
            variants_tested: stats.variants_tested,
        });

        if let Some(result) = completion.result {
            if aggregator.offer_match(result) {
                info!("Match found; stopping workers");
            }
        }
    }

    /// Decides a search that ran out of completions without a verdict.
    ///
    /// A worker that saw the interrupt before the coordinator did leaves its
    /// base unfinished; without a match that is an interruption.
    fn settle(aggregator: &mut ResultAggregator, stats: &SearchStats) {
        if !aggregator.is_searching() {
            return;
        }
        if stats.bases_cancelled > 0 {
            aggregator.mark_interrupted();
        } else {
            aggregator.mark_exhausted();
        }
    }

    fn should_stop(&self, stop: &StopSignal) -> bool {
        stop.is_triggered() || self.interrupt.is_triggered()
    }

    fn run_task(&self, base: &str, stop: &StopSignal) -> TaskCompletion {
        let mut completion = TaskCompletion::default();

        for variant in self.engine.generate(base) {
            if self.should_stop(stop) {
                completion.cancelled = true;
                return completion;
            }
            completion.variants_tested += 1;

            let derived = match derive_guarded(self.oracle.as_ref(), &variant) {
                Ok(derived) => derived,
                Err(e) => {
                    debug!("Oracle failed, skipping variant: {e}");
                    completion.oracle_failures += 1;
                    self.record(&variant, ORACLE_ERROR_CONTEXT, None);
                    continue;
                }
            };
            if derived.is_empty() {
                self.record(&variant, UNLABELLED_CONTEXT, None);
            }

            for DerivedIdentifier { context, identifier } in derived {
                self.record(&variant, &context, Some(&identifier));
                if self.targets.contains(&identifier) {
                    completion.result = Some(MatchResult {
                        base: base.to_string(),
                        variant,
                        identifier,
                        context,
                    });
                    return completion;
                }
            }
        }
        completion
    }

    fn record(&self, variant: &str, context: &str, identifier: Option<&str>) {
        if let Some(recorder) = &self.recorder {
            recorder.record(AttemptRecord {
                variant: variant.to_string(),
                context: context.to_string(),
                identifier: identifier.map(str::to_string),
            });
        }
    }
}
