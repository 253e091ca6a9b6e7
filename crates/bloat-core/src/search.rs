//! The fuzzing loop.
//!
//! The controller owns the frontier of candidate states and is the only
//! place where accept/reject/requeue decisions happen. Each round it
//! dispatches every candidate to the oracle through a fixed worker pool,
//! collects exactly one result per candidate, and triages:
//!
//! - not interesting: mutate one input (rotating position) and requeue;
//! - interesting but unsafe: requeue with a depth bump to diversify;
//! - interesting and safe: minimize, record, and keep searching.
//!
//! Breadth steps mutate forward from the current state; a depth step resets
//! to the last-known-good baseline first. A candidate that exhausts its
//! Random rounds escalates to Boundary then Perturb on still-essential
//! inputs, and is retired when both budgets run out.

use crate::analytics::Analytics;
use crate::checkpoint::CheckpointStore;
use crate::mutate::{Mutator, StrategyKind};
use crate::oracle::{CandidateJob, CompileOracle, CompileResult};
use crate::report::ReportWriter;
use crate::template::{Input, Template};
use bloat_common::config::FuzzConfig;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, error, info};

/// Cooperative cancellation flag, shared between the controller and the
/// process signal handlers. Observed at round boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Safe to call from any thread.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One node of the search.
///
/// Replaced, never mutated: every transition clones the input vectors so
/// prior states stay available for backtracking.
#[derive(Debug, Clone)]
pub struct CandidateState {
    /// The template being explored.
    pub template: Arc<Template>,
    /// The working mutation compiled next round.
    pub current_inputs: Vec<Input>,
    /// Last-known-good baseline a depth step resets to.
    pub prior_inputs: Vec<Input>,
    /// Backtracking steps taken so far.
    pub depth: u32,
    /// Forward steps taken so far; drives the rotating mutation index.
    pub breadth: u32,
    /// Result of the previous round, for improvement tracking.
    pub previous_result: Option<CompileResult>,
    rounds: u32,
    stale: u32,
    last_strategy: StrategyKind,
}

impl CandidateState {
    /// Seed a candidate from a template's original input values.
    pub fn seed(template: Arc<Template>) -> Self {
        let inputs = template.inputs.clone();
        Self {
            current_inputs: inputs.clone(),
            prior_inputs: inputs,
            template,
            depth: 0,
            breadth: 0,
            previous_result: None,
            rounds: 0,
            stale: 0,
            last_strategy: StrategyKind::Random,
        }
    }
}

/// What a finished (or cancelled) search produced.
#[derive(Debug)]
pub struct SearchOutcome {
    /// Accepted results, including any carried in from a resumed checkpoint.
    pub accepted: Vec<CompileResult>,
    /// Rounds executed.
    pub rounds: u64,
    /// Whether the search stopped on cancellation rather than completion.
    pub cancelled: bool,
}

/// The rotating mutation position: each round targets a different input,
/// walking backwards from the last index so every position is eventually
/// covered.
fn rotating_index(len: usize, breadth: u32) -> usize {
    debug_assert!(len > 0);
    let step = breadth as usize % len;
    (len - 1 + len - step) % len
}

/// Which mutation mode a candidate is currently in.
#[derive(Debug, Clone, Copy)]
enum Phase {
    Weighted,
    Forced(StrategyKind),
}

/// Drives the search over all templates.
pub struct Controller {
    oracle: Arc<dyn CompileOracle>,
    mutator: Mutator,
    config: FuzzConfig,
    cancel: CancelToken,
    analytics: Option<Analytics>,
    reporter: Option<ReportWriter>,
    checkpoint: Option<CheckpointStore>,
    accepted: Vec<CompileResult>,
    rng: StdRng,
}

impl Controller {
    /// Create a controller. Collaborator sinks are attached with the
    /// `with_*` builders; without them the search runs silently.
    pub fn new(oracle: Arc<dyn CompileOracle>, config: FuzzConfig, cancel: CancelToken) -> Self {
        let mutator = Mutator::new(config.strategy_weights, config.perturb_max_tries);
        Self {
            oracle,
            mutator,
            config,
            cancel,
            analytics: None,
            reporter: None,
            checkpoint: None,
            accepted: Vec::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Attach the CSV telemetry sink.
    #[must_use]
    pub fn with_analytics(mut self, analytics: Analytics) -> Self {
        self.analytics = Some(analytics);
        self
    }

    /// Attach the report writer for accepted results.
    #[must_use]
    pub fn with_reporter(mut self, reporter: ReportWriter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Attach the checkpoint store, saved after every accepted result.
    #[must_use]
    pub fn with_checkpoint(mut self, checkpoint: CheckpointStore) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Carry in accepted results from a previous session. Templates whose
    /// seed path already produced an accepted result are not re-seeded.
    #[must_use]
    pub fn with_resumed(mut self, accepted: Vec<CompileResult>) -> Self {
        self.accepted = accepted;
        self
    }

    /// Fix the mutation RNG seed, for reproducible runs.
    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Run the search to completion, threshold, or cancellation.
    ///
    /// Cancellation is observed at round boundaries; results of the round
    /// in flight are still collected and triaged, so nothing already
    /// computed is thrown away.
    pub fn run(&mut self, templates: Vec<Template>) -> SearchOutcome {
        let mut frontier: Vec<CandidateState> = templates
            .into_iter()
            .filter(|template| {
                let seen = self
                    .accepted
                    .iter()
                    .any(|result| result.source_path == template.path);
                if seen {
                    debug!(path = %template.path.display(), "seed already has an accepted result");
                }
                !seen
            })
            .map(|template| CandidateState::seed(Arc::new(template)))
            .collect();

        let jobs = self.config.effective_jobs(1);
        info!(candidates = frontier.len(), jobs, "search starting");
        let pool = WorkerPool::new(Arc::clone(&self.oracle), jobs);

        let mut rounds: u64 = 0;
        let mut cancelled = false;
        while !frontier.is_empty() && self.accepted.len() < self.config.accept_threshold {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            rounds += 1;

            for (index, candidate) in frontier.iter().enumerate() {
                pool.submit(
                    index,
                    CandidateJob {
                        template: Arc::clone(&candidate.template),
                        inputs: candidate.current_inputs.clone(),
                        strategy: candidate.last_strategy,
                    },
                );
            }
            let results = pool.collect(frontier.len());

            let mut pending: Vec<Option<CandidateState>> =
                frontier.into_iter().map(Some).collect();
            let mut next = Vec::with_capacity(pending.len());
            for (index, result) in results {
                let Some(candidate) = pending.get_mut(index).and_then(Option::take) else {
                    continue;
                };
                if let Some(requeued) = self.triage(candidate, result, rounds) {
                    next.push(requeued);
                }
            }
            frontier = next;
        }

        info!(
            accepted = self.accepted.len(),
            rounds, cancelled, "search finished"
        );
        self.save_checkpoint();
        SearchOutcome {
            accepted: self.accepted.clone(),
            rounds,
            cancelled,
        }
    }

    /// Accepted results so far.
    pub fn accepted(&self) -> &[CompileResult] {
        &self.accepted
    }

    fn triage(
        &mut self,
        candidate: CandidateState,
        mut result: CompileResult,
        round: u64,
    ) -> Option<CandidateState> {
        if result.is_interesting(self.config.ratio_threshold) {
            if self.oracle.verify_safe(&mut result) {
                return self.accept(candidate, result, round);
            }
            debug!(
                path = %candidate.template.path.display(),
                ratio = result.ratio(),
                "interesting but unsafe, diversifying"
            );
            return self.advance(candidate, Some(result), true);
        }
        self.advance(candidate, Some(result), false)
    }

    /// Promote a safe interesting result: minimize it, record it, and
    /// requeue the candidate (from the minimized state) to keep hunting
    /// for further distinct regressions.
    fn accept(
        &mut self,
        candidate: CandidateState,
        mut result: CompileResult,
        round: u64,
    ) -> Option<CandidateState> {
        let minimized = self.minimize(&candidate, &mut result);
        info!(
            path = %result.source_path.display(),
            ratio = result.ratio(),
            round,
            "regression accepted"
        );
        if let (Some(analytics), Some(entry)) = (&self.analytics, &result.max_ratio) {
            analytics.record_accepted(&result.source_path, entry.ratio, &entry.compiler, round);
        }
        if let Some(reporter) = &mut self.reporter {
            if let Err(e) = reporter.write(&result) {
                error!(error = %e, "failed to write report");
            }
        }

        let requeued = CandidateState {
            template: Arc::clone(&candidate.template),
            current_inputs: minimized.clone(),
            prior_inputs: minimized,
            depth: candidate.depth,
            breadth: candidate.breadth,
            previous_result: Some(result.clone()),
            rounds: 0,
            stale: 0,
            last_strategy: candidate.last_strategy,
        };
        self.accepted.push(result);
        self.save_checkpoint();

        if self.accepted.len() >= self.config.accept_threshold {
            return None;
        }
        self.advance(requeued, None, true)
    }

    /// Produce the next candidate state: pick the mutation position and
    /// strategy phase, mutate exactly one input, and requeue. `diversify`
    /// forces a depth step. Returns `None` when the candidate has exhausted
    /// every strategy budget and is retired.
    fn advance(
        &mut self,
        candidate: CandidateState,
        result: Option<CompileResult>,
        diversify: bool,
    ) -> Option<CandidateState> {
        let len = candidate.template.inputs.len();
        let previous_ratio = candidate
            .previous_result
            .as_ref()
            .map_or(0.0, CompileResult::ratio);
        let new_ratio = result.as_ref().map_or(0.0, CompileResult::ratio);
        let improved = result.is_some() && new_ratio >= previous_ratio;
        if improved && new_ratio > previous_ratio {
            if let Some(analytics) = &self.analytics {
                analytics.record_improvement(
                    &candidate.template.path,
                    new_ratio,
                    previous_ratio,
                    candidate.last_strategy,
                );
            }
        }
        let stale = if improved { 0 } else { candidate.stale + 1 };

        // A full sweep over every position without improvement exhausts the
        // breadth walk; reset to the last-known-good baseline.
        let backtrack = diversify || stale as usize >= len;
        let (mut inputs, depth) = if backtrack {
            (candidate.prior_inputs.clone(), candidate.depth + 1)
        } else {
            (candidate.current_inputs.clone(), candidate.depth)
        };
        let prior_inputs = if improved {
            candidate.current_inputs.clone()
        } else {
            candidate.prior_inputs.clone()
        };

        let rounds = candidate.rounds + 1;
        let phase = self.phase_for(candidate.rounds, &candidate)?;

        // Escalation phases restrict mutation to inputs still marked
        // essential; the weighted phase walks every position.
        let positions: Vec<usize> = match phase {
            Phase::Weighted => (0..len).collect(),
            Phase::Forced(_) => {
                let essential: Vec<usize> = inputs
                    .iter()
                    .enumerate()
                    .filter(|(_, input)| input.essential)
                    .map(|(index, _)| index)
                    .collect();
                if essential.is_empty() {
                    (0..len).collect()
                } else {
                    essential
                }
            }
        };
        let index = positions[rotating_index(positions.len(), candidate.breadth)];

        let (value, kind) = match phase {
            Phase::Weighted => self.mutator.mutate(&inputs[index], &mut self.rng),
            Phase::Forced(kind) => {
                match self.mutator.mutate_with(kind, &inputs[index], &mut self.rng) {
                    Ok(value) => (value, kind),
                    // Strategy failure falls back to Random.
                    Err(_) => match self.mutator.mutate_with(
                        StrategyKind::Random,
                        &inputs[index],
                        &mut self.rng,
                    ) {
                        Ok(value) => (value, StrategyKind::Random),
                        Err(_) => (inputs[index].value.clone(), StrategyKind::Random),
                    },
                }
            }
        };
        if let Some(analytics) = &self.analytics {
            analytics.record_strategy(kind, &value);
        }
        inputs[index].value = value;

        Some(CandidateState {
            template: candidate.template,
            current_inputs: inputs,
            prior_inputs,
            depth,
            breadth: candidate.breadth + 1,
            previous_result: result.or(candidate.previous_result),
            rounds,
            stale,
            last_strategy: kind,
        })
    }

    /// Weighted mutation for the first `random_rounds` rounds, then one
    /// escalation budget of Boundary, then one of Perturb, then retirement.
    fn phase_for(&self, rounds: u32, candidate: &CandidateState) -> Option<Phase> {
        let random_rounds = self.config.random_rounds;
        let tries = self.config.escalation_tries;
        if rounds < random_rounds {
            Some(Phase::Weighted)
        } else if rounds < random_rounds + tries {
            Some(Phase::Forced(StrategyKind::Boundary))
        } else if rounds < random_rounds + 2 * tries {
            Some(Phase::Forced(StrategyKind::Perturb))
        } else {
            info!(
                path = %candidate.template.path.display(),
                depth = candidate.depth,
                "strategy budgets exhausted, retiring candidate"
            );
            None
        }
    }

    /// Shrink an accepted result: revert each essential input to its
    /// original value in turn and recompile. If the reverted candidate's
    /// ratio did not drop below the accepted ratio, that input did not
    /// contribute to the regression and is marked non-essential and left
    /// reverted. The accepted result is re-materialized from the reduced
    /// input set so the reported diff only shows contributing mutations.
    fn minimize(&mut self, candidate: &CandidateState, accepted: &mut CompileResult) -> Vec<Input> {
        let base_ratio = accepted.ratio();
        let mut inputs = candidate.current_inputs.clone();
        for index in 0..inputs.len() {
            if !inputs[index].essential {
                continue;
            }
            let original_value = candidate.template.inputs[index].value.clone();
            if inputs[index].value == original_value {
                // Never mutated, cannot have contributed.
                inputs[index].essential = false;
                continue;
            }
            let mut reverted = inputs.clone();
            reverted[index].value = original_value.clone();
            let probe = self.oracle.compile(&CandidateJob {
                template: Arc::clone(&candidate.template),
                inputs: reverted,
                strategy: accepted.strategy,
            });
            if probe.ratio() >= base_ratio {
                inputs[index].essential = false;
                inputs[index].value = original_value;
            }
        }
        accepted.source_text = candidate.template.materialize(&inputs);
        debug!(
            essential = inputs.iter().filter(|input| input.essential).count(),
            total = inputs.len(),
            "minimization complete"
        );
        inputs
    }

    fn save_checkpoint(&self) {
        if let Some(store) = &self.checkpoint {
            if let Err(e) = store.save(&self.accepted) {
                error!(error = %e, "checkpoint save failed");
            }
        }
    }
}

/// Fixed-size pool of stateless oracle workers.
///
/// Workers share one job receiver behind a mutex and send results back on
/// a single channel; the controller is the sole consumer. Dropping the
/// pool closes the job channel, which winds the workers down.
struct WorkerPool {
    job_tx: Option<Sender<(usize, CandidateJob)>>,
    result_rx: Receiver<(usize, CompileResult)>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn new(oracle: Arc<dyn CompileOracle>, size: usize) -> Self {
        let (job_tx, job_rx) = channel::<(usize, CandidateJob)>();
        let (result_tx, result_rx) = channel();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut handles = Vec::with_capacity(size);
        for _ in 0..size {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            let oracle = Arc::clone(&oracle);
            handles.push(std::thread::spawn(move || loop {
                let job = {
                    let Ok(receiver) = job_rx.lock() else { break };
                    receiver.recv()
                };
                let Ok((index, job)) = job else { break };
                let result = oracle.compile(&job);
                if result_tx.send((index, result)).is_err() {
                    break;
                }
            }));
        }
        Self {
            job_tx: Some(job_tx),
            result_rx,
            handles,
        }
    }

    fn submit(&self, index: usize, job: CandidateJob) {
        if let Some(tx) = &self.job_tx {
            let _ = tx.send((index, job));
        }
    }

    /// Block until `count` results arrived (or every worker died).
    fn collect(&self, count: usize) -> Vec<(usize, CompileResult)> {
        let mut results = Vec::with_capacity(count);
        for _ in 0..count {
            match self.result_rx.recv() {
                Ok(result) => results.push(result),
                Err(_) => break,
            }
        }
        results
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.job_tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
