use crossbeam_channel::unbounded;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::compare::{PreparedComparison, StrategyComparator};
use crate::config::OptimizerConfig;
use crate::error::{Result, SimError};
use crate::strategy::{PitStop, Strategy};
use crate::tire::Compound;

/// Deepest search the optimizer knows how to enumerate.
pub const MAX_SEARCH_STOPS: u32 = 2;

/// Shared flag that stops a running search. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub strategy: Strategy,
    pub total_time: f64,
    /// Alternative minus actual race time; the most negative is the best.
    pub improvement: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResult {
    pub driver_id: u32,
    pub actual_total_time: f64,
    pub candidates: Vec<Candidate>,
    pub evaluated: usize,
    pub total: usize,
    /// False when the search was cancelled or ran out of time; `candidates`
    /// then ranks only what was evaluated.
    pub completed: bool,
}

fn one_stop(race_length: u32) -> impl Iterator<Item = Strategy> {
    (10..race_length.saturating_sub(5)).flat_map(|lap| {
        Compound::DRY
            .into_iter()
            .map(move |compound| Strategy::new(vec![PitStop::new(lap, compound)]))
    })
}

fn two_stop(race_length: u32) -> impl Iterator<Item = Strategy> {
    (8..25).flat_map(move |first| {
        (first + 10..race_length.saturating_sub(5)).flat_map(move |second| {
            [Compound::Soft, Compound::Medium].into_iter().flat_map(move |first_compound| {
                Compound::DRY.into_iter().map(move |second_compound| {
                    Strategy::new(vec![
                        PitStop::new(first, first_compound.clone()),
                        PitStop::new(second, second_compound),
                    ])
                })
            })
        })
    })
}

/// Every strategy with exactly `max_stops` stops, in a fixed order.
/// Requests above two are searched as two.
///
/// One stop: lap 10 to `race_length - 6` on any dry compound. Two stops:
/// first lap 8 to 24 on SOFT or MEDIUM, second at least ten laps later and
/// no later than `race_length - 6`, on any dry compound.
pub fn search_space(race_length: u32, max_stops: u32) -> Vec<Strategy> {
    match max_stops {
        0 => Vec::new(),
        1 => one_stop(race_length).collect(),
        _ => two_stop(race_length).collect(),
    }
}

/// Brute-force pit-window search over a bounded worker pool.
pub struct StrategyOptimizer<'a> {
    comparator: StrategyComparator<'a>,
    config: OptimizerConfig,
    cancel: CancellationToken,
}

impl<'a> StrategyOptimizer<'a> {
    pub fn new(comparator: StrategyComparator<'a>, config: OptimizerConfig) -> Self {
        Self {
            comparator,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Ranks candidate strategies by time gained over the actual race.
    ///
    /// At most `min(top_n, result_cap)` candidates are returned. Ties keep
    /// enumeration order, so the ranking does not depend on the worker count.
    pub fn find_optimal_windows(&self, driver_id: u32, max_stops: u32, top_n: usize) -> Result<OptimizationResult> {
        if max_stops == 0 {
            return Err(SimError::InvalidInput("max_stops must be at least 1".into()));
        }
        if max_stops > MAX_SEARCH_STOPS {
            debug!("searching {MAX_SEARCH_STOPS}-stop strategies, {max_stops} stops requested");
        }

        let prepared = self.comparator.prepare(driver_id)?;
        let space = search_space(prepared.race_length(), max_stops);
        let workers = self.config.worker_count().min(space.len()).max(1);
        let deadline = self
            .config
            .deadline_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        info!(
            "driver #{driver_id}: evaluating {} candidate strategies on {workers} workers",
            space.len()
        );

        let mut scored = self.evaluate(&prepared, &space, workers, deadline);
        let evaluated = scored.len();
        let completed = evaluated == space.len();
        if completed {
            info!("driver #{driver_id}: search finished");
        } else if self.cancel.is_cancelled() {
            warn!("driver #{driver_id}: search cancelled after {evaluated}/{}", space.len());
        } else {
            warn!("driver #{driver_id}: search deadline hit after {evaluated}/{}", space.len());
        }

        scored.sort_by(|(ia, a), (ib, b)| a.improvement.total_cmp(&b.improvement).then(ia.cmp(ib)));
        let limit = top_n.min(self.config.result_cap);
        let candidates = scored.into_iter().take(limit).map(|(_, c)| c).collect();

        Ok(OptimizationResult {
            driver_id,
            actual_total_time: prepared.actual_total_time(),
            candidates,
            evaluated,
            total: space.len(),
            completed,
        })
    }

    fn should_stop(&self, deadline: Option<Instant>) -> bool {
        self.cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn evaluate(
        &self,
        prepared: &PreparedComparison<'_>,
        space: &[Strategy],
        workers: usize,
        deadline: Option<Instant>,
    ) -> Vec<(usize, Candidate)> {
        let (job_tx, job_rx) = unbounded::<(usize, &Strategy)>();
        let (result_tx, result_rx) = unbounded::<(usize, Candidate)>();
        for job in space.iter().enumerate() {
            // receiver is alive until the end of this function
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        thread::scope(|s| {
            for _ in 0..workers {
                let jobs = job_rx.clone();
                let results = result_tx.clone();
                s.spawn(move || {
                    for (index, strategy) in jobs.iter() {
                        if self.should_stop(deadline) {
                            break;
                        }
                        let comparison = prepared.compare(strategy);
                        let candidate = Candidate {
                            strategy: comparison.alternative_strategy,
                            total_time: comparison.alternative_total_time,
                            improvement: comparison.time_difference,
                        };
                        if results.send((index, candidate)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);
            result_rx.iter().collect()
        })
    }
}
