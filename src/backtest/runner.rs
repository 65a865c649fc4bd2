//! Hyperparameter search over the rolling window and entry threshold.
//!
//! The objective is the Sharpe ratio of a backtest; degenerate parameter
//! regions score a large negative sentinel so the sampler moves away from
//! them. Trials are evaluated in parallel batches.

use super::engine::run_backtest;
use super::metrics::PerformanceSummary;
use crate::error::PairsResult;
use crate::strategy::SelectedPair;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Objective value of a degenerate trial.
pub const DEGENERATE_OBJECTIVE: f64 = -999.0;

/// Box the sampler explores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub window_min: usize,
    pub window_max: usize,
    pub threshold_min: f64,
    pub threshold_max: f64,
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self {
            window_min: 10,
            window_max: 100,
            threshold_min: 1.0,
            threshold_max: 3.5,
        }
    }
}

impl SearchSpace {
    pub fn validate(&self) -> Result<()> {
        if self.window_min < 2 {
            bail!("window_min must be at least 2, got {}", self.window_min);
        }
        if self.window_min > self.window_max {
            bail!(
                "window range is empty: [{}, {}]",
                self.window_min,
                self.window_max
            );
        }
        if !(self.threshold_min > 0.0) || self.threshold_min > self.threshold_max {
            bail!(
                "threshold range must be positive and ordered: [{}, {}]",
                self.threshold_min,
                self.threshold_max
            );
        }
        Ok(())
    }

    pub fn contains(&self, params: &TrialParams) -> bool {
        (self.window_min..=self.window_max).contains(&params.window)
            && params.threshold >= self.threshold_min
            && params.threshold <= self.threshold_max
    }

    fn clamp(&self, window: i64, threshold: f64) -> TrialParams {
        TrialParams {
            window: window.clamp(self.window_min as i64, self.window_max as i64) as usize,
            threshold: threshold.clamp(self.threshold_min, self.threshold_max),
        }
    }
}

/// One point in the search space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialParams {
    pub window: usize,
    pub threshold: f64,
}

/// An evaluated trial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub number: usize,
    pub params: TrialParams,
    pub value: f64,
}

impl Trial {
    pub fn is_degenerate(&self) -> bool {
        is_degenerate(self.value)
    }
}

fn is_degenerate(value: f64) -> bool {
    value == DEGENERATE_OBJECTIVE || !value.is_finite()
}

/// Ordering used to rank trials: greater is better.
///
/// Non-degenerate trials always beat degenerate ones, then higher values win,
/// then the earlier trial.
fn rank(a: &Trial, b: &Trial) -> Ordering {
    match (a.is_degenerate(), b.is_degenerate()) {
        (false, true) => return Ordering::Greater,
        (true, false) => return Ordering::Less,
        _ => {}
    }
    a.value
        .partial_cmp(&b.value)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.number.cmp(&a.number))
}

/// A black-box maximizer proposing trial parameters.
pub trait Sampler: Send {
    fn suggest(&mut self, space: &SearchSpace) -> TrialParams;

    /// Report the objective value of a suggested trial.
    fn observe(&mut self, params: TrialParams, value: f64);
}

/// Random search with local refinement around the incumbent.
///
/// The first `startup_trials` suggestions are uniform. Afterwards each
/// suggestion is uniform or a perturbation of the best non-degenerate trial
/// with equal probability; the perturbation radius shrinks as the budget is
/// consumed.
pub struct RandomSearch {
    rng: fastrand::Rng,
    startup_trials: usize,
    budget: usize,
    suggested: usize,
    best: Option<(TrialParams, f64)>,
}

impl RandomSearch {
    pub fn new(budget: usize, startup_trials: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        Self {
            rng,
            startup_trials,
            budget: budget.max(1),
            suggested: 0,
            best: None,
        }
    }

    fn uniform(&mut self, space: &SearchSpace) -> TrialParams {
        TrialParams {
            window: self.rng.usize(space.window_min..=space.window_max),
            threshold: space.threshold_min
                + self.rng.f64() * (space.threshold_max - space.threshold_min),
        }
    }

    fn around(&mut self, center: TrialParams, space: &SearchSpace) -> TrialParams {
        let progress = self.suggested as f64 / self.budget as f64;
        let radius = 0.25 * (1.0 - progress).max(0.1);

        let window_span = ((space.window_max - space.window_min) as f64 * radius).round() as i64;
        let window_step = if window_span > 0 {
            self.rng.i64(-window_span..=window_span)
        } else {
            0
        };
        let threshold_step =
            (self.rng.f64() * 2.0 - 1.0) * radius * (space.threshold_max - space.threshold_min);

        space.clamp(
            center.window as i64 + window_step,
            center.threshold + threshold_step,
        )
    }
}

impl Sampler for RandomSearch {
    fn suggest(&mut self, space: &SearchSpace) -> TrialParams {
        let params = match self.best {
            Some((center, _)) if self.suggested >= self.startup_trials && self.rng.bool() => {
                self.around(center, space)
            }
            _ => self.uniform(space),
        };
        self.suggested += 1;
        params
    }

    fn observe(&mut self, params: TrialParams, value: f64) {
        if is_degenerate(value) {
            return;
        }
        if self.best.map_or(true, |(_, best)| value > best) {
            self.best = Some((params, value));
        }
    }
}

/// Backtest metrics for one parameter set.
pub fn evaluate(
    pair: &SelectedPair,
    params: TrialParams,
    periods_per_year: f64,
) -> PairsResult<PerformanceSummary> {
    let signal = pair.signal(params.window)?;
    let record = run_backtest(&signal, params.threshold)?;
    PerformanceSummary::calculate(&record, periods_per_year)
}

/// Sharpe ratio for `params`, or the sentinel when the backtest fails or the
/// Sharpe is zero, infinite or undefined.
pub fn objective(pair: &SelectedPair, params: TrialParams, periods_per_year: f64) -> f64 {
    match evaluate(pair, params, periods_per_year) {
        Ok(summary) if summary.sharpe_ratio.is_finite() && summary.sharpe_ratio != 0.0 => {
            summary.sharpe_ratio
        }
        Ok(_) => DEGENERATE_OBJECTIVE,
        Err(e) => {
            debug!(
                window = params.window,
                threshold = params.threshold,
                "Degenerate trial: {}",
                e
            );
            DEGENERATE_OBJECTIVE
        }
    }
}

/// All trials of a search, in trial order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResults {
    pub trials: Vec<Trial>,
}

impl SearchResults {
    /// Best trial by the ranking above.
    pub fn best(&self) -> Option<&Trial> {
        self.trials.iter().max_by(|a, b| rank(a, b))
    }

    pub fn degenerate_count(&self) -> usize {
        self.trials.iter().filter(|t| t.is_degenerate()).count()
    }

    /// Export trials to CSV.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use std::io::Write;
        let path = path.as_ref();
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        writeln!(file, "trial,window,threshold,value,degenerate")?;
        for trial in &self.trials {
            writeln!(
                file,
                "{},{},{},{},{}",
                trial.number,
                trial.params.window,
                trial.params.threshold,
                trial.value,
                trial.is_degenerate(),
            )?;
        }

        Ok(())
    }

    /// Generate a summary of the search.
    pub fn summary(&self) -> String {
        let mut s = String::new();

        s.push_str("═══════════════════════════════════════════════\n");
        s.push_str("PARAMETER SEARCH RESULTS\n");
        s.push_str("═══════════════════════════════════════════════\n");
        s.push_str(&format!(
            "Trials: {} | Degenerate: {}\n",
            self.trials.len(),
            self.degenerate_count()
        ));

        match self.best() {
            Some(best) if !best.is_degenerate() => {
                s.push_str(&format!(
                    "Best trial #{}: window={} threshold={:.4}\n  Sharpe: {:.4}\n",
                    best.number, best.params.window, best.params.threshold, best.value
                ));
            }
            _ => s.push_str("No non-degenerate trial found\n"),
        }

        s.push_str("═══════════════════════════════════════════════\n");
        s
    }
}

/// Drives a sampler against the backtest objective.
pub struct SearchRunner {
    space: SearchSpace,
    n_trials: usize,
    parallelism: usize,
    periods_per_year: f64,
}

impl SearchRunner {
    pub fn new(
        space: SearchSpace,
        n_trials: usize,
        parallelism: usize,
        periods_per_year: f64,
    ) -> Self {
        Self {
            space,
            n_trials,
            parallelism: parallelism.max(1),
            periods_per_year,
        }
    }

    /// Run the search on a selected pair.
    ///
    /// Each batch of at most `parallelism` suggestions is evaluated on
    /// blocking workers and awaited before the next batch is suggested, so
    /// the sampler sees every earlier result. Results are reported in trial
    /// order.
    pub async fn run<S: Sampler>(
        &self,
        pair: Arc<SelectedPair>,
        sampler: &mut S,
    ) -> Result<SearchResults> {
        self.space.validate()?;

        info!(
            "Starting parameter search: {} trials, parallelism={}, pair {} / {}",
            self.n_trials, self.parallelism, pair.name1, pair.name2
        );

        let mut trials = Vec::with_capacity(self.n_trials);

        while trials.len() < self.n_trials {
            let batch = self.parallelism.min(self.n_trials - trials.len());
            let mut handles = Vec::with_capacity(batch);

            for k in 0..batch {
                let number = trials.len() + k;
                let params = sampler.suggest(&self.space);
                let pair = pair.clone();
                let periods_per_year = self.periods_per_year;

                let handle = tokio::task::spawn_blocking(move || {
                    objective(&pair, params, periods_per_year)
                });
                handles.push((number, params, handle));
            }

            for (number, params, handle) in handles {
                let value = match handle.await {
                    Ok(value) => value,
                    Err(e) => {
                        warn!("Trial {} task failed: {}", number, e);
                        DEGENERATE_OBJECTIVE
                    }
                };

                debug!(
                    trial = number,
                    window = params.window,
                    threshold = params.threshold,
                    value,
                    "Trial complete"
                );
                sampler.observe(params, value);
                trials.push(Trial {
                    number,
                    params,
                    value,
                });
            }
        }

        let results = SearchResults { trials };
        if let Some(best) = results.best() {
            info!(
                "Search complete: best trial #{} window={} threshold={:.4} value={:.4}",
                best.number, best.params.window, best.params.threshold, best.value
            );
        }

        Ok(results)
    }
}
