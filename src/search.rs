//! Parameter search over a training slice.
//!
//! The walk-forward scheduler only relies on the [`ParameterSearch`] trait, so
//! grid search, random search or anything smarter can be swapped in without
//! touching window logic.

use crate::error::{Result, WfoError};
use crate::signals::SignalGenerator;
use crate::simulator::{ExecutionConfig, PortfolioSimulator, SimulationResult};
use crate::types::{Bar, ParamSet};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::debug;

/// Grids larger than this must be explored with [`RandomSearch`].
pub const MAX_GRID_SIZE: usize = 100_000;

/// Most grid points a single parameter range may span.
pub const MAX_RANGE_POINTS: usize = 1_000_000_000;

/// Inclusive numeric range explored by the search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl ParamRange {
    pub fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }

    /// A range holding a single value.
    pub fn fixed(value: f64) -> Self {
        Self::new(value, value, 1.0)
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() || !self.step.is_finite() {
            return Err(WfoError::ConfigError(format!(
                "Range for '{}' must be finite",
                name
            )));
        }
        if self.min > self.max {
            return Err(WfoError::ConfigError(format!(
                "Range for '{}' has min {} above max {}",
                name, self.min, self.max
            )));
        }
        if self.step <= 0.0 {
            return Err(WfoError::ConfigError(format!(
                "Range for '{}' needs a positive step, got {}",
                name, self.step
            )));
        }
        let points = self.point_count();
        if !points.is_finite() || points > MAX_RANGE_POINTS as f64 {
            return Err(WfoError::ConfigError(format!(
                "Range for '{}' spans {:e} points, at most {} allowed",
                name, points, MAX_RANGE_POINTS
            )));
        }
        Ok(())
    }

    fn point_count(&self) -> f64 {
        ((self.max - self.min) / self.step + 1e-9).floor() + 1.0
    }

    /// True when every grid value is a whole number.
    pub fn is_integer(&self) -> bool {
        self.min.fract() == 0.0 && self.step.fract() == 0.0
    }

    /// Number of grid points.
    pub fn len(&self) -> usize {
        if self.step <= 0.0 || self.min > self.max {
            return 0;
        }
        let points = self.point_count();
        if points.is_nan() {
            return 0;
        }
        if points >= usize::MAX as f64 {
            return usize::MAX;
        }
        (points as usize).max(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `k`-th grid point.
    pub fn value_at(&self, k: usize) -> f64 {
        let v = self.min + k as f64 * self.step;
        if self.is_integer() {
            v.round()
        } else {
            v
        }
    }

    /// All grid points, ascending.
    pub fn values(&self) -> Vec<f64> {
        (0..self.len()).map(|k| self.value_at(k)).collect()
    }

    /// A uniformly drawn grid point.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let n = self.len().max(1);
        self.value_at(rng.gen_range(0..n))
    }
}

/// Named parameter ranges, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchSpace {
    params: BTreeMap<String, ParamRange>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, range: ParamRange) -> Self {
        self.params.insert(name.into(), range);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, range: ParamRange) {
        self.params.insert(name.into(), range);
    }

    pub fn get(&self, name: &str) -> Option<&ParamRange> {
        self.params.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamRange)> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        for (name, range) in &self.params {
            range.validate(name)?;
        }
        Ok(())
    }

    /// Number of points in the full cartesian grid, saturating on overflow.
    pub fn grid_size(&self) -> usize {
        self.params
            .values()
            .fold(1usize, |acc, r| acc.saturating_mul(r.len()))
    }

    /// Every combination of grid points. An empty space yields one empty set.
    pub fn grid(&self) -> Vec<ParamSet> {
        let mut combos = vec![ParamSet::new()];
        for (name, range) in &self.params {
            let values = range.values();
            combos = combos
                .into_iter()
                .flat_map(|base| {
                    values
                        .iter()
                        .map(move |v| base.clone().with(name.clone(), *v))
                        .collect::<Vec<_>>()
                })
                .collect();
        }
        combos
    }

    /// One random grid point per parameter.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParamSet {
        self.params
            .iter()
            .map(|(name, range)| (name.clone(), range.sample(rng)))
            .collect()
    }
}

/// Objective a window's parameters are fitted against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMetric {
    #[default]
    Sharpe,
    TotalReturn,
    Calmar,
    Drawdown,
}

impl ScoringMetric {
    /// Score a simulation, higher is better. Non-finite scores are `None`.
    ///
    /// Drawdown is negated so the shallowest drawdown wins.
    pub fn score(&self, result: &SimulationResult) -> Option<f64> {
        let value = match self {
            ScoringMetric::Sharpe => result.sharpe_ratio,
            ScoringMetric::TotalReturn => result.total_return_pct,
            ScoringMetric::Calmar => result.calmar_ratio,
            ScoringMetric::Drawdown => -result.max_drawdown_pct,
        };
        value.is_finite().then_some(value)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringMetric::Sharpe => "sharpe",
            ScoringMetric::TotalReturn => "total_return",
            ScoringMetric::Calmar => "calmar",
            ScoringMetric::Drawdown => "drawdown",
        }
    }
}

impl fmt::Display for ScoringMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ScoringMetric {
    type Err = WfoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "sharpe" => Ok(ScoringMetric::Sharpe),
            "total_return" | "return" | "totalreturn" => Ok(ScoringMetric::TotalReturn),
            "calmar" => Ok(ScoringMetric::Calmar),
            "drawdown" | "max_drawdown" => Ok(ScoringMetric::Drawdown),
            other => Err(WfoError::ConfigError(format!(
                "Unknown scoring metric '{}'. Expected sharpe, total_return, calmar or drawdown",
                other
            ))),
        }
    }
}

/// One evaluated candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub params: ParamSet,
    /// `None` when the candidate failed or scored a non-finite value.
    pub score: Option<f64>,
    pub trades: usize,
    pub error: Option<String>,
}

/// Result of fitting one training slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub best_params: ParamSet,
    pub best_score: f64,
    pub trials: Vec<Trial>,
}

impl SearchOutcome {
    /// Pick the highest-scoring trial; the earliest one wins ties.
    pub fn from_trials(trials: Vec<Trial>) -> Result<Self> {
        let mut best: Option<(usize, f64)> = None;
        for (i, trial) in trials.iter().enumerate() {
            if let Some(score) = trial.score {
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((i, score));
                }
            }
        }

        match best {
            Some((i, best_score)) => Ok(Self {
                best_params: trials[i].params.clone(),
                best_score,
                trials,
            }),
            None => Err(WfoError::OptimizationError(format!(
                "No valid candidate among {} trials",
                trials.len()
            ))),
        }
    }
}

/// Upper bounds on the work one `fit` call may do.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SearchBudget {
    pub max_trials: Option<usize>,
    pub time_budget: Option<Duration>,
}

impl SearchBudget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_max_trials(mut self, max_trials: usize) -> Self {
        self.max_trials = Some(max_trials);
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    fn deadline(&self) -> Option<Instant> {
        self.time_budget.map(|d| Instant::now() + d)
    }
}

/// Runs a candidate parameter set through the signal generator and simulator.
pub struct TrialEvaluator<'a> {
    generator: &'a dyn SignalGenerator,
    simulator: &'a dyn PortfolioSimulator,
    execution: &'a ExecutionConfig,
}

impl<'a> TrialEvaluator<'a> {
    pub fn new(
        generator: &'a dyn SignalGenerator,
        simulator: &'a dyn PortfolioSimulator,
        execution: &'a ExecutionConfig,
    ) -> Self {
        Self {
            generator,
            simulator,
            execution,
        }
    }

    /// Simulate `params` over `bars`.
    pub fn evaluate(&self, bars: &[Bar], params: &ParamSet) -> Result<SimulationResult> {
        let signals = self.generator.signals(bars, params)?;
        self.simulator.simulate(bars, &signals, self.execution)
    }

    /// Evaluate and score `params`, capturing failures in the trial.
    pub fn trial(&self, bars: &[Bar], params: ParamSet, metric: ScoringMetric) -> Trial {
        match self.evaluate(bars, &params) {
            Ok(result) => Trial {
                score: metric.score(&result),
                trades: result.trade_count,
                params,
                error: None,
            },
            Err(e) => Trial {
                params,
                score: None,
                trades: 0,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Fits strategy parameters on a training slice.
pub trait ParameterSearch: Send + Sync {
    /// Returns the name of the search method.
    fn name(&self) -> &str;

    /// Find the best parameters in `space` for `train`.
    ///
    /// Returns an `OptimizationError` when no candidate produces a valid score.
    fn fit(
        &self,
        train: &[Bar],
        space: &SearchSpace,
        metric: ScoringMetric,
        evaluator: &TrialEvaluator<'_>,
    ) -> Result<SearchOutcome>;
}

fn evaluate_all(
    candidates: Vec<ParamSet>,
    train: &[Bar],
    metric: ScoringMetric,
    evaluator: &TrialEvaluator<'_>,
    deadline: Option<Instant>,
) -> Vec<Trial> {
    candidates
        .into_par_iter()
        .filter_map(|params| {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return None;
            }
            Some(evaluator.trial(train, params, metric))
        })
        .collect()
}

/// Exhaustive search over the cartesian grid, evaluated in parallel.
#[derive(Debug, Clone, Default)]
pub struct GridSearch {
    budget: SearchBudget,
}

impl GridSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_budget(mut self, budget: SearchBudget) -> Self {
        self.budget = budget;
        self
    }
}

impl ParameterSearch for GridSearch {
    fn name(&self) -> &str {
        "grid"
    }

    fn fit(
        &self,
        train: &[Bar],
        space: &SearchSpace,
        metric: ScoringMetric,
        evaluator: &TrialEvaluator<'_>,
    ) -> Result<SearchOutcome> {
        space.validate()?;
        let size = space.grid_size();
        if size > MAX_GRID_SIZE {
            return Err(WfoError::OptimizationError(format!(
                "Grid of {} combinations exceeds {}; use random search",
                size, MAX_GRID_SIZE
            )));
        }

        let mut candidates = space.grid();
        if let Some(max) = self.budget.max_trials {
            candidates.truncate(max);
        }
        let deadline = self.budget.deadline();
        let trials = evaluate_all(candidates, train, metric, evaluator, deadline);
        debug!(
            "Grid search evaluated {} of {} candidates on {} bars",
            trials.len(),
            size,
            train.len()
        );
        SearchOutcome::from_trials(trials)
    }
}

/// Uniform random sampling of grid points.
///
/// With a seed, every `fit` call draws the same candidates, which keeps runs
/// reproducible.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    n_trials: usize,
    seed: Option<u64>,
    budget: SearchBudget,
}

impl RandomSearch {
    pub fn new(n_trials: usize) -> Self {
        Self {
            n_trials,
            seed: None,
            budget: SearchBudget::default(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_budget(mut self, budget: SearchBudget) -> Self {
        self.budget = budget;
        self
    }
}

impl Default for RandomSearch {
    fn default() -> Self {
        Self::new(50)
    }
}

impl ParameterSearch for RandomSearch {
    fn name(&self) -> &str {
        "random"
    }

    fn fit(
        &self,
        train: &[Bar],
        space: &SearchSpace,
        metric: ScoringMetric,
        evaluator: &TrialEvaluator<'_>,
    ) -> Result<SearchOutcome> {
        space.validate()?;
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let n = self
            .budget
            .max_trials
            .map_or(self.n_trials, |max| max.min(self.n_trials));
        let candidates: Vec<ParamSet> = (0..n).map(|_| space.sample(&mut rng)).collect();
        let deadline = self.budget.deadline();
        let trials = evaluate_all(candidates, train, metric, evaluator, deadline);
        debug!(
            "Random search evaluated {} candidates on {} bars",
            trials.len(),
            train.len()
        );
        SearchOutcome::from_trials(trials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::VectorizedSimulator;
    use crate::strategies::SmaCrossover;
    use chrono::{TimeZone, Utc};

    fn trending_bars(count: usize) -> Vec<Bar> {
        (0..count)
            .map(|i| {
                let close = 100.0 + i as f64 * 0.5 + 3.0 * (i as f64 / 4.0).sin();
                Bar::new(
                    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                        + chrono::Duration::days(i as i64),
                    close,
                    close + 1.0,
                    close - 1.0,
                    close,
                    1000.0,
                )
            })
            .collect()
    }

    fn trial(score: Option<f64>, period: f64) -> Trial {
        Trial {
            params: ParamSet::new().with("period", period),
            score,
            trades: 1,
            error: None,
        }
    }

    #[test]
    fn test_integer_range_values() {
        let range = ParamRange::new(5.0, 20.0, 5.0);
        assert!(range.is_integer());
        assert_eq!(range.values(), vec![5.0, 10.0, 15.0, 20.0]);
        assert_eq!(ParamRange::fixed(10.0).values(), vec![10.0]);
    }

    #[test]
    fn test_float_range_includes_max() {
        let range = ParamRange::new(0.5, 1.5, 0.25);
        assert!(!range.is_integer());
        assert_eq!(range.len(), 5);
        assert!((range.values()[4] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_range_validation() {
        assert!(ParamRange::new(10.0, 5.0, 1.0).validate("p").is_err());
        assert!(ParamRange::new(1.0, 5.0, 0.0).validate("p").is_err());
        assert!(ParamRange::new(f64::NAN, 5.0, 1.0).validate("p").is_err());
        assert!(ParamRange::new(1.0, 5.0, 1.0).validate("p").is_ok());
    }

    #[test]
    fn test_oversized_range_rejected_without_overflow() {
        let range = ParamRange::new(0.0, 1e300, 1.0);
        assert!(matches!(range.validate("entry_z"), Err(WfoError::ConfigError(_))));
        assert_eq!(range.len(), usize::MAX);

        let space = SearchSpace::new()
            .with("entry_z", range)
            .with("period", ParamRange::new(5.0, 10.0, 1.0));
        assert!(space.validate().is_err());
        assert_eq!(space.grid_size(), usize::MAX);
        assert!(ParamRange::new(0.0, 1e6, 1.0).validate("period").is_ok());
    }

    #[test]
    fn test_grid_is_cartesian_product() {
        let space = SearchSpace::new()
            .with("fast_period", ParamRange::new(5.0, 10.0, 5.0))
            .with("slow_period", ParamRange::new(20.0, 40.0, 10.0));
        assert_eq!(space.grid_size(), 6);
        let grid = space.grid();
        assert_eq!(grid.len(), 6);
        assert_eq!(
            grid[0],
            ParamSet::new().with("fast_period", 5.0).with("slow_period", 20.0)
        );
        assert_eq!(SearchSpace::new().grid(), vec![ParamSet::new()]);
    }

    #[test]
    fn test_metric_orientation() {
        let bars = trending_bars(10);
        let signals = crate::signals::Signals::flat_for(&bars);
        let mut result = VectorizedSimulator
            .simulate(&bars, &signals, &ExecutionConfig::default())
            .unwrap();
        result.max_drawdown_pct = 12.0;
        assert_eq!(ScoringMetric::Drawdown.score(&result), Some(-12.0));
        result.sharpe_ratio = f64::NAN;
        assert_eq!(ScoringMetric::Sharpe.score(&result), None);
    }

    #[test]
    fn test_metric_parsing() {
        assert_eq!("Sharpe".parse::<ScoringMetric>().unwrap(), ScoringMetric::Sharpe);
        assert_eq!(
            "total-return".parse::<ScoringMetric>().unwrap(),
            ScoringMetric::TotalReturn
        );
        assert!("sortino".parse::<ScoringMetric>().is_err());
    }

    #[test]
    fn test_best_trial_first_wins_ties() {
        let outcome = SearchOutcome::from_trials(vec![
            trial(None, 5.0),
            trial(Some(1.0), 10.0),
            trial(Some(1.0), 15.0),
            trial(Some(0.5), 20.0),
        ])
        .unwrap();
        assert_eq!(outcome.best_params.get("period"), Some(10.0));
        assert_eq!(outcome.best_score, 1.0);
        assert_eq!(outcome.trials.len(), 4);
    }

    #[test]
    fn test_no_valid_trial_is_optimization_error() {
        let result = SearchOutcome::from_trials(vec![trial(None, 5.0)]);
        assert!(matches!(result, Err(WfoError::OptimizationError(_))));
    }

    #[test]
    fn test_grid_search_fit() {
        let bars = trending_bars(200);
        let generator = SmaCrossover::default();
        let execution = ExecutionConfig::default();
        let evaluator = TrialEvaluator::new(&generator, &VectorizedSimulator, &execution);
        let space = SearchSpace::new()
            .with("fast_period", ParamRange::new(5.0, 10.0, 5.0))
            .with("slow_period", ParamRange::new(20.0, 30.0, 10.0));

        let outcome = GridSearch::new()
            .fit(&bars, &space, ScoringMetric::Sharpe, &evaluator)
            .unwrap();
        assert_eq!(outcome.trials.len(), 4);
        let best = outcome
            .trials
            .iter()
            .filter_map(|t| t.score)
            .fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(outcome.best_score, best);
    }

    #[test]
    fn test_grid_search_respects_max_trials() {
        let bars = trending_bars(100);
        let generator = SmaCrossover::default();
        let execution = ExecutionConfig::default();
        let evaluator = TrialEvaluator::new(&generator, &VectorizedSimulator, &execution);
        let space = SearchSpace::new()
            .with("fast_period", ParamRange::new(2.0, 10.0, 1.0))
            .with("slow_period", ParamRange::fixed(30.0));

        let outcome = GridSearch::new()
            .with_budget(SearchBudget::unlimited().with_max_trials(3))
            .fit(&bars, &space, ScoringMetric::TotalReturn, &evaluator)
            .unwrap();
        assert_eq!(outcome.trials.len(), 3);
    }

    #[test]
    fn test_invalid_candidates_fail_the_fit() {
        let bars = trending_bars(100);
        let generator = SmaCrossover::default();
        let execution = ExecutionConfig::default();
        let evaluator = TrialEvaluator::new(&generator, &VectorizedSimulator, &execution);
        // fast >= slow is rejected by the generator for every candidate
        let space = SearchSpace::new()
            .with("fast_period", ParamRange::fixed(30.0))
            .with("slow_period", ParamRange::fixed(10.0));

        let result = GridSearch::new().fit(&bars, &space, ScoringMetric::Sharpe, &evaluator);
        assert!(matches!(result, Err(WfoError::OptimizationError(_))));
    }

    #[test]
    fn test_seeded_random_search_is_reproducible() {
        let bars = trending_bars(150);
        let generator = SmaCrossover::default();
        let execution = ExecutionConfig::default();
        let evaluator = TrialEvaluator::new(&generator, &VectorizedSimulator, &execution);
        let space = SearchSpace::new()
            .with("fast_period", ParamRange::new(3.0, 12.0, 1.0))
            .with("slow_period", ParamRange::new(20.0, 40.0, 5.0));

        let search = RandomSearch::new(8).with_seed(42);
        let a = search
            .fit(&bars, &space, ScoringMetric::Sharpe, &evaluator)
            .unwrap();
        let b = search
            .fit(&bars, &space, ScoringMetric::Sharpe, &evaluator)
            .unwrap();
        assert_eq!(a.trials.len(), 8);
        assert_eq!(a.best_params, b.best_params);
        for t in &a.trials {
            let fast = t.params.get("fast_period").unwrap();
            assert!((3.0..=12.0).contains(&fast));
            assert_eq!(fast.fract(), 0.0);
        }
    }
}
