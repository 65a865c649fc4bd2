//! Pairwise cointegration scoring and best-pair selection.

use super::spread::{rolling_zscore, spread};
use crate::data::PriceTable;
use crate::error::{PairsError, PairsResult};
use crate::stats::CointegrationTest;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default significance level for candidate pairs.
pub const DEFAULT_SIGNIFICANCE: f64 = 0.05;

/// A pair whose p-value falls below the significance level.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePair {
    pub i: usize,
    pub j: usize,
    pub name1: String,
    pub name2: String,
    pub statistic: f64,
    pub p_value: f64,
}

/// Test statistics and p-values for every instrument pair.
///
/// Only the upper triangle (`i < j`) holds test results; the diagonal and
/// lower triangle keep the neutral defaults (score 0, p-value 1).
#[derive(Debug, Clone)]
pub struct CointegrationMatrix {
    names: Vec<String>,
    scores: Vec<f64>,
    p_values: Vec<f64>,
    significance: f64,
}

impl CointegrationMatrix {
    fn new(names: Vec<String>, significance: f64) -> Self {
        let n = names.len();
        Self {
            names,
            scores: vec![0.0; n * n],
            p_values: vec![1.0; n * n],
            significance,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of instruments.
    pub fn size(&self) -> usize {
        self.names.len()
    }

    pub fn significance(&self) -> f64 {
        self.significance
    }

    pub fn score(&self, i: usize, j: usize) -> f64 {
        self.scores[i * self.size() + j]
    }

    pub fn p_value(&self, i: usize, j: usize) -> f64 {
        self.p_values[i * self.size() + j]
    }

    fn set(&mut self, i: usize, j: usize, score: f64, p_value: f64) {
        let n = self.size();
        self.scores[i * n + j] = score;
        self.p_values[i * n + j] = p_value;
    }

    fn upper_triangle(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let n = self.size();
        (0..n).flat_map(move |i| ((i + 1)..n).map(move |j| (i, j)))
    }

    fn candidate(&self, i: usize, j: usize) -> CandidatePair {
        CandidatePair {
            i,
            j,
            name1: self.names[i].clone(),
            name2: self.names[j].clone(),
            statistic: self.score(i, j),
            p_value: self.p_value(i, j),
        }
    }

    /// Pairs with p-value below the significance level, in row-major order.
    pub fn candidates(&self) -> Vec<CandidatePair> {
        self.upper_triangle()
            .filter(|&(i, j)| self.p_value(i, j) < self.significance)
            .map(|(i, j)| self.candidate(i, j))
            .collect()
    }

    /// Candidates sorted by ascending p-value, ties kept in row-major order.
    pub fn ranked_candidates(&self) -> Vec<CandidatePair> {
        let mut candidates = self.candidates();
        candidates.sort_by(|a, b| a.p_value.partial_cmp(&b.p_value).unwrap_or(Ordering::Equal));
        candidates
    }

    /// Upper-triangle cell with the smallest p-value; the first one in a
    /// row-major scan wins ties.
    pub fn best(&self) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize)> = None;
        for (i, j) in self.upper_triangle() {
            let p = self.p_value(i, j);
            match best {
                Some((bi, bj)) if p >= self.p_value(bi, bj) => {}
                _ => best = Some((i, j)),
            }
        }
        best
    }
}

/// The raw price series of the selected pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedPair {
    pub name1: String,
    pub name2: String,
    pub p_value: f64,
    pub index: Vec<DateTime<Utc>>,
    pub s1: Vec<f64>,
    pub s2: Vec<f64>,
}

impl SelectedPair {
    /// Spread and z-score for `window`, keeping only rows with a defined
    /// z-score.
    pub fn signal(&self, window: usize) -> PairsResult<PairSignal> {
        let spread = spread(&self.s1, &self.s2)?;
        let zscores = rolling_zscore(&spread, window)?;

        let mut signal = PairSignal {
            name1: self.name1.clone(),
            name2: self.name2.clone(),
            window,
            index: Vec::new(),
            s1: Vec::new(),
            s2: Vec::new(),
            spread: Vec::new(),
            zscore: Vec::new(),
        };

        for (t, z) in zscores.into_iter().enumerate() {
            let Some(z) = z else { continue };
            signal.index.push(self.index[t]);
            signal.s1.push(self.s1[t]);
            signal.s2.push(self.s2[t]);
            signal.spread.push(spread[t]);
            signal.zscore.push(z);
        }

        Ok(signal)
    }
}

/// A selected pair with its windowed spread and z-score; all columns share
/// one index.
#[derive(Debug, Clone, PartialEq)]
pub struct PairSignal {
    pub name1: String,
    pub name2: String,
    pub window: usize,
    pub index: Vec<DateTime<Utc>>,
    pub s1: Vec<f64>,
    pub s2: Vec<f64>,
    pub spread: Vec<f64>,
    pub zscore: Vec<f64>,
}

impl PairSignal {
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Scores every pair in a price table and picks the strongest one.
#[derive(Clone)]
pub struct CointegrationSelector {
    test: Arc<dyn CointegrationTest>,
    significance: f64,
}

impl CointegrationSelector {
    pub fn new(test: Arc<dyn CointegrationTest>, significance: f64) -> Self {
        Self { test, significance }
    }

    /// Run the cointegration test on every pair `i < j`.
    ///
    /// A failing pairwise test leaves its cell at the neutral defaults.
    pub fn score(&self, table: &PriceTable) -> PairsResult<CointegrationMatrix> {
        if table.width() < 2 {
            return Err(PairsError::EmptyMatrix {
                instruments: table.width(),
            });
        }

        let mut matrix = CointegrationMatrix::new(table.names().to_vec(), self.significance);
        let cells: Vec<(usize, usize)> = matrix.upper_triangle().collect();

        for (i, j) in cells {
            match self.test.test(table.column(i), table.column(j)) {
                Ok(score) => {
                    debug!(
                        s1 = %table.names()[i],
                        s2 = %table.names()[j],
                        statistic = score.statistic,
                        p_value = score.p_value,
                        "Scored pair"
                    );
                    matrix.set(i, j, score.statistic, score.p_value);
                }
                Err(e) => {
                    warn!(
                        "Cointegration test failed for {} / {}: {}",
                        table.names()[i],
                        table.names()[j],
                        e
                    );
                }
            }
        }

        info!(
            instruments = table.width(),
            candidates = matrix.candidates().len(),
            "Cointegration matrix computed"
        );

        Ok(matrix)
    }

    /// Raw series of the pair with the minimum p-value.
    pub fn select(&self, table: &PriceTable) -> PairsResult<(CointegrationMatrix, SelectedPair)> {
        let matrix = self.score(table)?;
        let (i, j) = matrix.best().ok_or(PairsError::EmptyMatrix {
            instruments: table.width(),
        })?;

        let pair = SelectedPair {
            name1: table.names()[i].clone(),
            name2: table.names()[j].clone(),
            p_value: matrix.p_value(i, j),
            index: table.index().to_vec(),
            s1: table.column(i).to_vec(),
            s2: table.column(j).to_vec(),
        };

        info!(
            s1 = %pair.name1,
            s2 = %pair.name2,
            p_value = pair.p_value,
            "Selected pair"
        );

        Ok((matrix, pair))
    }

    /// Select the best pair and build its signal for `window`.
    pub fn find_best_pair(&self, table: &PriceTable, window: usize) -> PairsResult<PairSignal> {
        let (_, pair) = self.select(table)?;
        pair.signal(window)
    }
}
