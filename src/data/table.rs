//! Time-aligned price table.

use crate::error::{PairsError, PairsResult};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// A raw, possibly unsorted price series for one instrument.
pub type PriceSeries = Vec<(DateTime<Utc>, f64)>;

/// Prices for a set of instruments sharing one timestamp index.
///
/// Invariants: the index is strictly increasing and every column has exactly
/// one value per index entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    index: Vec<DateTime<Utc>>,
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl PriceTable {
    /// Build a table from independent series using inner-join alignment.
    ///
    /// Each series is sorted and de-duplicated (the last value for a repeated
    /// timestamp wins); timestamps missing from any series are dropped.
    pub fn from_series(series: Vec<(String, PriceSeries)>) -> Self {
        if series.is_empty() {
            return Self::empty();
        }

        let maps: Vec<(String, BTreeMap<DateTime<Utc>, f64>)> = series
            .into_iter()
            .map(|(name, points)| (name, points.into_iter().collect()))
            .collect();

        let index: Vec<DateTime<Utc>> = maps[0]
            .1
            .keys()
            .filter(|ts| maps.iter().all(|(_, m)| m.contains_key(ts)))
            .copied()
            .collect();

        let mut names = Vec::with_capacity(maps.len());
        let mut columns = Vec::with_capacity(maps.len());
        for (name, map) in maps {
            columns.push(index.iter().map(|ts| map[ts]).collect());
            names.push(name);
        }

        Self {
            index,
            names,
            columns,
        }
    }

    /// Build a table from columns that are already aligned on `index`.
    pub fn from_aligned(
        index: Vec<DateTime<Utc>>,
        columns: Vec<(String, Vec<f64>)>,
    ) -> PairsResult<Self> {
        if index.windows(2).any(|w| w[0] >= w[1]) {
            return Err(PairsError::Parse(
                "index must be strictly increasing".to_string(),
            ));
        }

        let mut names = Vec::with_capacity(columns.len());
        let mut values = Vec::with_capacity(columns.len());
        for (name, column) in columns {
            if column.len() != index.len() {
                return Err(PairsError::LengthMismatch {
                    left: index.len(),
                    right: column.len(),
                });
            }
            names.push(name);
            values.push(column);
        }

        Ok(Self {
            index,
            names,
            columns: values,
        })
    }

    /// A table with no instruments and no rows.
    pub fn empty() -> Self {
        Self {
            index: Vec::new(),
            names: Vec::new(),
            columns: Vec::new(),
        }
    }

    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of instruments.
    pub fn width(&self) -> usize {
        self.names.len()
    }

    /// Number of aligned rows.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Column by position.
    pub fn column(&self, i: usize) -> &[f64] {
        &self.columns[i]
    }

    /// Column by instrument name.
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.position(name).map(|i| self.columns[i].as_slice())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Project the table onto a subset of instruments, in the given order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> PairsResult<Self> {
        let mut selected_names = Vec::with_capacity(names.len());
        let mut columns = Vec::with_capacity(names.len());

        for name in names {
            let name = name.as_ref();
            let i = self
                .position(name)
                .ok_or_else(|| PairsError::UnknownInstrument(name.to_string()))?;
            selected_names.push(self.names[i].clone());
            columns.push(self.columns[i].clone());
        }

        Ok(Self {
            index: self.index.clone(),
            names: selected_names,
            columns,
        })
    }

    /// Keep only the most recent `n` rows.
    pub fn tail(&self, n: usize) -> Self {
        let start = self.len().saturating_sub(n);
        Self {
            index: self.index[start..].to_vec(),
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c[start..].to_vec()).collect(),
        }
    }
}
