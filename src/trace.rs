//! Grouping of flat sampler tables into per-particle sequences.
//!
//! Each table row is one recorded state: column 0 is the particle id, the next
//! columns up to `metadata_columns` are run metadata, and the remaining
//! columns are the feature vector. A particle's iteration index is the rank of
//! its row among the rows sharing its id.

use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, ParseError, Result};

/// How many leading rows to drop before grouping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BurnIn {
    /// Drop exactly this many rows.
    Rows(usize),
    /// Drop `floor(fraction · n_rows)` rows.
    Fraction(f64),
}

impl Default for BurnIn {
    fn default() -> Self {
        BurnIn::Rows(0)
    }
}

impl BurnIn {
    /// Number of rows to discard from a table of `n_rows` rows.
    pub fn rows_to_discard(&self, n_rows: usize) -> Result<usize> {
        match *self {
            BurnIn::Rows(k) => Ok(k.min(n_rows)),
            BurnIn::Fraction(f) => {
                if !(0.0..=1.0).contains(&f) {
                    return Err(Error::invalid(format!(
                        "burn-in fraction {f} is outside [0, 1]"
                    )));
                }
                Ok(((n_rows as f64 * f).floor() as usize).min(n_rows))
            }
        }
    }
}

/// Feature sequences keyed by particle id, in ascending id order.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    dimension: usize,
    particles: BTreeMap<u64, Vec<Vec<f64>>>,
}

impl Trace {
    /// Builds a trace directly from per-particle sequences.
    pub fn from_particles(
        dimension: usize,
        particles: BTreeMap<u64, Vec<Vec<f64>>>,
    ) -> Result<Self> {
        for samples in particles.values() {
            if let Some(bad) = samples.iter().find(|s| s.len() != dimension) {
                return Err(Error::DimensionMismatch {
                    expected: dimension,
                    found: bad.len(),
                });
            }
        }
        Ok(Self {
            dimension,
            particles,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn n_particles(&self) -> usize {
        self.particles.len()
    }

    /// Total number of records over all particles.
    pub fn n_records(&self) -> usize {
        self.particles.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.particles.keys().copied()
    }

    pub fn particle(&self, id: u64) -> Option<&[Vec<f64>]> {
        self.particles.get(&id).map(Vec::as_slice)
    }

    pub fn particles(&self) -> &BTreeMap<u64, Vec<Vec<f64>>> {
        &self.particles
    }

    pub(crate) fn check_dim(&self, dim: usize) -> Result<()> {
        if dim >= self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                found: dim + 1,
            });
        }
        Ok(())
    }

    /// Projection of one particle's states onto `(dim1, dim2)`.
    pub fn particle_points(&self, id: u64, dim1: usize, dim2: usize) -> Result<Vec<[f64; 2]>> {
        self.check_dim(dim1)?;
        self.check_dim(dim2)?;
        Ok(self
            .particles
            .get(&id)
            .map(|s| s.iter().map(|x| [x[dim1], x[dim2]]).collect())
            .unwrap_or_default())
    }

    /// Projection of every particle's states onto `(dim1, dim2)`, in id order
    /// and then iteration order.
    pub fn pooled_points(&self, dim1: usize, dim2: usize) -> Result<Vec<[f64; 2]>> {
        self.check_dim(dim1)?;
        self.check_dim(dim2)?;
        Ok(self
            .particles
            .values()
            .flatten()
            .map(|x| [x[dim1], x[dim2]])
            .collect())
    }

    /// Every recorded state of every particle.
    pub fn pooled_samples(&self) -> Vec<Vec<f64>> {
        self.particles.values().flatten().cloned().collect()
    }
}

/// Parser configuration for one trace table layout.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceParser {
    metadata_columns: usize,
    total_columns: usize,
    burn_in: BurnIn,
}

impl TraceParser {
    /// `metadata_columns` counts the id column; features occupy
    /// `[metadata_columns, total_columns)`.
    pub fn new(metadata_columns: usize, total_columns: usize) -> Result<Self> {
        if metadata_columns == 0 {
            return Err(Error::invalid(
                "metadata columns must include the particle id column",
            ));
        }
        if total_columns <= metadata_columns {
            return Err(Error::invalid(format!(
                "total columns ({total_columns}) must exceed metadata columns ({metadata_columns})"
            )));
        }
        Ok(Self {
            metadata_columns,
            total_columns,
            burn_in: BurnIn::default(),
        })
    }

    /// Parser for `dimension` feature columns after `metadata_columns`.
    pub fn for_dimension(metadata_columns: usize, dimension: usize) -> Result<Self> {
        Self::new(metadata_columns, metadata_columns + dimension)
    }

    pub fn with_burn_in(mut self, burn_in: BurnIn) -> Self {
        self.burn_in = burn_in;
        self
    }

    pub fn dimension(&self) -> usize {
        self.total_columns - self.metadata_columns
    }

    pub fn total_columns(&self) -> usize {
        self.total_columns
    }

    /// Groups `rows` by particle id, keeping each particle's rows in their
    /// original relative order. Row numbers in errors are 0-based indices into
    /// `rows`.
    pub fn parse<R: AsRef<[f64]>>(&self, rows: &[R]) -> Result<Trace> {
        let skip = self.burn_in.rows_to_discard(rows.len())?;
        let mut particles: BTreeMap<u64, Vec<Vec<f64>>> = BTreeMap::new();

        for (row_idx, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != self.total_columns {
                return Err(ParseError::ColumnCount {
                    row: row_idx,
                    expected: self.total_columns,
                    found: row.len(),
                }
                .into());
            }
            let id = particle_id(row_idx, row[0])?;
            if row_idx < skip {
                continue;
            }
            particles
                .entry(id)
                .or_default()
                .push(row[self.metadata_columns..].to_vec());
        }

        tracing::debug!(
            rows = rows.len(),
            discarded = skip,
            particles = particles.len(),
            "parsed trace"
        );
        Ok(Trace {
            dimension: self.dimension(),
            particles,
        })
    }
}

fn particle_id(row: usize, value: f64) -> Result<u64> {
    let invalid = || ParseError::InvalidId { row, value };
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
        return Err(invalid().into());
    }
    value.to_u64().ok_or_else(|| invalid().into())
}
