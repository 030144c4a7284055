/*!
Analysis configuration.

Everything the pipeline needs beyond the trace itself lives in one
[`AnalysisConfig`]: table layout, burn-in, which dimensions to analyse, the
histogram grid and the ground-truth mixture. It is usually read from JSON:

```json
{
  "metadata_columns": 5,
  "dimension": 2,
  "burn_in": { "fraction": 0.1 },
  "histogram": { "range": [-30.0, 30.0], "bins": 100 },
  "run": { "num_particles": 4, "radius": 0.5, "num_samples": 1000 }
}
```

Omitted fields take their defaults; without a `mixture` section the reference
three-component mixture is used.
*/

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::distributions::{MixtureComponent, TargetDistribution};
use crate::error::{Error, Result};
use crate::histogram::HistogramConfig;
use crate::trace::{BurnIn, Trace, TraceParser};

/// Run parameters normally encoded in the trace file name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunInfo {
    pub num_particles: Option<usize>,
    pub radius: Option<f64>,
    pub num_samples: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Leading columns before the features, including the particle id.
    pub metadata_columns: usize,
    pub dimension: usize,
    pub burn_in: BurnIn,
    pub moment_dims: [usize; 2],
    pub histogram: HistogramConfig,
    pub histogram_dims: [usize; 2],
    pub run: Option<RunInfo>,
    pub mixture: Option<Vec<MixtureComponent>>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            metadata_columns: 5,
            dimension: 2,
            burn_in: BurnIn::Fraction(0.1),
            moment_dims: [0, 1],
            histogram: HistogramConfig::default(),
            histogram_dims: [0, 1],
            run: None,
            mixture: None,
        }
    }
}

impl AnalysisConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "loading analysis config");
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.metadata_columns == 0 {
            return Err(Error::invalid(
                "metadata_columns must include the particle id column",
            ));
        }
        if self.dimension == 0 {
            return Err(Error::invalid("dimension must be at least 1"));
        }
        for &dim in self.moment_dims.iter().chain(&self.histogram_dims) {
            if dim >= self.dimension {
                return Err(Error::DimensionMismatch {
                    expected: self.dimension,
                    found: dim + 1,
                });
            }
        }
        if let BurnIn::Fraction(f) = self.burn_in {
            if !(0.0..=1.0).contains(&f) {
                return Err(Error::invalid(format!(
                    "burn-in fraction {f} is outside [0, 1]"
                )));
            }
        }
        self.histogram.validate()
    }

    pub fn parser(&self) -> Result<TraceParser> {
        Ok(TraceParser::for_dimension(self.metadata_columns, self.dimension)?
            .with_burn_in(self.burn_in))
    }

    /// The configured mixture, or the reference mixture when none is given.
    /// Its dimension must match `dimension`.
    pub fn target(&self) -> Result<TargetDistribution> {
        let target = match &self.mixture {
            Some(components) => TargetDistribution::new(components.clone())?,
            None => TargetDistribution::reference()?,
        };
        if target.dim() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                found: target.dim(),
            });
        }
        Ok(target)
    }

    /// Logs a warning when the trace disagrees with `run.num_particles`.
    pub fn check_particle_count(&self, trace: &Trace) -> bool {
        match self.run.as_ref().and_then(|r| r.num_particles) {
            Some(expected) if expected != trace.n_particles() => {
                tracing::warn!(
                    expected,
                    found = trace.n_particles(),
                    "particle count differs from run configuration"
                );
                false
            }
            _ => true,
        }
    }
}
