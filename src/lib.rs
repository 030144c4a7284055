//! Convergence diagnostics for particle-based MCMC traces.
//!
//! A trace table is grouped into per-particle sequences ([`trace`]), reduced to
//! running cross-moments and R̂ ([`stats`]), binned into 2D histograms
//! ([`histogram`]) and compared with an analytic Gaussian-mixture target
//! ([`distributions`]) through a KS-style check ([`ks_test`]).
//!
//! ```rust
//! use bmc_diagnostics::stats::{compute_cross_moments, compute_mean_across_particles};
//! use bmc_diagnostics::trace::TraceParser;
//!
//! let rows = vec![
//!     vec![0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 2.0],
//!     vec![1.0, 1.0, 0.0, 0.0, 0.0, 3.0, 1.0],
//!     vec![0.0, 1.0, 0.0, 0.0, 0.0, 3.0, 4.0],
//!     vec![1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0],
//! ];
//! let trace = TraceParser::new(5, 7)?.parse(&rows)?;
//! let moments = compute_cross_moments(&trace, 0, 1)?;
//! assert_eq!(moments[&0], vec![2.0, 7.0]);
//! assert_eq!(compute_mean_across_particles(&moments)?, vec![2.5, 4.5]);
//! # Ok::<(), bmc_diagnostics::Error>(())
//! ```

pub mod analysis;
pub mod config;
pub mod distributions;
pub mod error;
pub mod histogram;
pub mod io;
pub mod mvn;
pub mod stats;
pub mod trace;

pub use error::{Error, ParseError, Result};
