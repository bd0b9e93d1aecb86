//! Statistical methods for the atacama toolkit.
//!
//! - **Correlation** — Pearson coefficient and pairwise [`CorrelationMatrix`]
//! - **Descriptive statistics** — mean, variance, interpolated quantiles,
//!   quantile rescaling

pub mod correlation;
pub mod descriptive;

pub use correlation::{pearson, CorrelationMatrix};
pub use descriptive::{mean, quantile, quantile_rescale, std_dev, variance};
