//! Descriptive statistics used across the pipeline: means, spreads, and
//! interpolated quantiles.

use atacama_core::{AtacamaError, Result};

/// Arithmetic mean.
pub fn mean(data: &[f64]) -> Result<f64> {
    if data.is_empty() {
        return Err(AtacamaError::InvalidInput(
            "mean: data must not be empty".into(),
        ));
    }
    Ok(data.iter().sum::<f64>() / data.len() as f64)
}

/// Variance with given degrees-of-freedom correction.
///
/// - `ddof = 0` → population variance
/// - `ddof = 1` → sample variance (Bessel's correction)
pub fn variance(data: &[f64], ddof: usize) -> Result<f64> {
    let n = data.len();
    if n <= ddof {
        return Err(AtacamaError::InvalidInput(format!(
            "variance: need more than {} observations (got {})",
            ddof, n,
        )));
    }
    let m = mean(data)?;
    let ss: f64 = data.iter().map(|&x| (x - m).powi(2)).sum();
    Ok(ss / (n - ddof) as f64)
}

/// Standard deviation with given degrees-of-freedom correction.
pub fn std_dev(data: &[f64], ddof: usize) -> Result<f64> {
    Ok(variance(data, ddof)?.sqrt())
}

/// Quantile using linear interpolation between order statistics.
pub fn quantile(data: &[f64], q: f64) -> Result<f64> {
    if data.is_empty() {
        return Err(AtacamaError::InvalidInput(
            "quantile: data must not be empty".into(),
        ));
    }
    if !(0.0..=1.0).contains(&q) {
        return Err(AtacamaError::InvalidInput(
            "quantile: q must be in [0, 1]".into(),
        ));
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Ok(compute_quantile_sorted(&sorted, q))
}

/// Rescale `values` so that the `lo` quantile maps to 0 and the `hi`
/// quantile maps to 1, clamping outside that band.
///
/// If the two quantiles coincide every value maps to 1.0.
pub fn quantile_rescale(values: &[f64], lo: f64, hi: f64) -> Result<Vec<f64>> {
    if lo > hi {
        return Err(AtacamaError::InvalidInput(format!(
            "quantile_rescale: lower quantile {lo} exceeds upper quantile {hi}"
        )));
    }
    let q_lo = quantile(values, lo)?;
    let q_hi = quantile(values, hi)?;
    let span = q_hi - q_lo;
    Ok(values
        .iter()
        .map(|&v| {
            if span <= 0.0 {
                1.0
            } else {
                ((v - q_lo) / span).clamp(0.0, 1.0)
            }
        })
        .collect())
}

/// Compute a quantile from a pre-sorted slice using linear interpolation.
fn compute_quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = q * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = lo + 1;
    let frac = pos - lo as f64;
    if hi >= n {
        sorted[n - 1]
    } else {
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}
