//! Statistical primitives for the anomaly checks
//!
//! Deliberately boring: sample standard deviation, z-scores, rank-based
//! quartiles without interpolation. Degenerate inputs (empty history, zero
//! variance) all collapse to "no signal" values rather than NaN, so the
//! checks never fire on arithmetic artifacts.

/// Arithmetic mean; 0.0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n-1 denominator); 0.0 when n < 2
pub fn stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// z-score of `value` against the sample; 0.0 when the deviation is zero
///
/// A flat history gives zero deviation, and a zero z-score means "no
/// evidence of anomaly", which is the safe reading for a constant series.
pub fn zscore(value: f64, values: &[f64]) -> f64 {
    let sd = stddev(values);
    if sd == 0.0 {
        return 0.0;
    }
    (value - mean(values)) / sd
}

/// Rank-based quartiles (Q1, Q3) without interpolation
///
/// Element at rank floor(n/4) and floor(3n/4) of the sorted sample. Returns
/// None when fewer than 4 values exist.
pub fn quartiles(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 4 {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let q1 = sorted[sorted.len() / 4];
    let q3 = sorted[(sorted.len() * 3) / 4];
    Some((q1, q3))
}

/// Tukey upper fence: Q3 + k·IQR; None when quartiles are undefined
pub fn upper_outlier_bound(values: &[f64], k: f64) -> Option<f64> {
    let (q1, q3) = quartiles(values)?;
    Some(q3 + k * (q3 - q1))
}
