//! Population statistics over retained samples

/// Mean and population standard deviation of a sample set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub mean: f64,
    pub stdev: f64,
}

/// Compute mean and population standard deviation (divide by N).
///
/// Returns None for an empty slice.
pub fn population_summary(values: &[f64]) -> Option<Summary> {
    if values.is_empty() {
        return None;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;

    Some(Summary {
        mean,
        stdev: variance.sqrt(),
    })
}

/// Whether `observed` lies more than `bound` standard deviations from `mean`.
///
/// With a zero standard deviation any deviation from the mean counts.
/// Non-finite inputs never exceed.
pub fn exceeds_sigma(observed: f64, mean: f64, stdev: f64, bound: f64) -> bool {
    let deviation = (observed - mean).abs();
    let limit = bound * stdev;
    deviation.is_finite() && limit.is_finite() && deviation > limit
}
