//! Post-optimization filter for negligible positions.

use crate::types::Weights;
use crate::{Error, Result};
use tracing::debug;

/// Zero every weight below `threshold` and rescale the survivors to sum to one.
///
/// This is a one-shot filter, not a re-optimization: the result need not be
/// Sharpe-optimal over the reduced asset set, and rescaled survivors may
/// exceed the position cap that bound the optimizer. If nothing falls below
/// the threshold the input is returned unchanged, which makes the filter
/// idempotent for a fixed threshold.
///
/// # Errors
///
/// `InsufficientData` if no weight reaches the threshold.
pub fn filter_weights(weights: &Weights, threshold: f64) -> Result<Weights> {
    let values = weights.as_slice();
    let removed = values.iter().filter(|&&w| w < threshold).count();

    if removed == 0 {
        return Ok(weights.clone());
    }

    let kept: Vec<f64> = values
        .iter()
        .map(|&w| if w < threshold { 0.0 } else { w })
        .collect();
    let total: f64 = kept.iter().sum();

    if !(total > 0.0) {
        return Err(Error::InsufficientData(format!(
            "no weight reaches the significance threshold {}",
            threshold
        )));
    }

    debug!(removed, threshold, retained = total, "Filtered negligible weights");

    Ok(Weights::new(kept.iter().map(|w| w / total).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_small_weight_is_zeroed_and_rest_rescaled() {
        let weights = Weights::new(vec![0.008, 0.492, 0.5]);

        let filtered = filter_weights(&weights, 0.01).unwrap();
        let w = filtered.as_slice();

        assert_eq!(w[0], 0.0);
        assert_abs_diff_eq!(w[1] + w[2], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(w[1], 0.492 / 0.992, epsilon = 1e-12);
        assert_abs_diff_eq!(w[2], 0.5 / 0.992, epsilon = 1e-12);
    }

    #[test]
    fn test_filter_is_idempotent() {
        let weights = Weights::new(vec![0.004, 0.3, 0.0099, 0.2, 0.4861]);

        let once = filter_weights(&weights, 0.01).unwrap();
        let twice = filter_weights(&once, 0.01).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_weight_at_threshold_survives() {
        let weights = Weights::new(vec![0.01, 0.99]);
        let filtered = filter_weights(&weights, 0.01).unwrap();
        assert_eq!(filtered, weights);
    }

    #[test]
    fn test_zero_threshold_is_noop() {
        let weights = Weights::new(vec![0.0, 1e-9, 1.0 - 1e-9]);
        let filtered = filter_weights(&weights, 0.0).unwrap();
        assert_eq!(filtered, weights);
    }

    #[test]
    fn test_everything_filtered_is_an_error() {
        let weights = Weights::uniform(4);
        let result = filter_weights(&weights, 0.5);
        assert!(matches!(result, Err(Error::InsufficientData(_))));
    }

    #[test]
    fn test_filter_returns_new_instance() {
        let weights = Weights::new(vec![0.005, 0.995]);
        let filtered = filter_weights(&weights, 0.01).unwrap();

        // Input is untouched
        assert_eq!(weights.as_slice(), &[0.005, 0.995]);
        assert_eq!(filtered.as_slice(), &[0.0, 1.0]);
    }
}
