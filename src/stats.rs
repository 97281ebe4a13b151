//! Shared numeric helpers for tail-risk estimation. Both the simulator's
//! reward-side CVaR and the rollout metric engine go through these, so the
//! quantile interpolation rule cannot drift between the two.

/// Linear-interpolation quantile of ascending pre-sorted data.
///
/// Rank position is `p * (n - 1)`; fractional positions interpolate between
/// the two neighboring order statistics. A single element is its own quantile
/// for every `p`. Callers guarantee non-empty input.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty(), "quantile over empty data");
    let n = sorted.len();
    let h = p.clamp(0.0, 1.0) * (n - 1) as f64;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    let frac = h - lo as f64;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}

/// Mean of every value at or above `threshold`; `None` when nothing qualifies.
pub fn tail_mean(values: &[f64], threshold: f64) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for &v in values {
        if v >= threshold {
            sum += v;
            count += 1;
        }
    }
    (count > 0).then(|| sum / count as f64)
}

/// Conditional value-at-risk at confidence `alpha`: the mean of everything at
/// or above the `alpha`-quantile. Empty input and an empty tail both collapse
/// to 0.0.
pub fn cvar(values: &[f64], alpha: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let var = quantile_sorted(&sorted, alpha);
    tail_mean(&sorted, var).unwrap_or(0.0)
}

/// Arithmetic mean. Empty input yields NaN.
pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn quantile_of_single_element_is_that_element() {
        for p in [0.0, 0.5, 0.9, 0.95, 1.0] {
            let q = quantile_sorted(&[0.37], p);
            assert!(close(q, 0.37), "p={p} gave {q}");
        }
    }

    #[test]
    fn quantile_interpolates_linearly() {
        let data = [1.0, 2.0, 3.0, 4.0];
        // rank position 0.5 * 3 = 1.5, halfway between 2.0 and 3.0
        assert!(close(quantile_sorted(&data, 0.5), 2.5));
        // rank position 0.95 * 3 = 2.85
        assert!(close(quantile_sorted(&data, 0.95), 3.85));
        assert!(close(quantile_sorted(&data, 0.0), 1.0));
        assert!(close(quantile_sorted(&data, 1.0), 4.0));
    }

    #[test]
    fn quantile_matches_reference_three_point_case() {
        // rank position 0.9 * 2 = 1.8 over [0.0, 0.1, 0.3]
        let q = quantile_sorted(&[0.0, 0.1, 0.3], 0.9);
        assert!(close(q, 0.1 * 0.2 + 0.3 * 0.8), "got {q}");
    }

    #[test]
    fn quantile_clamps_out_of_range_p() {
        let data = [1.0, 2.0];
        assert!(close(quantile_sorted(&data, -0.5), 1.0));
        assert!(close(quantile_sorted(&data, 1.5), 2.0));
    }

    #[test]
    fn tail_mean_empty_when_nothing_qualifies() {
        assert_eq!(tail_mean(&[0.1, 0.2], 0.5), None);
        assert_eq!(tail_mean(&[], 0.0), None);
    }

    #[test]
    fn tail_mean_includes_threshold_boundary() {
        let m = tail_mean(&[0.1, 0.2, 0.3], 0.2);
        assert!(close(m.unwrap(), 0.25), "boundary value must be included");
    }

    #[test]
    fn cvar_of_empty_buffer_is_zero() {
        assert_eq!(cvar(&[], 0.95), 0.0);
    }

    #[test]
    fn cvar_of_single_element_is_that_element() {
        assert!(close(cvar(&[0.42], 0.9), 0.42));
    }

    #[test]
    fn cvar_hand_case() {
        // sorted [0.1, 0.2, 0.3], alpha 0.9: VaR = 0.28, tail = [0.3]
        assert!(close(cvar(&[0.1, 0.3, 0.2], 0.9), 0.3));
    }

    #[test]
    fn cvar_of_uniform_values_is_that_value() {
        assert!(close(cvar(&[0.5; 8], 0.95), 0.5));
    }

    #[test]
    fn mean_of_known_values() {
        assert!(close(mean(&[1.0, 2.0, 3.0]), 2.0));
        assert!(mean(&[]).is_nan());
    }

    proptest! {
        #[test]
        fn quantile_stays_within_data_range(
            mut values in proptest::collection::vec(0.0_f64..10.0, 1..200),
            p in 0.0_f64..=1.0,
        ) {
            values.sort_by(|a, b| a.total_cmp(b));
            let q = quantile_sorted(&values, p);
            prop_assert!(q >= values[0] - 1e-12);
            prop_assert!(q <= values[values.len() - 1] + 1e-12);
        }

        #[test]
        fn cvar_dominates_quantile(
            values in proptest::collection::vec(0.0_f64..10.0, 1..200),
            alpha in 0.0_f64..=1.0,
        ) {
            let mut sorted = values.clone();
            sorted.sort_by(|a, b| a.total_cmp(b));
            let var = quantile_sorted(&sorted, alpha);
            // the tail mean can only sit at or above its own threshold floor
            prop_assert!(cvar(&values, alpha) >= var - 1e-12);
        }

        #[test]
        fn cvar_is_non_negative_for_non_negative_input(
            values in proptest::collection::vec(0.0_f64..10.0, 1..100),
            alpha in 0.0_f64..=1.0,
        ) {
            prop_assert!(cvar(&values, alpha) >= 0.0);
        }
    }
}
