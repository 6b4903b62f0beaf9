//! Wilson score interval math.
//!
//! The decision engine feeds failure counts through [`wilson_lower`] to obtain
//! a conservative lower bound on the true failure rate. A node with 3/3
//! failures has an observed rate of 1.0 but a wide interval; the lower bound
//! stays small until the sample matures, which is what keeps small-sample
//! flukes from triggering deletions.

/// Lower bound of the Wilson score interval for a proportion `k / n`.
///
/// `z` is the normal quantile for the desired confidence (2.575829 ~ 99%).
/// Returns 0 when `n == 0`. To bound a failure rate, pass failures as `k`
/// over total attempts `n`.
pub fn wilson_lower(k: u64, n: u64, z: f64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let nf = n as f64;
    let p = k as f64 / nf;
    let den = 1.0 + (z * z) / nf;
    let center = p + (z * z) / (2.0 * nf);
    let rad = z * ((p * (1.0 - p) + (z * z) / (4.0 * nf)) / nf).sqrt();
    (center - rad) / den
}

#[cfg(test)]
mod tests {
    use super::*;

    fn almost_equal(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_high_failure_rate_has_high_lower_bound() {
        let z = 2.575829; // ~99%
        let lb = wilson_lower(200, 200, z);
        assert!(lb >= 0.967, "expected high LB, got {lb}");
    }

    #[test]
    fn test_zero_failures_is_zero() {
        let lb = wilson_lower(0, 200, 2.575829);
        assert!(almost_equal(lb, 0.0, 1e-6), "expected ~0, got {lb}");
    }

    #[test]
    fn test_zero_trials_is_zero() {
        assert_eq!(wilson_lower(0, 0, 2.575829), 0.0);
        assert_eq!(wilson_lower(0, 0, 1.0), 0.0);
    }

    #[test]
    fn test_bounds_hold_across_sample_sizes() {
        let z = 2.575829;
        for n in [1u64, 2, 5, 10, 100, 1000, 100_000] {
            for k in [0, n / 2, n] {
                let lb = wilson_lower(k, n, z);
                assert!(
                    (0.0..=1.0).contains(&lb),
                    "lb out of range for k={k} n={n}: {lb}"
                );
            }
        }
    }

    #[test]
    fn test_lower_bound_is_below_observed_rate() {
        let z = 1.96;
        for (k, n) in [(1u64, 10u64), (5, 10), (9, 10), (50, 100)] {
            let lb = wilson_lower(k, n, z);
            let p = k as f64 / n as f64;
            assert!(lb < p, "lb {lb} should be below observed {p}");
        }
    }

    #[test]
    fn test_bound_tightens_with_sample_size() {
        let z = 2.575829;
        // same observed rate, more trials -> higher (tighter) lower bound
        let small = wilson_lower(8, 10, z);
        let large = wilson_lower(800, 1000, z);
        assert!(large > small);
    }
}
