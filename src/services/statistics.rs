//! Inferential statistics for comparing experiment variants

use serde::{Deserialize, Serialize};

/// Closed interval around an estimate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

/// Outcome of a two-proportion z-test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZTest {
    pub z_score: f64,
    pub p_value: f64,
    pub pooled_proportion: f64,
    pub standard_error: f64,
}

/// Error function, Abramowitz and Stegun 7.1.26 (|error| < 1.5e-7)
pub fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}

/// Standard normal cumulative distribution function
pub fn normal_cdf(x: f64) -> f64 {
    (0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))).clamp(0.0, 1.0)
}

/// Inverse of [`normal_cdf`] by bisection; `p` must lie in (0, 1)
pub fn normal_quantile(p: f64) -> f64 {
    let p = p.clamp(1e-12, 1.0 - 1e-12);
    let (mut lo, mut hi) = (-10.0_f64, 10.0_f64);
    for _ in 0..100 {
        let mid = (lo + hi) / 2.0;
        if normal_cdf(mid) < p {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    (lo + hi) / 2.0
}

/// Two-sided critical value for a confidence level, e.g. 1.96 for 0.95
pub fn critical_value(confidence_level: f64) -> f64 {
    normal_quantile(1.0 - (1.0 - confidence_level) / 2.0)
}

/// Two-tailed p-value of a z statistic
pub fn two_tailed_p_value(z: f64) -> f64 {
    (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0)
}

/// Compares two observed proportions under the pooled null hypothesis
///
/// `z = (p1 - p2) / se`; degenerate inputs (no samples, or a pooled rate of
/// exactly 0 or 1) give `z = 0` and `p = 1`.
pub fn two_proportion_z_test(p1: f64, n1: u64, p2: f64, n2: u64) -> ZTest {
    if n1 == 0 || n2 == 0 {
        return ZTest {
            z_score: 0.0,
            p_value: 1.0,
            pooled_proportion: 0.0,
            standard_error: 0.0,
        };
    }

    let (n1f, n2f) = (n1 as f64, n2 as f64);
    let pooled = (p1 * n1f + p2 * n2f) / (n1f + n2f);
    let standard_error = (pooled * (1.0 - pooled) * (1.0 / n1f + 1.0 / n2f)).sqrt();

    let z_score = if standard_error > 0.0 && standard_error.is_finite() {
        (p1 - p2) / standard_error
    } else {
        0.0
    };

    ZTest {
        z_score,
        p_value: two_tailed_p_value(z_score),
        pooled_proportion: pooled,
        standard_error,
    }
}

/// Wald interval for a single proportion, clamped to [0, 1]
pub fn proportion_interval(p: f64, n: u64, confidence_level: f64) -> ConfidenceInterval {
    if n == 0 {
        return ConfidenceInterval {
            lower: 0.0,
            upper: 0.0,
        };
    }
    let margin = critical_value(confidence_level) * (p * (1.0 - p) / n as f64).sqrt();
    ConfidenceInterval {
        lower: (p - margin).clamp(0.0, 1.0),
        upper: (p + margin).clamp(0.0, 1.0),
    }
}

/// Unpooled interval for `p2 - p1`
pub fn difference_interval(
    p1: f64,
    n1: u64,
    p2: f64,
    n2: u64,
    confidence_level: f64,
) -> ConfidenceInterval {
    let diff = p2 - p1;
    if n1 == 0 || n2 == 0 {
        return ConfidenceInterval {
            lower: diff,
            upper: diff,
        };
    }
    let se = (p1 * (1.0 - p1) / n1 as f64 + p2 * (1.0 - p2) / n2 as f64).sqrt();
    let margin = critical_value(confidence_level) * se;
    ConfidenceInterval {
        lower: diff - margin,
        upper: diff + margin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tolerance: f64) -> bool {
        (a - b).abs() < tolerance
    }

    #[test]
    fn test_normal_cdf_reference_points() {
        assert!(close(normal_cdf(0.0), 0.5, 1e-6));
        assert!(close(normal_cdf(1.96), 0.975, 1e-4));
        assert!(close(normal_cdf(-1.96), 0.025, 1e-4));
    }

    #[test]
    fn test_critical_value_for_95_percent() {
        assert!(close(critical_value(0.95), 1.96, 1e-3));
        assert!(close(critical_value(0.99), 2.576, 1e-3));
    }

    #[test]
    fn test_z_test_detects_difference() {
        let result = two_proportion_z_test(0.20, 100, 0.35, 100);
        assert!(close(result.pooled_proportion, 0.275, 1e-9));
        assert!(close(result.z_score, -2.3754, 1e-3));
        assert!(result.p_value < 0.05);
        assert!(result.p_value > 0.01);
    }

    #[test]
    fn test_z_test_symmetry() {
        let forward = two_proportion_z_test(0.12, 250, 0.18, 300);
        let backward = two_proportion_z_test(0.18, 300, 0.12, 250);
        assert!(close(forward.z_score, -backward.z_score, 1e-12));
        assert!(close(forward.p_value, backward.p_value, 1e-12));
    }

    #[test]
    fn test_z_test_degenerate_rates() {
        for rate in [0.0, 1.0] {
            let result = two_proportion_z_test(rate, 50, rate, 50);
            assert_eq!(result.z_score, 0.0);
            assert!(close(result.p_value, 1.0, 1e-6));
        }
        let empty = two_proportion_z_test(0.5, 0, 0.5, 10);
        assert_eq!(empty.z_score, 0.0);
        assert_eq!(empty.p_value, 1.0);
    }

    #[test]
    fn test_proportion_interval_clamped() {
        let interval = proportion_interval(0.02, 10, 0.95);
        assert_eq!(interval.lower, 0.0);
        assert!(interval.upper > 0.02);

        let none = proportion_interval(0.0, 0, 0.95);
        assert_eq!(none, ConfidenceInterval { lower: 0.0, upper: 0.0 });
    }

    #[test]
    fn test_difference_interval_contains_difference() {
        let interval = difference_interval(0.20, 100, 0.35, 100, 0.95);
        assert!(interval.lower < 0.15 && 0.15 < interval.upper);
        assert!(interval.lower > 0.0);
    }
}
