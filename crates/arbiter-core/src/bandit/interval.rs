//! Confidence intervals for Beta posteriors
//!
//! Two interchangeable methods are provided. `Exact` inverts the regularized
//! incomplete beta function numerically; `NormalApprox` uses
//! `mean ± 1.96·sd`. Below [`MIN_PULLS_FOR_INTERVAL`] observations both report
//! the maximally uncertain interval `[0, 1]`.

use serde::{Deserialize, Serialize};

/// Pulls required before a posterior interval is reported
pub const MIN_PULLS_FOR_INTERVAL: u64 = 10;

const Z_95: f64 = 1.96;
const LOWER_TAIL: f64 = 0.025;
const UPPER_TAIL: f64 = 0.975;

/// How Beta posterior intervals are computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalMethod {
    /// Quantiles of the Beta distribution
    #[default]
    Exact,
    /// Normal approximation around the posterior mean
    NormalApprox,
}

impl std::str::FromStr for IntervalMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "normal" | "normal_approx" => Ok(Self::NormalApprox),
            _ => Err(format!("Unknown interval method: {}", s)),
        }
    }
}

impl std::fmt::Display for IntervalMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::NormalApprox => write!(f, "normal_approx"),
        }
    }
}

impl IntervalMethod {
    /// 95% interval for `Beta(alpha, beta)` after `pulls` observations
    pub fn interval(self, alpha: f64, beta: f64, pulls: u64) -> (f64, f64) {
        if pulls < MIN_PULLS_FOR_INTERVAL || alpha <= 0.0 || beta <= 0.0 {
            return (0.0, 1.0);
        }
        match self {
            Self::Exact => (
                beta_quantile(LOWER_TAIL, alpha, beta),
                beta_quantile(UPPER_TAIL, alpha, beta),
            ),
            Self::NormalApprox => normal_interval(alpha, beta),
        }
    }
}

/// `mean ± 1.96·sd` of `Beta(alpha, beta)`, clamped to `[0, 1]`
pub fn normal_interval(alpha: f64, beta: f64) -> (f64, f64) {
    let total = alpha + beta;
    let mean = alpha / total;
    let variance = (alpha * beta) / (total * total * (total + 1.0));
    let half_width = Z_95 * variance.max(0.0).sqrt();
    (
        (mean - half_width).clamp(0.0, 1.0),
        (mean + half_width).clamp(0.0, 1.0),
    )
}

/// Inverse of the regularized incomplete beta function, by bisection
pub fn beta_quantile(p: f64, alpha: f64, beta: f64) -> f64 {
    if p <= 0.0 {
        return 0.0;
    }
    if p >= 1.0 {
        return 1.0;
    }

    let (mut lo, mut hi) = (0.0_f64, 1.0_f64);
    for _ in 0..100 {
        let mid = 0.5 * (lo + hi);
        if regularized_incomplete_beta(mid, alpha, beta) < p {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-12 {
            break;
        }
    }
    0.5 * (lo + hi)
}

/// `I_x(a, b)`, evaluated with the Lentz continued fraction
pub fn regularized_incomplete_beta(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();

    // The continued fraction converges fastest on this side of the mean
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(x, a, b) / a
    } else {
        1.0 - front * beta_continued_fraction(1.0 - x, b, a) / b
    }
}

fn beta_continued_fraction(x: f64, a: f64, b: f64) -> f64 {
    const MAX_ITER: usize = 300;
    const EPS: f64 = 1e-14;
    const TINY: f64 = 1e-300;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;

    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

/// Lanczos approximation of `ln Γ(x)` for `x > 0`
pub fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 6] = [
        76.180_091_729_471_46,
        -86.505_320_329_416_77,
        24.014_098_240_830_91,
        -1.231_739_572_450_155,
        0.120_865_097_386_617_9e-2,
        -0.539_523_938_495_3e-5,
    ];

    let mut y = x;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut series = 1.000_000_000_190_015;
    for coeff in COEFFS {
        y += 1.0;
        series += coeff / y;
    }
    -tmp + (2.506_628_274_631_000_5 * series / x).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_data_is_maximally_uncertain() {
        for method in [IntervalMethod::Exact, IntervalMethod::NormalApprox] {
            assert_eq!(method.interval(5.0, 3.0, 6), (0.0, 1.0));
        }
    }

    #[test]
    fn test_ln_gamma_known_values() {
        assert!(ln_gamma(1.0).abs() < 1e-9);
        assert!((ln_gamma(5.0) - 24.0_f64.ln()).abs() < 1e-9);
        assert!((ln_gamma(0.5) - std::f64::consts::PI.sqrt().ln()).abs() < 1e-9);
    }

    #[test]
    fn test_incomplete_beta_uniform() {
        // Beta(1,1) is uniform, so I_x(1,1) = x
        for x in [0.1, 0.25, 0.5, 0.9] {
            assert!((regularized_incomplete_beta(x, 1.0, 1.0) - x).abs() < 1e-9);
        }
    }

    #[test]
    fn test_incomplete_beta_closed_form() {
        // I_x(2,1) = x^2
        assert!((regularized_incomplete_beta(0.3, 2.0, 1.0) - 0.09).abs() < 1e-9);
    }

    #[test]
    fn test_quantile_inverts_cdf() {
        let (a, b) = (8.0, 4.0);
        for p in [0.025, 0.5, 0.975] {
            let q = beta_quantile(p, a, b);
            assert!((regularized_incomplete_beta(q, a, b) - p).abs() < 1e-8);
        }
    }

    #[test]
    fn test_exact_interval_brackets_mean() {
        let (lo, hi) = IntervalMethod::Exact.interval(30.0, 10.0, 38);
        let mean = 0.75;
        assert!(lo < mean && mean < hi);
        assert!(lo > 0.55 && hi < 0.9, "({lo}, {hi})");
    }

    #[test]
    fn test_normal_approximation_fallback() {
        let (lo, hi) = IntervalMethod::NormalApprox.interval(30.0, 10.0, 38);
        let sd = ((30.0 * 10.0) / (40.0 * 40.0 * 41.0_f64)).sqrt();
        assert!((lo - (0.75 - 1.96 * sd)).abs() < 1e-12);
        assert!((hi - (0.75 + 1.96 * sd)).abs() < 1e-12);
    }

    #[test]
    fn test_normal_approximation_is_clamped() {
        let (lo, hi) = normal_interval(20.0, 0.5);
        assert!(hi <= 1.0);
        assert!(lo >= 0.0);
    }

    #[test]
    fn test_methods_roughly_agree_with_lots_of_data() {
        let exact = IntervalMethod::Exact.interval(500.0, 500.0, 998);
        let approx = IntervalMethod::NormalApprox.interval(500.0, 500.0, 998);
        assert!((exact.0 - approx.0).abs() < 0.005);
        assert!((exact.1 - approx.1).abs() < 0.005);
    }

    #[test]
    fn test_parse_method() {
        assert_eq!("exact".parse::<IntervalMethod>().unwrap(), IntervalMethod::Exact);
        assert_eq!(
            "NORMAL".parse::<IntervalMethod>().unwrap(),
            IntervalMethod::NormalApprox
        );
        assert!("bogus".parse::<IntervalMethod>().is_err());
    }
}
