// Bayes factor to detection significance
//
// Uses the calibration B <= -1 / (e p ln p) between a Bayes factor and a
// frequentist p-value, then expresses p as a two-sided Gaussian sigma.

use crate::error::{AppError, Result};

/// Largest significance reported
pub const MAX_SIGMA: f64 = 100.0;

const BISECTION_STEPS: usize = 200;

/// Natural log of the complementary error function
///
/// Chebyshev fit with fractional error below 1.2e-7, evaluated in log form so
/// large arguments do not underflow.
pub fn ln_erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87 + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    let ln_upper = t.ln() + poly;
    if x >= 0.0 {
        ln_upper
    } else {
        (2.0 - ln_upper.exp()).ln()
    }
}

fn bisect(mut lo: f64, mut hi: f64, f: impl Fn(f64) -> f64) -> f64 {
    // f(lo) > 0 > f(hi) is assumed
    for _ in 0..BISECTION_STEPS {
        let mid = 0.5 * (lo + hi);
        if f(mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// `ln p` matching a log Bayes factor under the calibration
///
/// Non-positive log Bayes factors map to the bound's maximum, `p = 1/e`.
pub fn ln_p_value(ln_bayes: f64) -> f64 {
    if ln_bayes <= 0.0 {
        return -1.0;
    }
    // ln B = -1 - u - ln(-u) is monotone for u = ln p < -1
    let lo = -2.0 * (ln_bayes + 2.0);
    bisect(lo, -1.0, |u| -1.0 - u - (-u).ln() - ln_bayes)
}

/// Detection significance (sigma) for a log Bayes factor
///
/// # Errors
/// - AppError::Validation if `ln_bayes` is NaN
///
/// # Example
/// ```text
/// let sigma = detection_sigma(log_z_all - log_z_removed)?;
/// ```
pub fn detection_sigma(ln_bayes: f64) -> Result<f64> {
    if ln_bayes.is_nan() {
        return Err(AppError::Validation("log Bayes factor is NaN".to_string()));
    }
    if ln_bayes == f64::INFINITY {
        return Ok(MAX_SIGMA);
    }

    let ln_p = ln_p_value(ln_bayes);
    let sqrt2 = std::f64::consts::SQRT_2;
    if ln_erfc(MAX_SIGMA / sqrt2) >= ln_p {
        return Ok(MAX_SIGMA);
    }
    Ok(bisect(0.0, MAX_SIGMA, |s| ln_erfc(s / sqrt2) - ln_p))
}
