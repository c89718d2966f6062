//! Scalar helpers for logistic models.
//!
//! Everything here works in log space where it matters: cluster-level
//! likelihoods are products over many units and underflow quickly.

mod quadrature;

pub use quadrature::GaussHermite;

/// Logistic function `1 / (1 + e^-x)`.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// `ln(1 + e^x)` without overflow.
#[inline]
pub fn log1pexp(x: f64) -> f64 {
    if x > 33.3 {
        x
    } else if x > -37.0 {
        x.exp().ln_1p()
    } else {
        x.exp()
    }
}

/// `ln sigmoid(x)`.
#[inline]
pub fn log_sigmoid(x: f64) -> f64 {
    -log1pexp(-x)
}

/// Bernoulli log-likelihood of a 0/1 outcome under log-odds `eta`.
#[inline]
pub fn bernoulli_loglik(outcome: f64, eta: f64) -> f64 {
    log_bernoulli(outcome > 0.5, eta)
}

/// `ln P(success)` or `ln P(failure)` under log-odds `eta`.
#[inline]
pub fn log_bernoulli(success: bool, eta: f64) -> f64 {
    if success { log_sigmoid(eta) } else { log_sigmoid(-eta) }
}

/// Read a 0/1 code; `None` for any other value.
#[inline]
pub fn binary(v: f64) -> Option<bool> {
    if v == 0.0 {
        Some(false)
    } else if v.to_bits() == 1.0_f64.to_bits() {
        Some(true)
    } else {
        None
    }
}

/// `ln Σ exp(x_i)`, returning `-inf` for an empty or all `-inf` input.
pub fn log_sum_exp<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
    I::IntoIter: Clone,
{
    let iter = values.into_iter();
    let max = iter.clone().fold(f64::NEG_INFINITY, f64::max);
    if max.is_infinite() && max.is_sign_negative() {
        return max;
    }
    max + iter.map(|v| (v - max).exp()).sum::<f64>().ln()
}
