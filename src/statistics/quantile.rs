/// Quantile of sorted data by linear interpolation between order statistics.
///
/// - `q = 0` returns the minimum, `q = 1` the maximum
/// - empty input returns NaN
pub fn quantile_linear_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted {
        [] => f64::NAN,
        [only] => *only,
        _ => {
            let q = q.clamp(0.0, 1.0);
            let pos = q * (sorted.len() - 1) as f64;
            let i = pos.floor() as usize;
            let j = pos.ceil() as usize;
            let t = pos - i as f64;
            match (sorted.get(i), sorted.get(j)) {
                (Some(&lo), Some(&hi)) if i != j => (1.0 - t) * lo + t * hi,
                (Some(&lo), _) => lo,
                _ => f64::NAN,
            }
        }
    }
}

/// Quantile via sorting + linear interpolation.
pub fn quantile_linear(data: &[f64], q: f64) -> f64 {
    let mut v = data.to_vec();
    v.sort_by(f64::total_cmp);
    quantile_linear_sorted(&v, q)
}
