//! Small numeric helpers over `(hours, value)` samples.

/// Least-squares slope of `value` over `x`. `None` with fewer than two
/// points or when every `x` is identical.
pub fn slope(points: &[(f64, f64)]) -> Option<f64> {
    let n = points.len();
    if n < 2 {
        return None;
    }
    let nf = n as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / nf;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / nf;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for &(x, y) in points {
        let dx = x - mean_x;
        sxy += dx * (y - mean_y);
        sxx += dx * dx;
    }
    if sxx <= f64::EPSILON {
        return None;
    }
    Some(sxy / sxx)
}

/// Coefficient of variation of the gaps between sorted timestamps.
/// `None` when there are fewer than two gaps.
pub fn gap_variation(sorted_x: &[f64]) -> Option<f64> {
    if sorted_x.len() < 3 {
        return None;
    }
    let gaps: Vec<f64> = sorted_x.windows(2).map(|w| w[1] - w[0]).collect();
    let n = gaps.len() as f64;
    let mean = gaps.iter().sum::<f64>() / n;
    if mean <= f64::EPSILON {
        // everything arrived at once
        return Some(0.0);
    }
    let var = gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / n;
    Some(var.sqrt() / mean)
}
