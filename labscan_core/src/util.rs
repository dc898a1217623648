//! Small numeric helpers shared by the controller and the scan.

/// `steps` points from `min` to `max` inclusive. One step yields `[min]`; zero yields nothing.
pub fn linspace(min: f64, max: f64, steps: usize) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![min],
        n => {
            let last = (n - 1) as f64;
            (0..n)
                .map(|i| {
                    if i == n - 1 {
                        max
                    } else {
                        min + (max - min) * (i as f64) / last
                    }
                })
                .collect()
        }
    }
}

/// Mean after dropping one lowest and one highest sample. Needs at least 3 samples.
pub fn trimmed_mean(samples: &[f64]) -> Option<f64> {
    if samples.len() < 3 {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let inner = &sorted[1..sorted.len() - 1];
    Some(inner.iter().sum::<f64>() / inner.len() as f64)
}

/// Piecewise-linear interpolation over points sorted by x, extending the end
/// segments linearly outside the table. Needs at least two points.
pub fn interpolate(points: &[(f64, f64)], x: f64) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    let seg = points
        .windows(2)
        .position(|w| x < w[1].0)
        .unwrap_or(points.len() - 2);
    let (x0, y0) = points[seg];
    let (x1, y1) = points[seg + 1];
    let dx = x1 - x0;
    if dx == 0.0 {
        return Some(y0);
    }
    Some(y0 + (y1 - y0) * (x - x0) / dx)
}
