//! Axis range policy
//!
//! y-ranges come only from the points visible in the current x-window, with a
//! fractional margin, and ignore NaN/inf. Dual-axis panels calibrate the
//! secondary series onto the primary range with a least-squares line.

/// `(low, high)` in data units.
pub type Range = (f64, f64);

/// Whitespace added above and below the observed span.
pub const MARGIN: f64 = 0.05;

/// Range when nothing finite is left to scale on.
pub const FALLBACK_RANGE: Range = (0.0, 1.0);

/// Trailing x-window of `days` days ending at `today` (day ordinals).
pub fn x_window(today: i64, days: i64) -> Range {
    ((today - days) as f64, today as f64)
}

/// y-limits for `y`.
///
/// With a window, only points whose x lies strictly inside `xlim` (and is
/// non-zero) count. An empty selection gives `(-margin, margin)`; a selection
/// with no finite values gives [`FALLBACK_RANGE`]. A flat series is padded by
/// 0.5 on each side instead of the fractional margin. In log mode the same rules
/// apply to `ln(y)` and the bounds are exponentiated.
pub fn ylim(y: &[f64], window: Option<(&[f64], Range)>, margin: f64, log: bool) -> Range {
    let selected: Vec<f64> = match window {
        Some((x, (a, b))) => {
            let (lo, hi) = (a.min(b), a.max(b));
            y.iter()
                .zip(x)
                .filter(|(_, &xi)| lo < xi && xi < hi && xi.abs() > 0.0)
                .map(|(&yi, _)| yi)
                .collect()
        }
        None => y.to_vec(),
    };
    if selected.is_empty() {
        return (-margin, margin);
    }

    let finite = selected
        .into_iter()
        .map(|v| if log { v.ln() } else { v })
        .filter(|v| v.is_finite());

    let Some((lo, hi)) = finite.fold(None, |acc: Option<Range>, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    }) else {
        return FALLBACK_RANGE;
    };

    let delta = if lo == hi { 0.5 } else { (hi - lo) * margin };
    if log {
        ((lo - delta).exp(), (hi + delta).exp())
    } else {
        (lo - delta, hi + delta)
    }
}

/// Least-squares fit of `y = c[0] * x + c[1]`. `None` when every x is equal.
pub fn polyfit_linear(x: &[f64], y: &[f64]) -> Option<[f64; 2]> {
    let n = x.len().min(y.len());
    if n < 2 {
        return None;
    }
    let nf = n as f64;
    let mean_x = x[..n].iter().sum::<f64>() / nf;
    let mean_y = y[..n].iter().sum::<f64>() / nf;

    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (xi, yi) in x[..n].iter().zip(&y[..n]) {
        sxy += (xi - mean_x) * (yi - mean_y);
        sxx += (xi - mean_x) * (xi - mean_x);
    }
    if sxx == 0.0 || !sxx.is_finite() {
        return None;
    }
    let slope = sxy / sxx;
    Some([slope, mean_y - slope * mean_x])
}

/// Evaluate a polynomial, highest power first.
pub fn polyval(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().fold(0.0, |acc, c| acc * x + c)
}

/// Map `values` by the line taking `from` onto `to`.
pub fn rescale(values: &[f64], from: Range, to: Range) -> Vec<f64> {
    match polyfit_linear(&[from.0, from.1], &[to.0, to.1]) {
        Some(coeffs) => values.iter().map(|&v| polyval(&coeffs, v)).collect(),
        None => vec![(to.0 + to.1) / 2.0; values.len()],
    }
}

/// Rescale `a` so its autoscaled range over the window overlays the autoscaled
/// range of `b`.
pub fn transform(a: &[f64], b: &[f64], x: &[f64], xlim: Range) -> Vec<f64> {
    let from = ylim(a, Some((x, xlim)), MARGIN, false);
    let to = ylim(b, Some((x, xlim)), MARGIN, false);
    rescale(a, from, to)
}
