//! Tick placement and number labels.

use crate::charts::autoscale::Range;
use crate::dates;

/// Format like C's `%.Ng`: `digits` significant digits, trailing zeros
/// stripped, scientific notation outside `1e-4 ..= 10^digits`.
pub fn format_sig(value: f64, digits: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }

    let digits = digits.max(1);
    // Exponent after rounding to `digits` significant digits
    let sci = format!("{:.*e}", digits - 1, value);
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return sci;
    };
    let exp: i32 = exp.parse().unwrap_or(0);

    if exp < -4 || exp >= digits as i32 {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", strip_zeros(mantissa), sign, exp.abs())
    } else {
        let decimals = (digits as i32 - 1 - exp).max(0) as usize;
        strip_zeros(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn strip_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Roughly `target` evenly spaced ticks on 1/2/5 multiples inside `range`.
pub fn linear_ticks(range: Range, target: usize) -> Vec<f64> {
    let (lo, hi) = (range.0.min(range.1), range.0.max(range.1));
    let span = hi - lo;
    if !span.is_finite() || span <= 0.0 || target == 0 {
        return Vec::new();
    }

    let raw = span / target as f64;
    let magnitude = 10f64.powf(raw.log10().floor());
    let residual = raw / magnitude;
    let step = magnitude
        * if residual <= 1.0 {
            1.0
        } else if residual <= 2.0 {
            2.0
        } else if residual <= 5.0 {
            5.0
        } else {
            10.0
        };

    let first = (lo / step).ceil() as i64;
    let last = (hi / step).floor() as i64;
    (first..=last)
        .map(|k| {
            let v = k as f64 * step;
            // snap float noise like 0.30000000000000004
            if v.abs() < step * 1e-9 {
                0.0
            } else {
                v
            }
        })
        .collect()
}

/// Powers of ten inside a positive range; falls back to linear ticks when the
/// range spans less than one decade.
pub fn log_ticks(range: Range, target: usize) -> Vec<f64> {
    let (lo, hi) = (range.0.min(range.1), range.0.max(range.1));
    if lo <= 0.0 || !hi.is_finite() {
        return linear_ticks(range, target);
    }
    let first = lo.log10().ceil() as i32;
    let last = hi.log10().floor() as i32;
    let ticks: Vec<f64> = (first..=last)
        .map(|e| 10f64.powi(e))
        .collect();
    if ticks.len() < 2 {
        linear_ticks(range, target)
    } else {
        ticks
    }
}

/// Date ticks every `every` days across an ordinal window, labelled `%Y-%m-%d`.
pub fn date_ticks(window: Range, every: i64) -> Vec<(f64, String)> {
    let start = window.0.ceil() as i64;
    let end = window.1.floor() as i64;
    let every = every.max(1);
    (start..=end)
        .filter(|o| (o - start) % every == 0)
        .filter_map(|o| {
            dates::from_ordinal(o).map(|d| (o as f64, d.format("%Y-%m-%d").to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_sig_matches_printf_g() {
        assert_eq!(format_sig(12.0, 2), "12");
        assert_eq!(format_sig(123456.0, 2), "1.2e+05");
        assert_eq!(format_sig(99.6, 2), "1e+02");
        assert_eq!(format_sig(0.5, 2), "0.5");
        assert_eq!(format_sig(0.000012, 2), "1.2e-05");
        assert_eq!(format_sig(-3.14159, 3), "-3.14");
        assert_eq!(format_sig(1500.0, 3), "1.5e+03");
        assert_eq!(format_sig(0.0, 2), "0");
        assert_eq!(format_sig(f64::NAN, 2), "nan");
        assert_eq!(format_sig(f64::NEG_INFINITY, 2), "-inf");
    }

    #[test]
    fn test_linear_ticks() {
        assert_eq!(linear_ticks((0.0, 100.0), 5), vec![0.0, 20.0, 40.0, 60.0, 80.0, 100.0]);
        assert_eq!(linear_ticks((-0.5, 10.2), 4), vec![0.0, 5.0, 10.0]);
        assert!(linear_ticks((1.0, 1.0), 5).is_empty());
        assert!(linear_ticks((0.0, f64::NAN), 5).is_empty());
    }

    #[test]
    fn test_log_ticks() {
        assert_eq!(log_ticks((0.5, 2000.0), 5), vec![1.0, 10.0, 100.0, 1000.0]);
        // under a decade: linear
        assert_eq!(log_ticks((2.0, 8.0), 3), vec![2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_date_ticks_every_five_days() {
        let start = dates::parse("10/1/21").unwrap().ordinal;
        let ticks = date_ticks((start as f64, (start + 12) as f64), 5);
        let labels: Vec<&str> = ticks.iter().map(|(_, l)| l.as_str()).collect();
        assert_eq!(labels, vec!["2021-10-01", "2021-10-06", "2021-10-11"]);
    }
}
