//! Signal Engine
//!
//! Turns one region's cumulative confirmed/deaths rows into the derived series
//! the dashboard plots. All time shifts go through linear interpolation on the
//! day ordinal, so irregular or missing date columns are tolerated.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use crate::dates::{self, ParsedDate};
use crate::models::RegionSeries;

pub const DEFAULT_SICKTIME_DAYS: u32 = 14;
pub const REPRODUCTION_WINDOW_DAYS: f64 = 4.0;
pub const REPRODUCTION_EPSILON: f64 = 1e-15;
pub const REPRODUCTION_CLAMP: (f64, f64) = (0.0, 3.0);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmptySeriesError {
    pub region: String,
    pub usable_dates: usize,
}

impl std::fmt::Display for EmptySeriesError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "region {:?} has {} usable date column(s); at least 2 are needed",
            self.region, self.usable_dates
        )
    }
}

impl std::error::Error for EmptySeriesError {}

/// Every derived series for one region, aligned on `ordinals`.
#[derive(Debug, Clone, Serialize)]
pub struct DerivedSignalSet {
    pub region: String,
    pub sicktime_days: u32,
    pub ordinals: Vec<i64>,
    pub labels: Vec<String>,
    pub dates: Vec<NaiveDate>,
    pub cumulative: Vec<f64>,
    pub daily_new: Vec<f64>,
    /// Cumulative minus the cumulative `sicktime` days earlier
    pub active: Vec<f64>,
    pub active_change: Vec<f64>,
    /// Clamped to [`REPRODUCTION_CLAMP`]
    pub reproduction_rate: Vec<f64>,
    pub reproduction_rate_raw: Vec<f64>,
    pub deaths_cumulative: Vec<f64>,
    pub daily_deaths: Vec<f64>,
}

impl DerivedSignalSet {
    pub fn len(&self) -> usize {
        self.ordinals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordinals.is_empty()
    }

    pub fn ordinals_f64(&self) -> Vec<f64> {
        self.ordinals.iter().map(|&o| o as f64).collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SignalEngine {
    pub sicktime_days: u32,
}

impl Default for SignalEngine {
    fn default() -> Self {
        Self {
            sicktime_days: DEFAULT_SICKTIME_DAYS,
        }
    }
}

impl SignalEngine {
    pub fn new(sicktime_days: u32) -> Self {
        Self { sicktime_days }
    }

    pub fn derive(&self, series: &RegionSeries) -> Result<DerivedSignalSet, EmptySeriesError> {
        // (parsed date, column index); columns that are not dates are dropped
        let mut dated: Vec<(ParsedDate, usize)> = series
            .columns
            .iter()
            .enumerate()
            .filter_map(|(i, label)| match dates::parse(label) {
                Ok(parsed) => Some((parsed, i)),
                Err(e) => {
                    debug!(column = %label, error = %e, "Skipping non-date column");
                    None
                }
            })
            .collect();

        if dated.len() < 2 {
            return Err(EmptySeriesError {
                region: series.name.clone(),
                usable_dates: dated.len(),
            });
        }
        dated.sort();

        let o: Vec<f64> = dated.iter().map(|(d, _)| d.ordinal as f64).collect();
        let cumulative: Vec<f64> = dated
            .iter()
            .map(|(_, col)| count_at(&series.confirmed.counts, *col))
            .collect();
        let deaths_cumulative: Vec<f64> = dated
            .iter()
            .map(|(_, col)| count_at(&series.deaths.counts, *col))
            .collect();

        let active = lagged_difference(&o, &cumulative, f64::from(self.sicktime_days));
        let reproduction_rate_raw = reproduction_ratio(&o, &active);
        let reproduction_rate = reproduction_rate_raw
            .iter()
            .map(|&r| clamp_rate(r))
            .collect();

        Ok(DerivedSignalSet {
            region: series.name.clone(),
            sicktime_days: self.sicktime_days,
            ordinals: dated.iter().map(|(d, _)| d.ordinal).collect(),
            labels: dated.iter().map(|(d, _)| d.label.clone()).collect(),
            dates: dated.iter().map(|(d, _)| d.date).collect(),
            daily_new: daily_delta(&o, &cumulative),
            active_change: daily_delta(&o, &active),
            daily_deaths: daily_delta(&o, &deaths_cumulative),
            cumulative,
            active,
            reproduction_rate,
            reproduction_rate_raw,
            deaths_cumulative,
        })
    }
}

fn count_at(counts: &[i64], col: usize) -> f64 {
    counts.get(col).copied().unwrap_or(0) as f64
}

/// Piecewise-linear interpolation of `fp` sampled at increasing `xp`.
/// Outside the sampled domain the nearest endpoint value is returned.
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let n = xp.len().min(fp.len());
    if n == 0 {
        return f64::NAN;
    }
    if x.is_nan() {
        return f64::NAN;
    }
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[n - 1] {
        return fp[n - 1];
    }

    // first index with xp[j] > x; 1 <= j <= n - 1 here
    let j = xp[..n].partition_point(|&v| v <= x);
    let (x0, x1) = (xp[j - 1], xp[j]);
    let (y0, y1) = (fp[j - 1], fp[j]);
    if x1 == x0 {
        return y1;
    }
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

/// `s[i] - s(o[i] - lag)` with the lagged value interpolated.
pub fn lagged_difference(o: &[f64], s: &[f64], lag: f64) -> Vec<f64> {
    o.iter()
        .zip(s)
        .map(|(&oi, &si)| si - interp(oi - lag, o, s))
        .collect()
}

/// Change against the interpolated value one day earlier.
pub fn daily_delta(o: &[f64], s: &[f64]) -> Vec<f64> {
    lagged_difference(o, s, 1.0)
}

/// Active estimate over the active estimate `REPRODUCTION_WINDOW_DAYS` earlier.
/// The denominator is floored at `REPRODUCTION_EPSILON`.
pub fn reproduction_ratio(o: &[f64], active: &[f64]) -> Vec<f64> {
    o.iter()
        .zip(active)
        .map(|(&oi, &now)| {
            let before = interp(oi - REPRODUCTION_WINDOW_DAYS, o, active);
            now / before.max(REPRODUCTION_EPSILON)
        })
        .collect()
}

/// Clamp for display; NaN collapses to the lower bound.
pub fn clamp_rate(rate: f64) -> f64 {
    let (lo, hi) = REPRODUCTION_CLAMP;
    if rate.is_nan() {
        lo
    } else {
        rate.clamp(lo, hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawObservation;
    use std::sync::Arc;

    fn row(counts: Vec<i64>) -> RawObservation {
        RawObservation {
            province_or_state: "X".to_string(),
            country_or_region: "X".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            counts,
            synthesized: false,
        }
    }

    fn series(labels: &[&str], confirmed: Vec<i64>, deaths: Vec<i64>) -> RegionSeries {
        RegionSeries {
            name: "X".to_string(),
            columns: labels.iter().map(|s| s.to_string()).collect::<Arc<[String]>>(),
            confirmed: row(confirmed),
            deaths: row(deaths),
        }
    }

    fn daily_labels(n: usize) -> Vec<String> {
        let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        (0..n)
            .map(|i| {
                let d = start + chrono::Duration::days(i as i64);
                d.format("%-m/%-d/%y").to_string()
            })
            .collect()
    }

    #[test]
    fn test_interp_clamps_and_interpolates() {
        let xp = [0.0, 10.0, 20.0];
        let fp = [0.0, 100.0, 300.0];
        assert_eq!(interp(-5.0, &xp, &fp), 0.0);
        assert_eq!(interp(25.0, &xp, &fp), 300.0);
        assert_eq!(interp(5.0, &xp, &fp), 50.0);
        assert_eq!(interp(15.0, &xp, &fp), 200.0);
        assert_eq!(interp(10.0, &xp, &fp), 100.0);
        assert!(interp(1.0, &[], &[]).is_nan());
    }

    #[test]
    fn test_derive_sorts_unsorted_columns_and_skips_non_dates() {
        let s = series(
            &["1/3/21", "note", "1/1/21", "1/2/21"],
            vec![30, 999, 10, 20],
            vec![3, 999, 1, 2],
        );
        let out = SignalEngine::default().derive(&s).expect("derives");
        assert_eq!(out.labels, vec!["1/1/21", "1/2/21", "1/3/21"]);
        assert_eq!(out.cumulative, vec![10.0, 20.0, 30.0]);
        assert_eq!(out.deaths_cumulative, vec![1.0, 2.0, 3.0]);
        // first point has no history: clamped interpolation gives zero change
        assert_eq!(out.daily_new, vec![0.0, 10.0, 10.0]);
        assert_eq!(out.daily_deaths, vec![0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_daily_delta_interpolates_across_gaps() {
        // 1/1 -> 1/5 gap of four days, +40 cases
        let s = series(&["1/1/21", "1/5/21"], vec![0, 40], vec![0, 0]);
        let out = SignalEngine::default().derive(&s).unwrap();
        assert_eq!(out.daily_new, vec![0.0, 10.0]);
    }

    #[test]
    fn test_active_never_exceeds_cumulative_for_increasing_series() {
        let labels = daily_labels(60);
        let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
        let confirmed: Vec<i64> = (0..60).map(|i| 3 * i * i + 7 * i + 1).collect();
        let s = series(&label_refs, confirmed, vec![0; 60]);

        let out = SignalEngine::new(14).derive(&s).unwrap();
        for (active, cum) in out.active.iter().zip(&out.cumulative) {
            assert!(active <= cum);
            assert!(*active >= 0.0);
        }
        // day 20: cum(20) - cum(6)
        let expected = (3 * 400 + 140 + 1) - (3 * 36 + 42 + 1);
        assert_eq!(out.active[20], expected as f64);
    }

    #[test]
    fn test_reproduction_rate_clamped_with_zero_active_stretch() {
        let labels = daily_labels(40);
        let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
        // flat for 20 days (active estimate 0), then explosive growth
        let confirmed: Vec<i64> = (0..40)
            .map(|i| if i < 20 { 5 } else { 5 + 10i64.pow((i - 19).min(15) as u32) })
            .collect();
        let s = series(&label_refs, confirmed, vec![0; 40]);

        let out = SignalEngine::default().derive(&s).unwrap();
        assert!(out.active[..20].iter().all(|&a| a == 0.0));
        for r in &out.reproduction_rate {
            assert!((0.0..=3.0).contains(r), "rate {r} escaped clamp");
        }
        // 0 / epsilon stays 0, growth from zero saturates
        assert_eq!(out.reproduction_rate[10], 0.0);
        assert_eq!(out.reproduction_rate[20], 3.0);
        assert!(out.reproduction_rate_raw[20] > 3.0);
    }

    #[test]
    fn test_reproduction_rate_for_steady_exponential_growth() {
        let labels = daily_labels(80);
        let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
        let confirmed: Vec<i64> = (0..80).map(|i| (100.0 * 1.05f64.powi(i)) as i64).collect();
        let s = series(&label_refs, confirmed, vec![0; 80]);

        let out = SignalEngine::default().derive(&s).unwrap();
        let r = out.reproduction_rate[70];
        let expected = 1.05f64.powi(4);
        assert!((r - expected).abs() < 0.01, "got {r}, want ~{expected}");
    }

    #[test]
    fn test_too_few_dates_is_empty_series_error() {
        let s = series(&["1/1/21", "Combined_Key"], vec![1, 0], vec![0, 0]);
        let err = SignalEngine::default().derive(&s).unwrap_err();
        assert_eq!(err.usable_dates, 1);
        assert_eq!(err.region, "X");
    }

    #[test]
    fn test_clamp_rate_handles_non_finite() {
        assert_eq!(clamp_rate(f64::NAN), 0.0);
        assert_eq!(clamp_rate(f64::INFINITY), 3.0);
        assert_eq!(clamp_rate(f64::NEG_INFINITY), 0.0);
        assert_eq!(clamp_rate(1.2), 1.2);
    }
}
