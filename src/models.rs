use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CONFIRMED_URL: &str = "https://raw.githubusercontent.com/CSSEGISandData/COVID-19/master/csse_covid_19_data/csse_covid_19_time_series/time_series_covid19_confirmed_global.csv";
pub const DEFAULT_DEATHS_URL: &str = "https://raw.githubusercontent.com/CSSEGISandData/COVID-19/master/csse_covid_19_data/csse_covid_19_time_series/time_series_covid19_deaths_global.csv";

/// Name of the synthesized all-rows aggregate.
pub const WORLD: &str = "World";

/// The two tables kept by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    Confirmed,
    Deaths,
}

impl Dataset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Confirmed => "confirmed",
            Dataset::Deaths => "deaths",
        }
    }
}

/// How the "World" row is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum WorldAggregation {
    /// Sum only rows that came from the source, so country aggregates are not counted twice
    #[default]
    OriginalRows,
    /// Sum every row present, synthesized country totals included (legacy behavior)
    AllRows,
}

/// One region row of a time-series table.
///
/// `counts` is aligned with the owning [`SeriesTable::columns`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawObservation {
    pub province_or_state: String,
    pub country_or_region: String,
    pub latitude: f64,
    pub longitude: f64,
    pub counts: Vec<i64>,
    /// Added by the store rather than read from the source
    #[serde(skip)]
    pub synthesized: bool,
}

impl RawObservation {
    pub fn zeroed(name: &str, width: usize) -> Self {
        Self {
            province_or_state: name.to_string(),
            country_or_region: name.to_string(),
            latitude: 0.0,
            longitude: 0.0,
            counts: vec![0; width],
            synthesized: true,
        }
    }

    /// Add another row's counts column by column.
    pub fn accumulate(&mut self, other: &RawObservation) {
        for (acc, v) in self.counts.iter_mut().zip(&other.counts) {
            *acc += *v;
        }
    }
}

/// A decoded dataset: shared column labels plus rows in source order.
#[derive(Debug, Clone, Default)]
pub struct SeriesTable {
    /// Every header after `Long`, in source order. Usually date labels.
    pub columns: Arc<[String]>,
    pub rows: Vec<RawObservation>,
}

impl SeriesTable {
    pub fn width(&self) -> usize {
        self.columns.len()
    }
}

/// Both datasets resolved for one region name.
#[derive(Debug, Clone)]
pub struct RegionSeries {
    pub name: String,
    pub columns: Arc<[String]>,
    pub confirmed: RawObservation,
    pub deaths: RawObservation,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub confirmed_url: String,
    pub deaths_url: String,
    pub stale_after: Duration,
    pub sicktime_days: u32,
    pub default_region: String,
    pub fetch_timeout: Option<Duration>,
    pub world_aggregation: WorldAggregation,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            confirmed_url: DEFAULT_CONFIRMED_URL.to_string(),
            deaths_url: DEFAULT_DEATHS_URL.to_string(),
            stale_after: Duration::from_secs(3600),
            sicktime_days: 14,
            default_region: WORLD.to_string(),
            fetch_timeout: None,
            world_aggregation: WorldAggregation::OriginalRows,
        }
    }
}

impl Config {
    pub fn url_for(&self, dataset: Dataset) -> &str {
        match dataset {
            Dataset::Confirmed => &self.confirmed_url,
            Dataset::Deaths => &self.deaths_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate_sums_columnwise() {
        let mut a = RawObservation::zeroed("X", 3);
        let b = RawObservation {
            province_or_state: "A".to_string(),
            country_or_region: "X".to_string(),
            latitude: 1.0,
            longitude: 2.0,
            counts: vec![1, 2, 3],
            synthesized: false,
        };
        a.accumulate(&b);
        a.accumulate(&b);
        assert_eq!(a.counts, vec![2, 4, 6]);
        assert_eq!(a.province_or_state, "X");
    }

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.stale_after, Duration::from_secs(3600));
        assert_eq!(cfg.sicktime_days, 14);
        assert_eq!(cfg.default_region, WORLD);
        assert!(cfg.fetch_timeout.is_none());
        assert_eq!(cfg.url_for(Dataset::Deaths), DEFAULT_DEATHS_URL);
    }
}
