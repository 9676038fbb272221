//! JHU CSSE time-series source
//!
//! Fetches the global confirmed/deaths CSVs and decodes them into
//! [`SeriesTable`]s. Layout: `Province/State, Country/Region, Lat, Long, <date>...`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::dates;
use crate::models::{Config, Dataset, RawObservation, SeriesTable};

const PROVINCE_HEADER: &str = "Province/State";
const COUNTRY_HEADER: &str = "Country/Region";
const LAT_HEADER: &str = "Lat";
const LONG_HEADERS: [&str; 2] = ["Long", "Long_"];

#[derive(Debug, Clone, PartialEq)]
pub enum DataSourceError {
    /// Transport failure or non-success HTTP status
    Fetch { dataset: Dataset, reason: String },
    /// Payload is not the expected delimited table
    Decode { dataset: Dataset, reason: String },
    /// The two tables disagree on their count columns
    ColumnMismatch { confirmed: usize, deaths: usize },
}

impl std::fmt::Display for DataSourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch { dataset, reason } => {
                write!(f, "failed to fetch {} series: {}", dataset.as_str(), reason)
            }
            Self::Decode { dataset, reason } => {
                write!(f, "failed to decode {} series: {}", dataset.as_str(), reason)
            }
            Self::ColumnMismatch { confirmed, deaths } => write!(
                f,
                "confirmed ({} columns) and deaths ({} columns) tables do not share date columns",
                confirmed, deaths
            ),
        }
    }
}

impl std::error::Error for DataSourceError {}

/// Where raw CSV text comes from. The HTTP client is the production source;
/// tests plug in canned text.
#[async_trait]
pub trait SeriesSource: Send + Sync {
    async fn fetch(&self, dataset: Dataset) -> Result<String>;
}

/// HTTPS client for the CSSE GitHub mirror
pub struct CsseClient {
    http: reqwest::Client,
    confirmed_url: String,
    deaths_url: String,
}

impl CsseClient {
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent("coronaboard/0.1");
        if let Some(timeout) = config.fetch_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            confirmed_url: config.url_for(Dataset::Confirmed).to_string(),
            deaths_url: config.url_for(Dataset::Deaths).to_string(),
        })
    }

    pub fn into_source(self) -> Arc<dyn SeriesSource> {
        Arc::new(self)
    }

    fn url(&self, dataset: Dataset) -> &str {
        match dataset {
            Dataset::Confirmed => &self.confirmed_url,
            Dataset::Deaths => &self.deaths_url,
        }
    }
}

#[async_trait]
impl SeriesSource for CsseClient {
    async fn fetch(&self, dataset: Dataset) -> Result<String> {
        let url = self.url(dataset);
        let started = Instant::now();

        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("{} request failed", dataset.as_str()))?
            .error_for_status()
            .with_context(|| format!("{} status", dataset.as_str()))?;

        let body = response
            .text()
            .await
            .with_context(|| format!("{} body", dataset.as_str()))?;

        info!(
            dataset = dataset.as_str(),
            bytes = body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "📥 Downloaded time series"
        );
        Ok(body)
    }
}

/// Decode one CSV payload into a table.
///
/// Every header that is not an identity/coordinate column becomes a count column.
/// Empty count cells read as 0; empty coordinates read as NaN. Cells under a
/// header that is not a date label read as 0 when they are not numeric.
pub fn decode_table(dataset: Dataset, text: &str) -> Result<SeriesTable, DataSourceError> {
    let decode_err = |reason: String| DataSourceError::Decode { dataset, reason };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| decode_err(format!("header: {}", e)))?
        .clone();

    let province_idx = header_position(&headers, &[PROVINCE_HEADER])
        .ok_or_else(|| decode_err(format!("missing {} column", PROVINCE_HEADER)))?;
    let country_idx = header_position(&headers, &[COUNTRY_HEADER])
        .ok_or_else(|| decode_err(format!("missing {} column", COUNTRY_HEADER)))?;
    let lat_idx = header_position(&headers, &[LAT_HEADER]);
    let long_idx = header_position(&headers, &LONG_HEADERS);

    let identity = [Some(province_idx), Some(country_idx), lat_idx, long_idx];
    let count_idx: Vec<usize> = (0..headers.len())
        .filter(|i| !identity.contains(&Some(*i)))
        .collect();
    let columns: Arc<[String]> = count_idx
        .iter()
        .map(|&i| headers[i].to_string())
        .collect();
    // Only date columns must hold counts; other extras are kept leniently
    let strict: Vec<bool> = count_idx
        .iter()
        .map(|&i| dates::parse(&headers[i]).is_ok())
        .collect();
    for (&i, &is_date) in count_idx.iter().zip(&strict) {
        if !is_date {
            debug!(
                dataset = dataset.as_str(),
                column = &headers[i],
                "Non-date column, cells read leniently"
            );
        }
    }

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| decode_err(format!("row {}: {}", line + 1, e)))?;

        let province = record.get(province_idx).unwrap_or_default();
        let country = record.get(country_idx).unwrap_or_default();
        if province.is_empty() && country.is_empty() {
            warn!(dataset = dataset.as_str(), row = line + 1, "Skipping row without region identity");
            continue;
        }

        let mut counts = Vec::with_capacity(count_idx.len());
        for (&i, &is_date) in count_idx.iter().zip(&strict) {
            let cell = record.get(i).unwrap_or_default();
            if !is_date {
                counts.push(parse_count(cell).unwrap_or(0));
                continue;
            }
            let value = parse_count(cell).ok_or_else(|| {
                decode_err(format!(
                    "row {} column {:?}: {:?} is not a count",
                    line + 1,
                    &headers[i],
                    cell
                ))
            })?;
            counts.push(value);
        }

        rows.push(RawObservation {
            province_or_state: province.to_string(),
            country_or_region: country.to_string(),
            latitude: parse_coord(lat_idx.and_then(|i| record.get(i))),
            longitude: parse_coord(long_idx.and_then(|i| record.get(i))),
            counts,
            synthesized: false,
        });
    }

    if rows.is_empty() {
        return Err(decode_err("no data rows".to_string()));
    }

    debug!(
        dataset = dataset.as_str(),
        rows = rows.len(),
        columns = columns.len(),
        "Decoded time series table"
    );
    Ok(SeriesTable { columns, rows })
}

fn header_position(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.contains(&h.trim_start_matches('\u{feff}')))
}

fn parse_count(cell: &str) -> Option<i64> {
    if cell.is_empty() {
        return Some(0);
    }
    if let Ok(v) = cell.parse::<i64>() {
        return Some(v);
    }
    // Some mirrors write counts as "12.0"
    cell.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v.round() as i64)
}

fn parse_coord(cell: Option<&str>) -> f64 {
    cell.and_then(|c| c.parse::<f64>().ok()).unwrap_or(f64::NAN)
}

/// Fetch and decode one dataset. No retry: failures go straight to the caller.
pub async fn fetch_table(
    source: &dyn SeriesSource,
    dataset: Dataset,
) -> Result<SeriesTable, DataSourceError> {
    let text = source
        .fetch(dataset)
        .await
        .map_err(|e| DataSourceError::Fetch {
            dataset,
            reason: format!("{:#}", e),
        })?;
    decode_table(dataset, &text)
}

/// Convenience for building a client-backed source from configuration.
pub fn http_source(config: &Config) -> Result<Arc<dyn SeriesSource>> {
    Ok(CsseClient::new(config)?.into_source())
}
