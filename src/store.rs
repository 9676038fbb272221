//! Series Store
//!
//! In-memory cache of the confirmed/deaths tables. Each refresh rebuilds both
//! tables, synthesizes per-country and "World" aggregate rows so every region
//! name resolves to exactly one row, and swaps the result in atomically.
//! Requests that find the cache older than `stale_after` rebuild it inline.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::models::{
    Dataset, RawObservation, RegionSeries, SeriesTable, WorldAggregation, WORLD,
};
use crate::scrapers::{fetch_table, DataSourceError, SeriesSource};

/// Table plus its region-name index.
#[derive(Debug, Clone)]
pub struct IndexedTable {
    table: SeriesTable,
    by_province: HashMap<String, Vec<usize>>,
    by_country: HashMap<String, Vec<usize>>,
}

impl IndexedTable {
    pub fn new(table: SeriesTable) -> Self {
        let mut by_province: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_country: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, row) in table.rows.iter().enumerate() {
            by_province
                .entry(row.province_or_state.clone())
                .or_default()
                .push(i);
            by_country
                .entry(row.country_or_region.clone())
                .or_default()
                .push(i);
        }
        Self {
            table,
            by_province,
            by_country,
        }
    }

    pub fn table(&self) -> &SeriesTable {
        &self.table
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_province.contains_key(name) || self.by_country.contains_key(name)
    }

    /// Province/state match first, then country/region; matches are summed.
    /// Unknown names give an all-zero row of the table's width.
    pub fn resolve(&self, name: &str) -> RawObservation {
        let hits = self
            .by_province
            .get(name)
            .or_else(|| self.by_country.get(name));

        let Some(hits) = hits else {
            return RawObservation::zeroed(name, self.table.width());
        };
        if let [only] = hits.as_slice() {
            return self.table.rows[*only].clone();
        }

        let rows: Vec<&RawObservation> = hits.iter().map(|&i| &self.table.rows[i]).collect();
        let mut merged = RawObservation::zeroed(name, self.table.width());
        merged.country_or_region = rows[0].country_or_region.clone();
        merged.latitude = nan_skipping_mean(rows.iter().map(|r| r.latitude));
        merged.longitude = nan_skipping_mean(rows.iter().map(|r| r.longitude));
        for row in rows {
            merged.accumulate(row);
        }
        merged
    }
}

/// One complete refresh result. Readers hold an `Arc` to it, so a concurrent
/// rebuild never tears a request's view.
#[derive(Debug)]
pub struct Snapshot {
    confirmed: IndexedTable,
    deaths: IndexedTable,
    regions: Vec<String>,
    refreshed_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn build(
        confirmed: SeriesTable,
        deaths: SeriesTable,
        world: WorldAggregation,
        refreshed_at: DateTime<Utc>,
    ) -> Result<Self, DataSourceError> {
        if confirmed.columns != deaths.columns {
            return Err(DataSourceError::ColumnMismatch {
                confirmed: confirmed.width(),
                deaths: deaths.width(),
            });
        }

        let confirmed = IndexedTable::new(synthesize_aggregates(confirmed, world));
        let deaths = IndexedTable::new(synthesize_aggregates(deaths, world));
        let regions = confirmed
            .table
            .rows
            .iter()
            .map(|r| r.province_or_state.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        Ok(Self {
            confirmed,
            deaths,
            regions,
            refreshed_at,
        })
    }

    pub fn table(&self, dataset: Dataset) -> &IndexedTable {
        match dataset {
            Dataset::Confirmed => &self.confirmed,
            Dataset::Deaths => &self.deaths,
        }
    }

    /// Sorted, de-duplicated province/state names of the confirmed table.
    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    pub fn refreshed_at(&self) -> DateTime<Utc> {
        self.refreshed_at
    }

    pub fn contains(&self, name: &str) -> bool {
        self.confirmed.contains(name)
    }

    pub fn resolve(&self, dataset: Dataset, name: &str) -> RawObservation {
        self.table(dataset).resolve(name)
    }

    pub fn resolve_region(&self, name: &str) -> RegionSeries {
        RegionSeries {
            name: name.to_string(),
            columns: self.confirmed.table.columns.clone(),
            confirmed: self.confirmed.resolve(name),
            deaths: self.deaths.resolve(name),
        }
    }

    fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        let age = now.signed_duration_since(self.refreshed_at);
        match chrono::Duration::from_std(stale_after) {
            Ok(limit) => age > limit,
            Err(_) => false,
        }
    }
}

/// Make every region name independently queryable.
///
/// 1. Rows without a province/state take their country name.
/// 2. Each country with no row named after itself gets a summed row
///    (coordinates averaged).
/// 3. A "World" row sums the rows selected by `world`.
pub fn synthesize_aggregates(mut table: SeriesTable, world: WorldAggregation) -> SeriesTable {
    for row in &mut table.rows {
        if row.province_or_state.is_empty() {
            row.province_or_state = row.country_or_region.clone();
        }
    }

    let states: HashSet<String> = table
        .rows
        .iter()
        .map(|r| r.province_or_state.clone())
        .collect();

    // First-appearance order keeps the output deterministic
    let mut countries: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for row in &table.rows {
        if seen.insert(row.country_or_region.as_str()) {
            countries.push(row.country_or_region.clone());
        }
    }

    let width = table.width();
    for country in countries {
        if states.contains(&country) {
            continue;
        }
        let members: Vec<&RawObservation> = table
            .rows
            .iter()
            .filter(|r| r.country_or_region == country)
            .collect();

        let mut total = RawObservation::zeroed(&country, width);
        total.latitude = nan_skipping_mean(members.iter().map(|r| r.latitude));
        total.longitude = nan_skipping_mean(members.iter().map(|r| r.longitude));
        for row in &members {
            total.accumulate(row);
        }
        debug!(country = %country, parts = members.len(), "Synthesized country total");
        table.rows.push(total);
    }

    let mut world_row = RawObservation::zeroed(WORLD, width);
    for row in &table.rows {
        let include = match world {
            WorldAggregation::OriginalRows => !row.synthesized,
            WorldAggregation::AllRows => true,
        };
        if include {
            world_row.accumulate(row);
        }
    }
    table.rows.push(world_row);

    table
}

/// Sum of the finite values divided by the count of all values.
fn nan_skipping_mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| {
        (if v.is_finite() { sum + v } else { sum }, n + 1)
    });
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Process-wide cache handle, shared through axum state.
pub struct SeriesStore {
    source: Arc<dyn SeriesSource>,
    stale_after: Duration,
    world: WorldAggregation,
    current: RwLock<Option<Arc<Snapshot>>>,
    /// Serializes rebuilds so concurrent stale requests share one fetch
    refresh_lock: Mutex<()>,
    refreshes: AtomicU64,
}

impl SeriesStore {
    pub fn new(
        source: Arc<dyn SeriesSource>,
        stale_after: Duration,
        world: WorldAggregation,
    ) -> Self {
        Self {
            source,
            stale_after,
            world,
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Download both datasets and replace the cache. On failure the previous
    /// snapshot stays in place.
    pub async fn refresh(&self) -> Result<Arc<Snapshot>, DataSourceError> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> Result<Arc<Snapshot>, DataSourceError> {
        let started = Instant::now();
        info!("🔄 Refreshing COVID-19 time series");

        let source = self.source.as_ref();
        let result = tokio::try_join!(
            fetch_table(source, Dataset::Confirmed),
            fetch_table(source, Dataset::Deaths),
        )
        .and_then(|(confirmed, deaths)| Snapshot::build(confirmed, deaths, self.world, Utc::now()));

        let snapshot = match result {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                warn!(error = %e, "⚠️ Series refresh failed, keeping previous cache");
                return Err(e);
            }
        };

        *self.current.write() = Some(snapshot.clone());
        self.refreshes.fetch_add(1, Ordering::Relaxed);

        info!(
            rows = snapshot.confirmed.table.rows.len(),
            regions = snapshot.regions.len(),
            columns = snapshot.confirmed.table.width(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "✅ Series cache rebuilt"
        );
        Ok(snapshot)
    }

    /// Current snapshot if present and younger than the staleness window.
    fn fresh_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.current
            .read()
            .as_ref()
            .filter(|s| !s.is_stale(Utc::now(), self.stale_after))
            .cloned()
    }

    /// Rebuild inline when the cache is missing or older than `stale_after`.
    pub async fn ensure_fresh(&self) -> Result<Arc<Snapshot>, DataSourceError> {
        if let Some(snapshot) = self.fresh_snapshot() {
            return Ok(snapshot);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another request may have rebuilt while we waited
        if let Some(snapshot) = self.fresh_snapshot() {
            return Ok(snapshot);
        }
        self.refresh_locked().await
    }

    /// Last successful snapshot, fresh or not.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.current.read().clone()
    }

    pub fn regions(&self) -> Vec<String> {
        self.snapshot()
            .map(|s| s.regions().to_vec())
            .unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.snapshot().is_some_and(|s| s.contains(name))
    }

    /// Resolve one table without a freshness check. Never fails: unknown names
    /// and an empty cache both give a zero row.
    pub fn resolve(&self, dataset: Dataset, name: &str) -> RawObservation {
        match self.snapshot() {
            Some(s) => s.resolve(dataset, name),
            None => RawObservation::zeroed(name, 0),
        }
    }

    /// The request path: freshen the cache, then resolve both tables.
    pub async fn resolve_region(&self, name: &str) -> Result<RegionSeries, DataSourceError> {
        let snapshot = self.ensure_fresh().await?;
        Ok(snapshot.resolve_region(name))
    }

    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.snapshot().map(|s| s.refreshed_at())
    }

    #[cfg(test)]
    fn backdate(&self, by: Duration) {
        let mut current = self.current.write();
        if let Some(snapshot) = current.take() {
            let snapshot = Arc::try_unwrap(snapshot).unwrap_or_else(|shared| Snapshot {
                confirmed: shared.confirmed.clone(),
                deaths: shared.deaths.clone(),
                regions: shared.regions.clone(),
                refreshed_at: shared.refreshed_at,
            });
            *current = Some(Arc::new(Snapshot {
                refreshed_at: snapshot.refreshed_at - chrono::Duration::from_std(by).unwrap(),
                ..snapshot
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    const CONFIRMED: &str = "\
Province/State,Country/Region,Lat,Long,10/1/21,10/2/21
A,X,10,20,5,8
B,X,20,40,6,9
,Aruba,12.5,-70.0,1,2
,France,46,2,100,110
Reunion,France,-21,55,3,4
";
    const DEATHS: &str = "\
Province/State,Country/Region,Lat,Long,10/1/21,10/2/21
A,X,10,20,1,1
B,X,20,40,0,2
,Aruba,12.5,-70.0,0,0
,France,46,2,10,11
Reunion,France,-21,55,0,1
";

    struct CannedSource {
        confirmed: String,
        deaths: String,
        calls: AtomicU64,
        down: AtomicBool,
    }

    impl CannedSource {
        fn new(confirmed: &str, deaths: &str) -> Arc<Self> {
            Arc::new(Self {
                confirmed: confirmed.to_string(),
                deaths: deaths.to_string(),
                calls: AtomicU64::new(0),
                down: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl SeriesSource for CannedSource {
        async fn fetch(&self, dataset: Dataset) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                anyhow::bail!("503 Service Unavailable");
            }
            Ok(match dataset {
                Dataset::Confirmed => self.confirmed.clone(),
                Dataset::Deaths => self.deaths.clone(),
            })
        }
    }

    fn store_with(source: Arc<CannedSource>, world: WorldAggregation) -> SeriesStore {
        SeriesStore::new(source, Duration::from_secs(3600), world)
    }

    #[tokio::test]
    async fn test_country_split_into_provinces_is_resolvable() {
        let store = store_with(CannedSource::new(CONFIRMED, DEATHS), WorldAggregation::OriginalRows);
        store.refresh().await.expect("refresh");

        let x = store.resolve(Dataset::Confirmed, "X");
        assert_eq!(x.province_or_state, "X");
        assert_eq!(x.country_or_region, "X");
        assert_eq!(x.counts, vec![11, 17]);
        assert!((x.latitude - 15.0).abs() < 1e-9);
        assert!((x.longitude - 30.0).abs() < 1e-9);

        let deaths = store.resolve(Dataset::Deaths, "X");
        assert_eq!(deaths.counts, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_bare_country_row_is_self_identifying() {
        let store = store_with(CannedSource::new(CONFIRMED, DEATHS), WorldAggregation::OriginalRows);
        store.refresh().await.unwrap();

        let aruba = store.resolve(Dataset::Confirmed, "Aruba");
        assert_eq!(aruba.province_or_state, "Aruba");
        assert_eq!(aruba.counts, vec![1, 2]);
        assert!(!aruba.synthesized);

        // France already has a row named after itself, so no total is synthesized
        // and the bare row wins over Reunion.
        let france = store.resolve(Dataset::Confirmed, "France");
        assert_eq!(france.counts, vec![100, 110]);
        assert!(store.contains("Reunion"));
    }

    #[tokio::test]
    async fn test_regions_sorted_and_unique() {
        let store = store_with(CannedSource::new(CONFIRMED, DEATHS), WorldAggregation::OriginalRows);
        store.refresh().await.unwrap();

        let regions = store.regions();
        assert_eq!(
            regions,
            vec!["A", "Aruba", "B", "France", "Reunion", "World", "X"]
        );
        assert!(regions.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_world_excludes_synthesized_rows_by_default() {
        let store = store_with(CannedSource::new(CONFIRMED, DEATHS), WorldAggregation::OriginalRows);
        store.refresh().await.unwrap();

        let world = store.resolve(Dataset::Confirmed, WORLD);
        // 5+6+1+100+3, 8+9+2+110+4
        assert_eq!(world.counts, vec![115, 133]);
        assert_eq!(world.latitude, 0.0);
    }

    #[tokio::test]
    async fn test_world_all_rows_reproduces_double_count() {
        let store = store_with(CannedSource::new(CONFIRMED, DEATHS), WorldAggregation::AllRows);
        store.refresh().await.unwrap();

        let world = store.resolve(Dataset::Confirmed, WORLD);
        // X's synthesized total (11, 17) counted on top of A and B
        assert_eq!(world.counts, vec![126, 150]);
    }

    #[tokio::test]
    async fn test_unknown_region_resolves_to_zero_row() {
        let store = store_with(CannedSource::new(CONFIRMED, DEATHS), WorldAggregation::OriginalRows);
        store.refresh().await.unwrap();

        let nowhere = store.resolve(Dataset::Confirmed, "Atlantis");
        assert_eq!(nowhere.counts, vec![0, 0]);
        assert!(!store.contains("Atlantis"));
    }

    #[tokio::test]
    async fn test_stale_cache_triggers_exactly_one_refresh() {
        let source = CannedSource::new(CONFIRMED, DEATHS);
        let store = store_with(source.clone(), WorldAggregation::OriginalRows);
        store.refresh().await.unwrap();
        assert_eq!(store.refresh_count(), 1);

        // Fresh: no refetch
        store.resolve_region("X").await.unwrap();
        assert_eq!(store.refresh_count(), 1);

        store.backdate(Duration::from_secs(3601));
        let series = store.resolve_region("X").await.unwrap();
        assert_eq!(series.confirmed.counts, vec![11, 17]);
        assert_eq!(store.refresh_count(), 2);
        // two datasets per refresh
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);

        store.resolve_region("X").await.unwrap();
        assert_eq!(store.refresh_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_stale_requests_share_one_refresh() {
        let store = Arc::new(store_with(
            CannedSource::new(CONFIRMED, DEATHS),
            WorldAggregation::OriginalRows,
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.resolve_region("World").await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(store.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_columns_are_rejected() {
        let bad_deaths = "Province/State,Country/Region,Lat,Long,10/1/21\n,X,0,0,1\n";
        let bad = store_with(CannedSource::new(CONFIRMED, bad_deaths), WorldAggregation::OriginalRows);
        let err = bad.refresh().await.unwrap_err();
        assert!(matches!(err, DataSourceError::ColumnMismatch { confirmed: 2, deaths: 1 }));
        assert!(bad.snapshot().is_none());
        assert!(bad.resolve(Dataset::Confirmed, "X").counts.is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let source = CannedSource::new(CONFIRMED, DEATHS);
        let store = store_with(source.clone(), WorldAggregation::OriginalRows);
        let first = store.refresh().await.unwrap();

        store.backdate(Duration::from_secs(3601));
        let stale_at = store.last_refresh();
        source.down.store(true, Ordering::SeqCst);

        let err = store.resolve_region("X").await.unwrap_err();
        assert!(matches!(err, DataSourceError::Fetch { .. }));
        assert_eq!(store.refresh_count(), 1);
        assert_eq!(store.last_refresh(), stale_at);

        let kept = store.snapshot().expect("previous snapshot kept");
        assert_eq!(kept.regions(), first.regions());
        assert_eq!(store.resolve(Dataset::Confirmed, "X").counts, vec![11, 17]);

        // source recovers: the next request rebuilds
        source.down.store(false, Ordering::SeqCst);
        store.resolve_region("X").await.unwrap();
        assert_eq!(store.refresh_count(), 2);
    }

    #[tokio::test]
    async fn test_text_column_without_date_label_does_not_fail_refresh() {
        let table = "Province/State,Country/Region,Lat,Long,1/1/21,1/2/21,Note\n,X,0,0,1,2,revised\n";
        let store = store_with(CannedSource::new(table, table), WorldAggregation::OriginalRows);

        let series = store.resolve_region("X").await.expect("refresh succeeds");
        let signals = crate::signals::SignalEngine::default().derive(&series).unwrap();
        assert_eq!(signals.cumulative, vec![1.0, 2.0]);
        assert_eq!(signals.labels, vec!["1/1/21", "1/2/21"]);
    }

    #[test]
    fn test_nan_skipping_mean_divides_by_all_rows() {
        let mean = nan_skipping_mean([2.0, f64::NAN, 4.0].into_iter());
        assert!((mean - 2.0).abs() < 1e-12);
        assert!(nan_skipping_mean(std::iter::empty()).is_nan());
    }
}
