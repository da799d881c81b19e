//! NAV data sources and caching.
//!
//! [`NavSource`] is the seam between the simulation pipeline and wherever
//! fund NAV histories actually live. The crate ships an in-memory source
//! for tests and offline work, a CSV loader, and a TTL cache wrapper for
//! sources that hit a remote endpoint.

use crate::error::{FolioError, Result};
use crate::types::{AssetProfile, NavRecord};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Provider of fund NAV histories and trading calendars.
pub trait NavSource: Send + Sync {
    /// NAV records for one fund over `[start, end]`, ascending by date.
    fn fund_nav(&self, code: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<NavRecord>>;

    /// Trading dates over `[start, end]`, ascending.
    fn calendar(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>>;

    /// Static metadata for a fund, if known.
    fn profile(&self, code: &str) -> Option<AssetProfile>;
}

/// In-memory source backed by explicit series, for tests and offline runs.
///
/// When no calendar is set, the union of all NAV dates serves as the
/// trading calendar.
#[derive(Debug, Default)]
pub struct InMemorySource {
    funds: BTreeMap<String, Vec<NavRecord>>,
    profiles: BTreeMap<String, AssetProfile>,
    calendar: Option<Vec<NaiveDate>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fund(mut self, code: impl Into<String>, mut records: Vec<NavRecord>) -> Self {
        records.sort_by_key(|r| r.date);
        self.funds.insert(code.into(), records);
        self
    }

    pub fn with_profile(mut self, profile: AssetProfile) -> Self {
        self.profiles.insert(profile.code.clone(), profile);
        self
    }

    pub fn with_calendar(mut self, mut dates: Vec<NaiveDate>) -> Self {
        dates.sort();
        dates.dedup();
        self.calendar = Some(dates);
        self
    }
}

impl NavSource for InMemorySource {
    fn fund_nav(&self, code: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<NavRecord>> {
        let records = self
            .funds
            .get(code)
            .ok_or_else(|| FolioError::DataError(format!("unknown fund: {}", code)))?;
        Ok(records
            .iter()
            .filter(|r| r.date >= start && r.date <= end)
            .copied()
            .collect())
    }

    fn calendar(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>> {
        let dates: Vec<NaiveDate> = match &self.calendar {
            Some(dates) => dates
                .iter()
                .copied()
                .filter(|d| *d >= start && *d <= end)
                .collect(),
            None => {
                let union: BTreeSet<NaiveDate> = self
                    .funds
                    .values()
                    .flat_map(|records| records.iter().map(|r| r.date))
                    .filter(|d| *d >= start && *d <= end)
                    .collect();
                union.into_iter().collect()
            }
        };
        Ok(dates)
    }

    fn profile(&self, code: &str) -> Option<AssetProfile> {
        self.profiles.get(code).cloned()
    }
}

#[derive(Debug, Deserialize)]
struct CsvNavRow {
    date: String,
    nav: f64,
    #[serde(default)]
    cum_nav: Option<f64>,
}

/// Load a NAV history from a CSV file with `date,nav[,cum_nav]` columns,
/// dates formatted `%Y-%m-%d`.
///
/// Rows with invalid NAV values are skipped with a warning; a missing
/// `cum_nav` falls back to the unit NAV.
pub fn load_nav_csv(path: impl AsRef<Path>) -> Result<Vec<NavRecord>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    let mut skipped = 0usize;

    for row in reader.deserialize() {
        let row: CsvNavRow = row?;
        let date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d")?;
        let record = NavRecord::new(date, row.nav, row.cum_nav.unwrap_or(row.nav));
        if record.is_valid() {
            records.push(record);
        } else {
            skipped += 1;
        }
    }

    if skipped > 0 {
        warn!(path = %path.display(), skipped, "skipped rows with invalid NAV values");
    }
    records.sort_by_key(|r| r.date);
    info!(path = %path.display(), rows = records.len(), "loaded NAV history");
    Ok(records)
}

/// A fixed-TTL cache. One abstraction covers every caching need in the
/// crate; entries expire lazily on access.
#[derive(Debug)]
pub struct ExpiringCache<K, V> {
    entries: HashMap<K, (V, Instant)>,
    ttl: Duration,
}

impl<K: Eq + Hash, V> ExpiringCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Fetch a live entry, evicting it first if its TTL has lapsed.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let expired = match self.entries.get(key) {
            Some((_, stored)) => stored.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|(v, _)| v)
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.entries.insert(key, (value, Instant::now()));
    }

    /// Drop every entry whose TTL has lapsed.
    pub fn purge_expired(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, (_, stored)| stored.elapsed() <= ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

type NavCacheKey = (String, NaiveDate, NaiveDate);

/// Caching wrapper around a [`NavSource`].
///
/// Only successful fetches are cached; errors pass through so a transient
/// failure can be retried against the inner source.
pub struct CachedSource<S> {
    inner: S,
    nav_cache: Mutex<ExpiringCache<NavCacheKey, Vec<NavRecord>>>,
}

impl<S: NavSource> CachedSource<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            nav_cache: Mutex::new(ExpiringCache::new(ttl)),
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn lock_cache(&self) -> Result<std::sync::MutexGuard<'_, ExpiringCache<NavCacheKey, Vec<NavRecord>>>> {
        self.nav_cache
            .lock()
            .map_err(|_| FolioError::DataError("NAV cache lock poisoned".to_string()))
    }
}

impl<S: NavSource> NavSource for CachedSource<S> {
    fn fund_nav(&self, code: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<NavRecord>> {
        let key = (code.to_string(), start, end);
        {
            let mut cache = self.lock_cache()?;
            if let Some(hit) = cache.get(&key) {
                return Ok(hit.clone());
            }
        }

        let records = self.inner.fund_nav(code, start, end)?;
        self.lock_cache()?.insert(key, records.clone());
        Ok(records)
    }

    fn calendar(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>> {
        self.inner.calendar(start, end)
    }

    fn profile(&self, code: &str) -> Option<AssetProfile> {
        self.inner.profile(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_in_memory_source_range_filter() {
        let source = InMemorySource::new().with_fund(
            "A",
            vec![
                NavRecord::new(d(2024, 1, 2), 1.00, 1.00),
                NavRecord::new(d(2024, 1, 3), 1.01, 1.01),
                NavRecord::new(d(2024, 1, 4), 1.02, 1.02),
            ],
        );

        let records = source.fund_nav("A", d(2024, 1, 3), d(2024, 1, 4)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].date, d(2024, 1, 3));

        assert!(source.fund_nav("B", d(2024, 1, 1), d(2024, 1, 31)).is_err());
    }

    #[test]
    fn test_calendar_defaults_to_union_of_nav_dates() {
        let source = InMemorySource::new()
            .with_fund("A", vec![NavRecord::new(d(2024, 1, 2), 1.0, 1.0)])
            .with_fund("B", vec![NavRecord::new(d(2024, 1, 3), 2.0, 2.0)]);

        let cal = source.calendar(d(2024, 1, 1), d(2024, 1, 31)).unwrap();
        assert_eq!(cal, vec![d(2024, 1, 2), d(2024, 1, 3)]);
    }

    #[test]
    fn test_load_nav_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "date,nav,cum_nav").unwrap();
        writeln!(file, "2024-01-03,1.02,2.11").unwrap();
        writeln!(file, "2024-01-02,1.01,2.10").unwrap();
        writeln!(file, "2024-01-04,0.00,0.00").unwrap();

        let records = load_nav_csv(file.path()).unwrap();
        // Invalid row dropped, remainder sorted ascending.
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].date, d(2024, 1, 2));
        assert!((records[1].cum_nav - 2.11).abs() < 1e-12);
    }

    #[test]
    fn test_expiring_cache_ttl() {
        let mut cache: ExpiringCache<&str, u32> = ExpiringCache::new(Duration::from_secs(60));
        cache.insert("k", 7);
        assert_eq!(cache.get(&"k"), Some(&7));
        assert_eq!(cache.len(), 1);

        let mut instant_cache: ExpiringCache<&str, u32> =
            ExpiringCache::new(Duration::from_nanos(0));
        instant_cache.insert("k", 7);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(instant_cache.get(&"k"), None);
        assert!(instant_cache.is_empty());
    }

    struct CountingSource {
        inner: InMemorySource,
        fetches: AtomicUsize,
    }

    impl NavSource for CountingSource {
        fn fund_nav(&self, code: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<NavRecord>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.inner.fund_nav(code, start, end)
        }

        fn calendar(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>> {
            self.inner.calendar(start, end)
        }

        fn profile(&self, code: &str) -> Option<AssetProfile> {
            self.inner.profile(code)
        }
    }

    #[test]
    fn test_cached_source_hits_inner_once() {
        let inner = CountingSource {
            inner: InMemorySource::new()
                .with_fund("A", vec![NavRecord::new(d(2024, 1, 2), 1.0, 1.0)]),
            fetches: AtomicUsize::new(0),
        };
        let cached = CachedSource::new(inner, Duration::from_secs(600));

        let first = cached.fund_nav("A", d(2024, 1, 1), d(2024, 1, 31)).unwrap();
        let second = cached.fund_nav("A", d(2024, 1, 1), d(2024, 1, 31)).unwrap();
        assert_eq!(first, second);
        assert_eq!(cached.into_inner().fetches.load(Ordering::SeqCst), 1);
    }
}
