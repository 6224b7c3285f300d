//! Thread-safe metric primitives shared by every virtual user.
//!
//! Series are declared up front through [`MetricSinkBuilder`]; after
//! [`MetricSinkBuilder::build`] the name-to-series maps are immutable, so
//! lookups never take a lock. Counters and rates are plain atomics. Trends
//! stripe their samples across independently locked shards so that thousands
//! of concurrent writers never serialize on a single mutex.
//!
//! Reads through [`MetricSink::snapshot`] are an eventually consistent view
//! while writers are active and exact once every writer has finished.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::utils::as_millis_f64;

const DEFAULT_TREND_SHARDS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Rate,
    Trend,
}

/// Monotonic total.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Fraction of boolean observations that were `true`.
///
/// The denominator is the number of `add` calls made on this rate, so callers
/// must record `false` observations explicitly.
#[derive(Debug, Default)]
pub struct Rate {
    hits: AtomicU64,
    total: AtomicU64,
}

impl Rate {
    pub fn add(&self, hit: bool) {
        // total first: a reader that sees a hit also sees its denominator
        self.total.fetch_add(1, Ordering::SeqCst);
        if hit {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Returns `(hits, total)`.
    pub fn counts(&self) -> (u64, u64) {
        let hits = self.hits.load(Ordering::SeqCst);
        let total = self.total.load(Ordering::SeqCst);
        (hits, total.max(hits))
    }

    pub fn value(&self) -> f64 {
        let (hits, total) = self.counts();
        ratio(hits, total)
    }
}

fn ratio(hits: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Multiset of duration samples.
pub struct Trend {
    shards: Box<[Mutex<Vec<Duration>>]>,
    cursor: AtomicUsize,
}

impl std::fmt::Debug for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trend")
            .field("shards", &self.shards.len())
            .field("len", &self.len())
            .finish()
    }
}

impl Trend {
    pub fn new(num_shards: usize) -> Self {
        let shards = (0..num_shards.max(1))
            .map(|_| Mutex::new(Vec::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn add(&self, sample: Duration) {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.shards.len();
        self.shards[idx].lock().push(sample);
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All samples merged across shards, sorted ascending.
    pub fn sorted_samples(&self) -> Vec<Duration> {
        let mut all = Vec::with_capacity(self.len());
        for shard in self.shards.iter() {
            all.extend_from_slice(&shard.lock());
        }
        all.sort_unstable();
        all
    }

    pub fn percentile(&self, p: f64) -> Duration {
        percentile_of_sorted(&self.sorted_samples(), p)
    }
}

/// Percentile by linear interpolation between the closest ranks.
///
/// `rank = p / 100 * (n - 1)`; the result lies between `sorted[floor(rank)]`
/// and `sorted[ceil(rank)]`. An empty slice yields zero. `p` is clamped to
/// `[0, 100]`.
pub fn percentile_of_sorted(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 100.0) };
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let lo = sorted[lower].as_secs_f64();
    let hi = sorted[upper].as_secs_f64();
    let value = lo + (hi - lo) * (rank - lower as f64);
    // clamp guards against float rounding stepping outside the bracket
    Duration::from_secs_f64(value).clamp(sorted[lower], sorted[upper])
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub hits: u64,
    pub total: u64,
    pub rate: f64,
}

/// Trend aggregates in milliseconds, plus the sorted samples for arbitrary
/// percentile queries (not serialized).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrendSnapshot {
    pub count: u64,
    pub avg: f64,
    pub min: f64,
    pub med: f64,
    pub max: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    #[serde(skip)]
    sorted: Vec<Duration>,
}

impl TrendSnapshot {
    pub fn from_sorted(sorted: Vec<Duration>) -> Self {
        let count = sorted.len() as u64;
        let total: Duration = sorted.iter().sum();
        let avg = if count > 0 {
            as_millis_f64(total) / count as f64
        } else {
            0.0
        };
        let pct = |p: f64| as_millis_f64(percentile_of_sorted(&sorted, p));
        Self {
            count,
            avg,
            min: sorted.first().copied().map(as_millis_f64).unwrap_or(0.0),
            med: pct(50.0),
            max: sorted.last().copied().map(as_millis_f64).unwrap_or(0.0),
            p90: pct(90.0),
            p95: pct(95.0),
            p99: pct(99.0),
            sorted,
        }
    }

    /// Percentile in milliseconds. A snapshot deserialized without samples
    /// only knows the stored aggregates; other percentiles are `None`.
    pub fn percentile_ms(&self, p: f64) -> Option<f64> {
        if !self.sorted.is_empty() {
            return Some(as_millis_f64(percentile_of_sorted(&self.sorted, p)));
        }
        match p {
            p if p == 50.0 => Some(self.med),
            p if p == 90.0 => Some(self.p90),
            p if p == 95.0 => Some(self.p95),
            p if p == 99.0 => Some(self.p99),
            p if p >= 100.0 => Some(self.max),
            p if p <= 0.0 => Some(self.min),
            _ if self.count == 0 => Some(0.0),
            _ => None,
        }
    }
}

/// Frozen, read-only view of every series in a sink.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub rates: BTreeMap<String, RateSnapshot>,
    pub trends: BTreeMap<String, TrendSnapshot>,
}

impl MetricsSnapshot {
    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        if self.counters.contains_key(name) {
            Some(MetricKind::Counter)
        } else if self.rates.contains_key(name) {
            Some(MetricKind::Rate)
        } else if self.trends.contains_key(name) {
            Some(MetricKind::Trend)
        } else {
            None
        }
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn rate(&self, name: &str) -> f64 {
        self.rates.get(name).map(|r| r.rate).unwrap_or(0.0)
    }
}

#[derive(Debug, Default)]
pub struct MetricSinkBuilder {
    counters: Vec<String>,
    rates: Vec<String>,
    trends: Vec<String>,
    shards: Option<usize>,
}

impl MetricSinkBuilder {
    pub fn counter(mut self, name: impl Into<String>) -> Self {
        self.counters.push(name.into());
        self
    }

    pub fn rate(mut self, name: impl Into<String>) -> Self {
        self.rates.push(name.into());
        self
    }

    pub fn trend(mut self, name: impl Into<String>) -> Self {
        self.trends.push(name.into());
        self
    }

    pub fn series(self, name: impl Into<String>, kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => self.counter(name),
            MetricKind::Rate => self.rate(name),
            MetricKind::Trend => self.trend(name),
        }
    }

    /// Number of lock stripes per trend.
    pub fn trend_shards(mut self, shards: usize) -> Self {
        self.shards = Some(shards);
        self
    }

    pub fn build(self) -> MetricSink {
        let shards = self.shards.unwrap_or(DEFAULT_TREND_SHARDS);
        MetricSink {
            counters: self
                .counters
                .into_iter()
                .map(|n| (n, Arc::new(Counter::default())))
                .collect(),
            rates: self
                .rates
                .into_iter()
                .map(|n| (n, Arc::new(Rate::default())))
                .collect(),
            trends: self
                .trends
                .into_iter()
                .map(|n| (n, Arc::new(Trend::new(shards))))
                .collect(),
        }
    }
}

/// Registry of named series; the single point of shared mutable state in a run.
#[derive(Debug)]
pub struct MetricSink {
    counters: HashMap<String, Arc<Counter>>,
    rates: HashMap<String, Arc<Rate>>,
    trends: HashMap<String, Arc<Trend>>,
}

impl MetricSink {
    pub fn builder() -> MetricSinkBuilder {
        MetricSinkBuilder::default()
    }

    pub fn counter(&self, name: &str) -> Option<Arc<Counter>> {
        self.counters.get(name).cloned()
    }

    pub fn rate(&self, name: &str) -> Option<Arc<Rate>> {
        self.rates.get(name).cloned()
    }

    pub fn trend(&self, name: &str) -> Option<Arc<Trend>> {
        self.trends.get(name).cloned()
    }

    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        if self.counters.contains_key(name) {
            Some(MetricKind::Counter)
        } else if self.rates.contains_key(name) {
            Some(MetricKind::Rate)
        } else if self.trends.contains_key(name) {
            Some(MetricKind::Trend)
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .iter()
                .map(|(name, c)| (name.clone(), c.value()))
                .collect(),
            rates: self
                .rates
                .iter()
                .map(|(name, r)| {
                    let (hits, total) = r.counts();
                    (
                        name.clone(),
                        RateSnapshot {
                            hits,
                            total,
                            rate: ratio(hits, total),
                        },
                    )
                })
                .collect(),
            trends: self
                .trends
                .iter()
                .map(|(name, t)| (name.clone(), TrendSnapshot::from_sorted(t.sorted_samples())))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_counter_accumulates() {
        let c = Counter::default();
        c.add(5);
        c.add(3);
        c.add(2);
        assert_eq!(c.value(), 10);
    }

    #[test]
    fn test_rate_value() {
        let r = Rate::default();
        assert_eq!(r.value(), 0.0);
        for _ in 0..8 {
            r.add(true);
        }
        for _ in 0..2 {
            r.add(false);
        }
        assert_eq!(r.counts(), (8, 10));
        assert!((r.value() - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_percentile_interpolates_between_ranks() {
        let sorted: Vec<Duration> = (1..=100).map(ms).collect();
        // rank = 0.5 * 99 = 49.5 -> halfway between 50ms and 51ms
        assert_eq!(percentile_of_sorted(&sorted, 50.0), Duration::from_micros(50_500));
        assert_eq!(percentile_of_sorted(&sorted, 0.0), ms(1));
        assert_eq!(percentile_of_sorted(&sorted, 100.0), ms(100));
        assert_eq!(percentile_of_sorted(&[], 95.0), Duration::ZERO);
        assert_eq!(percentile_of_sorted(&[ms(7)], 99.0), ms(7));
    }

    #[test]
    fn test_percentiles_are_ordered() {
        let trend = Trend::new(4);
        for v in [120, 3, 87, 45, 45, 999, 12, 300, 51, 8, 73, 2, 640] {
            trend.add(ms(v));
        }
        let snap = TrendSnapshot::from_sorted(trend.sorted_samples());
        assert!(snap.min <= snap.med);
        assert!(snap.med <= snap.p95);
        assert!(snap.p95 <= snap.p99);
        assert!(snap.p99 <= snap.max);
        assert_eq!(snap.max, 999.0);
        assert_eq!(snap.count, 13);
    }

    #[test]
    fn test_snapshot_contains_declared_series() {
        let sink = MetricSink::builder()
            .counter("http_reqs")
            .rate("errors")
            .trend("http_req_duration")
            .build();

        sink.counter("http_reqs").unwrap().add(2);
        sink.rate("errors").unwrap().add(false);
        sink.trend("http_req_duration").unwrap().add(ms(100));

        let snap = sink.snapshot();
        assert_eq!(snap.counter("http_reqs"), 2);
        assert_eq!(snap.rate("errors"), 0.0);
        assert_eq!(snap.trends["http_req_duration"].avg, 100.0);
        assert_eq!(snap.kind_of("errors"), Some(MetricKind::Rate));
        assert_eq!(sink.kind_of("missing"), None);
        assert!(sink.counter("errors").is_none());
    }

    #[test]
    fn test_snapshot_json_skips_samples() {
        let sink = MetricSink::builder().trend("latency").build();
        sink.trend("latency").unwrap().add(ms(10));
        let json = serde_json::to_string(&sink.snapshot()).unwrap();
        assert!(json.contains("\"latency\""));
        assert!(!json.contains("sorted"));
    }

    #[test]
    fn test_percentile_after_deserialize() {
        let trend = Trend::new(2);
        for v in 1..=100 {
            trend.add(ms(v));
        }
        let live = TrendSnapshot::from_sorted(trend.sorted_samples());
        let p75 = live.percentile_ms(75.0).unwrap();
        assert!((p75 - 75.25).abs() < 1e-6, "p75 was {}", p75);

        let stored: TrendSnapshot =
            serde_json::from_str(&serde_json::to_string(&live).unwrap()).unwrap();
        assert_eq!(stored.percentile_ms(95.0), Some(live.p95));
        assert_eq!(stored.percentile_ms(100.0), Some(100.0));
        assert_eq!(stored.percentile_ms(75.0), None);

        let empty = TrendSnapshot::from_sorted(Vec::new());
        assert_eq!(empty.percentile_ms(75.0), Some(0.0));
    }

    #[test]
    fn test_concurrent_writers_lose_nothing() {
        let sink = Arc::new(
            MetricSink::builder()
                .counter("reqs")
                .rate("ok")
                .trend("lat")
                .trend_shards(8)
                .build(),
        );

        let handles: Vec<_> = (0..16)
            .map(|t| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    let reqs = sink.counter("reqs").unwrap();
                    let ok = sink.rate("ok").unwrap();
                    let lat = sink.trend("lat").unwrap();
                    for i in 0..1000u64 {
                        reqs.add(1);
                        ok.add(i % 2 == 0);
                        lat.add(Duration::from_micros(t * 1000 + i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = sink.snapshot();
        assert_eq!(snap.counter("reqs"), 16_000);
        assert_eq!(snap.rates["ok"].total, 16_000);
        assert_eq!(snap.rates["ok"].hits, 8_000);
        assert_eq!(snap.trends["lat"].count, 16_000);
        let rate = snap.rate("ok");
        assert!((0.0..=1.0).contains(&rate));
    }
}
