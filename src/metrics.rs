//! Access-log metric aggregation.
//!
//! Consumes decoded LTSV records in file order, keeps a running tally of
//! status classes, cache statuses and latencies, and turns it into a
//! `Snapshot` keyed by the closed `MetricKey` set.

use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::ltsv::{FieldRecord, RecordError};
use crate::stats;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::{BTreeMap, HashMap};

/// Every metric name a snapshot may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricKey {
    TotalCount,
    Count2xx,
    Count3xx,
    Count4xx,
    Count404,
    Count5xx,
    Count503,
    Percentage2xx,
    Percentage3xx,
    Percentage4xx,
    Percentage404,
    Percentage5xx,
    Percentage503,
    Average,
    Min,
    Max,
    Percentile90,
    Percentile95,
    Percentile99,
    HitPercentage,
    MissPercentage,
    ExpiredPercentage,
    RevalidatedPercentage,
    BypassPercentage,
    StalePercentage,
    UpdatingPercentage,
}

/// Graph group a metric is reported under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricGroup {
    AccessNum,
    AccessRate,
    Latency,
    CacheRate,
}

impl MetricGroup {
    pub fn name(self) -> &'static str {
        match self {
            MetricGroup::AccessNum => "access_num",
            MetricGroup::AccessRate => "access_rate",
            MetricGroup::Latency => "latency",
            MetricGroup::CacheRate => "cache_rate",
        }
    }
}

impl MetricKey {
    pub const ALL: [MetricKey; 26] = [
        MetricKey::TotalCount,
        MetricKey::Count2xx,
        MetricKey::Count3xx,
        MetricKey::Count4xx,
        MetricKey::Count404,
        MetricKey::Count5xx,
        MetricKey::Count503,
        MetricKey::Percentage2xx,
        MetricKey::Percentage3xx,
        MetricKey::Percentage4xx,
        MetricKey::Percentage404,
        MetricKey::Percentage5xx,
        MetricKey::Percentage503,
        MetricKey::Average,
        MetricKey::Min,
        MetricKey::Max,
        MetricKey::Percentile90,
        MetricKey::Percentile95,
        MetricKey::Percentile99,
        MetricKey::HitPercentage,
        MetricKey::MissPercentage,
        MetricKey::ExpiredPercentage,
        MetricKey::RevalidatedPercentage,
        MetricKey::BypassPercentage,
        MetricKey::StalePercentage,
        MetricKey::UpdatingPercentage,
    ];

    /// Raw counters, dropped from the snapshot when coverage is unverified.
    pub const COUNTS: [MetricKey; 7] = [
        MetricKey::TotalCount,
        MetricKey::Count2xx,
        MetricKey::Count3xx,
        MetricKey::Count4xx,
        MetricKey::Count404,
        MetricKey::Count5xx,
        MetricKey::Count503,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MetricKey::TotalCount => "total_count",
            MetricKey::Count2xx => "2xx_count",
            MetricKey::Count3xx => "3xx_count",
            MetricKey::Count4xx => "4xx_count",
            MetricKey::Count404 => "404_count",
            MetricKey::Count5xx => "5xx_count",
            MetricKey::Count503 => "503_count",
            MetricKey::Percentage2xx => "2xx_percentage",
            MetricKey::Percentage3xx => "3xx_percentage",
            MetricKey::Percentage4xx => "4xx_percentage",
            MetricKey::Percentage404 => "404_percentage",
            MetricKey::Percentage5xx => "5xx_percentage",
            MetricKey::Percentage503 => "503_percentage",
            MetricKey::Average => "average",
            MetricKey::Min => "min",
            MetricKey::Max => "max",
            MetricKey::Percentile90 => "90_percentile",
            MetricKey::Percentile95 => "95_percentile",
            MetricKey::Percentile99 => "99_percentile",
            MetricKey::HitPercentage => "HIT_percentage",
            MetricKey::MissPercentage => "MISS_percentage",
            MetricKey::ExpiredPercentage => "EXPIRED_percentage",
            MetricKey::RevalidatedPercentage => "REVALIDATED_percentage",
            MetricKey::BypassPercentage => "BYPASS_percentage",
            MetricKey::StalePercentage => "STALE_percentage",
            MetricKey::UpdatingPercentage => "UPDATING_percentage",
        }
    }

    pub fn group(self) -> MetricGroup {
        match self {
            k if k.is_count() => MetricGroup::AccessNum,
            MetricKey::Percentage2xx
            | MetricKey::Percentage3xx
            | MetricKey::Percentage4xx
            | MetricKey::Percentage404
            | MetricKey::Percentage5xx
            | MetricKey::Percentage503 => MetricGroup::AccessRate,
            MetricKey::Average
            | MetricKey::Min
            | MetricKey::Max
            | MetricKey::Percentile90
            | MetricKey::Percentile95
            | MetricKey::Percentile99 => MetricGroup::Latency,
            _ => MetricGroup::CacheRate,
        }
    }

    pub fn is_count(self) -> bool {
        Self::COUNTS.contains(&self)
    }
}

impl std::fmt::Display for MetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned when a name is not one of the known metric keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMetric(pub String);

impl std::fmt::Display for UnknownMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown metric key {:?}", self.0)
    }
}

impl std::error::Error for UnknownMetric {}

impl std::str::FromStr for MetricKey {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricKey::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| UnknownMetric(s.to_string()))
    }
}

/// HTTP status classes tracked per record. `404` and `503` are exact
/// matches and are not also counted in `4xx`/`5xx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusBucket {
    S2xx,
    S3xx,
    S4xx,
    S404,
    S5xx,
    S503,
}

impl StatusBucket {
    pub const ALL: [StatusBucket; 6] = [
        StatusBucket::S2xx,
        StatusBucket::S3xx,
        StatusBucket::S4xx,
        StatusBucket::S404,
        StatusBucket::S5xx,
        StatusBucket::S503,
    ];

    /// Classify a status value. Returns `None` for classes outside 2xx-5xx.
    pub fn classify(status: &str) -> Option<Self> {
        match status {
            "404" => Some(StatusBucket::S404),
            "503" => Some(StatusBucket::S503),
            s => match s.chars().next()? {
                '2' => Some(StatusBucket::S2xx),
                '3' => Some(StatusBucket::S3xx),
                '4' => Some(StatusBucket::S4xx),
                '5' => Some(StatusBucket::S5xx),
                _ => None,
            },
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    pub fn count_key(self) -> MetricKey {
        match self {
            StatusBucket::S2xx => MetricKey::Count2xx,
            StatusBucket::S3xx => MetricKey::Count3xx,
            StatusBucket::S4xx => MetricKey::Count4xx,
            StatusBucket::S404 => MetricKey::Count404,
            StatusBucket::S5xx => MetricKey::Count5xx,
            StatusBucket::S503 => MetricKey::Count503,
        }
    }

    pub fn percentage_key(self) -> MetricKey {
        match self {
            StatusBucket::S2xx => MetricKey::Percentage2xx,
            StatusBucket::S3xx => MetricKey::Percentage3xx,
            StatusBucket::S4xx => MetricKey::Percentage4xx,
            StatusBucket::S404 => MetricKey::Percentage404,
            StatusBucket::S5xx => MetricKey::Percentage5xx,
            StatusBucket::S503 => MetricKey::Percentage503,
        }
    }
}

/// Cache statuses reported as percentages (nginx `$upstream_cache_status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Expired,
    Revalidated,
    Bypass,
    Stale,
    Updating,
}

impl CacheStatus {
    pub const ALL: [CacheStatus; 7] = [
        CacheStatus::Hit,
        CacheStatus::Miss,
        CacheStatus::Expired,
        CacheStatus::Revalidated,
        CacheStatus::Bypass,
        CacheStatus::Stale,
        CacheStatus::Updating,
    ];

    pub fn label(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Expired => "EXPIRED",
            CacheStatus::Revalidated => "REVALIDATED",
            CacheStatus::Bypass => "BYPASS",
            CacheStatus::Stale => "STALE",
            CacheStatus::Updating => "UPDATING",
        }
    }

    pub fn percentage_key(self) -> MetricKey {
        match self {
            CacheStatus::Hit => MetricKey::HitPercentage,
            CacheStatus::Miss => MetricKey::MissPercentage,
            CacheStatus::Expired => MetricKey::ExpiredPercentage,
            CacheStatus::Revalidated => MetricKey::RevalidatedPercentage,
            CacheStatus::Bypass => MetricKey::BypassPercentage,
            CacheStatus::Stale => MetricKey::StalePercentage,
            CacheStatus::Updating => MetricKey::UpdatingPercentage,
        }
    }
}

/// Field labels read from each record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldKeys {
    pub status: String,
    pub latency: String,
    /// `None` disables cache classification.
    pub cache_status: Option<String>,
}

impl Default for FieldKeys {
    fn default() -> Self {
        Self {
            status: "status".to_string(),
            latency: "reqtime".to_string(),
            cache_status: Some("upstream_cache_status".to_string()),
        }
    }
}

/// Final metric values for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    values: BTreeMap<MetricKey, f64>,
}

impl Snapshot {
    #[allow(dead_code)]
    pub fn get(&self, key: MetricKey) -> Option<f64> {
        self.values.get(&key).copied()
    }

    #[allow(dead_code)]
    pub fn contains(&self, key: MetricKey) -> bool {
        self.values.contains_key(&key)
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Entries in `MetricKey` declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (MetricKey, f64)> + '_ {
        self.values.iter().map(|(k, v)| (*k, *v))
    }

    fn insert(&mut self, key: MetricKey, value: f64) {
        self.values.insert(key, value);
    }

    fn remove(&mut self, key: MetricKey) {
        self.values.remove(&key);
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (key, value) in &self.values {
            map.serialize_entry(key.name(), value)?;
        }
        map.end()
    }
}

/// Running state for one invocation. Never persisted.
#[derive(Debug, Default)]
pub struct Tally {
    status: [u64; 6],
    unclassified: u64,
    total: u64,
    cache: HashMap<String, u64>,
    cache_total: u64,
    latencies: Vec<f64>,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record into the tally.
    pub fn observe(&mut self, record: &FieldRecord, keys: &FieldKeys, sink: &mut dyn DiagnosticSink) {
        let status = record.get(&keys.status);
        if status.is_empty() {
            sink.report(Diagnostic::MissingStatus { line: record.line });
            return;
        }

        match StatusBucket::classify(status) {
            Some(bucket) => self.status[bucket.index()] += 1,
            None => {
                tracing::debug!(status, line = record.line, "status outside 2xx-5xx");
                self.unclassified += 1;
            }
        }
        self.total += 1;

        if let Some(cache_key) = &keys.cache_status {
            let cache = record.get(cache_key);
            if !cache.is_empty() && cache != "-" {
                *self.cache.entry(cache.to_string()).or_default() += 1;
                self.cache_total += 1;
            }
        }

        let raw = record.get(&keys.latency);
        let latency = match raw.parse::<f64>() {
            Ok(v) => v,
            Err(_) => {
                sink.report(Diagnostic::InvalidLatency {
                    line: record.line,
                    value: raw.to_string(),
                });
                0.0
            }
        };
        self.latencies.push(latency);
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn count(&self, bucket: StatusBucket) -> u64 {
        self.status[bucket.index()]
    }

    pub fn latencies(&self) -> &[f64] {
        &self.latencies
    }

    /// Compute the snapshot. Raw counters are included only when
    /// `trust_counts` holds.
    pub fn finalize(self, trust_counts: bool) -> Snapshot {
        let mut snapshot = Snapshot::default();

        snapshot.insert(MetricKey::TotalCount, self.total as f64);
        for bucket in StatusBucket::ALL {
            snapshot.insert(bucket.count_key(), self.count(bucket) as f64);
        }

        if self.cache_total > 0 {
            let total = self.cache_total as f64;
            for status in CacheStatus::ALL {
                let count = self.cache.get(status.label()).copied().unwrap_or(0) as f64;
                snapshot.insert(status.percentage_key(), count * 100.0 / total);
            }
        }

        if self.total > 0 {
            let total = self.total as f64;
            for bucket in StatusBucket::ALL {
                snapshot.insert(bucket.percentage_key(), self.count(bucket) as f64 * 100.0 / total);
            }
        }

        let latency_stats = [
            (MetricKey::Average, stats::mean(&self.latencies)),
            (MetricKey::Min, stats::min(&self.latencies)),
            (MetricKey::Max, stats::max(&self.latencies)),
            (MetricKey::Percentile90, stats::percentile(&self.latencies, 90.0)),
            (MetricKey::Percentile95, stats::percentile(&self.latencies, 95.0)),
            (MetricKey::Percentile99, stats::percentile(&self.latencies, 99.0)),
        ];
        for (key, value) in latency_stats {
            if let Some(v) = value {
                snapshot.insert(key, v);
            }
        }

        if !trust_counts {
            for key in MetricKey::COUNTS {
                snapshot.remove(key);
            }
        }

        snapshot
    }
}

/// Aggregation failed because the record stream broke.
#[derive(Debug)]
pub enum AggregateError {
    Stream {
        records: u64,
        source: std::io::Error,
    },
}

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateError::Stream { records, source } => {
                write!(f, "log stream failed after {records} records: {source}")
            }
        }
    }
}

impl std::error::Error for AggregateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AggregateError::Stream { source, .. } => Some(source),
        }
    }
}

/// Consume every record and produce the snapshot.
///
/// Malformed lines are reported to `sink` and skipped. A stream I/O error
/// aborts the run and no snapshot is produced.
pub fn aggregate<I>(
    records: I,
    keys: &FieldKeys,
    trust_counts: bool,
    sink: &mut dyn DiagnosticSink,
) -> Result<Snapshot, AggregateError>
where
    I: IntoIterator<Item = Result<FieldRecord, RecordError>>,
{
    let mut tally = Tally::new();
    let mut seen = 0u64;

    for record in records {
        match record {
            Ok(record) => {
                seen += 1;
                tally.observe(&record, keys, sink);
            }
            Err(RecordError::Malformed { line, reason }) => {
                sink.report(Diagnostic::MalformedLine { line, reason });
            }
            Err(RecordError::Io(source)) => {
                return Err(AggregateError::Stream {
                    records: seen,
                    source,
                });
            }
        }
    }

    tracing::debug!(
        records = seen,
        counted = tally.total(),
        latencies = tally.latencies().len(),
        trust_counts,
        "aggregation finished"
    );

    Ok(tally.finalize(trust_counts))
}
