//! Pipeline metrics
//!
//! Atomic counters and a read-latency histogram shared by the ingestion
//! consumer, the hydration pool and the read coordinator. Rendered in the
//! Prometheus text format at `/metrics`.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 11] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// Fixed-bucket latency histogram
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    // microseconds
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

    pub fn with_buckets(boundaries: &[f64]) -> Self {
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            boundaries: boundaries.to_vec(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in milliseconds
    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&boundary| value <= boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_duration(&self, duration: Duration) {
        self.observe(duration.as_secs_f64() * 1000.0);
    }

    /// Cumulative bucket counts, ending with the +Inf bucket
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    /// Sum of observed values in milliseconds
    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counters for every stage of the pipeline
#[derive(Debug)]
pub struct PipelineMetrics {
    pub messages_published: Counter,
    pub messages_ingested: Counter,
    pub messages_dropped: Counter,
    pub decode_failures: Counter,
    pub ingest_retries: Counter,
    pub channel_read_errors: Counter,

    pub cache_hits: Counter,
    pub cache_misses: Counter,
    pub cache_errors: Counter,

    pub hydration_lookups: Counter,
    pub hydration_failures: Counter,
    pub dangling_entries: Counter,

    pub read_latency: Histogram,

    start_time: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            messages_published: Counter::new(),
            messages_ingested: Counter::new(),
            messages_dropped: Counter::new(),
            decode_failures: Counter::new(),
            ingest_retries: Counter::new(),
            channel_read_errors: Counter::new(),
            cache_hits: Counter::new(),
            cache_misses: Counter::new(),
            cache_errors: Counter::new(),
            hydration_lookups: Counter::new(),
            hydration_failures: Counter::new(),
            dangling_entries: Counter::new(),
            read_latency: Histogram::new(),
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let counters: [(&str, &str, &Counter); 12] = [
            (
                "newsfeed_messages_published_total",
                "Records accepted by the write path",
                &self.messages_published,
            ),
            (
                "newsfeed_messages_ingested_total",
                "Messages materialized into the primary store and index",
                &self.messages_ingested,
            ),
            (
                "newsfeed_messages_dropped_total",
                "Messages abandoned by the ingestion consumer",
                &self.messages_dropped,
            ),
            (
                "newsfeed_decode_failures_total",
                "Messages whose payload could not be decoded",
                &self.decode_failures,
            ),
            (
                "newsfeed_ingest_retries_total",
                "Store writes retried during ingestion",
                &self.ingest_retries,
            ),
            (
                "newsfeed_channel_read_errors_total",
                "Failed reads from the message channel",
                &self.channel_read_errors,
            ),
            (
                "newsfeed_cache_hits_total",
                "Reads served from the cache",
                &self.cache_hits,
            ),
            (
                "newsfeed_cache_misses_total",
                "Reads that went to the search index",
                &self.cache_misses,
            ),
            (
                "newsfeed_cache_errors_total",
                "Cache reads or writes that failed",
                &self.cache_errors,
            ),
            (
                "newsfeed_hydration_lookups_total",
                "Primary store lookups made by the hydration pool",
                &self.hydration_lookups,
            ),
            (
                "newsfeed_hydration_failures_total",
                "Hydration lookups that failed or timed out",
                &self.hydration_failures,
            ),
            (
                "newsfeed_dangling_entries_total",
                "Index entries with no primary record",
                &self.dangling_entries,
            ),
        ];

        for (name, help, counter) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, counter.get());
        }

        out.push_str("# HELP newsfeed_uptime_seconds Server uptime in seconds\n");
        out.push_str("# TYPE newsfeed_uptime_seconds gauge\n");
        let _ = writeln!(out, "newsfeed_uptime_seconds {}", self.uptime_seconds());

        out.push_str("# HELP newsfeed_read_duration_ms Cache-aside read duration in milliseconds\n");
        out.push_str("# TYPE newsfeed_read_duration_ms histogram\n");
        for (le, count) in self.read_latency.get_buckets() {
            if le.is_infinite() {
                let _ = writeln!(out, "newsfeed_read_duration_ms_bucket{{le=\"+Inf\"}} {}", count);
            } else {
                let _ = writeln!(
                    out,
                    "newsfeed_read_duration_ms_bucket{{le=\"{}\"}} {}",
                    le, count
                );
            }
        }
        let _ = writeln!(out, "newsfeed_read_duration_ms_sum {}", self.read_latency.sum());
        let _ = writeln!(
            out,
            "newsfeed_read_duration_ms_count {}",
            self.read_latency.count()
        );

        out
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram() {
        let hist = Histogram::new();

        hist.observe(5.0);
        hist.observe(50.0);
        hist.observe(50_000.0);

        assert_eq!(hist.count(), 3);

        let buckets = hist.get_buckets();
        assert_eq!(buckets.len(), LATENCY_BUCKETS.len() + 1);
        // 5.0 falls in the "le=5" bucket
        assert_eq!(buckets[1], (5.0, 1));
        assert_eq!(buckets.last().unwrap().1, 3);
    }

    #[test]
    fn test_counter() {
        let counter = Counter::new();

        assert_eq!(counter.get(), 0);
        counter.inc();
        assert_eq!(counter.get(), 1);
        counter.add(5);
        assert_eq!(counter.get(), 6);
    }

    #[test]
    fn test_prometheus_output() {
        let metrics = PipelineMetrics::new();
        metrics.cache_hits.add(4);
        metrics.messages_dropped.inc();
        metrics.read_latency.observe(12.0);

        let text = metrics.to_prometheus();
        assert!(text.contains("newsfeed_cache_hits_total 4"));
        assert!(text.contains("newsfeed_messages_dropped_total 1"));
        assert!(text.contains("newsfeed_read_duration_ms_bucket{le=\"+Inf\"} 1"));
        assert!(text.contains("newsfeed_read_duration_ms_count 1"));
    }
}
