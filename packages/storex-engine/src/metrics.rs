//! Observability surface (AMBIENT, SPEC_FULL §2): an object-safe metrics
//! trait the engine records into at every suspension point, modeled on the
//! teacher's `metrics`/`metrics-exporter-prometheus` pairing. `RecordingMetrics`
//! emits through the `metrics` facade (counters/histograms), reaching
//! whichever exporter the host process installs; by default `NoopMetrics`
//! is wired in instead, so a caller opts in explicitly.

/// Outcome tag recorded alongside latency/counter metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The operation succeeded.
    Success,
    /// The operation failed.
    Failure,
}

/// Records counters/histograms for the engine's hot paths. Default
/// implementations are no-ops so a caller only overrides what it cares about.
pub trait StoreMetrics: Send + Sync {
    /// A memory-cache lookup, hit or miss.
    fn record_cache_lookup(&self, hit: bool) {
        let _ = hit;
    }
    /// A single-flight launch either joined an existing producer or started one.
    fn record_single_flight_join(&self, joined_existing: bool) {
        let _ = joined_existing;
    }
    /// A fetch completed, with its latency and outcome.
    fn record_fetch(&self, duration_ms: u64, outcome: Outcome) {
        let _ = (duration_ms, outcome);
    }
    /// A mutation completed, with its outcome (`Synced`/`Enqueued`/`Failed` collapse to success/failure here).
    fn record_mutation(&self, outcome: Outcome) {
        let _ = outcome;
    }
    /// A graph composition completed, with the depth actually reached.
    fn record_composition(&self, depth_reached: u32, outcome: Outcome) {
        let _ = (depth_reached, outcome);
    }
    /// A page load completed, with its direction tag and outcome.
    fn record_page_load(&self, direction: &str, outcome: Outcome) {
        let _ = (direction, outcome);
    }
    /// A background GC sweep completed, with how many lock-table and
    /// bookkeeper entries it dropped.
    fn record_gc_sweep(&self, locks_dropped: usize, bookkeeper_dropped: usize) {
        let _ = (locks_dropped, bookkeeper_dropped);
    }
}

/// The default, zero-cost metrics sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl StoreMetrics for NoopMetrics {}

fn outcome_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Success => "success",
        Outcome::Failure => "failure",
    }
}

/// Records into whatever `metrics` recorder the host process has installed
/// (Prometheus, StatsD, ...); a no-op until one is installed via
/// `metrics::set_global_recorder` or an exporter crate's installer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordingMetrics;

impl StoreMetrics for RecordingMetrics {
    fn record_cache_lookup(&self, hit: bool) {
        metrics::counter!("storex_cache_lookups_total", "hit" => if hit { "true" } else { "false" }).increment(1);
    }

    fn record_single_flight_join(&self, joined_existing: bool) {
        metrics::counter!(
            "storex_single_flight_joins_total",
            "joined_existing" => if joined_existing { "true" } else { "false" },
        )
        .increment(1);
    }

    fn record_fetch(&self, duration_ms: u64, outcome: Outcome) {
        metrics::counter!("storex_fetches_total", "outcome" => outcome_label(outcome)).increment(1);
        metrics::histogram!("storex_fetch_duration_ms", "outcome" => outcome_label(outcome)).record(duration_ms as f64);
    }

    fn record_mutation(&self, outcome: Outcome) {
        metrics::counter!("storex_mutations_total", "outcome" => outcome_label(outcome)).increment(1);
    }

    fn record_composition(&self, depth_reached: u32, outcome: Outcome) {
        metrics::counter!("storex_compositions_total", "outcome" => outcome_label(outcome)).increment(1);
        metrics::histogram!("storex_composition_depth", "outcome" => outcome_label(outcome)).record(depth_reached as f64);
    }

    fn record_page_load(&self, direction: &str, outcome: Outcome) {
        metrics::counter!(
            "storex_page_loads_total",
            "direction" => direction.to_string(),
            "outcome" => outcome_label(outcome),
        )
        .increment(1);
    }

    fn record_gc_sweep(&self, locks_dropped: usize, bookkeeper_dropped: usize) {
        metrics::counter!("storex_gc_locks_dropped_total").increment(locks_dropped as u64);
        metrics::counter!("storex_gc_bookkeeper_dropped_total").increment(bookkeeper_dropped as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_metrics_does_not_panic_without_a_recorder() {
        let metrics = RecordingMetrics;
        metrics.record_cache_lookup(true);
        metrics.record_single_flight_join(false);
        metrics.record_fetch(12, Outcome::Success);
        metrics.record_mutation(Outcome::Failure);
        metrics.record_composition(3, Outcome::Success);
        metrics.record_page_load("forward", Outcome::Success);
        metrics.record_gc_sweep(2, 5);
    }
}
