//! Store maintenance metrics.
//!
//! Counters and histograms for the repack engine, emitted through the
//! `metrics` facade. These complement the structured log events carrying
//! `metric = "..."` fields.

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Packs written by repack runs.
pub const REPACK_PACKS_WRITTEN: &str = "depot_repack_packs_written_total";

/// Bytes written into new packs by repack runs.
pub const REPACK_BYTES_WRITTEN: &str = "depot_repack_bytes_written_total";

/// Packs pruned by repack runs.
pub const REPACK_PACKS_PRUNED: &str = "depot_repack_packs_pruned_total";

/// Expired garbage packs dropped unread.
pub const REPACK_PACKS_EXPIRED: &str = "depot_repack_packs_expired_total";

/// Commit races detected at swap time.
pub const REPACK_RACES: &str = "depot_repack_races_total";

/// Duration of repack runs in seconds.
pub const REPACK_RUN_DURATION: &str = "depot_repack_run_duration_seconds";

/// Registers all maintenance metric descriptions.
///
/// Call this once at application startup after installing the metrics
/// recorder.
pub fn register_metrics() {
    describe_counter!(REPACK_PACKS_WRITTEN, "Total packs written by repack runs");
    describe_counter!(
        REPACK_BYTES_WRITTEN,
        "Total bytes written into new packs by repack runs"
    );
    describe_counter!(REPACK_PACKS_PRUNED, "Total packs pruned by repack runs");
    describe_counter!(
        REPACK_PACKS_EXPIRED,
        "Total expired garbage packs dropped unread"
    );
    describe_counter!(REPACK_RACES, "Total commit races detected at swap time");
    describe_histogram!(REPACK_RUN_DURATION, "Duration of repack runs in seconds");
}

/// Records one written pack.
pub fn record_pack_written(source: &'static str, bytes: u64) {
    let labels = [("source", source)];
    counter!(REPACK_PACKS_WRITTEN, &labels).increment(1);
    counter!(REPACK_BYTES_WRITTEN, &labels).increment(bytes);
}

/// Records the completion of a repack run.
pub fn record_run_completed(packs_pruned: u64, packs_expired: u64, duration_secs: f64) {
    counter!(REPACK_PACKS_PRUNED).increment(packs_pruned);
    counter!(REPACK_PACKS_EXPIRED).increment(packs_expired);
    histogram!(REPACK_RUN_DURATION).record(duration_secs);
}

/// Records a detected commit race.
pub fn record_race_detected() {
    counter!(REPACK_RACES).increment(1);
}
