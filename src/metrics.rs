//! Counters exported through the `metrics` facade.
//!
//! Nothing is recorded unless the embedding application installs a recorder.

pub const LINES_TOTAL: &str = "tributary_lines_total";
pub const LINE_BATCHES_TOTAL: &str = "tributary_line_batches_total";
pub const COLLECTOR_BATCHES_TOTAL: &str = "tributary_collector_batches_total";
pub const PROCESS_KILLED_TOTAL: &str = "tributary_process_killed_total";

pub(crate) fn record_line_batch(lines: usize) {
    metrics::counter!(LINES_TOTAL).increment(lines as u64);
    metrics::counter!(LINE_BATCHES_TOTAL).increment(1);
}

pub(crate) fn record_collector_batch() {
    metrics::counter!(COLLECTOR_BATCHES_TOTAL).increment(1);
}

pub(crate) fn record_process_killed() {
    metrics::counter!(PROCESS_KILLED_TOTAL).increment(1);
}
