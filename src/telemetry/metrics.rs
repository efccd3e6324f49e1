//! Metric instrument factories for worklock.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"worklock"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for worklock instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("worklock")
}

/// Counter: per-item claim decisions.
/// Labels: `status`, `action`.
pub fn lease_decisions() -> Counter<u64> {
    meter()
        .u64_counter("worklock.lease.decisions")
        .with_description("Number of claim decisions taken by the locker")
        .build()
}

/// Counter: heartbeat renewals.
/// Labels: `result` ("ok" | "error").
pub fn lease_heartbeats() -> Counter<u64> {
    meter()
        .u64_counter("worklock.lease.heartbeats")
        .with_description("Number of lease renewals written by heartbeats")
        .build()
}

/// Counter: leases finalized after the caller finished an item.
/// Labels: `outcome` ("done" | "released").
pub fn lease_finalized() -> Counter<u64> {
    meter()
        .u64_counter("worklock.lease.finalized")
        .with_description("Number of leases finalized")
        .build()
}

/// Histogram: time between handing an item out and finalizing it.
pub fn item_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("worklock.item.duration_ms")
        .with_description("Item processing duration in milliseconds")
        .with_unit("ms")
        .build()
}
