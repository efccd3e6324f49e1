//! Per-item span helpers.

use tracing::Span;

/// Start a span covering one item's trip through the locker.
///
/// The decision fields are declared empty and filled by [`record_decision`].
pub fn start_item_span(key: &str, label: &str) -> Span {
    tracing::info_span!(
        "lease.item",
        "lease.key" = key,
        "lease.item" = label,
        "lease.status" = tracing::field::Empty,
        "lease.action" = tracing::field::Empty,
    )
}

/// Record the claim decision on an item span.
pub fn record_decision(span: &Span, status: &str, action: &str) {
    span.record("lease.status", status);
    span.record("lease.action", action);
}
