//! Tracing setup shared by every process that runs projections.

/// Initialize process-wide tracing with JSON output and `RUST_LOG` filtering.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init("info", true);
}

/// Initialize tracing with an explicit fallback filter and output format.
///
/// `RUST_LOG` still wins over `default_filter` when it is set.
pub fn init_with(default_filter: &str, json: bool) {
    tracing::init(default_filter, json);
}

/// Tracing configuration (filters, layers).
pub mod tracing;
