//! Process-wide tracing setup shared by every stockflow binary and test harness.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Like [`init`], but with an explicit fallback filter (e.g. from configuration)
/// used when `RUST_LOG` is unset.
pub fn init_with_filter(default_filter: &str) {
    tracing::init_with_filter(default_filter);
}

/// Tracing configuration (filters, layers).
pub mod tracing;
