//! Tracing/logging initialization.
//!
//! JSON lines on stdout, filtered by `RUST_LOG`. Projector and store code log
//! with structured fields (`sequence_number`, `timeline`, `event_type`,
//! `group_id`, `channel`, `lock_key`) so the JSON output can be queried.

use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the process.
///
/// `default_directive` applies when `RUST_LOG` is unset or invalid.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn repeated_init_is_a_no_op() {
        super::init("debug");
        super::init("info");
        ::tracing::info!(sequence_number = 1, "still logging");
    }
}
