//! Logging prelude for convenient access to tracing macros.
//!
//! Modules pull the common macros in with `use crate::logging::*;` so call
//! sites stay short and the subscriber setup lives in one place.

pub use tracing::{debug, error, info, warn};

/// Initialize the tracing subscriber with environment filter support.
///
/// Logs at INFO level and above by default. The `RUST_LOG` environment
/// variable overrides the filter:
///
/// ```bash
/// RUST_LOG=debug repsync sync group.toml
/// RUST_LOG=repsync::protocol=trace repsync serve server.toml
/// ```
pub fn init_tracing() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.with_writer(std::io::stderr)
		.init();
}

// vim: ts=4
