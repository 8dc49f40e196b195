//! Progress reporting and cooperative cancellation
//!
//! Long operations (directory walk, per-path classification) report progress
//! through [`ProgressCallback`] and poll a [`CancelFlag`] at loop boundaries
//! instead of relying on thread termination.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Progress of a walk or classification pass
#[derive(Debug, Clone)]
pub struct Progress {
	/// Entries processed so far
	pub completed: usize,

	/// Estimated total; grows while enumeration is still running
	pub total: usize,

	/// Directory or path currently being processed
	pub current: String,
}

/// Callback invoked synchronously, in enumeration order
pub trait ProgressCallback: Send + Sync {
	fn on_progress(&self, progress: Progress);
}

/// Progress sink that discards everything
pub struct NoProgress;

impl ProgressCallback for NoProgress {
	fn on_progress(&self, _progress: Progress) {}
}

/// Cooperative cancellation flag, checked at loop boundaries.
///
/// Clones share the underlying flag, so a caller can keep one clone and hand
/// another to the engine or snapshot builder.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
	pub fn new() -> Self {
		CancelFlag(Arc::new(AtomicBool::new(false)))
	}

	/// Request cancellation; the running operation stops at its next check
	pub fn cancel(&self) {
		self.0.store(true, Ordering::Relaxed);
	}

	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::Relaxed)
	}
}


// vim: ts=4
