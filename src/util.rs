//! Small shared helpers

use std::io;
use std::path::{Component, Path, PathBuf};

use crate::types::FileTime;

/// Convert a normalized relative path (`/` separators) to a host path
pub fn rel_to_host(rel: &str) -> PathBuf {
	rel.split('/').collect()
}

/// Validate a relative path received from a peer or change set.
///
/// Rejects absolute paths, empty paths and any `..` or `.` component, so a
/// joined result can never escape its root. Returns the host-separator form.
pub fn sanitize_rel(rel: &str) -> Option<PathBuf> {
	if rel.is_empty() {
		return None;
	}
	let path = rel_to_host(rel);
	if path.components().any(|c| !matches!(c, Component::Normal(_))) {
		return None;
	}
	Some(path)
}

/// Stamp a file's modification time from a ledger timestamp
pub fn set_file_mtime(path: &Path, mtime: FileTime) -> io::Result<()> {
	let ft = filetime::FileTime::from_unix_time(mtime.unix_seconds(), mtime.subsec_nanos());
	filetime::set_file_mtime(path, ft)
}

/// Crate version as four numeric components, zero-padded
pub fn crate_version_components() -> [u32; 4] {
	let mut out = [0u32; 4];
	for (i, part) in env!("CARGO_PKG_VERSION").split('.').take(3).enumerate() {
		out[i] = part.parse().unwrap_or(0);
	}
	out
}


// vim: ts=4
