//! Persisted per-file modification-time ledger
//!
//! The ledger records, per named source (the repository itself under `"."`),
//! the last-observed mtime of every file, plus which source last introduced
//! each repository file. It is what lets the engine tell an expected
//! propagation apart from a genuine conflict.
//!
//! On-disk format: NUL-separated UTF-8 text. One block per source:
//! source-name NUL, then per file: path NUL [origin NUL, repository block
//! only] mtime-nanoseconds-decimal NUL, block terminated by an empty entry.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::StateError;
use crate::snapshot::TreeSnapshot;
use crate::types::{FileTime, REPOSITORY_SOURCE};

/// Last-known state of one file under one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
	pub mtime: FileTime,

	/// Source that last legitimately introduced the file; populated only in
	/// the repository's own block
	pub origin: Option<String>,
}

/// Per-source file-state map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceState {
	pub files: BTreeMap<String, FileState>,
}

impl SourceState {
	pub fn mtime(&self, path: &str) -> Option<FileTime> {
		self.files.get(path).map(|f| f.mtime)
	}

	pub fn origin(&self, path: &str) -> Option<&str> {
		self.files.get(path).and_then(|f| f.origin.as_deref())
	}

	pub fn contains(&self, path: &str) -> bool {
		self.files.contains_key(path)
	}
}

/// The whole ledger: one [`SourceState`] per named source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateLedger {
	sources: BTreeMap<String, SourceState>,
}

impl StateLedger {
	pub fn new() -> Self {
		StateLedger::default()
	}

	/// Load a persisted ledger. Fails with [`StateError::NotFound`] when the
	/// file is absent; callers usually fall back to an empty ledger then.
	pub fn load(path: &Path) -> Result<StateLedger, StateError> {
		if !path.exists() {
			return Err(StateError::NotFound { path: path.display().to_string() });
		}
		let bytes = fs::read(path).map_err(|e| StateError::LoadFailed { source: e })?;
		Self::from_bytes(&bytes)
	}

	/// Parse the NUL-delimited serialized form
	pub fn from_bytes(bytes: &[u8]) -> Result<StateLedger, StateError> {
		let text = std::str::from_utf8(bytes)
			.map_err(|e| StateError::Corrupted { message: format!("not UTF-8: {}", e) })?;

		let toks: Vec<&str> = text.split('\0').collect();
		let mut sources = BTreeMap::new();
		let mut i = 0;

		while i < toks.len() {
			let name = toks[i];
			i += 1;
			if name.is_empty() {
				// Only trailing padding may remain after the final block
				if toks[i..].iter().all(|t| t.is_empty()) {
					break;
				}
				return Err(StateError::Corrupted {
					message: "empty source name".to_string(),
				});
			}

			let is_repo = name == REPOSITORY_SOURCE;
			let mut files = BTreeMap::new();
			loop {
				let tok = *toks.get(i).ok_or_else(|| StateError::Corrupted {
					message: format!("unterminated block for source '{}'", name),
				})?;
				i += 1;
				if tok.is_empty() {
					break;
				}

				let path = tok.to_string();
				let origin = if is_repo {
					let o = *toks.get(i).ok_or_else(|| StateError::Corrupted {
						message: format!("missing origin for '{}'", path),
					})?;
					i += 1;
					Some(o.to_string())
				} else {
					None
				};
				let ticks = *toks.get(i).ok_or_else(|| StateError::Corrupted {
					message: format!("missing mtime for '{}'", path),
				})?;
				i += 1;
				let nanos: i64 = ticks.parse().map_err(|_| StateError::Corrupted {
					message: format!("bad mtime '{}' for '{}'", ticks, path),
				})?;

				files.insert(path, FileState { mtime: FileTime::from_nanos(nanos), origin });
			}

			sources.insert(name.to_string(), SourceState { files });
		}

		Ok(StateLedger { sources })
	}

	/// Serialize to the NUL-delimited form
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut out = Vec::new();
		for (name, state) in &self.sources {
			out.extend_from_slice(name.as_bytes());
			out.push(0);
			let is_repo = name == REPOSITORY_SOURCE;
			for (path, file) in &state.files {
				out.extend_from_slice(path.as_bytes());
				out.push(0);
				if is_repo {
					let origin = file.origin.as_deref().unwrap_or(REPOSITORY_SOURCE);
					out.extend_from_slice(origin.as_bytes());
					out.push(0);
				}
				out.extend_from_slice(file.mtime.as_nanos().to_string().as_bytes());
				out.push(0);
			}
			// Empty entry terminates the block
			out.push(0);
		}
		out
	}

	/// Full-file atomic rewrite: temp file in the same directory, then rename
	pub fn write(&self, path: &Path) -> Result<(), StateError> {
		let file_name = path
			.file_name()
			.map(|n| n.to_string_lossy().into_owned())
			.unwrap_or_else(|| "ledger".to_string());
		let tmp = path.with_file_name(format!("{}.tmp", file_name));

		fs::write(&tmp, self.to_bytes()).map_err(|e| StateError::SaveFailed { source: e })?;
		fs::rename(&tmp, path).map_err(|e| {
			let _ = fs::remove_file(&tmp);
			StateError::SaveFailed { source: e }
		})
	}

	/// Capture the current mtimes of every file in `snapshot` under `name`.
	///
	/// For the repository source, origins already assigned are preserved and
	/// newly seen paths are seeded to the repository name itself.
	pub fn add_source(&mut self, snapshot: &TreeSnapshot, name: &str) {
		let is_repo = name == REPOSITORY_SOURCE;
		let old = self.sources.remove(name).unwrap_or_default();

		let mut files = BTreeMap::new();
		for (path, rec) in snapshot.files() {
			let origin = if is_repo {
				old.files
					.get(path)
					.and_then(|f| f.origin.clone())
					.or_else(|| Some(name.to_string()))
			} else {
				None
			};
			files.insert(path.clone(), FileState { mtime: rec.mtime(), origin });
		}

		self.sources.insert(name.to_string(), SourceState { files });
	}

	/// Record one file after a resolved operation
	pub fn record_file(
		&mut self,
		source: &str,
		path: &str,
		mtime: FileTime,
		origin: Option<String>,
	) {
		let state = self.sources.entry(source.to_string()).or_default();
		let origin = if source == REPOSITORY_SOURCE {
			origin.or_else(|| {
				state
					.files
					.get(path)
					.and_then(|f| f.origin.clone())
					.or_else(|| Some(REPOSITORY_SOURCE.to_string()))
			})
		} else {
			None
		};
		state.files.insert(path.to_string(), FileState { mtime, origin });
	}

	/// Forget one file after a resolved delete
	pub fn remove_file(&mut self, source: &str, path: &str) {
		if let Some(state) = self.sources.get_mut(source) {
			state.files.remove(path);
		}
	}

	/// The repository's own block, the canonical ledger of prior repo mtimes
	pub fn repository_state(&self) -> Option<&SourceState> {
		self.source_state(REPOSITORY_SOURCE)
	}

	pub fn source_state(&self, name: &str) -> Option<&SourceState> {
		self.sources.get(name)
	}

	pub fn sources(&self) -> impl Iterator<Item = (&String, &SourceState)> {
		self.sources.iter()
	}

	pub fn is_empty(&self) -> bool {
		self.sources.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ledger_with(entries: &[(&str, &str, i64, Option<&str>)]) -> StateLedger {
		let mut ledger = StateLedger::new();
		for (source, path, nanos, origin) in entries {
			ledger.record_file(
				source,
				path,
				FileTime::from_nanos(*nanos),
				origin.map(|s| s.to_string()),
			);
		}
		ledger
	}

	#[test]
	fn test_roundtrip() {
		let ledger = ledger_with(&[
			(".", "docs/readme.md", 1_600_000_000_000_000_000, Some(".")),
			(".", "src/main.c", 1_600_000_100_000_000_000, Some("backup:/srv")),
			("backup:/srv", "docs/readme.md", 1_600_000_000_000_000_000, None),
		]);

		let reloaded = StateLedger::from_bytes(&ledger.to_bytes()).unwrap();
		assert_eq!(ledger, reloaded);
		assert_eq!(reloaded.repository_state().unwrap().origin("src/main.c"), Some("backup:/srv"));
	}

	#[test]
	fn test_roundtrip_odd_paths() {
		// Backslashes and unicode survive the NUL-delimited format untouched
		let ledger = ledger_with(&[
			(".", r"legacy\win\path.txt", 10_000_000_000, Some(".")),
			(".", "notes/наблюдения-日誌.txt", 20_000_000_000, Some(".")),
		]);

		let reloaded = StateLedger::from_bytes(&ledger.to_bytes()).unwrap();
		assert_eq!(ledger, reloaded);
		assert!(reloaded.repository_state().unwrap().contains(r"legacy\win\path.txt"));
		assert!(reloaded.repository_state().unwrap().contains("notes/наблюдения-日誌.txt"));
	}

	#[test]
	fn test_empty_ledger_roundtrip() {
		let ledger = StateLedger::new();
		assert!(ledger.to_bytes().is_empty());
		let reloaded = StateLedger::from_bytes(&[]).unwrap();
		assert!(reloaded.is_empty());
	}

	#[test]
	fn test_corrupt_mtime_rejected() {
		let bytes = b".\0file.txt\0.\0not-a-number\0\0".to_vec();
		let err = StateLedger::from_bytes(&bytes).unwrap_err();
		assert!(matches!(err, StateError::Corrupted { .. }));
	}

	#[test]
	fn test_unterminated_block_rejected() {
		let bytes = b"srv\0file.txt".to_vec();
		let err = StateLedger::from_bytes(&bytes).unwrap_err();
		assert!(matches!(err, StateError::Corrupted { .. }));
	}

	#[test]
	fn test_load_missing_is_not_found() {
		let dir = tempfile::tempdir().unwrap();
		let err = StateLedger::load(&dir.path().join("absent")).unwrap_err();
		assert!(matches!(err, StateError::NotFound { .. }));
	}

	#[test]
	fn test_write_then_load() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("ledger");

		let ledger = ledger_with(&[
			(".", "a.txt", 42_000_000_000, Some(".")),
			("peer", "a.txt", 42_000_000_000, None),
		]);
		ledger.write(&path).unwrap();

		// Atomic rewrite leaves no temp file behind
		assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
		assert_eq!(StateLedger::load(&path).unwrap(), ledger);
	}

	#[test]
	fn test_record_file_defaults_repo_origin() {
		let mut ledger = StateLedger::new();
		ledger.record_file(".", "a.txt", FileTime::from_nanos(1), None);
		assert_eq!(ledger.repository_state().unwrap().origin("a.txt"), Some("."));

		// Explicit origin wins and survives a later origin-less update
		ledger.record_file(".", "a.txt", FileTime::from_nanos(2), Some("peer".to_string()));
		ledger.record_file(".", "a.txt", FileTime::from_nanos(3), None);
		assert_eq!(ledger.repository_state().unwrap().origin("a.txt"), Some("peer"));
	}
}

// vim: ts=4
