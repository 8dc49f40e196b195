//! Directory tree snapshots
//!
//! A [`TreeSnapshot`] maps normalized relative paths to [`FileRecord`]s. It
//! is built by walking a local root, or decoded from the wire for a remote
//! source, and is read-only after construction.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::callbacks::{CancelFlag, Progress, ProgressCallback};
use crate::error::SyncError;
use crate::exclusion::IgnoreSet;
use crate::logging::*;
use crate::types::{FileTime, CONFIG_FILE_NAME, STATE_FILE_NAME};

/// Content hashing strategy, injected into the engine rather than read from
/// any global state
pub trait ContentHasher: Send + Sync {
	fn hash_file(&self, path: &Path) -> std::io::Result<String>;
}

/// BLAKE3, hex-encoded; the default hasher
pub struct Blake3Hasher;

impl ContentHasher for Blake3Hasher {
	fn hash_file(&self, path: &Path) -> std::io::Result<String> {
		let data = fs::read(path)?;
		Ok(blake3::hash(&data).to_hex().to_string())
	}
}

/// One file's identity and metadata within a snapshot.
///
/// Constructed only by the snapshot builder and the wire decoder; the path
/// is immutable identity, the hash is computed lazily on first use.
#[derive(Debug)]
pub struct FileRecord {
	path: String,
	mtime: FileTime,
	size: u64,
	/// Backing file on the local filesystem; None for wire records
	abs: Option<PathBuf>,
	hash: OnceLock<Option<String>>,
}

impl FileRecord {
	pub(crate) fn new(path: String, mtime: FileTime, size: u64, abs: Option<PathBuf>) -> Self {
		FileRecord { path, mtime, size, abs, hash: OnceLock::new() }
	}

	/// Relative path, `/`-separated regardless of host OS
	pub fn path(&self) -> &str {
		&self.path
	}

	pub fn mtime(&self) -> FileTime {
		self.mtime
	}

	pub fn size(&self) -> u64 {
		self.size
	}

	/// Lazily computed content hash. None for records without a backing file
	/// (remote snapshots) and on read failure.
	pub fn content_hash(&self, hasher: &dyn ContentHasher) -> Option<&str> {
		self.hash
			.get_or_init(|| {
				let abs = self.abs.as_ref()?;
				match hasher.hash_file(abs) {
					Ok(h) => Some(h),
					Err(e) => {
						debug!("hashing {} failed: {}", abs.display(), e);
						None
					}
				}
			})
			.as_deref()
	}
}

/// Read-only mapping of relative path to file record for one tree
#[derive(Debug)]
pub struct TreeSnapshot {
	label: String,
	files: BTreeMap<String, FileRecord>,
}

impl TreeSnapshot {
	/// Walk `root` recursively, applying ignore filtering.
	///
	/// The two reserved control files are always skipped. Entries are visited
	/// in name order so progress reporting is deterministic. Fails with
	/// [`SyncError::NotFound`] when the root does not exist and
	/// [`SyncError::Aborted`] when the cancel flag is raised mid-walk.
	pub fn build(
		root: &Path,
		ignore: &IgnoreSet,
		progress: &dyn ProgressCallback,
		cancel: &CancelFlag,
	) -> Result<TreeSnapshot, SyncError> {
		match fs::metadata(root) {
			Ok(meta) if meta.is_dir() => {}
			Ok(_) => {
				return Err(SyncError::NotFound { path: root.display().to_string() });
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(SyncError::NotFound { path: root.display().to_string() });
			}
			Err(e) => return Err(SyncError::Io(e)),
		}

		let mut files = BTreeMap::new();
		let mut completed = 0usize;
		walk(root, root, ignore, progress, cancel, &mut files, &mut completed)?;

		debug!("snapshot of {}: {} files", root.display(), files.len());
		Ok(TreeSnapshot { label: root.display().to_string(), files })
	}

	/// Assemble a snapshot from already-decoded records (wire deserialization)
	pub(crate) fn from_records(label: &str, records: Vec<FileRecord>) -> TreeSnapshot {
		let mut files = BTreeMap::new();
		for rec in records {
			files.insert(rec.path.clone(), rec);
		}
		TreeSnapshot { label: label.to_string(), files }
	}

	/// Drop records matching the ignore set; used on snapshots fetched from a
	/// remote peer, which enumerates without the client's patterns
	pub(crate) fn apply_ignore(&mut self, ignore: &IgnoreSet) {
		if ignore.is_empty() {
			return;
		}
		self.files.retain(|path, _| {
			let name = path.rsplit('/').next().unwrap_or(path);
			!ignore.is_ignored(path, name)
		});
	}

	/// Root path or remote label this snapshot was built from
	pub fn label(&self) -> &str {
		&self.label
	}

	pub fn files(&self) -> &BTreeMap<String, FileRecord> {
		&self.files
	}

	pub fn get(&self, path: &str) -> Option<&FileRecord> {
		self.files.get(path)
	}

	pub fn contains(&self, path: &str) -> bool {
		self.files.contains_key(path)
	}

	pub fn len(&self) -> usize {
		self.files.len()
	}

	pub fn is_empty(&self) -> bool {
		self.files.is_empty()
	}
}

fn walk(
	root: &Path,
	dir: &Path,
	ignore: &IgnoreSet,
	progress: &dyn ProgressCallback,
	cancel: &CancelFlag,
	files: &mut BTreeMap<String, FileRecord>,
	completed: &mut usize,
) -> Result<(), SyncError> {
	if cancel.is_cancelled() {
		return Err(SyncError::Aborted);
	}

	progress.on_progress(Progress {
		completed: *completed,
		total: *completed,
		current: dir.display().to_string(),
	});

	let mut entries = Vec::new();
	for entry in fs::read_dir(dir).map_err(SyncError::Io)? {
		entries.push(entry.map_err(SyncError::Io)?);
	}
	// Name order keeps enumeration (and progress callbacks) deterministic
	entries.sort_by_key(|e| e.file_name());

	for entry in entries {
		if cancel.is_cancelled() {
			return Err(SyncError::Aborted);
		}

		let path = entry.path();
		let meta = fs::symlink_metadata(&path).map_err(SyncError::Io)?;

		if meta.is_dir() {
			walk(root, &path, ignore, progress, cancel, files, completed)?;
			continue;
		}
		if !meta.is_file() {
			// Symlinks and special files are not part of the model
			continue;
		}

		let name = entry.file_name().to_string_lossy().into_owned();
		if name == CONFIG_FILE_NAME || name == STATE_FILE_NAME {
			continue;
		}

		let rel = match path.strip_prefix(root) {
			Ok(rel) => rel
				.components()
				.map(|c| c.as_os_str().to_string_lossy().into_owned())
				.collect::<Vec<_>>()
				.join("/"),
			Err(_) => continue,
		};

		if ignore.is_ignored(&rel, &name) {
			continue;
		}

		let mtime = meta
			.modified()
			.map(FileTime::from_system_time)
			.unwrap_or_default();
		files.insert(rel.clone(), FileRecord::new(rel, mtime, meta.len(), Some(path)));
		*completed += 1;
	}

	Ok(())
}


// vim: ts=4
