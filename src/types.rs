//! Core value types shared by the snapshot, ledger and reconciliation modules

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Group descriptor file name, never included in a snapshot
pub const CONFIG_FILE_NAME: &str = ".repsync.toml";

/// Ledger file name, never included in a snapshot
pub const STATE_FILE_NAME: &str = ".repsync.state";

/// Name under which the repository records its own state in the ledger
pub const REPOSITORY_SOURCE: &str = ".";

/// Modification-time comparison precision, in nanoseconds (1 second)
pub const MTIME_PRECISION_NANOS: i64 = 1_000_000_000;

/// A file modification time: nanoseconds since the Unix epoch, UTC.
///
/// All comparisons clip both operands to the same precision bucket first,
/// so timestamps closer together than [`MTIME_PRECISION_NANOS`] compare
/// equal everywhere in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FileTime(i64);

impl FileTime {
	pub fn from_nanos(nanos: i64) -> Self {
		FileTime(nanos)
	}

	/// Whole seconds, for interop with APIs taking (secs, nanos) pairs
	pub fn from_unix_seconds(secs: i64) -> Self {
		FileTime(secs.saturating_mul(MTIME_PRECISION_NANOS))
	}

	/// Pre-epoch times clamp to zero
	pub fn from_system_time(t: SystemTime) -> Self {
		match t.duration_since(UNIX_EPOCH) {
			Ok(d) => FileTime(d.as_nanos() as i64),
			Err(_) => FileTime(0),
		}
	}

	pub fn as_nanos(&self) -> i64 {
		self.0
	}

	pub fn unix_seconds(&self) -> i64 {
		self.0.div_euclid(MTIME_PRECISION_NANOS)
	}

	pub fn subsec_nanos(&self) -> u32 {
		self.0.rem_euclid(MTIME_PRECISION_NANOS) as u32
	}

	/// Precision bucket used for every comparison
	fn clipped(&self) -> i64 {
		self.0.div_euclid(MTIME_PRECISION_NANOS)
	}

	/// Equality at ledger precision
	pub fn same_as(&self, other: FileTime) -> bool {
		self.clipped() == other.clipped()
	}

	/// Strictly-earlier at ledger precision
	pub fn earlier_than(&self, other: FileTime) -> bool {
		self.clipped() < other.clipped()
	}
}

impl fmt::Display for FileTime {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// How a file differs between the repository and a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
	/// Not yet classified
	Undetermined,

	/// No difference at ledger precision; never stored in a change set
	Identical,

	/// The source holds the newer version (repository timestamp is earlier)
	Newer,

	/// The repository holds the newer version
	Older,

	/// Present in the source, never seen in the repository
	RepoMissing,

	/// Present in the repository, never seen on the source
	SourceMissing,

	/// Present in the source, previously known to the repository, now gone there
	RepoDeleted,

	/// Present in the repository, previously known to the source, now gone there
	SourceDeleted,
}

impl fmt::Display for ChangeStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ChangeStatus::Undetermined => "undetermined",
			ChangeStatus::Identical => "identical",
			ChangeStatus::Newer => "newer on source",
			ChangeStatus::Older => "newer in repository",
			ChangeStatus::RepoMissing => "missing in repository",
			ChangeStatus::SourceMissing => "missing on source",
			ChangeStatus::RepoDeleted => "deleted in repository",
			ChangeStatus::SourceDeleted => "deleted on source",
		};
		f.write_str(s)
	}
}

/// Whether a classified change is an expected propagation or a true conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStatus {
	/// Conflict analysis has not run yet
	Undetermined,

	/// Safe to resolve with the default action
	NoConflict,

	/// Both sides diverged: the repository copy changed independently
	RepoChanged,

	/// Both sides diverged: the source copy changed independently
	SourceChanged,

	/// Repository copy was edited while the source deleted the file
	ChangedInRepoDeletedInSource,

	/// Source copy was edited while the repository deleted the file
	ChangedInSourceDeletedInRepo,
}

impl ConflictStatus {
	/// True conflicts require an explicit caller decision
	pub fn is_conflict(&self) -> bool {
		matches!(
			self,
			ConflictStatus::RepoChanged
				| ConflictStatus::SourceChanged
				| ConflictStatus::ChangedInRepoDeletedInSource
				| ConflictStatus::ChangedInSourceDeletedInRepo
		)
	}
}

impl fmt::Display for ConflictStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ConflictStatus::Undetermined => "undetermined",
			ConflictStatus::NoConflict => "no conflict",
			ConflictStatus::RepoChanged => "repository changed independently",
			ConflictStatus::SourceChanged => "source changed independently",
			ConflictStatus::ChangedInRepoDeletedInSource => {
				"changed in repository, deleted on source"
			}
			ConflictStatus::ChangedInSourceDeletedInRepo => {
				"changed on source, deleted in repository"
			}
		};
		f.write_str(s)
	}
}

/// Resolved action for one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
	/// Leave the file alone (initial value, and the default for conflicts)
	NoOp,

	/// Copy the source version into the repository
	CopySourceToRepo,

	/// Copy the repository version onto the source
	CopyRepoToSource,

	/// Remove the file from the repository
	DeleteFromRepo,

	/// Remove the file from the source
	DeleteFromSource,
}

impl fmt::Display for FileOperation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			FileOperation::NoOp => "no-op",
			FileOperation::CopySourceToRepo => "copy source -> repository",
			FileOperation::CopyRepoToSource => "copy repository -> source",
			FileOperation::DeleteFromRepo => "delete from repository",
			FileOperation::DeleteFromSource => "delete from source",
		};
		f.write_str(s)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_precision_clipping() {
		let a = FileTime::from_nanos(5_000_000_000);
		let b = FileTime::from_nanos(5_900_000_000);
		let c = FileTime::from_nanos(6_000_000_000);

		// Within the same 1-second bucket
		assert!(a.same_as(b));
		assert!(!a.earlier_than(b));

		// Next bucket
		assert!(!a.same_as(c));
		assert!(a.earlier_than(c));
	}

	#[test]
	fn test_seconds_roundtrip() {
		let t = FileTime::from_unix_seconds(1_600_000_000);
		assert_eq!(t.unix_seconds(), 1_600_000_000);
		assert_eq!(t.subsec_nanos(), 0);

		let u = FileTime::from_nanos(1_600_000_000_250_000_000);
		assert_eq!(u.unix_seconds(), 1_600_000_000);
		assert_eq!(u.subsec_nanos(), 250_000_000);
		assert!(t.same_as(u));
	}

	#[test]
	fn test_conflict_predicate() {
		assert!(!ConflictStatus::Undetermined.is_conflict());
		assert!(!ConflictStatus::NoConflict.is_conflict());
		assert!(ConflictStatus::RepoChanged.is_conflict());
		assert!(ConflictStatus::ChangedInSourceDeletedInRepo.is_conflict());
	}
}

// vim: ts=4
