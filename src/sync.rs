//! Reconcile-and-apply orchestration for a sync group
//!
//! For every source in the group: snapshot both sides, classify against the
//! ledger, resolve conflicts and default actions, execute the resolved
//! operations, and record what was observed. Per-file failures are collected
//! and reported, never fatal to the batch; a reconciliation-level failure
//! aborts the pass for that source only. The ledger is persisted once after
//! every run that changed it.

use std::fs;
use std::path::Path;

use crate::callbacks::NoProgress;
use crate::config::SyncGroup;
use crate::connection::{open_source, SourceHandle};
use crate::error::{StateError, SyncError};
use crate::exclusion::IgnoreSet;
use crate::logging::*;
use crate::reconcile::{ChangeSet, Engine};
use crate::snapshot::TreeSnapshot;
use crate::state::{SourceState, StateLedger};
use crate::types::{ConflictStatus, FileOperation, FileTime, REPOSITORY_SOURCE, STATE_FILE_NAME};
use crate::util::{sanitize_rel, set_file_mtime};

/// Knobs for a sync run
#[derive(Debug, Clone)]
pub struct SyncOptions {
	/// Plan and report without touching any file or the ledger
	pub dry_run: bool,

	/// Compare content hashes when timestamps differ (suppresses copies of
	/// touched-but-identical files)
	pub hashing: bool,

	/// Identity of the local side, used in log output
	pub local_name: String,
}

impl Default for SyncOptions {
	fn default() -> Self {
		SyncOptions { dry_run: false, hashing: true, local_name: "local".to_string() }
	}
}

/// Result of reconciling the repository against one source
#[derive(Debug, Default)]
pub struct PassOutcome {
	pub source: String,

	/// Entries in the change set, conflicting or not
	pub planned: usize,

	pub copied_to_repo: usize,
	pub copied_to_source: usize,
	pub deleted_in_repo: usize,
	pub deleted_on_source: usize,

	/// True conflicts left for an explicit decision
	pub conflicts: Vec<(String, ConflictStatus)>,

	/// Per-file operation failures (path, message)
	pub failures: Vec<(String, String)>,

	/// Set when the whole pass aborted before applying anything
	pub aborted: Option<String>,
}

impl PassOutcome {
	fn new(source: &str) -> Self {
		PassOutcome { source: source.to_string(), ..PassOutcome::default() }
	}
}

/// Run a full pass over every source of the group
pub async fn sync_group(
	group: &SyncGroup,
	opts: &SyncOptions,
) -> Result<Vec<PassOutcome>, SyncError> {
	let repo_root = group.repository.clone().ok_or_else(|| SyncError::Format {
		message: format!("group '{}' has no repository", group.name),
	})?;
	let ignore = IgnoreSet::compile(&group.ignore)?;

	let ledger_path = repo_root.join(STATE_FILE_NAME);
	let mut ledger = match StateLedger::load(&ledger_path) {
		Ok(ledger) => ledger,
		Err(StateError::NotFound { .. }) => {
			// First run: no prior state
			debug!("no ledger at {}, starting empty", ledger_path.display());
			StateLedger::new()
		}
		Err(e) => return Err(e.into()),
	};

	let engine = if opts.hashing { Engine::new() } else { Engine::without_hashing() };

	let mut outcomes = Vec::new();
	let mut changed = false;
	for source in &group.sources {
		match sync_one(&repo_root, source, &ignore, &engine, &mut ledger, opts).await {
			Ok(outcome) => {
				if !opts.dry_run {
					changed = true;
				}
				outcomes.push(outcome);
			}
			Err(e) => {
				// Abort this pair only; other sources still get their pass
				error!("{} <-> {}: {}", opts.local_name, source, e);
				let mut outcome = PassOutcome::new(source);
				outcome.aborted = Some(e.to_string());
				outcomes.push(outcome);
			}
		}
	}

	if changed {
		ledger.write(&ledger_path)?;
	}
	Ok(outcomes)
}

async fn sync_one(
	repo_root: &Path,
	source_name: &str,
	ignore: &IgnoreSet,
	engine: &Engine,
	ledger: &mut StateLedger,
	opts: &SyncOptions,
) -> Result<PassOutcome, SyncError> {
	info!("reconciling {} against {}", repo_root.display(), source_name);
	let mut handle = open_source(source_name).await?;
	let cancel = engine.cancel_flag();

	let repo_tree = TreeSnapshot::build(repo_root, ignore, &NoProgress, &cancel)?;
	let source_tree = handle.snapshot(source_name, ignore, &NoProgress, &cancel).await?;

	let mut changes =
		engine.inspect(ledger, &repo_tree, &source_tree, source_name, &NoProgress)?;
	engine.get_conflicts(&mut changes, ledger, &repo_tree, &source_tree, source_name)?;
	engine.set_default_actions(&mut changes);

	let mut outcome = PassOutcome::new(source_name);
	outcome.planned = changes.len();
	for (path, entry) in changes.conflicts() {
		warn!("conflict on {}: {}", path, entry.conflict);
		outcome.conflicts.push((path.clone(), entry.conflict));
	}

	if opts.dry_run {
		for (path, entry) in changes.iter() {
			if entry.operation != FileOperation::NoOp {
				info!("would {}: {}", entry.operation, path);
			}
		}
		return Ok(outcome);
	}

	// Conflicted paths must keep their pre-pass ledger records so the
	// divergence resurfaces on the next run
	let prior_repo = ledger.repository_state().cloned();
	let prior_source = ledger.source_state(source_name).cloned();

	apply_operations(
		&mut handle,
		repo_root,
		source_name,
		&changes,
		&repo_tree,
		&source_tree,
		ledger,
		&mut outcome,
	)
	.await;

	// Record what both sides look like after the operations
	let repo_after = TreeSnapshot::build(repo_root, ignore, &NoProgress, &cancel)?;
	let source_after = handle.snapshot(source_name, ignore, &NoProgress, &cancel).await?;
	ledger.add_source(&repo_after, REPOSITORY_SOURCE);
	ledger.add_source(&source_after, source_name);

	for (path, _) in changes.conflicts() {
		restore_entry(ledger, REPOSITORY_SOURCE, path, prior_repo.as_ref());
		restore_entry(ledger, source_name, path, prior_source.as_ref());
	}

	Ok(outcome)
}

fn restore_entry(
	ledger: &mut StateLedger,
	source: &str,
	path: &str,
	prior: Option<&SourceState>,
) {
	match prior.and_then(|s| s.files.get(path)) {
		Some(state) => ledger.record_file(source, path, state.mtime, state.origin.clone()),
		None => ledger.remove_file(source, path),
	}
}

#[allow(clippy::too_many_arguments)]
async fn apply_operations(
	handle: &mut SourceHandle,
	repo_root: &Path,
	source_name: &str,
	changes: &ChangeSet,
	repo_tree: &TreeSnapshot,
	source_tree: &TreeSnapshot,
	ledger: &mut StateLedger,
	outcome: &mut PassOutcome,
) {
	for (path, entry) in changes.iter() {
		if entry.operation == FileOperation::NoOp {
			continue;
		}

		let result = match entry.operation {
			FileOperation::CopySourceToRepo => {
				copy_source_to_repo(handle, repo_root, path, source_tree, source_name, ledger)
					.await
			}
			FileOperation::CopyRepoToSource => {
				copy_repo_to_source(handle, repo_root, path, repo_tree, source_name, ledger)
					.await
			}
			FileOperation::DeleteFromRepo => {
				delete_from_repo(repo_root, path, source_name, ledger)
			}
			FileOperation::DeleteFromSource => {
				delete_from_source(handle, path, source_name, ledger).await
			}
			FileOperation::NoOp => Ok(()),
		};

		match result {
			Ok(()) => {
				info!("{}: {}", entry.operation, path);
				match entry.operation {
					FileOperation::CopySourceToRepo => outcome.copied_to_repo += 1,
					FileOperation::CopyRepoToSource => outcome.copied_to_source += 1,
					FileOperation::DeleteFromRepo => outcome.deleted_in_repo += 1,
					FileOperation::DeleteFromSource => outcome.deleted_on_source += 1,
					FileOperation::NoOp => {}
				}
			}
			Err(e) => {
				warn!("{} failed for {}: {}", entry.operation, path, e);
				outcome.failures.push((path.clone(), e.to_string()));
			}
		}
	}
}

fn repo_path(repo_root: &Path, rel: &str) -> Result<std::path::PathBuf, SyncError> {
	let rel_host = sanitize_rel(rel)
		.ok_or_else(|| SyncError::Format { message: format!("bad relative path '{}'", rel) })?;
	Ok(repo_root.join(rel_host))
}

async fn copy_source_to_repo(
	handle: &mut SourceHandle,
	repo_root: &Path,
	rel: &str,
	source_tree: &TreeSnapshot,
	source_name: &str,
	ledger: &mut StateLedger,
) -> Result<(), SyncError> {
	let mtime = record_mtime(source_tree, rel)?;
	let bytes = handle.read_file(rel).await?;

	let dest = repo_path(repo_root, rel)?;
	if let Some(parent) = dest.parent() {
		fs::create_dir_all(parent).map_err(SyncError::Io)?;
	}
	fs::write(&dest, &bytes).map_err(SyncError::Io)?;
	set_file_mtime(&dest, mtime).map_err(SyncError::Io)?;

	// The copy assigns the file's origin to this source
	ledger.record_file(REPOSITORY_SOURCE, rel, mtime, Some(source_name.to_string()));
	ledger.record_file(source_name, rel, mtime, None);
	Ok(())
}

async fn copy_repo_to_source(
	handle: &mut SourceHandle,
	repo_root: &Path,
	rel: &str,
	repo_tree: &TreeSnapshot,
	source_name: &str,
	ledger: &mut StateLedger,
) -> Result<(), SyncError> {
	let mtime = record_mtime(repo_tree, rel)?;
	let bytes = fs::read(repo_path(repo_root, rel)?).map_err(SyncError::Io)?;
	handle.write_file(rel, &bytes, mtime).await?;

	ledger.record_file(source_name, rel, mtime, None);
	ledger.record_file(REPOSITORY_SOURCE, rel, mtime, None);
	Ok(())
}

fn delete_from_repo(
	repo_root: &Path,
	rel: &str,
	source_name: &str,
	ledger: &mut StateLedger,
) -> Result<(), SyncError> {
	fs::remove_file(repo_path(repo_root, rel)?).map_err(SyncError::Io)?;
	ledger.remove_file(REPOSITORY_SOURCE, rel);
	ledger.remove_file(source_name, rel);
	Ok(())
}

async fn delete_from_source(
	handle: &mut SourceHandle,
	rel: &str,
	source_name: &str,
	ledger: &mut StateLedger,
) -> Result<(), SyncError> {
	handle.delete_file(rel).await?;
	ledger.remove_file(source_name, rel);
	ledger.remove_file(REPOSITORY_SOURCE, rel);
	Ok(())
}

fn record_mtime(tree: &TreeSnapshot, rel: &str) -> Result<FileTime, SyncError> {
	tree.get(rel).map(|r| r.mtime()).ok_or_else(|| SyncError::Other {
		message: format!("no snapshot record for '{}'", rel),
	})
}

// vim: ts=4
