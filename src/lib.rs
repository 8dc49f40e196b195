//! # RepSync - conflict-aware repository synchronizer
//!
//! RepSync keeps a canonical "repository" directory tree in sync against one
//! or more "source" trees, local or remote over a small binary protocol. A
//! persisted per-file modification-time ledger lets the engine tell expected
//! propagations apart from genuine conflicts, which are left for an explicit
//! decision.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use repsync::config::SyncGroup;
//! use repsync::sync::{sync_group, SyncOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), repsync::SyncError> {
//!     let group = SyncGroup::load("docs.toml".as_ref())?;
//!     let outcomes = sync_group(&group, &SyncOptions::default()).await?;
//!     for outcome in outcomes {
//!         println!("{}: {} conflicts", outcome.source, outcome.conflicts.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod callbacks;
pub mod config;
pub mod connection;
pub mod error;
pub mod exclusion;
pub mod logging;
pub mod protocol;
pub mod reconcile;
pub mod snapshot;
pub mod state;
pub mod sync;
pub mod types;
pub mod util;

// Re-export commonly used types
pub use error::{ProtocolError, StateError, SyncError};
pub use reconcile::{ChangeEntry, ChangeSet, Engine};
pub use snapshot::TreeSnapshot;
pub use state::StateLedger;
pub use types::{ChangeStatus, ConflictStatus, FileOperation, FileTime};

// vim: ts=4
