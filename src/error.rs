//! Error types for RepSync operations

use std::error::Error;
use std::fmt;
use std::io;

use crate::protocol::ReturnCode;

/// Main error type for reconciliation and sync operations
#[derive(Debug)]
pub enum SyncError {
	/// A root directory, ledger file or config file does not exist
	NotFound { path: String },

	/// Malformed configuration, location URL or serialized data
	Format { message: String },

	/// I/O failure during walk, copy or delete
	Io(io::Error),

	/// Authentication against a remote server failed
	Auth { message: String },

	/// Operation cancelled via the cooperative cancel flag
	Aborted,

	/// Ledger error (nested)
	State(StateError),

	/// Wire protocol error (nested)
	Protocol(ProtocolError),

	/// Generic error message
	Other { message: String },
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::NotFound { path } => write!(f, "Not found: {}", path),
			SyncError::Format { message } => write!(f, "Format error: {}", message),
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
			SyncError::Auth { message } => write!(f, "Authentication failed: {}", message),
			SyncError::Aborted => write!(f, "Operation cancelled"),
			SyncError::State(e) => write!(f, "State error: {}", e),
			SyncError::Protocol(e) => write!(f, "Protocol error: {}", e),
			SyncError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for SyncError {}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<String> for SyncError {
	fn from(e: String) -> Self {
		SyncError::Other { message: e }
	}
}

impl From<StateError> for SyncError {
	fn from(e: StateError) -> Self {
		SyncError::State(e)
	}
}

impl From<ProtocolError> for SyncError {
	fn from(e: ProtocolError) -> Self {
		SyncError::Protocol(e)
	}
}

/// Ledger load/store errors
#[derive(Debug)]
pub enum StateError {
	/// Ledger file does not exist; callers usually treat this as an empty ledger
	NotFound { path: String },

	/// Ledger file exists but its records are malformed
	Corrupted { message: String },

	/// Failed to read the ledger file
	LoadFailed { source: io::Error },

	/// Failed to write the ledger file
	SaveFailed { source: io::Error },
}

impl fmt::Display for StateError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StateError::NotFound { path } => write!(f, "No ledger at {}", path),
			StateError::Corrupted { message } => write!(f, "Ledger corrupted: {}", message),
			StateError::LoadFailed { source } => write!(f, "Failed to load ledger: {}", source),
			StateError::SaveFailed { source } => write!(f, "Failed to save ledger: {}", source),
		}
	}
}

impl Error for StateError {}

/// Wire protocol errors
#[derive(Debug)]
pub enum ProtocolError {
	/// Peer sent an opcode outside the known set
	BadOpcode { opcode: u32 },

	/// Malformed frame (bad length prefix, invalid UTF-8, truncated payload)
	BadFrame { message: String },

	/// Server answered a request with a non-success return code
	Request { code: ReturnCode },

	/// Connection closed by the peer
	Disconnected,

	/// Idle read timeout expired
	Timeout,

	/// Stream-level I/O failure
	Io(io::Error),
}

impl fmt::Display for ProtocolError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ProtocolError::BadOpcode { opcode } => write!(f, "Unknown opcode {}", opcode),
			ProtocolError::BadFrame { message } => write!(f, "Malformed frame: {}", message),
			ProtocolError::Request { code } => write!(f, "Server returned {}", code),
			ProtocolError::Disconnected => write!(f, "Connection closed"),
			ProtocolError::Timeout => write!(f, "Read timeout"),
			ProtocolError::Io(e) => write!(f, "Stream error: {}", e),
		}
	}
}

impl Error for ProtocolError {}

impl From<io::Error> for ProtocolError {
	fn from(e: io::Error) -> Self {
		if e.kind() == io::ErrorKind::UnexpectedEof {
			ProtocolError::Disconnected
		} else {
			ProtocolError::Io(e)
		}
	}
}

// vim: ts=4
