//! TOML configuration: sync-group descriptors and server configuration
//!
//! A sync-group descriptor names one repository and the sources it is kept
//! in sync against. The server configuration lists the repositories served
//! to remote clients, the accounts allowed to authenticate and which account
//! may touch which repository.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SyncError;
use crate::exclusion::PatternSpec;
use crate::protocol::DEFAULT_PORT;

/// Username a session binds to when Auth carries a blank name
pub const ANONYMOUS_USER: &str = "anonymous";

/// A sync group: one repository kept in sync against a set of sources
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SyncGroup {
	pub name: String,

	/// Canonical tree; the first location added to the group
	pub repository: Option<PathBuf>,

	/// Secondary locations: local paths or sync:// URLs
	pub sources: Vec<String>,

	/// Ignore patterns applied to every snapshot of this group
	pub ignore: Vec<PatternSpec>,
}

impl SyncGroup {
	pub fn new(name: &str) -> Self {
		SyncGroup { name: name.to_string(), ..SyncGroup::default() }
	}

	pub fn load(path: &Path) -> Result<SyncGroup, SyncError> {
		let text = match fs::read_to_string(path) {
			Ok(text) => text,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(SyncError::NotFound { path: path.display().to_string() });
			}
			Err(e) => return Err(SyncError::Io(e)),
		};
		toml::from_str(&text).map_err(|e| SyncError::Format {
			message: format!("{}: {}", path.display(), e),
		})
	}

	pub fn save(&self, path: &Path) -> Result<(), SyncError> {
		let text = toml::to_string_pretty(self).map_err(|e| SyncError::Format {
			message: format!("cannot serialize group: {}", e),
		})?;
		fs::write(path, text).map_err(SyncError::Io)
	}

	/// Add a location. The first one becomes the repository and must be a
	/// local path; later ones are sources. Returns false if already present.
	pub fn add_location(&mut self, location: &str) -> Result<bool, SyncError> {
		if self.repository.is_none() {
			if location.contains("://") {
				return Err(SyncError::Format {
					message: format!(
						"repository must be a local path, not a URL: {}",
						location
					),
				});
			}
			self.repository = Some(PathBuf::from(location));
			return Ok(true);
		}
		if self.sources.iter().any(|s| s == location) {
			return Ok(false);
		}
		self.sources.push(location.to_string());
		Ok(true)
	}

	/// Remove a source (or unset the repository). Returns false if unknown.
	pub fn remove_location(&mut self, location: &str) -> bool {
		if let Some(pos) = self.sources.iter().position(|s| s == location) {
			self.sources.remove(pos);
			return true;
		}
		if self.repository.as_deref() == Some(Path::new(location)) {
			self.repository = None;
			return true;
		}
		false
	}
}

/// One account allowed to authenticate against the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
	pub name: String,

	/// Per-user salt prepended to the password before hashing
	pub salt: String,

	/// Hex SHA-512 of salt + password
	pub password: String,
}

/// One repository served to remote clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
	pub name: String,

	pub path: PathBuf,

	/// Accounts allowed to touch this repository
	#[serde(default)]
	pub users: Vec<String>,
}

/// Server configuration, shared read-only across sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
	pub listen: String,

	/// Display name reported by Hello
	pub name: String,

	pub description: String,

	#[serde(rename = "user")]
	pub users: Vec<UserConfig>,

	#[serde(rename = "repository")]
	pub repositories: Vec<RepositoryConfig>,
}

impl Default for ServerConfig {
	fn default() -> Self {
		ServerConfig {
			listen: format!("0.0.0.0:{}", DEFAULT_PORT),
			name: "repsync".to_string(),
			description: String::new(),
			users: Vec::new(),
			repositories: Vec::new(),
		}
	}
}

impl ServerConfig {
	pub fn load(path: &Path) -> Result<ServerConfig, SyncError> {
		let text = match fs::read_to_string(path) {
			Ok(text) => text,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(SyncError::NotFound { path: path.display().to_string() });
			}
			Err(e) => return Err(SyncError::Io(e)),
		};
		toml::from_str(&text).map_err(|e| SyncError::Format {
			message: format!("{}: {}", path.display(), e),
		})
	}

	pub fn repository(&self, name: &str) -> Option<&RepositoryConfig> {
		self.repositories.iter().find(|r| r.name == name)
	}

	pub fn user(&self, name: &str) -> Option<&UserConfig> {
		self.users.iter().find(|u| u.name == name)
	}

	/// The session's username must appear in the repository's user list
	pub fn may_access(&self, username: &str, repo: &RepositoryConfig) -> bool {
		repo.users.iter().any(|u| u == username)
	}

	pub fn verify_password(&self, username: &str, password: &str) -> bool {
		match self.user(username) {
			Some(user) => {
				let computed = password_hash(&user.salt, password);
				computed.eq_ignore_ascii_case(&user.password)
			}
			None => false,
		}
	}
}

/// Hex SHA-512 of salt + password, as stored in the server configuration
pub fn password_hash(salt: &str, password: &str) -> String {
	let mut hasher = Sha512::new();
	hasher.update(salt.as_bytes());
	hasher.update(password.as_bytes());
	hex::encode(hasher.finalize())
}


// vim: ts=4
