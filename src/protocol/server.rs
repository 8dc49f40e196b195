//! Protocol server: one task per accepted connection
//!
//! A [`Session`] owns its socket exclusively and runs its request loop
//! sequentially. Authentication gates everything except Hello and Auth;
//! per-request checks verify the repository exists on disk and the session's
//! user is authorized for it.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

use crate::callbacks::{CancelFlag, NoProgress};
use crate::config::{ServerConfig, ANONYMOUS_USER};
use crate::error::{ProtocolError, SyncError};
use crate::exclusion::IgnoreSet;
use crate::logging::*;
use crate::protocol::{
	wire, Opcode, ReturnCode, HTTP_GET_SENTINEL, HTTP_POST_SENTINEL, PROTOCOL_MAJOR,
	PROTOCOL_MINOR,
};
use crate::snapshot::TreeSnapshot;
use crate::types::STATE_FILE_NAME;
use crate::util::{crate_version_components, sanitize_rel};

/// Idle read timeout on request frames; disabled in debug builds so a
/// stalled client cannot pin a session task forever in production
const READ_TIMEOUT: Duration = Duration::from_secs(2);

async fn timed<T, F>(fut: F) -> Result<T, ProtocolError>
where
	F: Future<Output = Result<T, ProtocolError>>,
{
	if cfg!(debug_assertions) {
		fut.await
	} else {
		match tokio::time::timeout(READ_TIMEOUT, fut).await {
			Ok(result) => result,
			Err(_) => Err(ProtocolError::Timeout),
		}
	}
}

async fn read_frame4(stream: &mut TcpStream) -> Result<[u8; 4], ProtocolError> {
	let mut buf = [0u8; 4];
	stream.read_exact(&mut buf).await?;
	Ok(buf)
}

/// TCP server dispatching sessions
pub struct Server {
	config: Arc<ServerConfig>,
}

impl Server {
	pub fn new(config: ServerConfig) -> Self {
		Server { config: Arc::new(config) }
	}

	/// Bind the configured listen address and serve forever
	pub async fn run(self) -> Result<(), SyncError> {
		let listener =
			TcpListener::bind(&self.config.listen).await.map_err(SyncError::Io)?;
		self.run_on(listener).await
	}

	/// Serve on an already-bound listener (lets tests use an ephemeral port)
	pub async fn run_on(self, listener: TcpListener) -> Result<(), SyncError> {
		if let Ok(addr) = listener.local_addr() {
			info!("serving {} repositories on {}", self.config.repositories.len(), addr);
		}

		loop {
			let (stream, peer) = listener.accept().await.map_err(SyncError::Io)?;
			let config = self.config.clone();
			tokio::spawn(async move {
				Session::new(stream, peer, config).run().await;
			});
		}
	}
}

/// Per-connection session state machine:
/// connected (unauthenticated) -> authenticated -> closed
struct Session {
	stream: TcpStream,
	peer: SocketAddr,
	config: Arc<ServerConfig>,
	authenticated: bool,
	username: String,
}

impl Session {
	fn new(stream: TcpStream, peer: SocketAddr, config: Arc<ServerConfig>) -> Self {
		Session { stream, peer, config, authenticated: false, username: String::new() }
	}

	async fn run(mut self) {
		debug!("session opened by {}", self.peer);
		loop {
			match self.serve_one().await {
				Ok(true) => continue,
				Ok(false) => break,
				Err(ProtocolError::Disconnected) | Err(ProtocolError::Timeout) => {
					debug!("session with {} ended", self.peer);
					break;
				}
				Err(e) => {
					warn!("session with {} failed: {}", self.peer, e);
					// Best effort; the stream may already be gone
					let _ = self.write_code(ReturnCode::InternalError).await;
					break;
				}
			}
		}
	}

	/// Serve one request. Ok(true) keeps the session open, Ok(false) closes
	/// it after an orderly response.
	async fn serve_one(&mut self) -> Result<bool, ProtocolError> {
		let raw = timed(read_frame4(&mut self.stream)).await?;

		if raw == HTTP_GET_SENTINEL || raw == HTTP_POST_SENTINEL {
			self.serve_http().await?;
			return Ok(false);
		}

		let opcode = u32::from_be_bytes(raw);
		let op = match Opcode::from_u32(opcode) {
			Some(op) => op,
			None => {
				debug!("{} sent unknown opcode {}", self.peer, opcode);
				self.write_code(ReturnCode::BadOp).await?;
				return Ok(false);
			}
		};

		if !self.authenticated && !matches!(op, Opcode::Hello | Opcode::Auth) {
			// Consume the operands first: closing with unread request bytes
			// can reset the connection before the refusal reaches the peer
			self.discard_request(op).await?;
			self.write_code(ReturnCode::BadAuth).await?;
			return Ok(false);
		}

		match op {
			Opcode::Hello => self.handle_hello().await?,
			Opcode::Auth => self.handle_auth().await?,
			Opcode::ListRepos => self.handle_list_repos().await?,
			Opcode::Tree => self.handle_tree().await?,
			Opcode::State => self.handle_state().await?,
			Opcode::GetFile => self.handle_get_file().await?,
		}
		Ok(true)
	}

	async fn write_code(&mut self, code: ReturnCode) -> Result<(), ProtocolError> {
		wire::write_u32(&mut self.stream, code.as_u32()).await
	}

	/// Read and drop the string operands of a request that is being refused
	async fn discard_request(&mut self, op: Opcode) -> Result<(), ProtocolError> {
		let strings = match op {
			Opcode::Tree | Opcode::State => 1,
			Opcode::GetFile => 2,
			_ => 0,
		};
		for _ in 0..strings {
			timed(wire::read_string(&mut self.stream)).await?;
		}
		Ok(())
	}

	async fn handle_hello(&mut self) -> Result<(), ProtocolError> {
		self.write_code(ReturnCode::Success).await?;
		wire::write_u32(&mut self.stream, PROTOCOL_MAJOR).await?;
		wire::write_u32(&mut self.stream, PROTOCOL_MINOR).await?;
		wire::write_string(&mut self.stream, &self.config.name).await?;
		wire::write_string(&mut self.stream, &self.config.description).await?;
		for component in crate_version_components() {
			wire::write_u32(&mut self.stream, component).await?;
		}
		let greeting = format!("Hello {}", self.peer.ip());
		wire::write_string(&mut self.stream, &greeting).await
	}

	async fn handle_auth(&mut self) -> Result<(), ProtocolError> {
		let username = timed(wire::read_string(&mut self.stream)).await?;
		let password = timed(wire::read_string(&mut self.stream)).await?;

		if username.is_empty() {
			self.username = ANONYMOUS_USER.to_string();
			self.authenticated = true;
			debug!("{} authenticated as {}", self.peer, self.username);
			return self.write_code(ReturnCode::Success).await;
		}

		if self.config.verify_password(&username, &password) {
			self.username = username;
			self.authenticated = true;
			debug!("{} authenticated as {}", self.peer, self.username);
			self.write_code(ReturnCode::Success).await
		} else {
			info!("{} failed authentication as '{}'", self.peer, username);
			self.write_code(ReturnCode::BadAuth).await
		}
	}

	async fn handle_list_repos(&mut self) -> Result<(), ProtocolError> {
		let config = self.config.clone();
		let mut names: Vec<&str> = config
			.repositories
			.iter()
			.filter(|r| r.path.is_dir() && config.may_access(&self.username, r))
			.map(|r| r.name.as_str())
			.collect();
		names.sort_unstable();
		names.dedup();

		self.write_code(ReturnCode::Success).await?;
		wire::write_u32(&mut self.stream, names.len() as u32).await?;
		for name in names {
			wire::write_string(&mut self.stream, name).await?;
		}
		Ok(())
	}

	/// Resolve a requested repository, answering BadPath/BadAuth on failure.
	/// Returns None when a failure response was already written.
	async fn resolve_repo(&mut self, name: &str) -> Result<Option<PathBuf>, ProtocolError> {
		let config = self.config.clone();
		let repo = match config.repository(name) {
			Some(repo) if repo.path.is_dir() => repo,
			_ => {
				self.write_code(ReturnCode::BadPath).await?;
				return Ok(None);
			}
		};
		if !config.may_access(&self.username, repo) {
			self.write_code(ReturnCode::BadAuth).await?;
			return Ok(None);
		}
		Ok(Some(repo.path.clone()))
	}

	async fn handle_tree(&mut self) -> Result<(), ProtocolError> {
		let name = timed(wire::read_string(&mut self.stream)).await?;
		let root = match self.resolve_repo(&name).await? {
			Some(root) => root,
			None => return Ok(()),
		};

		let built = tokio::task::spawn_blocking(move || {
			TreeSnapshot::build(&root, &IgnoreSet::empty(), &NoProgress, &CancelFlag::new())
		})
		.await;

		match built {
			Ok(Ok(tree)) => {
				self.write_code(ReturnCode::Success).await?;
				wire::write_tree(&mut self.stream, &tree).await
			}
			Ok(Err(e)) => {
				warn!("tree walk of '{}' failed: {}", name, e);
				self.write_code(ReturnCode::InternalError).await
			}
			Err(e) => {
				warn!("tree walk of '{}' panicked: {}", name, e);
				self.write_code(ReturnCode::InternalError).await
			}
		}
	}

	async fn handle_state(&mut self) -> Result<(), ProtocolError> {
		let name = timed(wire::read_string(&mut self.stream)).await?;
		let root = match self.resolve_repo(&name).await? {
			Some(root) => root,
			None => return Ok(()),
		};

		// A repository without a ledger simply has no prior state
		let bytes = match tokio::fs::read(root.join(STATE_FILE_NAME)).await {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
			Err(e) => {
				warn!("cannot read ledger of '{}': {}", name, e);
				return self.write_code(ReturnCode::InternalError).await;
			}
		};

		self.write_code(ReturnCode::Success).await?;
		wire::write_blob(&mut self.stream, &bytes).await
	}

	async fn handle_get_file(&mut self) -> Result<(), ProtocolError> {
		let name = timed(wire::read_string(&mut self.stream)).await?;
		let rel = timed(wire::read_string(&mut self.stream)).await?;
		let root = match self.resolve_repo(&name).await? {
			Some(root) => root,
			None => return Ok(()),
		};

		let rel_host = match sanitize_rel(&rel) {
			Some(p) => p,
			None => return self.write_code(ReturnCode::BadPath).await,
		};
		let full = root.join(rel_host);

		match tokio::fs::read(&full).await {
			Ok(bytes) => {
				self.write_code(ReturnCode::Success).await?;
				wire::write_blob(&mut self.stream, &bytes).await
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				self.write_code(ReturnCode::BadPath).await
			}
			Err(e) => {
				warn!("cannot read {}: {}", full.display(), e);
				self.write_code(ReturnCode::InternalError).await
			}
		}
	}

	/// Minimal compatibility answer for HTTP clients hitting the port
	async fn serve_http(&mut self) -> Result<(), ProtocolError> {
		debug!("{} spoke HTTP, answering status page", self.peer);

		// Drain the request headers before answering, so closing the socket
		// does not reset the connection under the client
		let mut request = Vec::new();
		let mut chunk = [0u8; 1024];
		while request.len() < 8 * 1024 {
			let n = timed(async {
				self.stream.read(&mut chunk).await.map_err(ProtocolError::from)
			})
			.await?;
			if n == 0 {
				break;
			}
			request.extend_from_slice(&chunk[..n]);
			if request.windows(4).any(|w| w == b"\r\n\r\n") {
				break;
			}
		}

		let response = format!(
			"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\n{} {}.{}\n",
			self.config.name, PROTOCOL_MAJOR, PROTOCOL_MINOR
		);
		tokio::io::AsyncWriteExt::write_all(&mut self.stream, response.as_bytes()).await?;
		Ok(())
	}
}

// vim: ts=4
