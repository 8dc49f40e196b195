//! Client side of the sync protocol

use tokio::net::TcpStream;

use crate::error::{ProtocolError, SyncError};
use crate::logging::*;
use crate::protocol::{wire, Opcode, ReturnCode, ServerInfo};
use crate::snapshot::TreeSnapshot;
use crate::state::StateLedger;

/// A connected protocol client
pub struct Client {
	stream: TcpStream,
}

impl Client {
	/// Open a TCP connection; callers usually follow up with [`Client::hello`]
	/// and [`Client::auth`] before issuing requests.
	pub async fn connect(addr: &str) -> Result<Client, SyncError> {
		let stream = TcpStream::connect(addr).await.map_err(SyncError::Io)?;
		debug!("connected to {}", addr);
		Ok(Client { stream })
	}

	async fn expect_success(&mut self) -> Result<(), SyncError> {
		let raw = wire::read_u32(&mut self.stream).await?;
		match ReturnCode::from_u32(raw) {
			Some(ReturnCode::Success) => Ok(()),
			Some(code) => Err(SyncError::Protocol(ProtocolError::Request { code })),
			None => Err(SyncError::Protocol(ProtocolError::BadFrame {
				message: format!("unknown return code {}", raw),
			})),
		}
	}

	async fn send_opcode(&mut self, op: Opcode) -> Result<(), SyncError> {
		wire::write_u32(&mut self.stream, op.as_u32()).await?;
		Ok(())
	}

	/// Exchange greetings; returns the server's identity block
	pub async fn hello(&mut self) -> Result<ServerInfo, SyncError> {
		self.send_opcode(Opcode::Hello).await?;
		self.expect_success().await?;

		let major = wire::read_u32(&mut self.stream).await?;
		let minor = wire::read_u32(&mut self.stream).await?;
		let name = wire::read_string(&mut self.stream).await?;
		let description = wire::read_string(&mut self.stream).await?;
		let mut version = [0u32; 4];
		for slot in version.iter_mut() {
			*slot = wire::read_u32(&mut self.stream).await?;
		}
		let greeting = wire::read_string(&mut self.stream).await?;

		debug!("server '{}' protocol {}.{}: {}", name, major, minor, greeting);
		Ok(ServerInfo { major, minor, name, description, version, greeting })
	}

	/// Authenticate; a blank username requests the anonymous account
	pub async fn auth(&mut self, username: &str, password: &str) -> Result<(), SyncError> {
		self.send_opcode(Opcode::Auth).await?;
		wire::write_string(&mut self.stream, username).await?;
		wire::write_string(&mut self.stream, password).await?;

		let raw = wire::read_u32(&mut self.stream).await?;
		match ReturnCode::from_u32(raw) {
			Some(ReturnCode::Success) => Ok(()),
			Some(ReturnCode::BadAuth) => Err(SyncError::Auth {
				message: format!("server refused credentials for '{}'", username),
			}),
			Some(code) => Err(SyncError::Protocol(ProtocolError::Request { code })),
			None => Err(SyncError::Protocol(ProtocolError::BadFrame {
				message: format!("unknown return code {}", raw),
			})),
		}
	}

	/// Repository names this session's user may access, sorted
	pub async fn list_repos(&mut self) -> Result<Vec<String>, SyncError> {
		self.send_opcode(Opcode::ListRepos).await?;
		self.expect_success().await?;

		let count = wire::read_u32(&mut self.stream).await?;
		let mut names = Vec::with_capacity(count as usize);
		for _ in 0..count {
			names.push(wire::read_string(&mut self.stream).await?);
		}
		Ok(names)
	}

	/// Fetch the remote repository's tree snapshot
	pub async fn fetch_tree(
		&mut self,
		repo: &str,
		label: &str,
	) -> Result<TreeSnapshot, SyncError> {
		self.send_opcode(Opcode::Tree).await?;
		wire::write_string(&mut self.stream, repo).await?;
		self.expect_success().await?;

		let tree = wire::read_tree(&mut self.stream, label).await?;
		debug!("fetched tree of '{}': {} files", repo, tree.len());
		Ok(tree)
	}

	/// Fetch and parse the remote repository's state ledger
	pub async fn fetch_state(&mut self, repo: &str) -> Result<StateLedger, SyncError> {
		self.send_opcode(Opcode::State).await?;
		wire::write_string(&mut self.stream, repo).await?;
		self.expect_success().await?;

		let bytes = wire::read_blob(&mut self.stream).await?;
		StateLedger::from_bytes(&bytes).map_err(SyncError::State)
	}

	/// Fetch one file's raw bytes by normalized relative path
	pub async fn get_file(&mut self, repo: &str, path: &str) -> Result<Vec<u8>, SyncError> {
		self.send_opcode(Opcode::GetFile).await?;
		wire::write_string(&mut self.stream, repo).await?;
		wire::write_string(&mut self.stream, path).await?;
		self.expect_success().await?;

		let bytes = wire::read_blob(&mut self.stream).await?;
		Ok(bytes)
	}
}

// vim: ts=4
