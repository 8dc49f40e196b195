//! Protocol server/client tests over localhost TCP
//!
//! Each test spins its own server on an ephemeral port with a temp-dir
//! repository, then drives it with the real client.

use std::net::SocketAddr;
use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use repsync::config::{
	password_hash, RepositoryConfig, ServerConfig, UserConfig, ANONYMOUS_USER,
};
use repsync::error::{ProtocolError, SyncError};
use repsync::protocol::client::Client;
use repsync::protocol::server::Server;
use repsync::protocol::ReturnCode;
use repsync::state::StateLedger;
use repsync::types::{FileTime, REPOSITORY_SOURCE, STATE_FILE_NAME};

async fn start_server(docs: &Path, locked: &Path) -> SocketAddr {
	let config = ServerConfig {
		name: "test-server".to_string(),
		description: "fixture".to_string(),
		users: vec![UserConfig {
			name: "alice".to_string(),
			salt: "salt".to_string(),
			password: password_hash("salt", "secret"),
		}],
		repositories: vec![
			RepositoryConfig {
				name: "docs".to_string(),
				path: docs.to_path_buf(),
				users: vec!["alice".to_string(), ANONYMOUS_USER.to_string()],
			},
			RepositoryConfig {
				name: "locked".to_string(),
				path: locked.to_path_buf(),
				users: vec![],
			},
		],
		..ServerConfig::default()
	};

	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(Server::new(config).run_on(listener));
	addr
}

async fn anonymous_client(addr: SocketAddr) -> Client {
	let mut client = Client::connect(&addr.to_string()).await.unwrap();
	client.hello().await.unwrap();
	client.auth("", "").await.unwrap();
	client
}

fn request_code(result: SyncError) -> ReturnCode {
	match result {
		SyncError::Protocol(ProtocolError::Request { code }) => code,
		other => panic!("expected request error, got {}", other),
	}
}

#[tokio::test]
async fn test_hello_reports_identity_and_peer_ip() {
	let docs = tempfile::tempdir().unwrap();
	let locked = tempfile::tempdir().unwrap();
	let addr = start_server(docs.path(), locked.path()).await;

	let mut client = Client::connect(&addr.to_string()).await.unwrap();
	let info = client.hello().await.unwrap();

	assert_eq!(info.name, "test-server");
	assert_eq!(info.major, 1);
	assert!(info.greeting.contains("127.0.0.1"), "greeting was '{}'", info.greeting);
}

#[tokio::test]
async fn test_auth_accepts_and_rejects() {
	let docs = tempfile::tempdir().unwrap();
	let locked = tempfile::tempdir().unwrap();
	let addr = start_server(docs.path(), locked.path()).await;

	let mut client = Client::connect(&addr.to_string()).await.unwrap();
	client.hello().await.unwrap();

	// Wrong password first; the session stays open for another attempt
	let err = client.auth("alice", "wrong").await.unwrap_err();
	assert!(matches!(err, SyncError::Auth { .. }));
	client.auth("alice", "secret").await.unwrap();
	assert_eq!(client.list_repos().await.unwrap(), vec!["docs".to_string()]);
}

#[tokio::test]
async fn test_request_before_auth_is_refused_and_closed() {
	let docs = tempfile::tempdir().unwrap();
	let locked = tempfile::tempdir().unwrap();
	let addr = start_server(docs.path(), locked.path()).await;

	let mut client = Client::connect(&addr.to_string()).await.unwrap();
	let err = client.fetch_tree("docs", "docs").await.unwrap_err();
	assert_eq!(request_code(err), ReturnCode::BadAuth);

	// The server closed the connection: the next request dies on the stream
	let err = client.fetch_tree("docs", "docs").await.unwrap_err();
	assert!(matches!(
		err,
		SyncError::Protocol(ProtocolError::Disconnected) | SyncError::Protocol(ProtocolError::Io(_))
	));
}

#[tokio::test]
async fn test_tree_fetch_matches_directory() {
	let docs = tempfile::tempdir().unwrap();
	let locked = tempfile::tempdir().unwrap();
	std::fs::create_dir(docs.path().join("sub")).unwrap();
	std::fs::write(docs.path().join("a.txt"), b"alpha").unwrap();
	std::fs::write(docs.path().join("sub/b.txt"), b"beta").unwrap();
	let addr = start_server(docs.path(), locked.path()).await;

	let mut client = anonymous_client(addr).await;
	let tree = client.fetch_tree("docs", "remote").await.unwrap();

	assert_eq!(tree.len(), 2);
	assert_eq!(tree.get("a.txt").unwrap().size(), 5);
	assert!(tree.contains("sub/b.txt"));
}

#[tokio::test]
async fn test_tree_of_unknown_repo_is_bad_path() {
	let docs = tempfile::tempdir().unwrap();
	let locked = tempfile::tempdir().unwrap();
	let addr = start_server(docs.path(), locked.path()).await;

	let mut client = anonymous_client(addr).await;
	let err = client.fetch_tree("nope", "nope").await.unwrap_err();
	assert_eq!(request_code(err), ReturnCode::BadPath);
}

#[tokio::test]
async fn test_unauthorized_repo_is_bad_auth() {
	let docs = tempfile::tempdir().unwrap();
	let locked = tempfile::tempdir().unwrap();
	let addr = start_server(docs.path(), locked.path()).await;

	let mut client = anonymous_client(addr).await;
	let err = client.fetch_tree("locked", "locked").await.unwrap_err();
	assert_eq!(request_code(err), ReturnCode::BadAuth);
}

#[tokio::test]
async fn test_get_file_roundtrip_and_missing_is_bad_path() {
	let docs = tempfile::tempdir().unwrap();
	let locked = tempfile::tempdir().unwrap();
	std::fs::write(docs.path().join("hello.txt"), b"hello over the wire").unwrap();
	let addr = start_server(docs.path(), locked.path()).await;

	let mut client = anonymous_client(addr).await;
	let bytes = client.get_file("docs", "hello.txt").await.unwrap();
	assert_eq!(bytes, b"hello over the wire");

	// Existing repository, missing file: BadPath, never InternalError
	let err = client.get_file("docs", "missing.txt").await.unwrap_err();
	assert_eq!(request_code(err), ReturnCode::BadPath);

	// Path escape attempts are refused the same way
	let err = client.get_file("docs", "../outside.txt").await.unwrap_err();
	assert_eq!(request_code(err), ReturnCode::BadPath);
}

#[tokio::test]
async fn test_state_fetch_empty_and_populated() {
	let docs = tempfile::tempdir().unwrap();
	let locked = tempfile::tempdir().unwrap();
	let addr = start_server(docs.path(), locked.path()).await;

	let mut client = anonymous_client(addr).await;

	// No ledger on disk yet: an empty one comes back
	let ledger = client.fetch_state("docs").await.unwrap();
	assert!(ledger.is_empty());

	let mut stored = StateLedger::new();
	stored.record_file(
		REPOSITORY_SOURCE,
		"a.txt",
		FileTime::from_unix_seconds(7),
		Some(REPOSITORY_SOURCE.to_string()),
	);
	stored.write(&docs.path().join(STATE_FILE_NAME)).unwrap();

	let fetched = client.fetch_state("docs").await.unwrap();
	assert_eq!(fetched, stored);
}

#[tokio::test]
async fn test_unknown_opcode_gets_bad_op_and_close() {
	let docs = tempfile::tempdir().unwrap();
	let locked = tempfile::tempdir().unwrap();
	let addr = start_server(docs.path(), locked.path()).await;

	let mut stream = TcpStream::connect(addr).await.unwrap();
	stream.write_all(&99u32.to_be_bytes()).await.unwrap();

	let mut code = [0u8; 4];
	stream.read_exact(&mut code).await.unwrap();
	assert_eq!(u32::from_be_bytes(code), ReturnCode::BadOp.as_u32());

	// Connection is closed afterwards
	let mut rest = [0u8; 1];
	assert_eq!(stream.read(&mut rest).await.unwrap(), 0);
}

#[tokio::test]
async fn test_http_get_receives_plain_answer() {
	let docs = tempfile::tempdir().unwrap();
	let locked = tempfile::tempdir().unwrap();
	let addr = start_server(docs.path(), locked.path()).await;

	let mut stream = TcpStream::connect(addr).await.unwrap();
	stream.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();

	let mut response = Vec::new();
	stream.read_to_end(&mut response).await.unwrap();
	let text = String::from_utf8_lossy(&response);
	assert!(text.starts_with("HTTP/1.0 200 OK"), "got '{}'", text);
	assert!(text.contains("test-server"));
}

// vim: ts=4
