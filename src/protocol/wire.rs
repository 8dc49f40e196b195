//! Wire primitives: big-endian integers, length-prefixed strings and blobs,
//! and the framed tree-snapshot encoding

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;
use crate::snapshot::{FileRecord, TreeSnapshot};
use crate::types::FileTime;

/// Sanity cap on any single length-prefixed string
pub const MAX_STRING_LEN: u32 = 64 * 1024;

/// Sanity cap on a bulk payload (state ledger, file contents)
pub const MAX_PAYLOAD_LEN: u64 = 16 << 30;

/// Sanity cap on the file count of a serialized tree
pub const MAX_TREE_FILES: u32 = 16_000_000;

pub async fn read_u32<R: AsyncRead + Unpin>(r: &mut R) -> Result<u32, ProtocolError> {
	let mut buf = [0u8; 4];
	r.read_exact(&mut buf).await?;
	Ok(u32::from_be_bytes(buf))
}

pub async fn read_u64<R: AsyncRead + Unpin>(r: &mut R) -> Result<u64, ProtocolError> {
	let mut buf = [0u8; 8];
	r.read_exact(&mut buf).await?;
	Ok(u64::from_be_bytes(buf))
}

pub async fn read_i64<R: AsyncRead + Unpin>(r: &mut R) -> Result<i64, ProtocolError> {
	let mut buf = [0u8; 8];
	r.read_exact(&mut buf).await?;
	Ok(i64::from_be_bytes(buf))
}

pub async fn write_u32<W: AsyncWrite + Unpin>(w: &mut W, v: u32) -> Result<(), ProtocolError> {
	w.write_all(&v.to_be_bytes()).await?;
	Ok(())
}

pub async fn write_u64<W: AsyncWrite + Unpin>(w: &mut W, v: u64) -> Result<(), ProtocolError> {
	w.write_all(&v.to_be_bytes()).await?;
	Ok(())
}

pub async fn write_i64<W: AsyncWrite + Unpin>(w: &mut W, v: i64) -> Result<(), ProtocolError> {
	w.write_all(&v.to_be_bytes()).await?;
	Ok(())
}

/// 4-byte UTF-8 byte count, then the bytes
pub async fn write_string<W: AsyncWrite + Unpin>(
	w: &mut W,
	s: &str,
) -> Result<(), ProtocolError> {
	let bytes = s.as_bytes();
	if bytes.len() > MAX_STRING_LEN as usize {
		return Err(ProtocolError::BadFrame {
			message: format!("string of {} bytes exceeds limit", bytes.len()),
		});
	}
	write_u32(w, bytes.len() as u32).await?;
	w.write_all(bytes).await?;
	Ok(())
}

pub async fn read_string<R: AsyncRead + Unpin>(r: &mut R) -> Result<String, ProtocolError> {
	let len = read_u32(r).await?;
	if len > MAX_STRING_LEN {
		return Err(ProtocolError::BadFrame {
			message: format!("string length {} exceeds limit", len),
		});
	}
	let mut buf = vec![0u8; len as usize];
	r.read_exact(&mut buf).await?;
	String::from_utf8(buf)
		.map_err(|e| ProtocolError::BadFrame { message: format!("invalid UTF-8: {}", e) })
}

/// 8-byte length, then the raw bytes
pub async fn write_blob<W: AsyncWrite + Unpin>(
	w: &mut W,
	bytes: &[u8],
) -> Result<(), ProtocolError> {
	write_u64(w, bytes.len() as u64).await?;
	w.write_all(bytes).await?;
	Ok(())
}

pub async fn read_blob<R: AsyncRead + Unpin>(r: &mut R) -> Result<Vec<u8>, ProtocolError> {
	let len = read_u64(r).await?;
	if len > MAX_PAYLOAD_LEN {
		return Err(ProtocolError::BadFrame {
			message: format!("payload length {} exceeds limit", len),
		});
	}
	let mut buf = vec![0u8; len as usize];
	r.read_exact(&mut buf).await?;
	Ok(buf)
}

/// Serialize a snapshot: file count, then per file path, mtime and size
pub async fn write_tree<W: AsyncWrite + Unpin>(
	w: &mut W,
	tree: &TreeSnapshot,
) -> Result<(), ProtocolError> {
	write_u32(w, tree.len() as u32).await?;
	for (path, rec) in tree.files() {
		write_string(w, path).await?;
		write_i64(w, rec.mtime().as_nanos()).await?;
		write_u64(w, rec.size()).await?;
	}
	Ok(())
}

/// Deserialize a snapshot received from a remote peer. Records have no
/// backing file, so content hashing is unavailable for them.
pub async fn read_tree<R: AsyncRead + Unpin>(
	r: &mut R,
	label: &str,
) -> Result<TreeSnapshot, ProtocolError> {
	let count = read_u32(r).await?;
	if count > MAX_TREE_FILES {
		return Err(ProtocolError::BadFrame {
			message: format!("tree of {} files exceeds limit", count),
		});
	}

	let mut records = Vec::with_capacity(count as usize);
	for _ in 0..count {
		let path = read_string(r).await?;
		let mtime = FileTime::from_nanos(read_i64(r).await?);
		let size = read_u64(r).await?;
		records.push(FileRecord::new(path, mtime, size, None));
	}
	Ok(TreeSnapshot::from_records(label, records))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_integer_roundtrip() {
		let mut buf = Vec::new();
		write_u32(&mut buf, 0xDEAD_BEEF).await.unwrap();
		write_i64(&mut buf, -42).await.unwrap();
		write_u64(&mut buf, u64::MAX).await.unwrap();

		let mut r = buf.as_slice();
		assert_eq!(read_u32(&mut r).await.unwrap(), 0xDEAD_BEEF);
		assert_eq!(read_i64(&mut r).await.unwrap(), -42);
		assert_eq!(read_u64(&mut r).await.unwrap(), u64::MAX);
	}

	#[tokio::test]
	async fn test_string_roundtrip() {
		let mut buf = Vec::new();
		write_string(&mut buf, "hello/мир.txt").await.unwrap();

		let mut r = buf.as_slice();
		assert_eq!(read_string(&mut r).await.unwrap(), "hello/мир.txt");
	}

	#[tokio::test]
	async fn test_oversized_string_rejected() {
		// Forged length prefix way past the cap
		let mut buf = Vec::new();
		write_u32(&mut buf, MAX_STRING_LEN + 1).await.unwrap();

		let mut r = buf.as_slice();
		let err = read_string(&mut r).await.unwrap_err();
		assert!(matches!(err, ProtocolError::BadFrame { .. }));
	}

	#[tokio::test]
	async fn test_truncated_frame_is_disconnect() {
		let mut buf = Vec::new();
		write_u32(&mut buf, 10).await.unwrap();
		buf.extend_from_slice(b"abc");

		let mut r = buf.as_slice();
		let err = read_string(&mut r).await.unwrap_err();
		assert!(matches!(err, ProtocolError::Disconnected));
	}

	#[tokio::test]
	async fn test_tree_roundtrip() {
		let records = vec![
			FileRecord::new("a.txt".to_string(), FileTime::from_nanos(1_000), 3, None),
			FileRecord::new("sub/b.txt".to_string(), FileTime::from_nanos(2_000), 7, None),
		];
		let tree = TreeSnapshot::from_records("peer", records);

		let mut buf = Vec::new();
		write_tree(&mut buf, &tree).await.unwrap();

		let mut r = buf.as_slice();
		let decoded = read_tree(&mut r, "peer").await.unwrap();
		assert_eq!(decoded.len(), 2);
		let b = decoded.get("sub/b.txt").unwrap();
		assert_eq!(b.mtime(), FileTime::from_nanos(2_000));
		assert_eq!(b.size(), 7);
	}
}

// vim: ts=4
