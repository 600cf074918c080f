//! Archival preconditions (§4.7): every inode terminal, no live claim held,
//! the image file present and matching its recorded digest, `copy_done` set.

use std::path::Path;

use ntt_blob_store::{BlobHash, Hasher};
use ntt_catalog::{Catalog, Medium};

use crate::error::{ArchiverError, Result};

const STREAM_CHUNK: usize = 64 * 1024;

/// Key under `medium.problems` where the image's content digest is recorded
/// at registration time (§9 open question: `medium_hash` itself is a hybrid
/// fingerprint of size + model/serial + first/last megabyte, which the
/// imaging collaborator derives and this crate has no way to re-derive from
/// bytes on disk alone; a full-content BLAKE3 recorded once and reverified
/// here is the part of "matches its expected hash" the Archiver can own).
pub const IMAGE_DIGEST_KEY: &str = "image_digest";

/// Verify every §4.7 precondition and return the medium row if all hold.
pub async fn check(catalog: &Catalog, medium_hash: &str) -> Result<Medium> {
	let medium = catalog.get_medium(medium_hash).await?;

	let pending = catalog.pending_count(medium_hash).await?;
	if pending > 0 {
		return not_ready(medium_hash, format!("{pending} inode(s) not yet terminal (pending or failed_retryable)"));
	}

	let live_claims = catalog.live_claims_count(medium_hash).await?;
	if live_claims > 0 {
		return not_ready(medium_hash, format!("{live_claims} inode(s) still claimed by a live worker"));
	}

	if medium.copy_done.is_none() {
		return not_ready(medium_hash, "copy_done is not set".to_string());
	}

	let image_path = Path::new(&medium.image_path);
	if !image_path.is_file() {
		return not_ready(medium_hash, format!("image file {} does not exist", image_path.display()));
	}

	match medium.problems.get(IMAGE_DIGEST_KEY).and_then(|v| v.as_str()) {
		Some(expected_hex) => {
			let expected = BlobHash::from_hex(expected_hex)
				.ok_or_else(|| ArchiverError::NotReady { medium_hash: medium_hash.to_string(), reason: format!("recorded {IMAGE_DIGEST_KEY} is not a valid digest") })?;
			let actual = hash_file(image_path)?;
			if actual != expected {
				return Err(ArchiverError::IntegrityMismatch {
					medium_hash: medium_hash.to_string(),
					expected: expected.to_hex(),
					actual: actual.to_hex(),
				});
			}
		}
		None => return not_ready(medium_hash, format!("no {IMAGE_DIGEST_KEY} recorded to verify the image against")),
	}

	Ok(medium)
}

fn not_ready<T>(medium_hash: &str, reason: String) -> Result<T> {
	Err(ArchiverError::NotReady {
		medium_hash: medium_hash.to_string(),
		reason,
	})
}

pub(crate) fn hash_file(path: &Path) -> std::io::Result<BlobHash> {
	let mut file = std::fs::File::open(path)?;
	let mut hasher = Hasher::new();
	let mut buf = [0u8; STREAM_CHUNK];
	loop {
		let n = std::io::Read::read(&mut file, &mut buf)?;
		if n == 0 {
			break;
		}
		hasher.update(&buf[..n]);
	}
	Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hash_file_of_empty_file_is_blake3_of_empty_string() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("empty");
		std::fs::write(&path, b"").unwrap();
		let hash = hash_file(&path).unwrap();
		assert_eq!(hash, BlobHash::of(b""));
	}

	#[test]
	fn hash_file_matches_direct_hash_of_bytes() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("data");
		std::fs::write(&path, b"hello\n").unwrap();
		let hash = hash_file(&path).unwrap();
		assert_eq!(hash, BlobHash::of(b"hello\n"));
	}
}
