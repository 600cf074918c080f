//! Archiver: seals a medium's copy phase into a compressed tarball once
//! every precondition in §4.7 holds.

mod error;
mod preconditions;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use ntt_blob_store::{BlobHash, Hasher};
use ntt_catalog::Catalog;

pub use error::{ArchiverError, Result};
pub use preconditions::IMAGE_DIGEST_KEY;

const ZSTD_LEVEL: i32 = 19;
const STREAM_CHUNK: usize = 64 * 1024;

pub struct Archiver {
	catalog: Catalog,
	archive_dir: PathBuf,
}

/// Result of a successful archival run.
pub struct ArchiveReport {
	pub archive_path: PathBuf,
	pub digest: BlobHash,
}

impl Archiver {
	pub fn new(catalog: Catalog, archive_dir: impl Into<PathBuf>) -> Self {
		Self {
			catalog,
			archive_dir: archive_dir.into(),
		}
	}

	/// Run the full §4.7 sequence: verify preconditions, write
	/// `<medium_hash>.tar.zst` containing the image, the raw enumeration
	/// stream, and a metadata JSON document, verify the archive's integrity
	/// by reading it back, then remove the transient image and mount
	/// points. Any failure before the integrity check passes leaves the
	/// working data untouched.
	pub async fn archive(&self, medium_hash: &str, raw_stream_path: &Path, mount_points: &[PathBuf]) -> Result<ArchiveReport> {
		let medium = preconditions::check(&self.catalog, medium_hash).await?;

		std::fs::create_dir_all(&self.archive_dir)?;
		let archive_path = self.archive_dir.join(format!("{medium_hash}.tar.zst"));

		let metadata = build_metadata(&medium, raw_stream_path);
		let write_digest = write_archive(&archive_path, Path::new(&medium.image_path), raw_stream_path, &metadata)?;

		let read_digest = preconditions::hash_file(&archive_path)?;
		if read_digest != write_digest {
			return Err(ArchiverError::IntegrityMismatch {
				medium_hash: medium_hash.to_string(),
				expected: write_digest.to_hex(),
				actual: read_digest.to_hex(),
			});
		}

		tracing::info!(%medium_hash, archive_path = %archive_path.display(), digest = %write_digest, "archive verified, removing transient data");

		remove_if_exists(Path::new(&medium.image_path))?;
		for mount_point in mount_points {
			remove_if_exists(mount_point)?;
		}

		self.catalog.set_archived(medium_hash).await?;

		Ok(ArchiveReport {
			archive_path,
			digest: write_digest,
		})
	}
}

fn build_metadata(medium: &ntt_catalog::Medium, raw_stream_path: &Path) -> serde_json::Value {
	serde_json::json!({
		"medium_hash": medium.medium_hash,
		"label": medium.label,
		"health": medium.health,
		"problems": medium.problems,
		"enum_done": medium.enum_done,
		"copy_done": medium.copy_done,
		"created_at": medium.created_at,
		"raw_stream_name": raw_stream_path.file_name().map(|n| n.to_string_lossy().into_owned()),
	})
}

/// A `Write` wrapper that feeds every byte through a [`Hasher`] as it's
/// written, so the digest of the finished archive is known without a
/// second pass over it (§4.7 "verify integrity by reading back a digest"
/// compares this write-time digest against one computed from a fresh read).
struct HashingWriter<W> {
	inner: W,
	hasher: Hasher,
}

impl<W: Write> Write for HashingWriter<W> {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		let n = self.inner.write(buf)?;
		self.hasher.update(&buf[..n]);
		Ok(n)
	}

	fn flush(&mut self) -> io::Result<()> {
		self.inner.flush()
	}
}

fn write_archive(archive_path: &Path, image_path: &Path, raw_stream_path: &Path, metadata: &serde_json::Value) -> Result<BlobHash> {
	let file = File::create(archive_path)?;
	let hashing = HashingWriter { inner: file, hasher: Hasher::new() };
	let mut encoder = zstd::Encoder::new(hashing, ZSTD_LEVEL)?;

	{
		let mut builder = tar::Builder::new(&mut encoder);
		append_file(&mut builder, image_path, "image")?;
		append_file(&mut builder, raw_stream_path, "enumeration.raw")?;
		append_bytes(&mut builder, "metadata.json", &serde_json::to_vec_pretty(metadata)?)?;
		builder.finish()?;
	}

	let hashing = encoder.finish()?;
	hashing.inner.sync_all()?;
	Ok(hashing.hasher.finalize())
}

fn append_file<W: Write>(builder: &mut tar::Builder<W>, path: &Path, name: &str) -> io::Result<()> {
	let mut file = File::open(path)?;
	let metadata = file.metadata()?;
	let mut header = tar::Header::new_gnu();
	header.set_entry_type(tar::EntryType::Regular);
	header.set_size(metadata.len());
	header.set_mode(0o644);
	header.set_cksum();
	builder.append_data(&mut header, name, &mut file)
}

fn append_bytes<W: Write>(builder: &mut tar::Builder<W>, name: &str, data: &[u8]) -> io::Result<()> {
	let mut header = tar::Header::new_gnu();
	header.set_entry_type(tar::EntryType::Regular);
	header.set_size(data.len() as u64);
	header.set_mode(0o644);
	header.set_cksum();
	builder.append_data(&mut header, name, data)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
	let metadata = match std::fs::symlink_metadata(path) {
		Ok(m) => m,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
		Err(e) => return Err(e),
	};
	if metadata.is_dir() {
		std::fs::remove_dir_all(path)
	} else {
		std::fs::remove_file(path)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hashing_writer_digest_matches_direct_hash_of_written_bytes() {
		let mut buf = Vec::new();
		{
			let mut w = HashingWriter { inner: &mut buf, hasher: Hasher::new() };
			w.write_all(b"hello ").unwrap();
			w.write_all(b"world").unwrap();
			assert_eq!(w.hasher.finalize(), BlobHash::of(b"hello world"));
		}
		assert_eq!(buf, b"hello world");
	}

	#[test]
	fn write_then_read_back_archive_round_trips_and_digests_match() {
		let dir = tempfile::tempdir().unwrap();
		let image_path = dir.path().join("image.bin");
		std::fs::write(&image_path, b"disk image bytes").unwrap();
		let raw_path = dir.path().join("enum.raw");
		std::fs::write(&raw_path, b"raw stream bytes").unwrap();

		let archive_path = dir.path().join("out.tar.zst");
		let metadata = serde_json::json!({ "medium_hash": "abc123" });
		let write_digest = write_archive(&archive_path, &image_path, &raw_path, &metadata).unwrap();

		let read_digest = preconditions::hash_file(&archive_path).unwrap();
		assert_eq!(write_digest, read_digest);

		let decompressed = zstd::decode_all(File::open(&archive_path).unwrap()).unwrap();
		let mut archive = tar::Archive::new(&decompressed[..]);
		let mut names: Vec<String> = archive
			.entries()
			.unwrap()
			.map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
			.collect();
		names.sort();
		assert_eq!(names, vec!["enumeration.raw", "image", "metadata.json"]);
	}

	#[test]
	fn remove_if_exists_is_idempotent_on_missing_path() {
		let dir = tempfile::tempdir().unwrap();
		let missing = dir.path().join("nope");
		assert!(remove_if_exists(&missing).is_ok());
	}
}
