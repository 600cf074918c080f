//! Content-addressed blob store (§4.1).
//!
//! Layout: `<root>/<hash[0:2]>/<hash[2:4]>/<hash>`, mode `0644` regardless
//! of the caller's umask. Inserts are a rename-from-temp so that two
//! workers racing to insert identical content never corrupt each other's
//! write — the loser's temp file is simply discarded (§8 "Blob-store
//! insert idempotence").

mod error;

use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

pub use error::{BlobStoreError, Result};

/// A 256-bit content hash (BLAKE3), stored as lowercase hex in paths and
/// catalog rows alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobHash([u8; 32]);

impl BlobHash {
	pub fn from_bytes(bytes: [u8; 32]) -> Self {
		Self(bytes)
	}

	/// Hash a byte slice directly (used by tests and small-file paths).
	pub fn of(data: &[u8]) -> Self {
		Self(*blake3::hash(data).as_bytes())
	}

	pub fn to_hex(self) -> String {
		hex::encode(self.0)
	}

	pub fn from_hex(s: &str) -> Option<Self> {
		let mut buf = [0u8; 32];
		hex::decode_to_slice(s, &mut buf).ok()?;
		Some(Self(buf))
	}
}

impl std::fmt::Display for BlobHash {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.to_hex())
	}
}

/// Incrementally computes a [`BlobHash`] over a stream written in chunks,
/// mirroring the copy worker's "stream content while updating a running
/// hash" requirement (§4.6 step 2).
#[derive(Default)]
pub struct Hasher(blake3::Hasher);

impl Hasher {
	pub fn new() -> Self {
		Self(blake3::Hasher::new())
	}

	pub fn update(&mut self, chunk: &[u8]) -> &mut Self {
		self.0.update(chunk);
		self
	}

	pub fn finalize(&self) -> BlobHash {
		BlobHash(*self.0.finalize().as_bytes())
	}
}

/// Result of [`BlobStore::insert_from_temp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
	/// This call created the blob file; it did not exist before.
	Created,
	/// The blob already existed; the caller's temp file was discarded.
	Deduplicated,
}

const FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;

/// A content-addressed directory tree rooted at `root`.
#[derive(Debug, Clone)]
pub struct BlobStore {
	root: PathBuf,
}

impl BlobStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// `<root>/<hh>/<hh>/<hash>`, the two-level fan-out from §4.1/§6.
	pub fn path_for(&self, hash: BlobHash) -> PathBuf {
		let hex = hash.to_hex();
		self.root.join(&hex[0..2]).join(&hex[2..4]).join(&hex)
	}

	/// Cheap existence probe.
	pub fn probe(&self, hash: BlobHash) -> bool {
		self.path_for(hash).is_file()
	}

	/// Atomically move `temp_path` into the final location for `hash`.
	///
	/// The move is a `rename` within the blob store's filesystem; a temp
	/// file on a different filesystem is a caller error surfaced as
	/// [`BlobStoreError::CrossDevice`] (§4.1 "cross-device inserts are
	/// errors").
	pub fn insert_from_temp(&self, temp_path: &Path, hash: BlobHash) -> Result<InsertOutcome> {
		let dest = self.path_for(hash);

		if dest.is_file() {
			// Someone else already has this blob; discard our temp file.
			// Benign race per §8 "two concurrent insert_from_temp calls ...
			// produce one final file ... and no error".
			let _ = fs::remove_file(temp_path);
			return Ok(InsertOutcome::Deduplicated);
		}

		if let Some(parent) = dest.parent() {
			create_dir_world_traversable(parent)
				.map_err(|e| BlobStoreError::from_io(parent.to_path_buf(), e))?;
		}

		// Set the permission bits before the rename so that readers never
		// observe a blob file with the wrong mode, even momentarily.
		fs::set_permissions(temp_path, fs::Permissions::from_mode(FILE_MODE))
			.map_err(|e| BlobStoreError::from_io(temp_path.to_path_buf(), e))?;

		match fs::rename(temp_path, &dest) {
			Ok(()) => Ok(InsertOutcome::Created),
			Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
				// Lost a race against a peer between our probe and our rename.
				let _ = fs::remove_file(temp_path);
				Ok(InsertOutcome::Deduplicated)
			}
			Err(e) => {
				let err = BlobStoreError::from_io(temp_path.to_path_buf(), e);
				if matches!(err, BlobStoreError::CrossDevice { .. }) {
					return Err(err);
				}
				// rename() returning EEXIST-like "dest appeared concurrently"
				// is covered above; re-check existence for any other error
				// that might mean a peer beat us to it under a lock-free rename.
				if dest.is_file() {
					let _ = fs::remove_file(temp_path);
					return Ok(InsertOutcome::Deduplicated);
				}
				Err(err)
			}
		}
	}

	/// Create a hardlink at `dest_path` pointing at the blob for `hash`.
	/// Parent directories are created with `0755`. Placing a hardlink at a
	/// destination that already links to the same blob is treated as
	/// success (§4.6 step 4 idempotence).
	pub fn hardlink_to(&self, hash: BlobHash, dest_path: &Path) -> Result<()> {
		let src = self.path_for(hash);

		if let Some(parent) = dest_path.parent() {
			create_dir_world_traversable(parent)
				.map_err(|e| BlobStoreError::from_io(parent.to_path_buf(), e))?;
		}

		match fs::hard_link(&src, dest_path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
				if paths_are_same_inode(dest_path, &src)? {
					Ok(())
				} else {
					Err(BlobStoreError::from_io(dest_path.to_path_buf(), e))
				}
			}
			Err(e) => Err(BlobStoreError::from_io(dest_path.to_path_buf(), e)),
		}
	}

	/// Remove a blob from disk. Only used by out-of-band GC/verification,
	/// never by the copy path (§4.1).
	pub fn remove(&self, hash: BlobHash) -> Result<()> {
		let path = self.path_for(hash);
		match fs::remove_file(&path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(BlobStoreError::from_io(path, e)),
		}
	}
}

fn create_dir_world_traversable(dir: &Path) -> io::Result<()> {
	fs::create_dir_all(dir)?;
	fs::set_permissions(dir, fs::Permissions::from_mode(DIR_MODE))
}

fn paths_are_same_inode(a: &Path, b: &Path) -> Result<bool> {
	let meta_a = fs::metadata(a).map_err(|e| BlobStoreError::from_io(a.to_path_buf(), e))?;
	let meta_b = fs::metadata(b).map_err(|e| BlobStoreError::from_io(b.to_path_buf(), e))?;
	Ok(meta_a.dev() == meta_b.dev() && meta_a.ino() == meta_b.ino())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	fn write_temp(dir: &Path, contents: &[u8]) -> PathBuf {
		let path = dir.join(format!("tmp-{}", uuid_like()));
		let mut f = fs::File::create(&path).unwrap();
		f.write_all(contents).unwrap();
		path
	}

	fn uuid_like() -> u64 {
		use std::time::{SystemTime, UNIX_EPOCH};
		SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos() as u64
	}

	#[test]
	fn insert_then_probe() {
		let dir = tempfile::tempdir().unwrap();
		let store = BlobStore::new(dir.path());
		let contents = b"hello\n";
		let hash = BlobHash::of(contents);

		assert!(!store.probe(hash));

		let temp = write_temp(dir.path(), contents);
		let outcome = store.insert_from_temp(&temp, hash).unwrap();
		assert_eq!(outcome, InsertOutcome::Created);
		assert!(store.probe(hash));

		let path = store.path_for(hash);
		let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
		assert_eq!(mode, FILE_MODE);
	}

	#[test]
	fn duplicate_insert_is_deduplicated() {
		let dir = tempfile::tempdir().unwrap();
		let store = BlobStore::new(dir.path());
		let contents = b"same bytes";
		let hash = BlobHash::of(contents);

		let temp1 = write_temp(dir.path(), contents);
		assert_eq!(
			store.insert_from_temp(&temp1, hash).unwrap(),
			InsertOutcome::Created
		);

		let temp2 = write_temp(dir.path(), contents);
		assert_eq!(
			store.insert_from_temp(&temp2, hash).unwrap(),
			InsertOutcome::Deduplicated
		);
		assert!(!temp2.exists());
	}

	#[test]
	fn empty_file_hashes_to_blake3_of_empty_string() {
		let hash = BlobHash::of(b"");
		assert_eq!(hash.to_hex(), blake3::hash(b"").to_hex().to_string());
	}

	#[test]
	fn hardlink_placement_is_idempotent() {
		let dir = tempfile::tempdir().unwrap();
		let store = BlobStore::new(dir.path());
		let contents = b"hardlink me";
		let hash = BlobHash::of(contents);
		let temp = write_temp(dir.path(), contents);
		store.insert_from_temp(&temp, hash).unwrap();

		let dest = dir.path().join("links").join("a.txt");
		store.hardlink_to(hash, &dest).unwrap();
		// Second placement at the same destination, same blob: success.
		store.hardlink_to(hash, &dest).unwrap();

		let meta = fs::metadata(&dest).unwrap();
		assert_eq!(meta.nlink(), 2);
	}

	#[test]
	fn hasher_streaming_matches_one_shot() {
		let data = b"streamed content across chunks";
		let mut hasher = Hasher::new();
		hasher.update(&data[..10]).update(&data[10..]);
		assert_eq!(hasher.finalize(), BlobHash::of(data));
	}
}
