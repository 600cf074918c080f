//! Single-pass traversal of a mounted filesystem subtree (§4.3).

use std::fs;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::error::{EnumeratorError, Result};
use crate::record::{FsType, Record};

#[derive(Debug, Default, Clone, Copy)]
pub struct EnumerationStats {
	pub records_written: u64,
	pub unreadable_entries: u64,
	pub mount_boundaries_skipped: u64,
}

fn classify(meta: &fs::Metadata) -> FsType {
	let ft = meta.file_type();
	if ft.is_file() {
		FsType::File
	} else if ft.is_dir() {
		FsType::Dir
	} else if ft.is_symlink() {
		FsType::Symlink
	} else {
		FsType::Special
	}
}

/// Walk `root`, writing one `.raw` record per directory entry (plus one for
/// `root` itself) to `out`. Never crosses mount points: a subdirectory whose
/// device id differs from `root`'s is recorded but not descended into. Never
/// aborts on an unreadable entry — it becomes a sentinel record instead
/// (§4.3 "must not fail on individual unreadable entries").
pub fn enumerate_into<W: Write>(root: &Path, out: &mut W) -> Result<EnumerationStats> {
	let root_meta = fs::symlink_metadata(root).map_err(|source| EnumeratorError::OpenRoot {
		path: root.to_path_buf(),
		source,
	})?;
	let root_dev = root_meta.dev();

	let mut stats = EnumerationStats::default();
	let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];

	write_entry_record(root, &root_meta, out, &mut stats)?;

	while let Some(dir) = stack.pop() {
		let entries = match fs::read_dir(&dir) {
			Ok(entries) => entries,
			Err(e) => {
				tracing::warn!(path = %dir.display(), error = %e, "unreadable directory, recording sentinel");
				write_sentinel(&dir, out, &mut stats)?;
				continue;
			}
		};

		for entry in entries {
			let entry = match entry {
				Ok(e) => e,
				Err(e) => {
					tracing::warn!(dir = %dir.display(), error = %e, "unreadable directory entry");
					stats.unreadable_entries += 1;
					continue;
				}
			};
			let path = entry.path();

			let meta = match fs::symlink_metadata(&path) {
				Ok(m) => m,
				Err(e) => {
					tracing::warn!(path = %path.display(), error = %e, "lstat failed, recording sentinel");
					write_sentinel(&path, out, &mut stats)?;
					continue;
				}
			};

			write_entry_record(&path, &meta, out, &mut stats)?;

			if meta.is_dir() {
				if meta.dev() == root_dev {
					stack.push(path);
				} else {
					stats.mount_boundaries_skipped += 1;
					tracing::info!(path = %path.display(), "mount boundary, not descending");
				}
			}
		}
	}

	Ok(stats)
}

fn write_entry_record<W: Write>(path: &Path, meta: &fs::Metadata, out: &mut W, stats: &mut EnumerationStats) -> Result<()> {
	let record = Record {
		fs_type: classify(meta),
		dev: meta.dev(),
		ino: meta.ino(),
		nlink: meta.nlink(),
		size: meta.size() as i64,
		mtime: meta.mtime(),
		path: path.as_os_str().as_bytes().to_vec(),
	};
	record.write_to(out)?;
	stats.records_written += 1;
	Ok(())
}

fn write_sentinel<W: Write>(path: &Path, out: &mut W, stats: &mut EnumerationStats) -> Result<()> {
	let record = Record::unreadable(path.as_os_str().as_bytes().to_vec());
	record.write_to(out)?;
	stats.records_written += 1;
	stats.unreadable_entries += 1;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::record::{FIELD_SEP, RECORD_TERM};
	use std::os::unix::fs::symlink;

	fn split_records(buf: &[u8]) -> Vec<Vec<Vec<u8>>> {
		buf.split(|&b| b == RECORD_TERM)
			.filter(|r| !r.is_empty())
			.map(|r| r.split(|&b| b == FIELD_SEP).map(|f| f.to_vec()).collect())
			.collect()
	}

	#[test]
	fn enumerates_files_dirs_and_symlinks() {
		let dir = tempfile::tempdir().unwrap();
		fs::write(dir.path().join("a.txt"), b"hello\n").unwrap();
		fs::create_dir(dir.path().join("sub")).unwrap();
		fs::write(dir.path().join("sub/b.txt"), b"hello\n").unwrap();
		symlink("a.txt", dir.path().join("link")).unwrap();

		let mut buf = Vec::new();
		let stats = enumerate_into(dir.path(), &mut buf).unwrap();

		let records = split_records(&buf);
		// root + a.txt + sub + sub/b.txt + link == 5
		assert_eq!(records.len(), 5);
		assert_eq!(stats.records_written, 5);
		assert_eq!(stats.unreadable_entries, 0);

		let paths: Vec<String> = records
			.iter()
			.map(|r| String::from_utf8_lossy(&r[6]).to_string())
			.collect();
		assert!(paths.iter().any(|p| p.ends_with("a.txt")));
		assert!(paths.iter().any(|p| p.ends_with("sub/b.txt")));
		assert!(paths.iter().any(|p| p.ends_with("link")));

		let link_record = records
			.iter()
			.find(|r| String::from_utf8_lossy(&r[6]).ends_with("link"))
			.unwrap();
		assert_eq!(link_record[0], b"l");
	}

	#[test]
	fn hardlinked_files_share_dev_and_ino() {
		let dir = tempfile::tempdir().unwrap();
		fs::write(dir.path().join("orig"), b"x").unwrap();
		fs::hard_link(dir.path().join("orig"), dir.path().join("linked")).unwrap();

		let mut buf = Vec::new();
		enumerate_into(dir.path(), &mut buf).unwrap();
		let records = split_records(&buf);

		let orig = records
			.iter()
			.find(|r| String::from_utf8_lossy(&r[6]).ends_with("orig"))
			.unwrap();
		let linked = records
			.iter()
			.find(|r| String::from_utf8_lossy(&r[6]).ends_with("linked"))
			.unwrap();
		assert_eq!(orig[1], linked[1]); // dev
		assert_eq!(orig[2], linked[2]); // ino
	}

	#[test]
	fn path_with_field_separator_byte_is_recorded_untransformed() {
		let dir = tempfile::tempdir().unwrap();
		let mut name = std::ffi::OsString::from("weird");
		name.push(std::ffi::OsStr::from_bytes(&[FIELD_SEP]));
		name.push("name");
		fs::write(dir.path().join(&name), b"z").unwrap();

		let mut buf = Vec::new();
		enumerate_into(dir.path(), &mut buf).unwrap();
		let records = split_records(&buf);
		// The path field itself contains a literal FS byte, so naive
		// field-splitting on FS fractures it — this is exactly why escaping
		// is deferred to the loader (§4.4). Confirm the raw bytes exist
		// somewhere in the unsplit buffer instead.
		assert!(buf.windows(name.as_bytes().len()).any(|w| w == name.as_bytes()));
		assert!(records.len() >= 2);
	}
}
