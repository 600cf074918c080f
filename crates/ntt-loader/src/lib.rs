//! Loader: transforms a `.raw` enumeration stream into partitioned catalog
//! state (§4.4).
//!
//! This is the hardest non-concurrent component because filenames can
//! contain every byte that is structurally significant to a line-oriented
//! bulk loader, including the enumerator's own field delimiter. The pipeline
//! is single-transactional per medium: either every step below lands, or
//! none does, enforced by running the whole thing inside one Postgres
//! transaction on one held connection (required for the `ON COMMIT DROP`
//! temp staging table to behave as a true scratch space, §4.4 step 3).

mod error;
mod escape;
mod exclude;

use std::io::Read;

use ntt_catalog::{ident, Catalog};
use ntt_config::ExclusionPattern;
use sqlx::Connection;

pub use error::{LoaderError, Result};
pub use exclude::ExclusionMatcher;

/// Path bytes longer than this are truncated and flagged `path_error`
/// rather than silently dropped (§4.4 edge cases).
pub const MAX_PATH_BYTES: usize = 4096;

#[derive(Debug, Default, Clone)]
pub struct LoadReport {
	pub records_staged: u64,
	pub duplicate_paths: u64,
	pub non_file_inodes: u64,
	pub all_paths_excluded_inodes: u64,
}

pub struct Loader {
	catalog: Catalog,
	matcher: ExclusionMatcher,
}

impl Loader {
	pub fn new(catalog: Catalog, patterns: Vec<ExclusionPattern>) -> Result<Self> {
		Ok(Self {
			catalog,
			matcher: ExclusionMatcher::new(patterns)?,
		})
	}

	/// Run the full load pipeline for `medium_hash` against the given raw
	/// stream reader. Fails loudly and leaves the medium untouched if its
	/// partitions already hold data (§3 "never silently replace").
	pub async fn load<R: Read>(&self, medium_hash: &str, raw: &mut R) -> Result<LoadReport> {
		// Step 1: partition creation, refuses on a non-empty partition pair.
		self.catalog.ensure_partitions(medium_hash).await?;

		let inode_tbl = ident::inode_partition_name(medium_hash)?;
		let path_tbl = ident::path_partition_name(medium_hash)?;

		let mut conn = self.catalog.pool().acquire().await?;
		let mut tx = conn.begin().await?;

		// Step 2 + 3: field-local escaping into a COPY TEXT payload, then
		// bulk import into a transaction-scoped staging table.
		sqlx::raw_sql(
			"CREATE TEMP TABLE raw_staging ( \
				seq BIGSERIAL, \
				fs_type CHAR(1) NOT NULL, \
				dev BIGINT NOT NULL, \
				ino BIGINT NOT NULL, \
				nlink INT NOT NULL, \
				size BIGINT NOT NULL, \
				mtime BIGINT NOT NULL, \
				path_bytes BYTEA NOT NULL \
			) ON COMMIT DROP",
		)
		.execute(&mut *tx)
		.await?;

		let mut payload = Vec::new();
		escape::transform_raw_to_copy_stream(raw, &mut payload)?;

		let mut writer = tx
			.copy_in_raw(
				"COPY raw_staging (fs_type, dev, ino, nlink, size, mtime, path_bytes) \
				 FROM STDIN WITH (FORMAT text, DELIMITER E'\\x1c')",
			)
			.await?;
		writer.send(payload).await?;
		let records_staged = writer.finish().await?;

		// Step 4: deduplicate inodes by (medium_hash, ino), first occurrence
		// (lowest staging sequence number) wins.
		sqlx::query(&format!(
			r#"
			INSERT INTO {inode_tbl} (medium_hash, ino, fs_type, dev, nlink, size, mtime)
			SELECT DISTINCT ON (ino) $1, ino, fs_type, dev, nlink, size, to_timestamp(mtime)
			FROM raw_staging
			ORDER BY ino, seq
			"#
		))
		.bind(medium_hash)
		.execute(&mut *tx)
		.await?;

		// Duplicate *paths* (same bytes, possibly different ino) indicate
		// source filesystem corruption (§4.4 edge cases); count them before
		// the dedup insert discards all but the tie-break winner.
		let duplicate_paths: i64 = sqlx::query_scalar(
			"SELECT count(*) FROM ( \
				SELECT path_bytes FROM raw_staging GROUP BY path_bytes HAVING count(DISTINCT ino) > 1 \
			 ) dupes",
		)
		.fetch_one(&mut *tx)
		.await?;

		// Step 5: insert paths, truncating oversized path_bytes rather than
		// dropping them, tie-breaking duplicate path bytes on smallest ino.
		sqlx::query(&format!(
			r#"
			INSERT INTO {path_tbl} (medium_hash, ino, path_bytes, path_error)
			SELECT DISTINCT ON (path_bytes)
				$1,
				ino,
				CASE WHEN octet_length(path_bytes) > $2 THEN substr(path_bytes, 1, $2) ELSE path_bytes END,
				CASE WHEN octet_length(path_bytes) > $2 THEN 'path_error' ELSE NULL END
			FROM raw_staging
			ORDER BY path_bytes, ino ASC
			"#
		))
		.bind(medium_hash)
		.bind(MAX_PATH_BYTES as i32)
		.execute(&mut *tx)
		.await?;

		if duplicate_paths > 0 {
			sqlx::query("UPDATE medium SET problems = problems || $2 WHERE medium_hash = $1")
				.bind(medium_hash)
				.bind(serde_json::json!({ "duplicate_paths": duplicate_paths }))
				.execute(&mut *tx)
				.await?;
		}

		// Step 6: apply exclusion patterns to the freshly inserted paths.
		let rows: Vec<(i64, Vec<u8>)> =
			sqlx::query_as(&format!("SELECT ino, path_bytes FROM {path_tbl} WHERE medium_hash = $1"))
				.bind(medium_hash)
				.fetch_all(&mut *tx)
				.await?;

		for (ino, path_bytes) in rows {
			let reason = exclude::shell_unsafe_reason(&path_bytes).or_else(|| self.matcher.exclude_reason(&path_bytes));
			if let Some(reason) = reason {
				sqlx::query(&format!(
					"UPDATE {path_tbl} SET exclude_reason = $4 WHERE medium_hash = $1 AND ino = $2 AND path_bytes = $3"
				))
				.bind(medium_hash)
				.bind(ino)
				.bind(&path_bytes)
				.bind(reason)
				.execute(&mut *tx)
				.await?;
			}
		}

		tx.commit().await?;

		// Step 7, via the catalog's committed-state bulk operation — kept
		// as a separate statement rather than folded into the above
		// transaction since it only reads back rows the transaction above
		// just committed.
		let (non_file_inodes, all_paths_excluded_inodes) = self.catalog.mark_non_copyable_bulk(medium_hash).await?;

		// Step 8: set enum_done only after every prior step has landed.
		self.catalog.set_enum_done(medium_hash).await?;

		Ok(LoadReport {
			records_staged,
			duplicate_paths: duplicate_paths as u64,
			non_file_inodes,
			all_paths_excluded_inodes,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn max_path_bytes_matches_spec_limit() {
		assert_eq!(MAX_PATH_BYTES, 4096);
	}
}
