//! Partitioned relational catalog (§3, §4.2, §4.4, §4.6).
//!
//! `medium` and `blob` are fixed tables shared across all media; `inode_p_*`
//! and `path_p_*` are created per medium so that claim contention and
//! vacuum pressure from one medium never touch another's rows. Table names
//! can't be bound as query parameters, so every interpolated identifier
//! goes through [`ident`] first.

mod error;
pub mod ident;
pub mod models;

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use futures::TryStreamExt;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

pub use error::{CatalogError, Result};
pub use models::*;

const BASE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS medium (
    medium_hash TEXT PRIMARY KEY,
    label TEXT NOT NULL,
    image_path TEXT NOT NULL,
    health TEXT NOT NULL DEFAULT 'ok' CHECK (health IN ('ok', 'incomplete', 'failed')),
    problems JSONB NOT NULL DEFAULT '{}'::jsonb,
    enum_done TIMESTAMPTZ,
    copy_done TIMESTAMPTZ,
    archived TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS blob (
    blob_id TEXT PRIMARY KEY,
    n_hardlinks BIGINT NOT NULL DEFAULT 0,
    external_backup BOOLEAN NOT NULL DEFAULT false,
    mime_type TEXT
);
"#;

/// Connection handle plus the small set of fixed-schema operations. Per-medium
/// partition operations take `medium_hash` explicitly rather than storing it,
/// since a single orchestrator process works multiple media concurrently.
#[derive(Debug, Clone)]
pub struct Catalog {
	pool: PgPool,
}

impl Catalog {
	pub async fn connect(database_url: &str) -> Result<Self> {
		let pool = PgPoolOptions::new()
			.max_connections(16)
			.connect(database_url)
			.await?;
		Ok(Self { pool })
	}

	pub fn from_pool(pool: PgPool) -> Self {
		Self { pool }
	}

	pub fn pool(&self) -> &PgPool {
		&self.pool
	}

	/// Create `medium`/`blob` if absent. Idempotent; safe to call on every
	/// startup the way the teacher's `Database::migrate` does (§11.2).
	pub async fn migrate(&self) -> Result<()> {
		sqlx::raw_sql(BASE_SCHEMA).execute(&self.pool).await?;
		Ok(())
	}

	pub async fn register_medium(&self, medium_hash: &str, label: &str, image_path: &str) -> Result<()> {
		sqlx::query(
			"INSERT INTO medium (medium_hash, label, image_path) VALUES ($1, $2, $3)
             ON CONFLICT (medium_hash) DO NOTHING",
		)
		.bind(medium_hash)
		.bind(label)
		.bind(image_path)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	pub async fn get_medium(&self, medium_hash: &str) -> Result<Medium> {
		sqlx::query_as::<_, Medium>("SELECT * FROM medium WHERE medium_hash = $1")
			.bind(medium_hash)
			.fetch_optional(&self.pool)
			.await?
			.ok_or_else(|| CatalogError::MediumNotFound {
				medium_hash: medium_hash.to_string(),
			})
	}

	/// Create this medium's partitions. Refuses if they already exist and
	/// are non-empty, per §4.4's "loading never silently appends" rule.
	pub async fn ensure_partitions(&self, medium_hash: &str) -> Result<()> {
		let inode_tbl = ident::inode_partition_name(medium_hash)?;
		let path_tbl = ident::path_partition_name(medium_hash)?;

		let inode_exists = table_exists(&self.pool, &inode_tbl).await?;
		if inode_exists {
			let row_count: i64 = sqlx::query_scalar(&format!("SELECT count(*) FROM {inode_tbl}"))
				.fetch_one(&self.pool)
				.await?;
			if row_count > 0 {
				return Err(CatalogError::PartitionsPopulated {
					medium_hash: medium_hash.to_string(),
				});
			}
		} else {
			sqlx::raw_sql(&format!(
				r#"
				CREATE TABLE {inode_tbl} (
					medium_hash TEXT NOT NULL,
					ino BIGINT NOT NULL,
					fs_type CHAR(1) NOT NULL,
					dev BIGINT NOT NULL,
					nlink INT NOT NULL,
					size BIGINT NOT NULL,
					mtime TIMESTAMPTZ,
					blob_id TEXT REFERENCES blob(blob_id),
					mime_type TEXT,
					copied BOOLEAN NOT NULL DEFAULT false,
					status TEXT NOT NULL DEFAULT 'pending',
					error_type TEXT,
					claimed_by TEXT,
					claimed_at TIMESTAMPTZ,
					errors JSONB NOT NULL DEFAULT '[]'::jsonb,
					processed_at TIMESTAMPTZ,
					PRIMARY KEY (medium_hash, ino)
				);
				CREATE INDEX ON {inode_tbl} (status) WHERE status = 'pending';
				"#
			))
			.execute(&self.pool)
			.await?;
		}

		if !table_exists(&self.pool, &path_tbl).await? {
			sqlx::raw_sql(&format!(
				r#"
				CREATE TABLE {path_tbl} (
					medium_hash TEXT NOT NULL,
					ino BIGINT NOT NULL,
					path_bytes BYTEA NOT NULL,
					exclude_reason TEXT,
					path_error TEXT,
					PRIMARY KEY (medium_hash, ino, path_bytes)
				);
				"#
			))
			.execute(&self.pool)
			.await?;
		}

		Ok(())
	}

	/// Bulk-insert deduplicated inode rows via `COPY FROM STDIN` (§4.4 step 4,
	/// §12.3). `rows` must already be deduplicated by `ino` (smallest-ino
	/// tie-break is the loader's job, not the catalog's).
	pub async fn bulk_insert_inodes(&self, medium_hash: &str, rows: &[NewInode]) -> Result<u64> {
		let inode_tbl = ident::inode_partition_name(medium_hash)?;
		if rows.is_empty() {
			return Ok(0);
		}

		let mut tx = self.pool.begin().await?;
		let copy_sql = format!(
			"COPY {inode_tbl} (medium_hash, ino, fs_type, dev, nlink, size, mtime) FROM STDIN WITH (FORMAT csv)"
		);
		let mut writer = tx.copy_in_raw(&copy_sql).await?;

		let mut buf = String::new();
		for row in rows {
			let mtime = row
				.mtime
				.map(|t| t.to_rfc3339())
				.unwrap_or_default();
			buf.push_str(&format!(
				"{},{},{},{},{},{},{}\n",
				csv_field(medium_hash),
				row.ino,
				row.fs_type.as_char(),
				row.dev,
				row.nlink,
				row.size,
				csv_field(&mtime),
			));
		}
		writer.send(buf.into_bytes()).await?;
		writer.finish().await?;
		tx.commit().await?;
		Ok(rows.len() as u64)
	}

	/// Bulk-insert path rows via `COPY ... (FORMAT binary)`, bypassing the
	/// text-format escaping concerns entirely since the binary protocol
	/// carries each field's length explicitly. The loader's main pipeline
	/// goes through its own staging-table SQL instead (its escaping module
	/// exists for that text-format path); this is the primitive for callers
	/// that already hold structured rows. `ino` values not present in the
	/// medium's inode partition are a loader-level programming error, not a
	/// constraint this call checks — the foreign relationship is enforced by
	/// the loader's single-transaction-per-medium discipline, not a DB FK
	/// (partition-local FKs referencing a partitioned parent add no value
	/// here since both tables share the same partition key).
	pub async fn bulk_insert_paths(&self, medium_hash: &str, rows: &[NewPath]) -> Result<u64> {
		let path_tbl = ident::path_partition_name(medium_hash)?;
		if rows.is_empty() {
			return Ok(0);
		}

		let mut tx = self.pool.begin().await?;
		let copy_sql = format!("COPY {path_tbl} (medium_hash, ino, path_bytes) FROM STDIN WITH (FORMAT binary)");
		// BYTEA content may contain arbitrary bytes including newlines and
		// commas, so CSV framing is unsafe here; use Postgres COPY BINARY.
		let mut writer = tx.copy_in_raw(&copy_sql).await?;
		let mut buf = binary_copy_header();
		for row in rows {
			append_binary_tuple(&mut buf, medium_hash.as_bytes(), row.ino, &row.path_bytes);
		}
		buf.extend_from_slice(&(-1i16).to_be_bytes());
		writer.send(buf).await?;
		writer.finish().await?;
		tx.commit().await?;
		Ok(rows.len() as u64)
	}

	pub async fn set_enum_done(&self, medium_hash: &str) -> Result<()> {
		sqlx::query("UPDATE medium SET enum_done = now() WHERE medium_hash = $1")
			.bind(medium_hash)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	pub async fn set_copy_done(&self, medium_hash: &str) -> Result<()> {
		sqlx::query("UPDATE medium SET copy_done = now() WHERE medium_hash = $1")
			.bind(medium_hash)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	/// Seal the medium's lifecycle after the Archiver verifies its tarball
	/// (§4.7, §4.8 "copied → archived").
	pub async fn set_archived(&self, medium_hash: &str) -> Result<()> {
		sqlx::query("UPDATE medium SET archived = now() WHERE medium_hash = $1")
			.bind(medium_hash)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	/// Shallow-merge `patch` into `medium.problems` (§4.4 "record the
	/// condition in medium.problems", §4.5 diagnostic events). Top-level
	/// keys in `patch` overwrite the same key in the stored document;
	/// callers that need append semantics (e.g. `diagnostic_events`) pass
	/// the full accumulated array back in, not just the delta.
	pub async fn merge_problems(&self, medium_hash: &str, patch: serde_json::Value) -> Result<()> {
		sqlx::query("UPDATE medium SET problems = problems || $2 WHERE medium_hash = $1")
			.bind(medium_hash)
			.bind(patch)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	/// Set `health` without touching `problems` — callers that also have a
	/// diagnostic patch to record use [`Self::merge_problems`] alongside
	/// this, since the two are independent columns (§6 health derivation).
	pub async fn set_health(&self, medium_hash: &str, health: MediumHealth) -> Result<()> {
		sqlx::query("UPDATE medium SET health = $2 WHERE medium_hash = $1")
			.bind(medium_hash)
			.bind(health.as_str())
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	/// Atomically claim up to `limit` unclaimed inodes (`pending` or
	/// `failed_retryable`) for `worker_id`, using `FOR UPDATE SKIP LOCKED` so
	/// that concurrent copy workers never block on each other's claims
	/// (§4.2, §4.6 — `failed_retryable` must stay reclaimable or retry_count
	/// can never advance past 1).
	pub async fn claim_batch(&self, medium_hash: &str, worker_id: &str, limit: i64) -> Result<Vec<InodeWithPaths>> {
		let inode_tbl = ident::inode_partition_name(medium_hash)?;
		let path_tbl = ident::path_partition_name(medium_hash)?;

		let mut tx = self.pool.begin().await?;

		let claimed: Vec<InodeRow> = sqlx::query_as(&format!(
			r#"
			WITH claimable AS (
				SELECT ino FROM {inode_tbl}
				WHERE medium_hash = $1 AND claimed_by IS NULL
					AND status IN ('pending', 'failed_retryable')
				ORDER BY ino
				LIMIT $2
				FOR UPDATE SKIP LOCKED
			)
			UPDATE {inode_tbl} t
			SET claimed_by = $3, claimed_at = now()
			FROM claimable c
			WHERE t.medium_hash = $1 AND t.ino = c.ino
			RETURNING t.*
			"#
		))
		.bind(medium_hash)
		.bind(limit)
		.bind(worker_id)
		.fetch_all(&mut *tx)
		.await?;

		tx.commit().await?;

		if claimed.is_empty() {
			return Ok(Vec::new());
		}

		let inos: Vec<i64> = claimed.iter().map(|r| r.ino).collect();
		let path_rows: Vec<PathRow> = sqlx::query_as(&format!(
			"SELECT * FROM {path_tbl} WHERE medium_hash = $1 AND ino = ANY($2) AND exclude_reason IS NULL"
		))
		.bind(medium_hash)
		.bind(&inos)
		.fetch_all(&self.pool)
		.await?;

		let mut by_ino: HashMap<i64, Vec<PathRow>> = HashMap::new();
		for p in path_rows {
			by_ino.entry(p.ino).or_default().push(p);
		}

		Ok(claimed
			.into_iter()
			.map(|inode| {
				let paths = by_ino.remove(&inode.ino).unwrap_or_default();
				InodeWithPaths { inode, paths }
			})
			.collect())
	}

	/// Release a claim without recording a result, used when a worker is
	/// killed or times out mid-batch (§4.2 "abandoned claims").
	pub async fn release_claim(&self, medium_hash: &str, ino: i64) -> Result<()> {
		let inode_tbl = ident::inode_partition_name(medium_hash)?;
		sqlx::query(&format!(
			"UPDATE {inode_tbl} SET claimed_by = NULL, claimed_at = NULL WHERE medium_hash = $1 AND ino = $2"
		))
		.bind(medium_hash)
		.bind(ino)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	/// Commit the outcomes of one claimed batch. Builds the result map from
	/// the claim identity set first, so a success/failure silently missing
	/// for a claimed `ino` is a programming error caught here rather than a
	/// quietly-dropped row (§4.6, §9 "no silent drops").
	pub async fn commit_batch(
		&self,
		medium_hash: &str,
		claimed_inos: &[i64],
		successes: &[CopySuccess],
		failures: &[CopyFailure],
	) -> Result<()> {
		let inode_tbl = ident::inode_partition_name(medium_hash)?;

		let mut accounted: HashSet<i64> = HashSet::with_capacity(claimed_inos.len());
		for s in successes {
			accounted.insert(s.ino);
		}
		for f in failures {
			accounted.insert(f.ino);
		}
		let claimed_set: HashSet<i64> = claimed_inos.iter().copied().collect();
		if accounted != claimed_set {
			let missing: Vec<i64> = claimed_set.difference(&accounted).copied().collect();
			return Err(CatalogError::IncompleteCommit {
				medium_hash: medium_hash.to_string(),
				detail: format!("claimed inos with no recorded outcome: {missing:?}"),
			});
		}

		let mut tx = self.pool.begin().await?;

		for s in successes {
			sqlx::query(
				"INSERT INTO blob (blob_id, mime_type) VALUES ($1, $2)
                 ON CONFLICT (blob_id) DO UPDATE SET n_hardlinks = blob.n_hardlinks + $3
                 WHERE blob.blob_id = $1",
			)
			.bind(&s.blob_id)
			.bind(&s.mime_type)
			.bind(s.hardlinks_placed as i64)
			.execute(&mut *tx)
			.await?;

			sqlx::query(&format!(
				r#"
				UPDATE {inode_tbl}
				SET status = 'success', copied = true, blob_id = $3, mime_type = $4,
					claimed_by = NULL, claimed_at = NULL, processed_at = now()
				WHERE medium_hash = $1 AND ino = $2
				"#
			))
			.bind(medium_hash)
			.bind(s.ino)
			.bind(&s.blob_id)
			.bind(&s.mime_type)
			.execute(&mut *tx)
			.await?;
		}

		for f in failures {
			let error_entry = serde_json::json!({
				"at": Utc::now().to_rfc3339(),
				"error_type": f.error_type.as_str(),
				"message": f.error_message,
			});
			sqlx::query(&format!(
				r#"
				UPDATE {inode_tbl}
				SET status = $3, error_type = $4, claimed_by = NULL, claimed_at = NULL,
					processed_at = now(), errors = errors || $5::jsonb
				WHERE medium_hash = $1 AND ino = $2
				"#
			))
			.bind(medium_hash)
			.bind(f.ino)
			.bind(f.status.as_str())
			.bind(f.error_type.as_str())
			.bind(sqlx::types::Json(vec![error_entry]))
			.execute(&mut *tx)
			.await?;
		}

		tx.commit().await?;
		Ok(())
	}

	/// Mark paths matching the loader's exclusion patterns so they are never
	/// claimed for copy, without removing their catalog record (§4.4 step 6,
	/// §12.2).
	pub async fn mark_path_excluded(&self, medium_hash: &str, ino: i64, path_bytes: &[u8], reason: &str) -> Result<()> {
		let path_tbl = ident::path_partition_name(medium_hash)?;
		sqlx::query(&format!(
			"UPDATE {path_tbl} SET exclude_reason = $4 WHERE medium_hash = $1 AND ino = $2 AND path_bytes = $3"
		))
		.bind(medium_hash)
		.bind(ino)
		.bind(path_bytes)
		.bind(reason)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	/// An inode with zero non-excluded paths has nothing to copy; mark it
	/// `success` with no blob so it never shows up as pending (§4.4 step 7).
	pub async fn mark_non_copyable(&self, medium_hash: &str, ino: i64, sentinel: &str) -> Result<()> {
		let inode_tbl = ident::inode_partition_name(medium_hash)?;
		sqlx::query(&format!(
			r#"
			UPDATE {inode_tbl}
			SET status = 'success', copied = false, claimed_by = $3, processed_at = now()
			WHERE medium_hash = $1 AND ino = $2
			"#
		))
		.bind(medium_hash)
		.bind(ino)
		.bind(sentinel)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	/// Pin an inode past the absolute retry cap so it is never re-claimed,
	/// without touching the status `commit_batch` already classified it
	/// with (§4.5 "regardless of classification, the inode is marked
	/// `failed_retryable` if not already permanent, and the worker must not
	/// re-claim it"). Unlike [`Catalog::mark_non_copyable`], this never sets
	/// `status = 'success'` — the inode never produced a blob and stays
	/// non-terminal until an operator resolves it via `recover-failed`.
	pub async fn pin_claim(&self, medium_hash: &str, ino: i64, sentinel: &str) -> Result<()> {
		let inode_tbl = ident::inode_partition_name(medium_hash)?;
		sqlx::query(&format!(
			"UPDATE {inode_tbl} SET claimed_by = $3 WHERE medium_hash = $1 AND ino = $2"
		))
		.bind(medium_hash)
		.bind(ino)
		.bind(sentinel)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	/// Bulk form of [`Catalog::mark_non_copyable`] used by the loader
	/// (§4.4 step 7): every non-regular inode gets the `NON_FILE` sentinel,
	/// and every regular inode whose paths are all excluded gets the
	/// `EXCLUDED: all_paths_excluded` sentinel. Returns `(non_file_count,
	/// all_excluded_count)`.
	pub async fn mark_non_copyable_bulk(&self, medium_hash: &str) -> Result<(u64, u64)> {
		let inode_tbl = ident::inode_partition_name(medium_hash)?;
		let path_tbl = ident::path_partition_name(medium_hash)?;

		let non_file = sqlx::query(&format!(
			r#"
			UPDATE {inode_tbl}
			SET status = 'success', copied = false, claimed_by = 'NON_FILE', processed_at = now()
			WHERE medium_hash = $1 AND fs_type <> 'f' AND status = 'pending'
			"#
		))
		.bind(medium_hash)
		.execute(&self.pool)
		.await?
		.rows_affected();

		let all_excluded = sqlx::query(&format!(
			r#"
			UPDATE {inode_tbl} t
			SET status = 'success', copied = false, claimed_by = 'EXCLUDED: all_paths_excluded', processed_at = now()
			WHERE t.medium_hash = $1
			  AND t.fs_type = 'f'
			  AND t.status = 'pending'
			  AND EXISTS (SELECT 1 FROM {path_tbl} p WHERE p.medium_hash = $1 AND p.ino = t.ino)
			  AND NOT EXISTS (
			      SELECT 1 FROM {path_tbl} p
			      WHERE p.medium_hash = $1 AND p.ino = t.ino AND p.exclude_reason IS NULL
			  )
			"#
		))
		.bind(medium_hash)
		.execute(&self.pool)
		.await?
		.rows_affected();

		Ok((non_file, all_excluded))
	}

	/// Count of inodes `recover-failed` would reset for a given
	/// `error_type`, without modifying anything (§6 `recover-failed`
	/// dry-run default). `include_permanent` also counts `failed_permanent`
	/// rows, per the §9 open question permitting that via an explicit flag.
	pub async fn recoverable_count(&self, medium_hash: &str, error_type: ErrorType, include_permanent: bool) -> Result<i64> {
		let inode_tbl = ident::inode_partition_name(medium_hash)?;
		let statuses: &[&str] = if include_permanent {
			&["failed_retryable", "failed_permanent"]
		} else {
			&["failed_retryable"]
		};
		let count: i64 = sqlx::query_scalar(&format!(
			"SELECT count(*) FROM {inode_tbl} WHERE medium_hash = $1 AND error_type = $2 AND status = ANY($3)"
		))
		.bind(medium_hash)
		.bind(error_type.as_str())
		.bind(statuses)
		.fetch_one(&self.pool)
		.await?;
		Ok(count)
	}

	/// Reset every inode of `error_type` (and, if `include_permanent`,
	/// `failed_permanent` too) back to `pending` with its claim cleared, so
	/// a copy worker can re-claim it after the operator has fixed the
	/// external root cause (§6 `recover-failed`, §7 "classifier-scoped
	/// reset path"). Returns the number of rows reset.
	pub async fn recover_failed(&self, medium_hash: &str, error_type: ErrorType, include_permanent: bool) -> Result<u64> {
		let inode_tbl = ident::inode_partition_name(medium_hash)?;
		let statuses: &[&str] = if include_permanent {
			&["failed_retryable", "failed_permanent"]
		} else {
			&["failed_retryable"]
		};
		let rows = sqlx::query(&format!(
			r#"
			UPDATE {inode_tbl}
			SET status = 'pending', claimed_by = NULL, claimed_at = NULL
			WHERE medium_hash = $1 AND error_type = $2 AND status = ANY($3)
			"#
		))
		.bind(medium_hash)
		.bind(error_type.as_str())
		.bind(statuses)
		.execute(&self.pool)
		.await?
		.rows_affected();
		Ok(rows)
	}

	/// Count of inodes not yet in a terminal state for a medium (`pending` or
	/// `failed_retryable` — §7 "an inode left in failed_permanent is
	/// considered terminal", `failed_retryable` is explicitly not), used by
	/// the orchestrator and the Archiver to decide when copying is complete
	/// (§4.7 precondition a, §8 testable property 5).
	pub async fn pending_count(&self, medium_hash: &str) -> Result<i64> {
		let inode_tbl = ident::inode_partition_name(medium_hash)?;
		let count: i64 = sqlx::query_scalar(&format!(
			"SELECT count(*) FROM {inode_tbl} WHERE medium_hash = $1 AND status IN ('pending', 'failed_retryable')"
		))
		.bind(medium_hash)
		.fetch_one(&self.pool)
		.await?;
		Ok(count)
	}

	/// Count of inodes currently held by a worker's claim, used by the
	/// Archiver to refuse sealing a medium while a worker might still be
	/// mid-batch (§4.7 precondition b). A dead worker's claims are expected
	/// to have been released or TTL-reclaimed before archiving is attempted.
	pub async fn live_claims_count(&self, medium_hash: &str) -> Result<i64> {
		let inode_tbl = ident::inode_partition_name(medium_hash)?;
		// `status = 'pending'` excludes both the `success`-sentinel claims
		// (`NON_FILE`, `EXCLUDED: ...`) that Catalog::mark_non_copyable
		// leaves in claimed_by, and the `MAX_RETRIES_EXCEEDED` pin that
		// Catalog::pin_claim leaves on a non-terminal `failed_retryable`
		// row — neither is a live worker's in-flight claim.
		let count: i64 = sqlx::query_scalar(&format!(
			"SELECT count(*) FROM {inode_tbl} WHERE medium_hash = $1 AND claimed_by IS NOT NULL AND status = 'pending'"
		))
		.bind(medium_hash)
		.fetch_one(&self.pool)
		.await?;
		Ok(count)
	}

	/// `(rescued, total)` used to compute the health percentage (§4.5, §11.3
	/// health thresholds).
	pub async fn rescue_counts(&self, medium_hash: &str) -> Result<(i64, i64)> {
		let inode_tbl = ident::inode_partition_name(medium_hash)?;
		let row = sqlx::query(&format!(
			"SELECT count(*) FILTER (WHERE status = 'success') AS rescued, count(*) AS total
             FROM {inode_tbl} WHERE medium_hash = $1"
		))
		.bind(medium_hash)
		.fetch_one(&self.pool)
		.await?;
		Ok((row.try_get("rescued")?, row.try_get("total")?))
	}
}

async fn table_exists(pool: &PgPool, table_name: &str) -> Result<bool> {
	let row: Option<(bool,)> = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM pg_tables WHERE tablename = $1)")
		.bind(table_name)
		.fetch_optional(pool)
		.await?;
	Ok(row.map(|(b,)| b).unwrap_or(false))
}

fn csv_field(s: &str) -> String {
	format!("\"{}\"", s.replace('"', "\"\""))
}

fn binary_copy_header() -> Vec<u8> {
	let mut buf = Vec::new();
	buf.extend_from_slice(b"PGCOPY\n\xff\r\n\0");
	buf.extend_from_slice(&0i32.to_be_bytes());
	buf.extend_from_slice(&0i32.to_be_bytes());
	buf
}

fn append_binary_tuple(buf: &mut Vec<u8>, medium_hash: &[u8], ino: i64, path_bytes: &[u8]) {
	buf.extend_from_slice(&3i16.to_be_bytes());

	buf.extend_from_slice(&(medium_hash.len() as i32).to_be_bytes());
	buf.extend_from_slice(medium_hash);

	buf.extend_from_slice(&8i32.to_be_bytes());
	buf.extend_from_slice(&ino.to_be_bytes());

	buf.extend_from_slice(&(path_bytes.len() as i32).to_be_bytes());
	buf.extend_from_slice(path_bytes);
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn csv_field_escapes_quotes() {
		assert_eq!(csv_field(r#"a"b"#), r#""a""b""#);
	}

	#[test]
	fn binary_tuple_encodes_field_count_and_lengths() {
		let mut buf = binary_copy_header();
		append_binary_tuple(&mut buf, b"abcd", 7, b"\x00\x01path");
		// header (11) + field-count i16 (2) + medium_hash len(4)+data(4) +
		// ino len(4)+data(8) + path len(4)+data(6)
		assert_eq!(buf.len(), 11 + 2 + 4 + 4 + 4 + 8 + 4 + 6);
	}

	// Everything below this point needs a live Postgres instance; these are
	// integration tests meant to run with `DATABASE_URL` pointed at a
	// scratch database, not in the default unit-test pass.

	#[tokio::test]
	#[ignore = "requires a live Postgres instance; set DATABASE_URL"]
	async fn migrate_then_ensure_partitions_then_claim_round_trip() {
		let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
		let catalog = Catalog::connect(&url).await.unwrap();
		catalog.migrate().await.unwrap();

		let medium_hash = "deadbeef0123456789abcdef0123456789abcdef0123456789abcdef012345";
		catalog
			.register_medium(medium_hash, "test-medium", "/images/test.dd")
			.await
			.unwrap();
		catalog.ensure_partitions(medium_hash).await.unwrap();

		let rows = vec![NewInode {
			ino: 42,
			fs_type: FsType::File,
			dev: 1,
			nlink: 1,
			size: 1024,
			mtime: Some(Utc::now()),
		}];
		catalog.bulk_insert_inodes(medium_hash, &rows).await.unwrap();

		let claimed = catalog.claim_batch(medium_hash, "worker-1", 10).await.unwrap();
		assert_eq!(claimed.len(), 1);
		assert_eq!(claimed[0].inode.ino, 42);

		catalog
			.commit_batch(
				medium_hash,
				&[42],
				&[CopySuccess {
					ino: 42,
					blob_id: "abc123".to_string(),
					mime_type: Some("text/plain".to_string()),
					hardlinks_placed: 1,
				}],
				&[],
			)
			.await
			.unwrap();

		assert_eq!(catalog.pending_count(medium_hash).await.unwrap(), 0);
	}
}
