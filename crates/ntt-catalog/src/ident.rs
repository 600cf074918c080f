//! Safe derivation of per-medium partition identifiers.
//!
//! `medium_hash` is derived from possibly-hostile media (§3) and Postgres
//! gives us no way to bind an identifier as a query parameter, so every
//! partition name interpolated into DDL/DML is validated against a strict
//! hex pattern first. This is the concrete form of the loader's "strict
//! delimiter safety" requirement (§1) as it applies to the catalog.

use crate::error::{CatalogError, Result};

/// How many leading hex characters of `medium_hash` to use in partition
/// names. Long enough that collisions are not a practical concern, short
/// enough to stay well under Postgres's 63-byte identifier limit.
const SHORT_LEN: usize = 16;

fn validate_medium_hash(medium_hash: &str) -> Result<()> {
	let ok = !medium_hash.is_empty()
		&& medium_hash.len() <= 128
		&& medium_hash
			.bytes()
			.all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
	if ok {
		Ok(())
	} else {
		Err(CatalogError::InvalidMediumHash(medium_hash.to_string()))
	}
}

fn short_hash(medium_hash: &str) -> &str {
	let len = medium_hash.len().min(SHORT_LEN);
	&medium_hash[..len]
}

/// `inode_p_<short>`, validated safe to interpolate into SQL.
pub fn inode_partition_name(medium_hash: &str) -> Result<String> {
	validate_medium_hash(medium_hash)?;
	Ok(format!("inode_p_{}", short_hash(medium_hash)))
}

/// `path_p_<short>`, validated safe to interpolate into SQL.
pub fn path_partition_name(medium_hash: &str) -> Result<String> {
	validate_medium_hash(medium_hash)?;
	Ok(format!("path_p_{}", short_hash(medium_hash)))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_non_hex() {
		assert!(inode_partition_name("not-hex!").is_err());
		assert!(inode_partition_name("DROP TABLE medium;--").is_err());
	}

	#[test]
	fn accepts_hex_and_truncates() {
		let hash = "deadbeef0123456789abcdef";
		let name = inode_partition_name(hash).unwrap();
		assert_eq!(name, "inode_p_deadbeef01234567");
	}

	#[test]
	fn rejects_empty() {
		assert!(inode_partition_name("").is_err());
	}
}
