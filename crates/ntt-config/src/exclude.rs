//! Exclusion pattern configuration (§6 "Exclusion patterns").
//!
//! The patterns themselves are just glob strings plus a category tag; the
//! loader (`ntt-loader`) is the one that compiles them into a `GlobSet` and
//! applies them to path bytes. Keeping compilation out of this crate keeps
//! `ntt-config` free of a `globset` dependency and, more importantly, keeps
//! the pattern list itself serializable as plain configuration per the
//! spec's explicit Open Question ("the set of exclusion patterns is
//! configuration; the loader's behavior is parametric over the pattern
//! list").

use serde::{Deserialize, Serialize};

/// Why a path matched an exclusion pattern, recorded as `path.exclude_reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionCategory {
	/// Path bytes unsafe to round-trip through a shell or bulk loader.
	ShellUnsafe,
	/// Known OS/filesystem noise (`.DS_Store`, `Thumbs.db`, ...).
	SystemNoise,
	/// Scratch or temp file conventions.
	Scratch,
	/// Backup sidecar files (`*.bak`, `*~`, ...).
	BackupSidecar,
	/// Operator-supplied pattern not covered by the built-in categories.
	Custom,
}

impl ExclusionCategory {
	/// The string stored in `path.exclude_reason`.
	pub fn reason_code(self) -> &'static str {
		match self {
			Self::ShellUnsafe => "shell_unsafe",
			Self::SystemNoise => "system_noise",
			Self::Scratch => "scratch",
			Self::BackupSidecar => "backup_sidecar",
			Self::Custom => "custom",
		}
	}
}

/// One exclusion rule: a glob applied to the path field (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionPattern {
	pub glob: String,
	pub category: ExclusionCategory,
}

impl ExclusionPattern {
	pub fn new(glob: impl Into<String>, category: ExclusionCategory) -> Self {
		Self {
			glob: glob.into(),
			category,
		}
	}
}

/// Reasonable defaults covering the categories named in §6. Operators are
/// expected to extend this list, not replace the engine's handling of it.
pub fn default_patterns() -> Vec<ExclusionPattern> {
	use ExclusionCategory::*;
	vec![
		ExclusionPattern::new("**/.DS_Store", SystemNoise),
		ExclusionPattern::new("**/Thumbs.db", SystemNoise),
		ExclusionPattern::new("**/desktop.ini", SystemNoise),
		ExclusionPattern::new("**/._*", SystemNoise),
		ExclusionPattern::new("**/tmp/**", Scratch),
		ExclusionPattern::new("**/*.tmp", Scratch),
		ExclusionPattern::new("**/*~", BackupSidecar),
		ExclusionPattern::new("**/*.bak", BackupSidecar),
	]
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_patterns_cover_expected_categories() {
		let patterns = default_patterns();
		let categories: Vec<_> = patterns.iter().map(|p| p.category).collect();
		assert!(categories.contains(&ExclusionCategory::SystemNoise));
		assert!(categories.contains(&ExclusionCategory::Scratch));
		assert!(categories.contains(&ExclusionCategory::BackupSidecar));
	}
}
