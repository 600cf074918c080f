//! Exclusion pattern matching (§6 "Exclusion patterns", §4.4 step 6).
//!
//! Patterns are glob-style and operate on the path's final component, the
//! way the teacher's indexer rules match against entries rather than full
//! paths. Matching is byte-oriented where possible; patterns themselves are
//! plain UTF-8 configuration, but the paths they're tested against may not
//! be, so non-UTF-8 paths are compared via lossy conversion — a pattern can
//! still exclude a mangled name; it just can't express mangled bytes itself.

use globset::{Glob, GlobSet, GlobSetBuilder};
use ntt_config::{ExclusionCategory, ExclusionPattern};

pub struct ExclusionMatcher {
	patterns: Vec<ExclusionPattern>,
	set: GlobSet,
}

impl ExclusionMatcher {
	pub fn new(patterns: Vec<ExclusionPattern>) -> Result<Self, globset::Error> {
		let mut builder = GlobSetBuilder::new();
		for p in &patterns {
			builder.add(Glob::new(&p.glob)?);
		}
		let set = builder.build()?;
		Ok(Self { patterns, set })
	}

	/// Returns the reason code of the first pattern matching `path_bytes`,
	/// or `None` if no configured pattern applies. Patterns are matched
	/// against the full lossily-decoded path, so `**/`-prefixed globs (the
	/// default set's style) match regardless of directory depth.
	pub fn exclude_reason(&self, path_bytes: &[u8]) -> Option<&'static str> {
		let path = String::from_utf8_lossy(path_bytes);
		self.set
			.matches(path.as_ref())
			.first()
			.map(|&idx| self.patterns[idx].category.reason_code())
	}
}

/// Bytes considered unsafe to hand to a shell unquoted; paths containing
/// them are excluded under the `ShellUnsafe` category even with no
/// configured glob, since this protects operator tooling regardless of
/// site-specific configuration (§6).
const SHELL_UNSAFE_BYTES: &[u8] = b"`$;|&<>\"'\\\n";

pub fn shell_unsafe_reason(path_bytes: &[u8]) -> Option<&'static str> {
	if path_bytes.iter().any(|b| SHELL_UNSAFE_BYTES.contains(b)) {
		Some(ExclusionCategory::ShellUnsafe.reason_code())
	} else {
		None
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn matches_system_noise_patterns() {
		let matcher = ExclusionMatcher::new(ntt_config::default_patterns()).unwrap();
		assert!(matcher.exclude_reason(b"/mnt/x/.DS_Store").is_some());
		assert!(matcher.exclude_reason(b"/mnt/x/Thumbs.db").is_some());
		assert!(matcher.exclude_reason(b"/mnt/x/keep.txt").is_none());
	}

	#[test]
	fn shell_unsafe_bytes_are_flagged_independent_of_config() {
		assert!(shell_unsafe_reason(b"/mnt/x/weird`name").is_some());
		assert!(shell_unsafe_reason(b"/mnt/x/normal.txt").is_none());
	}
}
