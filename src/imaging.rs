//! Imaging collaborator (§6): produces the `.img` and `.map` recovery log
//! this core consumes. Imaging itself is a Non-goal; what's in scope is
//! reading the map and deriving `health` from it.

use ntt_catalog::MediumHealth;
use ntt_config::HealthThresholds;

/// One line of a `.map` recovery log: a byte range and whether `ddrescue`
/// (or equivalent) rescued it.
#[derive(Debug, Clone, Copy)]
pub struct MapRange {
	pub size: u64,
	pub rescued: bool,
}

/// Recovery map produced by the imaging collaborator for one medium.
#[derive(Debug, Clone, Default)]
pub struct RecoveryMap {
	pub ranges: Vec<MapRange>,
}

impl RecoveryMap {
	pub fn total_size(&self) -> u64 {
		self.ranges.iter().map(|r| r.size).sum()
	}

	pub fn rescued_size(&self) -> u64 {
		self.ranges.iter().filter(|r| r.rescued).map(|r| r.size).sum()
	}

	/// Fraction rescued in `[0.0, 1.0]`; a map with no ranges at all counts
	/// as fully rescued rather than dividing by zero, since an empty map
	/// means the image was never partially written.
	pub fn fraction_rescued(&self) -> f64 {
		let total = self.total_size();
		if total == 0 {
			1.0
		} else {
			self.rescued_size() as f64 / total as f64
		}
	}

	/// Derive `health` per §6: ok ≥ `ok_min_rescued`, incomplete ≥
	/// `incomplete_min_rescued`, else failed. Thresholds are configuration
	/// (§9 Open Questions), not baked-in constants.
	pub fn health(&self, thresholds: &HealthThresholds) -> MediumHealth {
		let fraction = self.fraction_rescued();
		if fraction >= thresholds.ok_min_rescued {
			MediumHealth::Ok
		} else if fraction >= thresholds.incomplete_min_rescued {
			MediumHealth::Incomplete
		} else {
			MediumHealth::Failed
		}
	}
}

/// Source of a recovery map for a given medium. Production deployments
/// parse a `ddrescue`-style `.map` file; tests substitute a fixed map.
pub trait MapSource: Send + Sync {
	fn read_map(&self, medium_hash: &str) -> std::io::Result<RecoveryMap>;
}

/// Parses the standard three-column `ddrescue` mapfile format
/// (`pos  size  status`), treating `+` (rescued) as the only rescued
/// status character and everything else (`-`, `*`, `/`, etc.) as not
/// rescued.
pub struct DdrescueMapFile {
	root: std::path::PathBuf,
}

impl DdrescueMapFile {
	pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
		Self { root: root.into() }
	}

	fn path_for(&self, medium_hash: &str) -> std::path::PathBuf {
		self.root.join(format!("{medium_hash}.map"))
	}
}

impl MapSource for DdrescueMapFile {
	fn read_map(&self, medium_hash: &str) -> std::io::Result<RecoveryMap> {
		let text = std::fs::read_to_string(self.path_for(medium_hash))?;
		let mut ranges = Vec::new();
		for line in text.lines() {
			let line = line.trim();
			if line.is_empty() || line.starts_with('#') {
				continue;
			}
			let mut fields = line.split_whitespace();
			let (Some(_pos), Some(size), Some(status)) = (fields.next(), fields.next(), fields.next()) else {
				continue;
			};
			let Some(size) = parse_hex_or_dec(size) else { continue };
			ranges.push(MapRange { size, rescued: status == "+" });
		}
		Ok(RecoveryMap { ranges })
	}
}

fn parse_hex_or_dec(s: &str) -> Option<u64> {
	if let Some(hex) = s.strip_prefix("0x") {
		u64::from_str_radix(hex, 16).ok()
	} else {
		s.parse().ok()
	}
}

/// Fixed map for tests.
pub struct FakeMapSource(pub RecoveryMap);

impl MapSource for FakeMapSource {
	fn read_map(&self, _medium_hash: &str) -> std::io::Result<RecoveryMap> {
		Ok(RecoveryMap { ranges: self.0.ranges.clone() })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn thresholds() -> HealthThresholds {
		HealthThresholds {
			ok_min_rescued: 0.9999,
			incomplete_min_rescued: 0.90,
		}
	}

	#[test]
	fn fully_rescued_map_is_ok() {
		let map = RecoveryMap { ranges: vec![MapRange { size: 1000, rescued: true }] };
		assert_eq!(map.health(&thresholds()), MediumHealth::Ok);
	}

	#[test]
	fn ninety_five_percent_rescued_is_incomplete() {
		let map = RecoveryMap {
			ranges: vec![MapRange { size: 950, rescued: true }, MapRange { size: 50, rescued: false }],
		};
		assert_eq!(map.health(&thresholds()), MediumHealth::Incomplete);
	}

	#[test]
	fn fifty_percent_rescued_is_failed() {
		let map = RecoveryMap {
			ranges: vec![MapRange { size: 500, rescued: true }, MapRange { size: 500, rescued: false }],
		};
		assert_eq!(map.health(&thresholds()), MediumHealth::Failed);
	}

	#[test]
	fn empty_map_counts_as_fully_rescued() {
		let map = RecoveryMap::default();
		assert_eq!(map.fraction_rescued(), 1.0);
	}

	#[test]
	fn ddrescue_mapfile_parses_plus_and_non_plus_status() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(
			dir.path().join("abc123.map").as_path(),
			"# mapfile\n0x00000000  0x00000400  +\n0x00000400  0x00000200  -\n",
		)
		.unwrap();
		let source = DdrescueMapFile::new(dir.path());
		let map = source.read_map("abc123").unwrap();
		assert_eq!(map.total_size(), 0x600);
		assert_eq!(map.rescued_size(), 0x400);
	}
}
