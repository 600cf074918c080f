//! Mount collaborator (§6): given `(medium_hash, image_path)`, mounts the
//! image read-only and reports its partition layout. Mounting itself (loop
//! devices, filesystem-specific flags) is a Non-goal; what's in scope is the
//! interface the orchestrator drives it through.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
	Single,
	Multi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionStatus {
	Mounted,
	Failed,
	Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionInfo {
	pub num: u32,
	pub device: String,
	pub mount: PathBuf,
	pub fstype: String,
	pub status: PartitionStatus,
}

/// JSON shape exposed by the mount collaborator (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountReport {
	pub layout: Layout,
	pub partitions: Vec<PartitionInfo>,
}

impl MountReport {
	/// Mount points of every partition that actually mounted, in the order
	/// the orchestrator should enumerate/copy and later tear down.
	pub fn mounted_paths(&self) -> Vec<PathBuf> {
		self.partitions
			.iter()
			.filter(|p| p.status == PartitionStatus::Mounted)
			.map(|p| p.mount.clone())
			.collect()
	}

	pub fn any_mounted(&self) -> bool {
		self.partitions.iter().any(|p| p.status == PartitionStatus::Mounted)
	}
}

/// Mounts a medium's image read-only under `mount_root` and reports the
/// resulting layout (§6). `unmount` must detach *all* loop devices bound to
/// the image, not only the currently-mounted one.
pub trait MountCollaborator: Send + Sync {
	fn mount(&self, medium_hash: &str, image_path: &Path, mount_root: &Path) -> std::io::Result<MountReport>;

	fn unmount(&self, medium_hash: &str, report: &MountReport) -> std::io::Result<()>;
}

/// Shells out to a system `ntt-mount-helper` script that performs the loop
/// device setup, filesystem-specific mount flag selection (e.g.
/// `norecovery` for a dirty ext3/4 journal), and partition detection, and
/// emits the §6 JSON shape on stdout.
pub struct ExternalMountHelper {
	helper_path: PathBuf,
}

impl ExternalMountHelper {
	pub fn new(helper_path: impl Into<PathBuf>) -> Self {
		Self { helper_path: helper_path.into() }
	}
}

impl MountCollaborator for ExternalMountHelper {
	fn mount(&self, medium_hash: &str, image_path: &Path, mount_root: &Path) -> std::io::Result<MountReport> {
		let output = std::process::Command::new(&self.helper_path)
			.arg("mount")
			.arg(medium_hash)
			.arg(image_path)
			.arg(mount_root)
			.output()?;
		if !output.status.success() {
			return Err(std::io::Error::new(
				std::io::ErrorKind::Other,
				format!("mount helper exited with {}: {}", output.status, String::from_utf8_lossy(&output.stderr)),
			));
		}
		serde_json::from_slice(&output.stdout).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
	}

	fn unmount(&self, medium_hash: &str, _report: &MountReport) -> std::io::Result<()> {
		let output = std::process::Command::new(&self.helper_path).arg("unmount").arg(medium_hash).output()?;
		if !output.status.success() {
			return Err(std::io::Error::new(
				std::io::ErrorKind::Other,
				format!("unmount helper exited with {}: {}", output.status, String::from_utf8_lossy(&output.stderr)),
			));
		}
		Ok(())
	}
}

/// Fixed report for tests; records unmount calls so orchestrator tests can
/// assert teardown actually ran.
pub struct FakeMount {
	pub report: MountReport,
	pub unmounted: std::sync::Mutex<Vec<String>>,
}

impl FakeMount {
	pub fn new(report: MountReport) -> Self {
		Self { report, unmounted: std::sync::Mutex::new(Vec::new()) }
	}
}

impl MountCollaborator for FakeMount {
	fn mount(&self, _medium_hash: &str, _image_path: &Path, _mount_root: &Path) -> std::io::Result<MountReport> {
		Ok(self.report.clone())
	}

	fn unmount(&self, medium_hash: &str, _report: &MountReport) -> std::io::Result<()> {
		self.unmounted.lock().unwrap().push(medium_hash.to_string());
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn single_partition_report() -> MountReport {
		MountReport {
			layout: Layout::Single,
			partitions: vec![PartitionInfo {
				num: 1,
				device: "/dev/loop0".to_string(),
				mount: PathBuf::from("/mnt/ntt/abc123"),
				fstype: "ext4".to_string(),
				status: PartitionStatus::Mounted,
			}],
		}
	}

	#[test]
	fn mounted_paths_excludes_failed_partitions() {
		let mut report = single_partition_report();
		report.partitions.push(PartitionInfo {
			num: 2,
			device: "/dev/loop0p2".to_string(),
			mount: PathBuf::from("/mnt/ntt/abc123/p2"),
			fstype: "unknown".to_string(),
			status: PartitionStatus::Failed,
		});
		assert_eq!(report.mounted_paths(), vec![PathBuf::from("/mnt/ntt/abc123")]);
	}

	#[test]
	fn fake_mount_records_unmount_calls() {
		let fake = FakeMount::new(single_partition_report());
		let report = fake.mount("abc123", Path::new("/tmp/abc123.img"), Path::new("/mnt/ntt")).unwrap();
		fake.unmount("abc123", &report).unwrap();
		assert_eq!(*fake.unmounted.lock().unwrap(), vec!["abc123".to_string()]);
	}
}
