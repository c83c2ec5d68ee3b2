//! Disk probe: free space for a target path and log-tree size.

use std::path::Path;

use sysinfo::Disks;
use walkdir::WalkDir;

const GB: f64 = 1024.0 * 1024.0 * 1024.0;
const MB: f64 = 1024.0 * 1024.0;

/// Free space in GB on the disk holding `path`, or -1.0 when it cannot
/// be determined. Picks the mounted disk whose mount point is the
/// longest prefix of the (canonicalized) target.
pub fn disk_free_gb(path: &Path) -> f64 {
    let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    let mut best: Option<(usize, u64)> = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if target.starts_with(mount) {
            let depth = mount.components().count();
            if best.map_or(true, |(d, _)| depth >= d) {
                best = Some((depth, disk.available_space()));
            }
        }
    }
    match best {
        Some((_, bytes)) => bytes as f64 / GB,
        None => -1.0,
    }
}

/// Total size in MB of all files under `path`. 0.0 for a missing tree.
pub fn tree_size_mb(path: &Path) -> f64 {
    let bytes: u64 = WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum();
    bytes as f64 / MB
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn free_space_for_tempdir_is_known() {
        let dir = tempdir().unwrap();
        let free = disk_free_gb(dir.path());
        assert!(free >= 0.0, "expected a real reading, got {free}");
    }

    #[test]
    fn tree_size_counts_nested_files() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("proj")).unwrap();
        fs::write(dir.path().join("a.jsonl"), vec![0u8; 1024]).unwrap();
        fs::write(dir.path().join("proj/b.jsonl"), vec![0u8; 2048]).unwrap();
        let mb = tree_size_mb(dir.path());
        assert!((mb - 3072.0 / MB).abs() < 1e-9);
    }

    #[test]
    fn missing_tree_is_zero() {
        let dir = tempdir().unwrap();
        assert_eq!(tree_size_mb(&dir.path().join("gone")), 0.0);
    }
}
