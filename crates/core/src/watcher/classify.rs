//! Classification of torrent root entries.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::debug;
use walkdir::WalkDir;

use super::claim::{marker_path, read_marker};
use super::config::WatcherConfig;
use super::types::{EntryState, WatchedEntry, WatcherError};

/// Classify every top-level entry of the torrent root as of `now`.
///
/// Hidden entries (including claim sidecars), partial-download sidecars and
/// symlinks are not entries of their own and are left out. An entry with a
/// claim marker is `Importing`, or `Failed` when the marker records an error.
pub fn scan_root(config: &WatcherConfig, now: SystemTime) -> Result<Vec<WatchedEntry>, WatcherError> {
    let root = &config.torrent_root;
    let read = fs::read_dir(root).map_err(|e| WatcherError::io("read_dir", root, e))?;

    let mut names = Vec::new();
    for dirent in read {
        let dirent = dirent.map_err(|e| WatcherError::io("read_dir", root, e))?;
        if let Some(name) = dirent.file_name().to_str() {
            names.push(name.to_string());
        } else {
            debug!(path = %dirent.path().display(), "Skipping non UTF-8 entry");
        }
    }
    names.sort();
    let siblings: HashSet<&str> = names.iter().map(String::as_str).collect();

    let mut entries = Vec::new();
    for name in &names {
        if name.starts_with('.') {
            continue;
        }
        if let Some(suffix) = config.partial_suffix(name) {
            let stem = &name[..name.len() - suffix.len()];
            if siblings.contains(stem) {
                continue;
            }
        }

        let path = root.join(name);
        let metadata = match fs::symlink_metadata(&path) {
            Ok(m) => m,
            // Removed between listing and now.
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(WatcherError::io("stat", &path, e)),
        };
        if metadata.file_type().is_symlink() {
            continue;
        }
        let is_dir = metadata.is_dir();

        let state = match classify(config, &path, name, is_dir, &siblings, now) {
            Ok(state) => state,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(WatcherError::io("classify", &path, e)),
        };

        entries.push(WatchedEntry {
            name: name.clone(),
            path,
            is_dir,
            state,
        });
    }
    Ok(entries)
}

fn classify(
    config: &WatcherConfig,
    path: &Path,
    name: &str,
    is_dir: bool,
    siblings: &HashSet<&str>,
    now: SystemTime,
) -> io::Result<EntryState> {
    if let Some(state) = claimed_state(&marker_path(path, is_dir, &config.lock_marker)) {
        return Ok(state);
    }
    if config.partial_suffix(name).is_some() {
        return Ok(EntryState::Downloading);
    }
    if config
        .partial_suffixes
        .iter()
        .any(|s| siblings.contains(format!("{}{}", name, s).as_str()))
    {
        return Ok(EntryState::Downloading);
    }
    if is_dir
        && config
            .in_progress_markers
            .iter()
            .any(|m| path.join(m).exists())
    {
        return Ok(EntryState::Downloading);
    }

    let newest = newest_mtime(path)?;
    let quiet = Duration::from_secs(config.quiet_period_secs);
    match now.duration_since(newest) {
        Ok(age) if age >= quiet => Ok(EntryState::Complete),
        // Too recent, or modified "in the future" relative to `now`.
        _ => Ok(EntryState::Downloading),
    }
}

/// State of an entry that already carries a claim marker.
fn claimed_state(marker: &Path) -> Option<EntryState> {
    if fs::symlink_metadata(marker).is_err() {
        return None;
    }
    match read_marker(marker) {
        Ok(record) if record.error.is_some() => Some(EntryState::Failed),
        // Held by a live import, possibly still being written.
        _ => Some(EntryState::Importing),
    }
}

/// Newest modification time anywhere in the tree rooted at `path`.
pub fn newest_mtime(path: &Path) -> io::Result<SystemTime> {
    let mut newest = fs::symlink_metadata(path)?.modified()?;
    for entry in WalkDir::new(path)
        .follow_links(false)
        .follow_root_links(false)
        .min_depth(1)
    {
        let entry = entry.map_err(io::Error::from)?;
        let modified = entry.metadata().map_err(io::Error::from)?.modified()?;
        newest = newest.max(modified);
    }
    Ok(newest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::claim::Claim;
    use tempfile::TempDir;

    fn config(root: &TempDir) -> WatcherConfig {
        WatcherConfig::new(root.path(), "/library").with_quiet_period_secs(60)
    }

    fn later(secs: u64) -> SystemTime {
        SystemTime::now() + Duration::from_secs(secs)
    }

    fn state_of(entries: &[WatchedEntry], name: &str) -> Option<EntryState> {
        entries.iter().find(|e| e.name == name).map(|e| e.state)
    }

    #[test]
    fn test_quiet_period() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("SceneTitle-2024")).unwrap();
        fs::write(dir.path().join("SceneTitle-2024/video.mp4"), b"data").unwrap();
        let config = config(&dir);

        let entries = scan_root(&config, SystemTime::now()).unwrap();
        assert_eq!(state_of(&entries, "SceneTitle-2024"), Some(EntryState::Downloading));

        let entries = scan_root(&config, later(120)).unwrap();
        assert_eq!(state_of(&entries, "SceneTitle-2024"), Some(EntryState::Complete));
    }

    #[test]
    fn test_in_progress_marker() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("Scene")).unwrap();
        fs::write(dir.path().join("Scene/.downloading"), b"").unwrap();

        let entries = scan_root(&config(&dir), later(3600)).unwrap();
        assert_eq!(state_of(&entries, "Scene"), Some(EntryState::Downloading));
    }

    #[test]
    fn test_partial_sidecar_and_suffix() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("movie.mp4"), b"data").unwrap();
        fs::write(dir.path().join("movie.mp4.part"), b"").unwrap();
        fs::write(dir.path().join("other.mkv.!qB"), b"data").unwrap();

        let entries = scan_root(&config(&dir), later(3600)).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(state_of(&entries, "movie.mp4"), Some(EntryState::Downloading));
        assert_eq!(state_of(&entries, "other.mkv.!qB"), Some(EntryState::Downloading));
        assert_eq!(state_of(&entries, "movie.mp4.part"), None);
    }

    #[test]
    fn test_hidden_entries_ignored() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".movie.mp4.curator-import.lock"), b"").unwrap();
        fs::create_dir(dir.path().join(".cache")).unwrap();
        fs::write(dir.path().join("movie.mp4"), b"data").unwrap();

        let entries = scan_root(&config(&dir), later(3600)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "movie.mp4");
        assert!(!entries[0].is_dir);
    }

    #[test]
    fn test_claimed_entries() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        fs::create_dir(dir.path().join("Scene")).unwrap();
        fs::write(dir.path().join("Scene/video.mp4"), b"data").unwrap();
        fs::write(dir.path().join("movie.mp4"), b"data").unwrap();

        let claim = Claim::acquire(&dir.path().join("Scene"), true, &config.lock_marker).unwrap();
        let failed = Claim::acquire(&dir.path().join("movie.mp4"), false, &config.lock_marker).unwrap();
        failed.fail("destination already exists").unwrap();

        let entries = scan_root(&config, later(3600)).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(state_of(&entries, "Scene"), Some(EntryState::Importing));
        assert_eq!(state_of(&entries, "movie.mp4"), Some(EntryState::Failed));

        // Operator clears the failure.
        fs::remove_file(dir.path().join(".movie.mp4.curator-import.lock")).unwrap();
        claim.release(&dir.path().join("Scene")).unwrap();
        let entries = scan_root(&config, later(3600)).unwrap();
        assert_eq!(state_of(&entries, "Scene"), Some(EntryState::Complete));
        assert_eq!(state_of(&entries, "movie.mp4"), Some(EntryState::Complete));
    }

    #[test]
    fn test_newest_mtime_sees_nested_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("Scene");
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("a/b/video.mp4"), b"data").unwrap();

        let touched = later(600);
        fs::File::options()
            .write(true)
            .open(root.join("a/b/video.mp4"))
            .unwrap()
            .set_modified(touched)
            .unwrap();

        assert_eq!(newest_mtime(&root).unwrap(), touched);
    }

    #[test]
    fn test_missing_root_is_error() {
        let config = WatcherConfig::new("/nonexistent/torrents", "/library");
        let result = scan_root(&config, SystemTime::now());
        assert!(matches!(result, Err(WatcherError::Io { .. })));
    }
}
