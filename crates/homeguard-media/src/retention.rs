//! Age-based deletion of saved recordings and snapshots.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Result summary for one cleanup pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupSummary {
    pub files_deleted: usize,
    pub bytes_freed: u64,
    pub errors: usize,
}

/// Delete regular files directly inside `dir` whose modification time is
/// older than `max_age`. Subdirectories are left alone.
///
/// A missing directory yields an empty summary; per-file failures are
/// counted, logged and skipped.
pub fn cleanup_old_files(dir: &Path, max_age: Duration) -> CleanupSummary {
    cleanup_old_files_at(dir, max_age, SystemTime::now())
}

fn cleanup_old_files_at(dir: &Path, max_age: Duration, now: SystemTime) -> CleanupSummary {
    let mut summary = CleanupSummary::default();

    let entries = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return summary,
        Err(e) => {
            summary.errors += 1;
            tracing::warn!(dir = %dir.display(), error = %e, "retention: failed to read dir");
            return summary;
        }
    };

    for entry in entries {
        let path: PathBuf = match entry {
            Ok(ent) => ent.path(),
            Err(e) => {
                summary.errors += 1;
                tracing::warn!(dir = %dir.display(), error = %e, "retention: bad dir entry");
                continue;
            }
        };
        if !path.is_file() {
            continue;
        }

        match expire_file(&path, max_age, now) {
            Ok(Some(freed)) => {
                summary.files_deleted += 1;
                summary.bytes_freed += freed;
                tracing::info!(path = %path.display(), bytes = freed, "retention: deleted old file");
            }
            Ok(None) => {}
            Err(e) => {
                summary.errors += 1;
                tracing::warn!(path = %path.display(), error = %e, "retention: failed to delete");
            }
        }
    }

    summary
}

/// Delete `path` if it is older than `max_age`; returns the bytes freed.
fn expire_file(path: &Path, max_age: Duration, now: SystemTime) -> io::Result<Option<u64>> {
    let meta = fs::metadata(path)?;
    let age = now.duration_since(meta.modified()?).unwrap_or(Duration::ZERO);
    if age <= max_age {
        return Ok(None);
    }
    fs::remove_file(path)?;
    Ok(Some(meta.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_deletes_only_files_past_max_age() {
        let tmp = TempDir::new().unwrap();
        let old = tmp.path().join("intruder_1.avi");
        let mut f = File::create(&old).unwrap();
        f.write_all(&[0u8; 512]).unwrap();
        f.sync_all().unwrap();

        fs::create_dir(tmp.path().join("nested")).unwrap();
        fs::write(tmp.path().join("nested/inner.avi"), b"x").unwrap();

        // Pretend 31 days have passed.
        let later = SystemTime::now() + Duration::from_secs(31 * 24 * 60 * 60);
        let res = cleanup_old_files_at(tmp.path(), DEFAULT_MAX_AGE, later);

        assert_eq!(res.files_deleted, 1);
        assert_eq!(res.bytes_freed, 512);
        assert_eq!(res.errors, 0);
        assert!(!old.exists());
        assert!(tmp.path().join("nested/inner.avi").exists());
    }

    #[test]
    fn test_keeps_recent_files() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("fresh.avi"), b"data").unwrap();

        let res = cleanup_old_files(tmp.path(), DEFAULT_MAX_AGE);
        assert_eq!(res, CleanupSummary::default());
        assert!(tmp.path().join("fresh.avi").exists());
    }

    #[test]
    fn test_missing_dir_is_not_an_error() {
        let tmp = TempDir::new().unwrap();
        let res = cleanup_old_files(&tmp.path().join("absent"), DEFAULT_MAX_AGE);
        assert_eq!(res, CleanupSummary::default());
    }
}
