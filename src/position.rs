//! Byte-offset checkpoints for incremental log reading.
//!
//! A checkpoint records the inode and offset reached by the previous run.
//! `Tailer` resumes from it, follows a rotation to read the rest of the
//! old file, restarts after truncation, and writes the new checkpoint only
//! when `finish` is called after the stream has been drained.
//!
//! Persisting is atomic (temp file then rename), so a crash mid-run leaves
//! the previous checkpoint in place and the next run re-reads the same
//! bytes: delivery is at-least-once.
use serde::{Deserialize, Serialize};
use std::fs::{File, Metadata};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Persisted checkpoint contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// File identity (unix inode; 0 when unknown).
    pub inode: u64,
    /// Bytes already consumed from that file.
    pub pos: u64,
}

/// Read the checkpoint at `path`. A missing file is `Ok(None)`.
pub fn load(path: &Path) -> Result<Option<Position>, PositionError> {
    let contents = match std::fs::read(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(PositionError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    let position = serde_json::from_slice(&contents).map_err(|e| PositionError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(Some(position))
}

/// Atomically write a checkpoint.
///
/// The JSON is staged at `staging` when given, otherwise in a temp file next
/// to `path`, and then renamed over `path`. Parent directories are created.
pub fn save(path: &Path, position: &Position, staging: Option<&Path>) -> Result<(), PositionError> {
    let json = serde_json::to_vec(position).map_err(|e| PositionError::Serialize { source: e })?;

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| PositionError::Write {
        path: dir.to_path_buf(),
        source: e,
    })?;

    match staging {
        Some(tmp_path) => {
            std::fs::write(tmp_path, &json).map_err(|e| PositionError::Write {
                path: tmp_path.to_path_buf(),
                source: e,
            })?;
            std::fs::rename(tmp_path, path).map_err(|e| PositionError::Rename {
                from: tmp_path.to_path_buf(),
                to: path.to_path_buf(),
                source: e,
            })?;
        }
        None => {
            let write_err = |e| PositionError::Write {
                path: dir.to_path_buf(),
                source: e,
            };
            let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
            tmp.write_all(&json).map_err(write_err)?;
            tmp.persist(path).map_err(|e| PositionError::Rename {
                from: e.file.path().to_path_buf(),
                to: path.to_path_buf(),
                source: e.error,
            })?;
        }
    }

    tracing::debug!(
        path = %path.display(),
        inode = position.inode,
        pos = position.pos,
        "checkpoint saved"
    );
    Ok(())
}

/// A reader over the bytes appended since the last checkpoint.
#[derive(Debug)]
pub struct Tailer {
    pos_path: PathBuf,
    staging: Option<PathBuf>,
    /// Unread remainder of the file the checkpoint pointed at before rotation.
    rotated: Option<File>,
    current: File,
    inode: u64,
    offset: u64,
}

impl Tailer {
    /// Open `log_path` positioned after the bytes recorded in `pos_path`.
    pub fn open(
        log_path: &Path,
        pos_path: &Path,
        staging: Option<&Path>,
    ) -> Result<Self, PositionError> {
        let saved = load(pos_path)?.unwrap_or_default();

        let open_err = |e| PositionError::Open {
            path: log_path.to_path_buf(),
            source: e,
        };
        let mut current = File::open(log_path).map_err(open_err)?;
        let meta = current.metadata().map_err(open_err)?;
        let inode = inode_of(&meta);

        let mut rotated = None;
        let mut offset = saved.pos;
        if saved.inode != 0 && saved.inode != inode {
            tracing::info!(
                path = %log_path.display(),
                old_inode = saved.inode,
                new_inode = inode,
                "log file rotated since last run"
            );
            rotated = open_rotated(log_path, &saved);
            offset = 0;
        }
        if offset > meta.len() {
            tracing::warn!(
                path = %log_path.display(),
                previous_offset = offset,
                current_size = meta.len(),
                "log file truncated; reading from the start"
            );
            offset = 0;
        }

        current
            .seek(SeekFrom::Start(offset))
            .map_err(|e| PositionError::Read {
                path: log_path.to_path_buf(),
                source: e,
            })?;

        tracing::debug!(
            path = %log_path.display(),
            offset,
            size = meta.len(),
            "resuming log"
        );

        Ok(Self {
            pos_path: pos_path.to_path_buf(),
            staging: staging.map(Path::to_path_buf),
            rotated,
            current,
            inode,
            offset,
        })
    }

    /// Checkpoint describing what has been consumed so far.
    pub fn position(&self) -> Position {
        Position {
            inode: self.inode,
            pos: self.offset,
        }
    }

    /// Close the stream and persist the consumed position.
    pub fn finish(self) -> Result<Position, PositionError> {
        let position = self.position();
        save(&self.pos_path, &position, self.staging.as_deref())?;
        Ok(position)
    }
}

impl Read for Tailer {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if let Some(rotated) = self.rotated.as_mut() {
            let n = rotated.read(buf)?;
            if n > 0 {
                return Ok(n);
            }
            self.rotated = None;
        }
        let n = self.current.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

/// Find the pre-rotation file by inode next to `log_path` and seek it to the
/// saved offset. Best effort: any failure just skips the old remainder.
fn open_rotated(log_path: &Path, saved: &Position) -> Option<File> {
    let dir = log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, dir = %dir.display(), "failed to scan for rotated log");
            return None;
        }
    };

    let old_path = entries.flatten().map(|e| e.path()).find(|p| {
        std::fs::metadata(p).is_ok_and(|m| m.is_file() && inode_of(&m) == saved.inode)
    })?;

    let mut file = File::open(&old_path).ok()?;
    let len = file.metadata().ok()?.len();
    if len <= saved.pos {
        return None;
    }
    file.seek(SeekFrom::Start(saved.pos)).ok()?;
    tracing::debug!(
        path = %old_path.display(),
        remaining = len - saved.pos,
        "reading remainder of rotated log"
    );
    Some(file)
}

#[cfg(unix)]
fn inode_of(meta: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode_of(_meta: &Metadata) -> u64 {
    0
}

/// Errors from checkpoint and log file operations.
#[derive(Debug)]
pub enum PositionError {
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for PositionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionError::Open { path, source } => {
                write!(f, "failed to open log file {}: {source}", path.display())
            }
            PositionError::Read { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            PositionError::Parse { path, source } => {
                write!(f, "corrupt checkpoint {}: {source}", path.display())
            }
            PositionError::Serialize { source } => {
                write!(f, "failed to serialize checkpoint: {source}")
            }
            PositionError::Write { path, source } => {
                write!(f, "failed to write checkpoint {}: {source}", path.display())
            }
            PositionError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} -> {}: {source}",
                    from.display(),
                    to.display()
                )
            }
        }
    }
}

impl std::error::Error for PositionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PositionError::Open { source, .. } => Some(source),
            PositionError::Read { source, .. } => Some(source),
            PositionError::Parse { source, .. } => Some(source),
            PositionError::Serialize { source } => Some(source),
            PositionError::Write { source, .. } => Some(source),
            PositionError::Rename { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn drain(tailer: &mut Tailer) -> String {
        let mut out = String::new();
        tailer.read_to_string(&mut out).unwrap();
        out
    }

    fn append(path: &Path, data: &str) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(data.as_bytes()).unwrap();
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempdir().unwrap();
        assert_eq!(load(&dir.path().join("nope.pos.json")).unwrap(), None);
    }

    #[test]
    fn test_save_creates_parents_and_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a/b/access.log.pos.json");
        let position = Position { inode: 42, pos: 1234 };

        save(&path, &position, None).unwrap();

        assert_eq!(load(&path).unwrap(), Some(position));
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["inode"], 42);
        assert_eq!(parsed["pos"], 1234);

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .flatten()
            .map(|e| e.file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("access.log.pos.json")]);
    }

    #[test]
    fn test_save_uses_staging_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("access.log.pos.json");
        let staging = dir.path().join("staging.tmp");

        save(&path, &Position { inode: 1, pos: 2 }, Some(&staging)).unwrap();

        assert!(!staging.exists(), "staging file should be renamed away");
        assert_eq!(load(&path).unwrap(), Some(Position { inode: 1, pos: 2 }));
    }

    #[test]
    fn test_corrupt_checkpoint_is_an_error() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("access.log");
        let pos = dir.path().join("access.log.pos.json");
        std::fs::write(&log, "status:200\n").unwrap();
        std::fs::write(&pos, "{not json").unwrap();

        let err = Tailer::open(&log, &pos, None).unwrap_err();
        assert!(matches!(err, PositionError::Parse { .. }));
        assert!(err.to_string().starts_with("corrupt checkpoint"));
    }

    #[test]
    fn test_missing_log_is_open_error() {
        let dir = tempdir().unwrap();
        let err = Tailer::open(
            &dir.path().join("missing.log"),
            &dir.path().join("missing.pos.json"),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, PositionError::Open { .. }));
    }

    #[test]
    fn test_first_run_reads_everything_then_only_appends() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("access.log");
        let pos = dir.path().join("state/access.log.pos.json");
        std::fs::write(&log, "line1\nline2\n").unwrap();

        let mut tailer = Tailer::open(&log, &pos, None).unwrap();
        assert_eq!(drain(&mut tailer), "line1\nline2\n");
        let saved = tailer.finish().unwrap();
        assert_eq!(saved.pos, 12);

        append(&log, "line3\n");

        let mut tailer = Tailer::open(&log, &pos, None).unwrap();
        assert_eq!(drain(&mut tailer), "line3\n");
        assert_eq!(tailer.finish().unwrap().pos, 18);

        let mut tailer = Tailer::open(&log, &pos, None).unwrap();
        assert_eq!(drain(&mut tailer), "");
        assert_eq!(tailer.finish().unwrap().pos, 18);
    }

    #[test]
    fn test_truncated_log_restarts_from_zero() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("access.log");
        let pos = dir.path().join("access.log.pos.json");
        std::fs::write(&log, "a long first generation of the log\n").unwrap();

        let mut tailer = Tailer::open(&log, &pos, None).unwrap();
        drain(&mut tailer);
        tailer.finish().unwrap();

        // Truncate in place so the inode stays the same
        std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&log)
            .unwrap();
        append(&log, "short\n");

        let mut tailer = Tailer::open(&log, &pos, None).unwrap();
        assert_eq!(drain(&mut tailer), "short\n");
        assert_eq!(tailer.finish().unwrap().pos, 6);
    }

    #[cfg(unix)]
    #[test]
    fn test_rotation_reads_old_remainder_then_new_file() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("access.log");
        let pos = dir.path().join("state/access.log.pos.json");
        std::fs::write(&log, "old1\n").unwrap();

        let mut tailer = Tailer::open(&log, &pos, None).unwrap();
        drain(&mut tailer);
        let before = tailer.finish().unwrap();

        append(&log, "old2\n");
        std::fs::rename(&log, dir.path().join("access.log.1")).unwrap();
        std::fs::write(&log, "new1\n").unwrap();

        let mut tailer = Tailer::open(&log, &pos, None).unwrap();
        assert_eq!(drain(&mut tailer), "old2\nnew1\n");
        let after = tailer.finish().unwrap();
        assert_ne!(after.inode, before.inode);
        assert_eq!(after.pos, 5);
    }

    #[cfg(unix)]
    #[test]
    fn test_rotation_without_old_file_reads_new_from_start() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("access.log");
        let pos = dir.path().join("access.log.pos.json");
        std::fs::write(&log, "new1\n").unwrap();
        save(&pos, &Position { inode: u64::MAX, pos: 3 }, None).unwrap();

        let mut tailer = Tailer::open(&log, &pos, None).unwrap();
        assert_eq!(drain(&mut tailer), "new1\n");
    }

    #[test]
    fn test_unfinished_run_leaves_checkpoint_alone() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("access.log");
        let pos = dir.path().join("access.log.pos.json");
        std::fs::write(&log, "line1\n").unwrap();

        let mut tailer = Tailer::open(&log, &pos, None).unwrap();
        drain(&mut tailer);
        tailer.finish().unwrap();
        let saved = std::fs::read(&pos).unwrap();

        append(&log, "line2\n");
        let mut tailer = Tailer::open(&log, &pos, None).unwrap();
        drain(&mut tailer);
        drop(tailer);

        assert_eq!(std::fs::read(&pos).unwrap(), saved);
    }
}
