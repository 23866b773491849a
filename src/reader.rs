/// Incremental access-log reader.
///
/// Opens the log either whole (position tracking disabled) or through a
/// checkpointed `Tailer`, and decides whether raw counters from this run can
/// be trusted: only when the previous checkpoint was written within the last
/// two minutes, so the gap since that run is known to be short.
use crate::position::{PositionError, Tailer};
use crate::work_dir::WorkDir;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// How recent a checkpoint must be for counts to be reported.
pub const FRESHNESS_WINDOW_SECS: i64 = 120;

/// Position tracking settings.
#[derive(Debug, Clone)]
pub struct PositionOptions {
    /// Read the whole file every run and never touch a checkpoint.
    pub disabled: bool,
    /// Explicit checkpoint path; relative paths go under the work dir.
    pub pos_file: Option<PathBuf>,
    /// Staging file for the atomic checkpoint write.
    pub staging: Option<PathBuf>,
    pub work_dir: WorkDir,
}

impl PositionOptions {
    pub fn position_file(&self, log_path: &Path) -> PathBuf {
        self.work_dir.position_file(log_path, self.pos_file.as_deref())
    }
}

/// Byte stream over the part of the log this run should read.
#[derive(Debug)]
pub enum LogStream {
    Whole(File),
    Tail(Tailer),
}

impl LogStream {
    /// Release the stream, persisting the checkpoint when one is tracked.
    /// Call only after the stream has been fully drained.
    pub fn finish(self) -> Result<(), ReaderError> {
        match self {
            LogStream::Whole(_) => Ok(()),
            LogStream::Tail(tailer) => {
                tailer.finish().map_err(ReaderError::Position)?;
                Ok(())
            }
        }
    }
}

impl Read for LogStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            LogStream::Whole(f) => f.read(buf),
            LogStream::Tail(t) => t.read(buf),
        }
    }
}

/// Open `path` for this run. Returns the stream and whether counts are trustworthy.
pub fn open(path: &Path, options: &PositionOptions) -> Result<(LogStream, bool), ReaderError> {
    open_at(path, options, Utc::now())
}

/// `open` with an explicit clock.
pub fn open_at(
    path: &Path,
    options: &PositionOptions,
    now: DateTime<Utc>,
) -> Result<(LogStream, bool), ReaderError> {
    if options.disabled {
        let file = File::open(path).map_err(|e| ReaderError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;
        return Ok((LogStream::Whole(file), true));
    }

    let pos_path = options.position_file(path);
    // Must be checked before the tailer opens; it owns the checkpoint from here on.
    let trust_counts = checkpoint_is_fresh(&pos_path, now);
    tracing::debug!(
        log = %path.display(),
        checkpoint = %pos_path.display(),
        trust_counts,
        "opening log incrementally"
    );

    let tailer = Tailer::open(path, &pos_path, options.staging.as_deref())
        .map_err(ReaderError::Position)?;
    Ok((LogStream::Tail(tailer), trust_counts))
}

/// True when `pos_path` exists and was modified after `now - 2 minutes`.
pub fn checkpoint_is_fresh(pos_path: &Path, now: DateTime<Utc>) -> bool {
    let modified = match std::fs::metadata(pos_path).and_then(|m| m.modified()) {
        Ok(t) => DateTime::<Utc>::from(t),
        Err(_) => return false,
    };
    modified > now - chrono::Duration::seconds(FRESHNESS_WINDOW_SECS)
}

#[derive(Debug)]
pub enum ReaderError {
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    Position(PositionError),
}

impl std::fmt::Display for ReaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReaderError::Open { path, source } => {
                write!(f, "failed to open log file {}: {source}", path.display())
            }
            ReaderError::Position(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ReaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReaderError::Open { source, .. } => Some(source),
            ReaderError::Position(e) => std::error::Error::source(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tempfile::TempDir;

    fn setup(disabled: bool) -> (TempDir, PathBuf, PositionOptions) {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("access.log");
        std::fs::write(&log, "status:200\treqtime:0.1\n").unwrap();
        let options = PositionOptions {
            disabled,
            pos_file: None,
            staging: None,
            work_dir: WorkDir::new(dir.path().join("work")),
        };
        (dir, log, options)
    }

    fn read_all(stream: &mut LogStream) -> String {
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        out
    }

    fn set_age(path: &Path, now: DateTime<Utc>, age_secs: i64) {
        let mtime = FileTime::from_unix_time(now.timestamp() - age_secs, 0);
        filetime::set_file_mtime(path, mtime).unwrap();
    }

    #[test]
    fn test_disabled_tracking_reads_whole_file_and_trusts_counts() {
        let (_dir, log, options) = setup(true);
        for _ in 0..2 {
            let (mut stream, trust) = open(&log, &options).unwrap();
            assert!(trust);
            assert_eq!(read_all(&mut stream), "status:200\treqtime:0.1\n");
            stream.finish().unwrap();
        }
        assert!(!options.position_file(&log).exists());
    }

    #[test]
    fn test_first_run_does_not_trust_counts() {
        let (_dir, log, options) = setup(false);
        let (mut stream, trust) = open(&log, &options).unwrap();
        assert!(!trust);
        assert_eq!(read_all(&mut stream), "status:200\treqtime:0.1\n");
        stream.finish().unwrap();
        assert!(options.position_file(&log).exists());
    }

    #[test]
    fn test_back_to_back_runs_trust_counts() {
        let (_dir, log, options) = setup(false);
        let (mut stream, _) = open(&log, &options).unwrap();
        read_all(&mut stream);
        stream.finish().unwrap();

        let (mut stream, trust) = open(&log, &options).unwrap();
        assert!(trust);
        assert_eq!(read_all(&mut stream), "");
    }

    #[test]
    fn test_freshness_window() {
        let (_dir, log, options) = setup(false);
        let (mut stream, _) = open(&log, &options).unwrap();
        read_all(&mut stream);
        stream.finish().unwrap();
        let pos_path = options.position_file(&log);
        let now = Utc::now();

        set_age(&pos_path, now, 60);
        assert!(checkpoint_is_fresh(&pos_path, now));

        set_age(&pos_path, now, 119);
        assert!(checkpoint_is_fresh(&pos_path, now));

        set_age(&pos_path, now, 120);
        assert!(!checkpoint_is_fresh(&pos_path, now));

        set_age(&pos_path, now, 600);
        let (_, trust) = open_at(&log, &options, now).unwrap();
        assert!(!trust);
    }

    #[test]
    fn test_missing_checkpoint_is_not_fresh() {
        let dir = TempDir::new().unwrap();
        assert!(!checkpoint_is_fresh(&dir.path().join("none.pos.json"), Utc::now()));
    }

    #[test]
    fn test_explicit_pos_file() {
        let (dir, log, mut options) = setup(false);
        let pos = dir.path().join("explicit.pos.json");
        options.pos_file = Some(pos.clone());
        let (mut stream, _) = open(&log, &options).unwrap();
        read_all(&mut stream);
        stream.finish().unwrap();
        assert!(pos.exists());
    }

    #[test]
    fn test_open_missing_file_fails() {
        let (dir, _log, options) = setup(false);
        let missing = dir.path().join("missing.log");
        let err = open(&missing, &options).unwrap_err();
        assert!(matches!(err, ReaderError::Position(PositionError::Open { .. })));

        let mut options = options;
        options.disabled = true;
        let err = open(&missing, &options).unwrap_err();
        assert!(matches!(err, ReaderError::Open { .. }));
        assert!(err.to_string().contains("missing.log"));
    }
}
