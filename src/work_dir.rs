use regex::Regex;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};
use std::sync::LazyLock;

/// Environment variable the monitoring agent sets to a writable state directory.
pub const WORKDIR_ENV: &str = "MACKEREL_PLUGIN_WORKDIR";

/// Subdirectory holding checkpoint files.
const STATE_DIR: &str = "ltsv-accesslog.d";

/// Drive-letter prefix such as `C:\` or `c:/`.
static DRIVE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-zA-Z]):[/\\]").unwrap());

/// The plugin's state directory layout.
///
/// Checkpoints for every log file share one root so that a log path can be
/// mirrored under it without colliding with the log's own directory.
#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root from `MACKEREL_PLUGIN_WORKDIR`, falling back to the OS temp dir.
    pub fn from_env() -> Self {
        Self::new(root_from(std::env::var_os(WORKDIR_ENV)))
    }

    #[allow(dead_code)]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory that mirrors log paths (e.g. `<root>/ltsv-accesslog.d`).
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    /// Checkpoint path for `log`.
    ///
    /// An absolute `override_path` is used as is. Otherwise the override (or
    /// `<log>.pos.json`) is placed under `state_dir()`, with any drive-letter
    /// prefix turned into a plain directory segment.
    pub fn position_file(&self, log: &Path, override_path: Option<&Path>) -> PathBuf {
        let base = match override_path {
            Some(p) if p.is_absolute() => return p.to_path_buf(),
            Some(p) => p.to_string_lossy().into_owned(),
            None => format!("{}.pos.json", log.to_string_lossy()),
        };
        let base = DRIVE_PREFIX.replace(&base, format!("${{1}}{MAIN_SEPARATOR}"));
        self.state_dir().join(relative_to_root(Path::new(&*base)))
    }
}

fn root_from(env: Option<OsString>) -> PathBuf {
    match env {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => std::env::temp_dir(),
    }
}

/// Lexically normalize `path` into a relative path: root and prefix
/// components are dropped, `.` is skipped and `..` pops a segment.
fn relative_to_root(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    out
}
