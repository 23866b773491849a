/// One metrics collection: open the log incrementally, decode LTSV records,
/// aggregate them, and persist the checkpoint only once the snapshot exists.
use crate::config::PluginConfig;
use crate::diagnostics::DiagnosticSink;
use crate::ltsv;
use crate::metrics::{self, AggregateError, Snapshot};
use crate::reader::{self, PositionOptions, ReaderError};
use crate::work_dir::WorkDir;
use std::io::BufReader;
use std::path::Path;

/// Position options derived from the config.
pub fn position_options(config: &PluginConfig) -> PositionOptions {
    let work_dir = match &config.workdir {
        Some(dir) => WorkDir::new(dir),
        None => WorkDir::from_env(),
    };
    PositionOptions {
        disabled: config.no_posfile,
        pos_file: config.posfile.clone(),
        staging: config.tempfile.clone(),
        work_dir,
    }
}

/// Collect a snapshot for `log_path`. Either a complete snapshot or an error.
pub fn fetch_metrics(
    log_path: &Path,
    config: &PluginConfig,
    sink: &mut dyn DiagnosticSink,
) -> Result<Snapshot, FetchError> {
    let options = position_options(config);
    let (stream, trust_counts) = reader::open(log_path, &options).map_err(FetchError::Reader)?;
    if !trust_counts {
        tracing::info!(
            log = %log_path.display(),
            "no recent checkpoint; count metrics omitted for this run"
        );
    }

    let mut records = ltsv::Reader::new(BufReader::new(stream));
    let snapshot = metrics::aggregate(&mut records, &config.field_keys(), trust_counts, sink)
        .map_err(FetchError::Aggregate)?;

    records
        .into_inner()
        .into_inner()
        .finish()
        .map_err(FetchError::Reader)?;

    Ok(snapshot)
}

#[derive(Debug)]
pub enum FetchError {
    Reader(ReaderError),
    Aggregate(AggregateError),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Reader(e) => write!(f, "{e}"),
            FetchError::Aggregate(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Reader(e) => std::error::Error::source(e),
            FetchError::Aggregate(e) => std::error::Error::source(e),
        }
    }
}
