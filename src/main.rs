mod config;
mod diagnostics;
mod fetch;
mod ltsv;
mod metrics;
mod output;
mod position;
mod reader;
mod stats;
mod work_dir;

use clap::Parser;
use config::{OutputFormat, PluginConfig};
use std::path::PathBuf;
use std::process::ExitCode;

/// Report request metrics from an LTSV access log for a monitoring agent.
///
/// Each run reads only the lines appended since the previous run, then prints
/// status-class counts and percentages, cache-status percentages and latency
/// statistics.
#[derive(Parser, Debug)]
#[command(name = "ltsv-accesslog", version, about)]
pub struct Cli {
    /// Access log to read
    #[arg(value_name = "LOG_FILE")]
    file: PathBuf,

    /// Config file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Metric key prefix
    #[arg(long)]
    metric_key_prefix: Option<String>,

    /// Checkpoint file (not needed in the usual case)
    #[arg(long)]
    posfile: Option<PathBuf>,

    /// Do not track the read position; read the whole file every run
    #[arg(long)]
    no_posfile: bool,

    /// Status key name in the log format
    #[arg(long)]
    status_key: Option<String>,

    /// Request time key name in the log format
    #[arg(long)]
    request_time_key: Option<String>,

    /// Cache status key name in the log format (empty disables cache metrics)
    #[arg(long)]
    cache_status_key: Option<String>,

    /// Staging file for the atomic checkpoint write
    #[arg(long)]
    tempfile: Option<PathBuf>,

    /// State directory root (overrides MACKEREL_PLUGIN_WORKDIR)
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Overlay command-line flags on top of file settings.
    fn apply(&self, mut config: PluginConfig) -> PluginConfig {
        if let Some(prefix) = &self.metric_key_prefix {
            config.metric_key_prefix = prefix.clone();
        }
        if let Some(posfile) = &self.posfile {
            config.posfile = Some(posfile.clone());
        }
        if self.no_posfile {
            config.no_posfile = true;
        }
        if let Some(key) = &self.status_key {
            config.status_key = key.clone();
        }
        if let Some(key) = &self.request_time_key {
            config.request_time_key = key.clone();
        }
        if let Some(key) = &self.cache_status_key {
            config.cache_status_key = key.clone();
        }
        if let Some(tempfile) = &self.tempfile {
            config.tempfile = Some(tempfile.clone());
        }
        if let Some(workdir) = &self.workdir {
            config.workdir = Some(workdir.clone());
        }
        if let Some(format) = self.format {
            config.format = format;
        }
        config
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "ltsv_accesslog=debug"
    } else {
        "ltsv_accesslog=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "metrics collection failed");
            eprintln!("ltsv-accesslog: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let file_config = match &cli.config {
        Some(path) => PluginConfig::load(path)?,
        None => PluginConfig::default(),
    };
    let config = cli.apply(file_config);
    config.validate()?;

    let mut sink = diagnostics::TracingSink;
    let snapshot = fetch::fetch_metrics(&cli.file, &config, &mut sink)?;

    let epoch = chrono::Utc::now().timestamp();
    let rendered = output::render(&snapshot, config.format, &config.metric_key_prefix, epoch)?;
    print!("{rendered}");
    Ok(())
}
