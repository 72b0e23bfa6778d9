use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing::warn;

use cransim_config::CransimConfig;
use cransim_core::archive::ArchiveScanner;
use cransim_core::ArchiveError;
use cransim_engine::{run_server, run_sync};
use cransim_telemetry::{EventLogger, MetricsRecorder};

#[derive(Parser, Debug)]
#[command(name = "cransim", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay the archive to TCP subscribers
    Serve(ServeArgs),
    /// Prune stale day files and fetch upcoming ones, then exit
    Sync(ConfigArgs),
    /// Print archived records starting at a given day
    Scan(ScanArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// YAML configuration file (defaults to config/cransim.yaml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Archive directory override
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Listener address override, e.g. 0.0.0.0:6789
    #[arg(short, long)]
    pub bind: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// First archive day to read (YYYY-MM-DD)
    #[arg(long)]
    pub date: NaiveDate,
    /// Maximum number of records to print
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve(args) => {
            let mut config = load_config(&args.config)?;
            if let Some(bind) = args.bind {
                config.server.bind = bind;
            }
            let config = config.validated()?;
            EventLogger::init(&config.telemetry.log_filter);

            let metrics = MetricsRecorder::new().context("failed to register metrics")?;
            run_server(config, metrics).await?;
        }
        Commands::Sync(args) => {
            let config = load_config(&args)?;
            EventLogger::init(&config.telemetry.log_filter);

            let report = run_sync(&config).await?;
            println!(
                "pruned {} file(s), fetched {} day(s), {} day(s) still missing",
                report.pruned.len(),
                report.fetched.len(),
                report.missing.len()
            );
        }
        Commands::Scan(args) => {
            let config = load_config(&args.config)?;
            EventLogger::init(&config.telemetry.log_filter);

            let scanner = ArchiveScanner::starting_at(&config.archive.data_dir, args.date)
                .with_min_file_size(config.archive.min_file_size);
            let stdout = std::io::stdout();
            scan_lines(scanner, args.limit, &mut stdout.lock())?;
        }
    }
    Ok(())
}

fn load_config(args: &ConfigArgs) -> anyhow::Result<CransimConfig> {
    let mut config = match &args.config {
        Some(path) => CransimConfig::load_from_path(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => CransimConfig::load().context("failed to load configuration")?,
    };
    if let Some(dir) = &args.data_dir {
        config.archive.data_dir = dir.to_string_lossy().into_owned();
    }
    Ok(config.validated()?)
}

/// Writes up to `limit` records; stops early at the first missing day.
fn scan_lines(
    mut scanner: ArchiveScanner,
    limit: usize,
    out: &mut impl Write,
) -> anyhow::Result<usize> {
    let mut written = 0;
    while written < limit {
        match scanner.next_line() {
            Ok(line) => {
                writeln!(out, "{line}")?;
                written += 1;
            }
            Err(ArchiveError::MissingOrEmpty { path, .. }) => {
                warn!(path = ?path, "No further archive data");
                break;
            }
            Err(err @ ArchiveError::Corrupt { .. }) => {
                warn!(error = %err, "Skipping unreadable archive")
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use cransim_core::archive::archive_file_name;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn write_day(dir: &std::path::Path, date: NaiveDate, lines: &[&str]) {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        for line in lines {
            writeln!(encoder, "{line}").unwrap();
        }
        std::fs::write(dir.join(archive_file_name(date)), encoder.finish().unwrap()).unwrap();
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_serve_overrides() {
        let cli = Cli::try_parse_from([
            "cransim",
            "serve",
            "--bind",
            "127.0.0.1:7000",
            "--data-dir",
            "/srv/cran",
        ])
        .unwrap();
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.bind.as_deref(), Some("127.0.0.1:7000"));
        assert_eq!(args.config.data_dir, Some(PathBuf::from("/srv/cran")));
    }

    #[test]
    fn scan_requires_valid_date() {
        assert!(Cli::try_parse_from(["cransim", "scan", "--date", "2024-02-30"]).is_err());
        let cli = Cli::try_parse_from(["cransim", "scan", "--date", "2024-03-01", "--limit", "3"])
            .unwrap();
        let Commands::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(args.date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(args.limit, 3);
    }

    #[test]
    fn scan_crosses_days_and_stops_at_gap() {
        let dir = TempDir::new().unwrap();
        let first = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let second = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        write_day(dir.path(), first, &["\"2024-03-01\",\"00:00:01\",a"]);
        write_day(dir.path(), second, &["\"2024-03-02\",\"00:00:02\",b"]);

        let mut out = Vec::new();
        let written = scan_lines(ArchiveScanner::starting_at(dir.path(), first), 10, &mut out).unwrap();

        assert_eq!(written, 2);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\"2024-03-01\",\"00:00:01\",a\n\"2024-03-02\",\"00:00:02\",b\n"
        );
    }
}
