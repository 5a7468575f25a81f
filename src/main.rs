/// Hourly report run.
///
/// Meant to be started from cron several times an hour. Each run works out
/// the report hour, skips if that hour was already pushed, fetches every
/// registered location from the configured source, writes the JSON report
/// and pushes the text digest.
///
/// Usage:
///   aqmon_service [--config aqmon.toml] [--source cnemc|moji|archive]
///                 [--hour 2024-06-01T15] [--force] [--test]

use aqmon_service::config::{ServiceConfig, DEFAULT_CONFIG_PATH};
use aqmon_service::coverage;
use aqmon_service::ingest::archive::{ArchiveSource, ArchiveStore};
use aqmon_service::ingest::cnemc::CnemcSource;
use aqmon_service::ingest::moji::MojiSource;
use aqmon_service::ingest::{SourceAdapter, SourceKind};
use aqmon_service::logging::{self, DataSource, LogLevel};
use aqmon_service::model::LocationId;
use aqmon_service::output::{self, JsonReportWriter, LogChannel, PushChannel, ReportRenderer, WebhookChannel};
use aqmon_service::pipeline;
use aqmon_service::schedule::{self, PushMarker};
use chrono::NaiveDateTime;
use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::process;

#[derive(Parser, Debug)]
#[command(name = "aqmon_service")]
#[command(about = "Hourly air quality report: fetch, aggregate, index, push")]
struct Args {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured data source
    #[arg(long)]
    source: Option<SourceKind>,

    /// Report on this hour (YYYY-MM-DDTHH) instead of the current one
    #[arg(long, value_parser = parse_hour)]
    hour: Option<NaiveDateTime>,

    /// Push even if this hour was already pushed
    #[arg(long)]
    force: bool,

    /// Run and push to the log only; never touches the marker
    #[arg(long)]
    test: bool,
}

fn parse_hour(s: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(&format!("{}:00", s), "%Y-%m-%dT%H:%M")
        .map_err(|e| format!("expected YYYY-MM-DDTHH: {}", e))
}

fn main() {
    dotenv::dotenv().ok();
    let args = Args::parse();

    if let Err(e) = run(args) {
        logging::error(DataSource::System, None, &format!("run failed: {}", e));
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn build_adapter(kind: SourceKind, config: &ServiceConfig) -> Result<Box<dyn SourceAdapter>, Box<dyn Error>> {
    let adapter: Box<dyn SourceAdapter> = match kind {
        SourceKind::Cnemc => Box::new(CnemcSource::new(&config.cnemc)?),
        SourceKind::Moji => Box::new(MojiSource::new(&config.moji, config.service.utc_offset_hours)?),
        SourceKind::Archive => {
            let url = config
                .archive
                .database_url
                .as_deref()
                .ok_or("source = archive needs DATABASE_URL")?;
            Box::new(ArchiveSource::new(
                ArchiveStore::connect(url)?,
                config.archive.replay_days_offset,
            ))
        }
    };
    Ok(adapter)
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = ServiceConfig::load(&args.config)?;
    let level = LogLevel::parse(&config.service.log_level).unwrap_or(LogLevel::Info);
    logging::init_logger(level, config.service.log_file.as_deref(), true);

    let now = schedule::local_now(config.service.utc_offset_hours);
    let report_hour = args.hour.unwrap_or_else(|| schedule::report_hour_at(now));
    let tag = schedule::marker_tag(report_hour);
    logging::info(DataSource::System, None, &format!("report hour {}", tag));

    let marker = PushMarker::new(&config.service.marker_path);
    let last = marker.read()?;
    if !schedule::should_push(last.as_deref(), &tag, args.force, args.test) {
        logging::info(DataSource::System, None, &format!("{} already pushed, nothing to do", tag));
        return Ok(());
    }

    let kind = args.source.unwrap_or(config.service.source);
    let mut adapter = build_adapter(kind, &config)?;

    let mut archive = match (&config.archive.database_url, config.archive.store_fetched, kind) {
        (Some(url), true, SourceKind::Cnemc | SourceKind::Moji) => match ArchiveStore::connect(url) {
            Ok(store) => Some(store),
            Err(e) => {
                logging::log_source_failure(DataSource::Archive, "-", "connect", &e);
                None
            }
        },
        _ => None,
    };

    let run = pipeline::run_report(adapter.as_mut(), report_hour, &config, now, archive.as_mut());
    coverage::print_summary(&run.coverage);

    let writer = JsonReportWriter::new(&config.service.output_dir);
    match writer.render(&run) {
        Ok(path) => logging::info(DataSource::Push, None, &format!("report written to {}", path.display())),
        Err(e) => logging::error(DataSource::Push, None, &format!("render failed: {}", e)),
    }

    let channel: Box<dyn PushChannel> = match (&config.push.webhook_url, args.test) {
        (Some(url), false) => Box::new(WebhookChannel::new(url, config.push.timeout_secs)?),
        _ => Box::new(LogChannel),
    };
    let focus = config.service.focus_station.as_deref().map(LocationId::station);

    match output::push_report(channel.as_ref(), &run, focus.as_ref()) {
        Ok(()) if !args.test && run.table.complete => marker.write(&tag)?,
        Ok(()) => {}
        Err(e) => logging::error(DataSource::Push, None, &format!("push via {} failed: {}", channel.name(), e)),
    }
    Ok(())
}
