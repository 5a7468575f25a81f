/// Report rendering and push channels.
///
/// Renderers turn a finished `ReportRun` into an artifact on disk; push
/// channels deliver short text messages. Both report failures as
/// `OutputError` and leave it to the caller to log and carry on.

use crate::alert::exceedance::{ExceedanceAlert, ExceedanceLevel};
use crate::logging::{self, DataSource};
use crate::model::{LocationId, OutputError};
use crate::pipeline::ReportRun;
use crate::report::{LocationSummary, RankMetric, ReportTable};
use crate::schedule;
use crate::stations;
use serde::Deserialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

/// Sent instead of the report when too few stations reported.
pub const NO_DATA_NOTICE: &str = "小时推送暂时无数据！";

// ---------------------------------------------------------------------------
// Renderers
// ---------------------------------------------------------------------------

pub trait ReportRenderer {
    /// Renders `run` and returns the path written.
    fn render(&self, run: &ReportRun) -> Result<PathBuf, OutputError>;
}

/// Writes the whole run as pretty-printed JSON to `<output_dir>/<tag>.json`.
#[derive(Debug, Clone)]
pub struct JsonReportWriter {
    output_dir: PathBuf,
}

impl JsonReportWriter {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, table: &ReportTable) -> PathBuf {
        self.output_dir
            .join(format!("{}.json", schedule::marker_tag(table.report_hour)))
    }
}

impl ReportRenderer for JsonReportWriter {
    fn render(&self, run: &ReportRun) -> Result<PathBuf, OutputError> {
        fs::create_dir_all(&self.output_dir)
            .map_err(|e| OutputError::Io(format!("{}: {}", self.output_dir.display(), e)))?;
        let body = serde_json::to_string_pretty(run).map_err(|e| OutputError::Serialize(e.to_string()))?;
        let path = self.path_for(&run.table);
        fs::write(&path, body).map_err(|e| OutputError::Io(format!("{}: {}", path.display(), e)))?;
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Text digest
// ---------------------------------------------------------------------------

fn value_text(value: Option<f64>) -> String {
    value
        .map(|v| format!("{}", v.round_ties_even() as i64))
        .unwrap_or_else(|| "-".to_string())
}

fn rank_text(row: &LocationSummary, metric: RankMetric) -> String {
    row.rank(metric)
        .map(|r| r.to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn focus_paragraph(row: &LocationSummary) -> String {
    format!(
        "{}站点PM2.5实时浓度为{}微克/立方米，排名第{}，当日累计{}微克/立方米，排名第{}；\
         PM10实时浓度为{}微克/立方米，排名第{}，当日累计{}微克/立方米，排名第{}；\
         O3实时浓度为{}微克/立方米，排名第{}，当日MDA8为{}微克/立方米，排名第{}。",
        row.name,
        value_text(row.realtime.pm25),
        rank_text(row, RankMetric::Pm25Realtime),
        value_text(row.daily.means.pm25),
        rank_text(row, RankMetric::Pm25Daily),
        value_text(row.realtime.pm10),
        rank_text(row, RankMetric::Pm10Realtime),
        value_text(row.daily.means.pm10),
        rank_text(row, RankMetric::Pm10Daily),
        value_text(row.realtime.o3),
        rank_text(row, RankMetric::O3Realtime),
        value_text(row.daily.mda8),
        rank_text(row, RankMetric::Mda8),
    )
}

fn city_line(row: &LocationSummary) -> String {
    match &row.daily_aqi {
        Some(aqi) => {
            let primary = if aqi.primary_pollutants.is_empty() {
                "无".to_string()
            } else {
                aqi.primary_pollutants
                    .iter()
                    .map(|p| p.code())
                    .collect::<Vec<_>>()
                    .join("、")
            };
            format!(
                "{}当日累计AQI为{}，等级为{}，首要污染物为{}。",
                row.name,
                aqi.index,
                aqi.category.chinese_label(),
                primary
            )
        }
        None => format!("{}当日暂无有效数据。", row.name),
    }
}

fn alert_line(alert: &ExceedanceAlert) -> String {
    let state = match alert.level {
        ExceedanceLevel::Exceeded => "已超标",
        ExceedanceLevel::NearLimit => "有超标风险",
    };
    format!(
        "{} {} {}（限值{}）{}",
        stations::display_name(&alert.location),
        alert.metric,
        alert.value,
        alert.limit,
        state
    )
}

/// Plain-text digest of a report: the focus station's values and ranks,
/// each city's daily AQI and any limit alerts.
pub fn text_summary(table: &ReportTable, focus: Option<&LocationId>, alerts: &[ExceedanceAlert]) -> String {
    let mut lines = vec![format!(
        "{}各国控站点{}时空气质量指标相关情况（{}/{}站有效）",
        table.date.format("%m月%d日"),
        table.report_hour.format("%H"),
        table.reporting_stations,
        table.station_rows().count()
    )];

    if let Some(row) = focus.and_then(|id| table.row(id)) {
        lines.push(focus_paragraph(row));
    }
    lines.extend(table.city_rows().map(city_line));

    if !alerts.is_empty() {
        lines.push("超标提示：".to_string());
        lines.extend(alerts.iter().map(alert_line));
    }
    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Push channels
// ---------------------------------------------------------------------------

pub trait PushChannel {
    fn name(&self) -> &'static str;

    fn send_text(&self, content: &str) -> Result<(), OutputError>;
}

/// Group-robot webhook taking `{"msgtype":"text","text":{"content":...}}`.
pub struct WebhookChannel {
    client: reqwest::blocking::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

impl WebhookChannel {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self, OutputError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(StdDuration::from_secs(timeout_secs))
            .build()
            .map_err(|e| OutputError::Http(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

/// Checks a webhook reply body; the robot answers 200 even on errors.
fn check_webhook_reply(body: &str) -> Result<(), OutputError> {
    let reply: WebhookResponse =
        serde_json::from_str(body).map_err(|e| OutputError::Http(format!("unreadable reply: {}", e)))?;
    if reply.errcode != 0 {
        return Err(OutputError::Http(format!("errcode {}: {}", reply.errcode, reply.errmsg)));
    }
    Ok(())
}

impl PushChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn send_text(&self, content: &str) -> Result<(), OutputError> {
        let body = json!({ "msgtype": "text", "text": { "content": content } });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .map_err(|e| OutputError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(OutputError::Http(format!("HTTP {}", response.status().as_u16())));
        }
        let text = response.text().map_err(|e| OutputError::Http(e.to_string()))?;
        check_webhook_reply(&text)
    }
}

/// Channel that only logs the message.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogChannel;

impl PushChannel for LogChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    fn send_text(&self, content: &str) -> Result<(), OutputError> {
        logging::info(DataSource::Push, None, content);
        Ok(())
    }
}

/// Pushes the digest of `run`, or the no-data notice when the report is
/// incomplete.
pub fn push_report(
    channel: &dyn PushChannel,
    run: &ReportRun,
    focus: Option<&LocationId>,
) -> Result<(), OutputError> {
    let content = if run.table.complete {
        text_summary(&run.table, focus, &run.alerts)
    } else {
        NO_DATA_NOTICE.to_string()
    };
    channel.send_text(&content)?;
    logging::info(
        DataSource::Push,
        None,
        &format!("pushed {} via {}", schedule::marker_tag(run.table.report_hour), channel.name()),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::exceedance::LimitMetric;
    use crate::coverage::CoverageReport;
    use crate::model::{DailyAggregate, PollutantValues};
    use chrono::{NaiveDate, NaiveDateTime};
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    fn report_hour() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap().and_hms_opt(15, 0, 0).unwrap()
    }

    fn row(location: LocationId, pm25: Option<f64>) -> LocationSummary {
        let date = report_hour().date();
        LocationSummary {
            name: stations::display_name(&location),
            realtime: PollutantValues { pm25, ..PollutantValues::default() },
            realtime_o3_8h: None,
            daily: DailyAggregate::missing(location.clone(), date),
            realtime_aqi: None,
            daily_aqi: None,
            ranks: BTreeMap::new(),
            city_source: None,
            location,
        }
    }

    fn run(complete: bool) -> ReportRun {
        let mut focus = row(LocationId::station("3422A"), Some(38.4));
        focus.ranks.insert(RankMetric::Pm25Realtime, 3);
        let table = ReportTable {
            report_hour: report_hour(),
            date: report_hour().date(),
            rows: vec![focus, row(LocationId::city("320100"), Some(30.0))],
            reporting_stations: 1,
            min_reporting_stations: 1,
            complete,
        };
        ReportRun {
            table,
            coverage: CoverageReport::new(report_hour(), report_hour(), Vec::new()),
            alerts: Vec::new(),
            municipal_freshness: Vec::new(),
        }
    }

    struct Recording(RefCell<Vec<String>>);

    impl PushChannel for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn send_text(&self, content: &str) -> Result<(), OutputError> {
            self.0.borrow_mut().push(content.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_json_writer_names_file_after_report_hour() {
        let dir = tempfile::tempdir().unwrap();
        let writer = JsonReportWriter::new(dir.path().join("out"));
        let path = writer.render(&run(true)).expect("render should succeed");
        assert_eq!(path, dir.path().join("out").join("2024-06-01T15.json"));

        let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["table"]["complete"], true);
        assert_eq!(written["table"]["rows"][0]["name"], "彩虹桥");
    }

    #[test]
    fn test_text_summary_includes_focus_station_and_cities() {
        let r = run(true);
        let text = text_summary(&r.table, Some(&LocationId::station("3422A")), &[]);
        assert!(text.contains("15时"), "{}", text);
        assert!(text.contains("彩虹桥站点PM2.5实时浓度为38微克/立方米，排名第3"), "{}", text);
        assert!(text.contains("南京当日暂无有效数据"), "{}", text);
        assert!(!text.contains("超标提示"));
    }

    #[test]
    fn test_text_summary_lists_alerts() {
        let r = run(true);
        let alert = ExceedanceAlert {
            location: LocationId::station("3422A"),
            metric: LimitMetric::Mda8,
            level: ExceedanceLevel::Exceeded,
            value: 170.0,
            limit: 160.0,
        };
        let text = text_summary(&r.table, None, &[alert]);
        assert!(text.contains("超标提示"));
        assert!(text.contains("彩虹桥 O3 MDA8 170（限值160）已超标"), "{}", text);
    }

    #[test]
    fn test_incomplete_report_pushes_no_data_notice() {
        let channel = Recording(RefCell::new(Vec::new()));
        push_report(&channel, &run(false), None).unwrap();
        push_report(&channel, &run(true), None).unwrap();
        let sent = channel.0.borrow();
        assert_eq!(sent[0], NO_DATA_NOTICE);
        assert_ne!(sent[1], NO_DATA_NOTICE);
    }

    #[test]
    fn test_webhook_reply_errcode_is_checked() {
        assert!(check_webhook_reply(r#"{"errcode":0,"errmsg":"ok"}"#).is_ok());
        assert_eq!(
            check_webhook_reply(r#"{"errcode":93000,"errmsg":"invalid webhook url"}"#),
            Err(OutputError::Http("errcode 93000: invalid webhook url".to_string()))
        );
        assert!(check_webhook_reply("<html>").is_err());
    }

    #[test]
    fn test_log_channel_always_succeeds() {
        assert!(LogChannel.send_text("hello").is_ok());
    }
}
