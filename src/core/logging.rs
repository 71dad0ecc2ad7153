//! Logging setup for the host binary
//!
//! The library only ever logs through the `log` facade; this module wires the
//! facade to `flexi_logger` with the formats the host supports.

use std::str::FromStr;

static LOGGER_HANDLE: std::sync::OnceLock<std::sync::Mutex<flexi_logger::LoggerHandle>> =
    std::sync::OnceLock::new();

/// Output layout of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// `timestamp LVL message`
    #[default]
    Text,
    /// `timestamp LVL message (module/file.rs:line)`
    Ext,
    /// One compact JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "ext" => Ok(LogFormat::Ext),
            "json" => Ok(LogFormat::Json),
            other => Err(format!(
                "unknown log format '{}' (expected text, ext or json)",
                other
            )),
        }
    }
}

/// Initialise the global logger
///
/// `log_level` accepts any flexi_logger spec, e.g. `info` or
/// `info,artemis_host::client=debug`.
pub fn init_logging(
    log_level: Option<&str>,
    log_format: LogFormat,
    log_file: Option<&str>,
    color_enabled: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    use flexi_logger::{FileSpec, Logger};

    let mut logger = Logger::try_with_str(log_level.unwrap_or("info"))?;

    logger = match (log_format, color_enabled) {
        (LogFormat::Json, _) => logger.format(json_format),
        (LogFormat::Ext, true) => logger.format(extended_color_format),
        (LogFormat::Ext, false) => logger.format(extended_format),
        (LogFormat::Text, true) => logger.format(simple_color_format),
        (LogFormat::Text, false) => logger.format(simple_format),
    };

    if let Some(file_path) = log_file {
        let file_spec = FileSpec::try_from(std::path::Path::new(file_path))?;
        logger = logger.log_to_file(file_spec);
    }

    let handle = logger.start()?;
    let _ = LOGGER_HANDLE.set(std::sync::Mutex::new(handle));

    Ok(())
}

fn level_abbr(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "ERR",
        log::Level::Warn => "WRN",
        log::Level::Info => "INF",
        log::Level::Debug => "DBG",
        log::Level::Trace => "TRC",
    }
}

fn level_colored(level: log::Level) -> colored::ColoredString {
    use colored::Colorize;

    match level {
        log::Level::Error => "ERR".red().bold(),
        log::Level::Warn => "WRN".yellow(),
        log::Level::Info => "INF".green(),
        log::Level::Debug => "DBG".blue(),
        log::Level::Trace => "TRC".magenta(),
    }
}

fn simple_format(
    w: &mut dyn std::io::Write,
    now: &mut flexi_logger::DeferredNow,
    record: &log::Record<'_>,
) -> Result<(), std::io::Error> {
    write!(
        w,
        "{} {} {}",
        now.format("%Y-%m-%d %H:%M:%S%.3f"),
        level_abbr(record.level()),
        record.args()
    )
}

fn simple_color_format(
    w: &mut dyn std::io::Write,
    now: &mut flexi_logger::DeferredNow,
    record: &log::Record<'_>,
) -> Result<(), std::io::Error> {
    use colored::Colorize;

    write!(
        w,
        "{} {} {}",
        now.format("%Y-%m-%d %H:%M:%S%.3f").to_string().dimmed(),
        level_colored(record.level()),
        record.args()
    )
}

// "YYYY-MM-DD HH:mm:ss.fff INF message (client/consumer.rs:42)"
fn extended_format(
    w: &mut dyn std::io::Write,
    now: &mut flexi_logger::DeferredNow,
    record: &log::Record<'_>,
) -> Result<(), std::io::Error> {
    write!(
        w,
        "{} {} {} ({})",
        now.format("%Y-%m-%d %H:%M:%S%.3f"),
        level_abbr(record.level()),
        record.args(),
        format_target_as_path(record.target(), record.line())
    )
}

fn extended_color_format(
    w: &mut dyn std::io::Write,
    now: &mut flexi_logger::DeferredNow,
    record: &log::Record<'_>,
) -> Result<(), std::io::Error> {
    use colored::Colorize;

    write!(
        w,
        "{} {} {} ({})",
        now.format("%Y-%m-%d %H:%M:%S%.3f").to_string().dimmed(),
        level_colored(record.level()),
        record.args(),
        format_target_as_path(record.target(), record.line()).dimmed()
    )
}

fn json_format(
    w: &mut dyn std::io::Write,
    now: &mut flexi_logger::DeferredNow,
    record: &log::Record<'_>,
) -> Result<(), std::io::Error> {
    let json_obj = serde_json::json!({
        "timestamp": now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        "level": level_abbr(record.level()),
        "message": record.args().to_string(),
        "target": format_target_as_path(record.target(), record.line()),
    });

    match serde_json::to_string(&json_obj) {
        Ok(json_string) => w.write_all(json_string.as_bytes()),
        Err(_) => w.write_all(b"{\"error\":\"Failed to serialize log message\"}"),
    }
}

// artemis_host::client::consumer -> client/consumer.rs
fn format_target_as_path(target: &str, line: Option<u32>) -> String {
    let path_like = match target.strip_prefix("artemis_host::") {
        Some(without_prefix) => without_prefix.replace("::", "/") + ".rs",
        None => target.replace("::", "/"),
    };

    match line {
        Some(line_num) => format!("{}:{}", path_like, line_num),
        None => path_like,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flexi_logger::DeferredNow;

    fn render(
        format: fn(
            &mut dyn std::io::Write,
            &mut DeferredNow,
            &log::Record<'_>,
        ) -> Result<(), std::io::Error>,
        target: &str,
        line: Option<u32>,
    ) -> String {
        let mut buffer = Vec::new();
        let mut now = DeferredNow::new();
        let record = log::Record::builder()
            .level(log::Level::Warn)
            .target(target)
            .line(line)
            .args(format_args!("handler failed"))
            .build();

        format(&mut buffer, &mut now, &record).expect("format should succeed");
        String::from_utf8(buffer).expect("output should be valid UTF-8")
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert_eq!("EXT".parse::<LogFormat>(), Ok(LogFormat::Ext));
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_simple_format_has_level_and_message() {
        let output = render(simple_format, "artemis_host::client::consumer", Some(7));
        assert!(output.contains("WRN handler failed"), "got: {}", output);
        assert!(!output.contains("consumer.rs"));
    }

    #[test]
    fn test_extended_format_includes_source_location() {
        let output = render(extended_format, "artemis_host::client::consumer", Some(7));
        assert!(
            output.ends_with("WRN handler failed (client/consumer.rs:7)"),
            "got: {}",
            output
        );
    }

    #[test]
    fn test_json_format_is_single_object() {
        let output = render(json_format, "tokio::runtime", None);
        let value: serde_json::Value = serde_json::from_str(&output).expect("valid json");
        assert_eq!(value["level"], "WRN");
        assert_eq!(value["message"], "handler failed");
        assert_eq!(value["target"], "tokio/runtime");
        assert!(!output.contains('\n'));
    }

    #[test]
    fn test_format_target_as_path() {
        assert_eq!(
            format_target_as_path("artemis_host::broker::memory", Some(12)),
            "broker/memory.rs:12"
        );
        assert_eq!(format_target_as_path("hyper::client", None), "hyper/client");
    }
}
