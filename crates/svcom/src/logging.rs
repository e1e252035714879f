use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Crates whose events follow `--log-level`; everything else is capped at warn.
const SVCOM_TARGETS: [&str; 4] = ["svcom", "svcom_payload", "svcom_runtime", "svcom_plugin"];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Filter directives for `level`, followed by any `RUST_LOG` overrides.
fn filter_directives(level: LogLevel, overrides: Option<&str>) -> String {
    let level = level.as_filter();
    let mut directives = vec![level.min(LevelFilter::WARN).to_string()];
    directives.extend(SVCOM_TARGETS.iter().map(|target| format!("{target}={level}")));
    directives.extend(
        overrides
            .map(str::trim)
            .filter(|extra| !extra.is_empty())
            .map(str::to_string),
    );
    directives.join(",")
}

fn env_filter(level: LogLevel) -> EnvFilter {
    let overrides = std::env::var("RUST_LOG").ok();
    EnvFilter::try_new(filter_directives(level, overrides.as_deref()))
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(level, None)))
}

/// Send runtime diagnostics to stderr so stdout stays machine readable.
///
/// Thread names identify the connector dispatcher that logged an event.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter(level))
        .with_ansi(false)
        .with_thread_names(true)
        .with_target(false);

    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_applies_to_svcom_crates_only() {
        assert_eq!(
            filter_directives(LogLevel::Debug, None),
            "warn,svcom=debug,svcom_payload=debug,svcom_runtime=debug,svcom_plugin=debug"
        );
    }

    #[test]
    fn quiet_levels_also_quiet_other_crates() {
        assert!(filter_directives(LogLevel::Error, None).starts_with("error,svcom=error"));
    }

    #[test]
    fn rust_log_directives_come_last() {
        let directives = filter_directives(LogLevel::Info, Some(" svcom_runtime::dispatch=trace "));
        assert!(directives.ends_with(",svcom_plugin=info,svcom_runtime::dispatch=trace"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn blank_rust_log_is_ignored() {
        assert_eq!(
            filter_directives(LogLevel::Warn, Some("  ")),
            filter_directives(LogLevel::Warn, None)
        );
    }
}
