// Logging - Console diagnostics for applications using ipuflow
//
// The library itself only emits `tracing` events. Applications that don't
// install their own subscriber can call `init_logging()` to get the usual
// console output:
//
//   14:03:27.512  INFO ipuflow::exec::engine: Compiling the model using tracing
//
// The level comes from IPUFLOW_LOG_LEVEL (DEBUG, TRACE or TRACE_ALL; info
// otherwise), refined by RUST_LOG directives if present. Timestamps are
// local wall-clock time. Colours are only used when both stdout and stderr
// are terminals.

use std::io::IsTerminal;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Environment variable selecting the console log level.
pub const LOG_LEVEL_ENV: &str = "IPUFLOW_LOG_LEVEL";

/// `chrono` format of the local time of day prefixed to each line.
pub const TIME_FORMAT: &str = "%H:%M:%S%.3f";

/// Map an `IPUFLOW_LOG_LEVEL` value to a level filter.
pub fn parse_level(value: Option<&str>) -> LevelFilter {
    match value {
        Some("DEBUG") => LevelFilter::DEBUG,
        Some("TRACE") | Some("TRACE_ALL") => LevelFilter::TRACE,
        _ => LevelFilter::INFO,
    }
}

/// Install the console subscriber. Returns `false` if a global subscriber
/// was already installed, in which case nothing changes.
pub fn init_logging() -> bool {
    let level = parse_level(std::env::var(LOG_LEVEL_ENV).ok().as_deref());
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let ansi = std::io::stdout().is_terminal() && std::io::stderr().is_terminal();

    let subscriber = tracing_subscriber::registry().with(
        tracing_subscriber::fmt::layer()
            .with_ansi(ansi)
            .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(filter),
    );
    tracing::subscriber::set_global_default(subscriber).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level(Some("DEBUG")), LevelFilter::DEBUG);
        assert_eq!(parse_level(Some("TRACE")), LevelFilter::TRACE);
        assert_eq!(parse_level(Some("TRACE_ALL")), LevelFilter::TRACE);
        assert_eq!(parse_level(Some("debug")), LevelFilter::INFO);
        assert_eq!(parse_level(None), LevelFilter::INFO);
    }

    #[test]
    fn test_time_format() {
        let t = chrono::NaiveTime::from_hms_milli_opt(13, 4, 5, 7).unwrap();
        assert_eq!(t.format(TIME_FORMAT).to_string(), "13:04:05.007");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_logging();
        assert!(!init_logging());
    }
}
