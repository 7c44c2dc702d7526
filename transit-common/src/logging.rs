use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Emit an event inside a span named after the direction of the traffic.
#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:tt)*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg)*)
    }};
}

/// Requests made to a provider (token endpoint, send API, mailbox API, sink).
#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:tt)*) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", $($msg)*)
    };

    ($($msg:tt)*) => {
        $crate::outgoing!(level = TRACE, $($msg)*)
    };
}

/// Responses received from a provider.
#[macro_export]
macro_rules! incoming {
    (level = $level:ident, $($msg:tt)*) => {
        $crate::log!($crate::tracing::Level::$level, "incoming", $($msg)*)
    };

    ($($msg:tt)*) => {
        $crate::incoming!(level = TRACE, $($msg)*)
    };
}

/// Probe lifecycle and scheduler bookkeeping.
#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:tt)*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg)*)
    };

    ($($msg:tt)*) => {
        $crate::internal!(level = TRACE, $($msg)*)
    };
}

/// Output format of the log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format {other}")),
        }
    }
}

fn level_from_env() -> LevelFilter {
    let default = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    std::env::var("LOG_LEVEL").map_or(default, |level| {
        LevelFilter::from_str(level.as_str()).unwrap_or_else(|_| {
            eprintln!("Invalid log level specified {level}, defaulting to {default}");
            default
        })
    })
}

fn format_from_env() -> LogFormat {
    std::env::var("LOG_FORMAT").map_or(LogFormat::default(), |format| {
        format.parse().unwrap_or_else(|e| {
            eprintln!("{e}, defaulting to compact output");
            LogFormat::default()
        })
    })
}

/// Install the global subscriber.
///
/// `LOG_LEVEL` picks the level (TRACE in debug builds, INFO otherwise) and
/// `LOG_FORMAT=json` switches to one JSON object per line. Only events from
/// the transit crates are kept; HTTP client internals are dropped.
pub fn init() {
    let level = level_from_env();
    let only_transit = FilterFn::new(|metadata| metadata.target().starts_with("transit"));

    let layer = tracing_subscriber::fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339());

    let layer = match format_from_env() {
        LogFormat::Compact => layer
            .compact()
            .with_ansi(true)
            .with_filter(level)
            .with_filter(only_transit)
            .boxed(),
        LogFormat::Json => layer
            .json()
            .with_ansi(false)
            .with_filter(level)
            .with_filter(only_transit)
            .boxed(),
    };

    if tracing_subscriber::registry().with(layer).try_init().is_err() {
        eprintln!("A global tracing subscriber was already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert!("yaml".parse::<LogFormat>().is_err());
    }
}
