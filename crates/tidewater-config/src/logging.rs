use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Supported logging output formats.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Structured JSON suitable for ingestion by logging stacks.
    Json,
    /// Human-readable single line output.
    #[default]
    Compact,
}

/// Severity threshold for emitted log lines.
///
/// `Warning` and `Critical` keep the operator-facing names used in server
/// configuration files; they map onto the `warn` and `error` tracing levels.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogLevel {
    /// Everything, including per-connection chatter.
    Debug,
    /// Lifecycle progress and instance loading.
    #[default]
    Info,
    /// Recoverable anomalies.
    Warning,
    /// Failures of a single operation.
    Error,
    /// Failures that stop the server.
    Critical,
}

impl LogLevel {
    /// Filter directive understood by `tracing_subscriber::EnvFilter`.
    #[must_use]
    pub const fn filter_directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error | Self::Critical => "error",
        }
    }
}

/// Errors encountered while parsing a [`LogFormat`] or [`LogLevel`] from text.
pub type LogParseError = strum::ParseError;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("debug", LogLevel::Debug, "debug")]
    #[case("WARNING", LogLevel::Warning, "warn")]
    #[case("critical", LogLevel::Critical, "error")]
    fn parses_levels_case_insensitively(
        #[case] raw: &str,
        #[case] expected: LogLevel,
        #[case] directive: &str,
    ) {
        let level: LogLevel = raw.parse().expect("level should parse");
        assert_eq!(level, expected);
        assert_eq!(level.filter_directive(), directive);
    }

    #[test]
    fn rejects_unknown_level() {
        assert!("verbose".parse::<LogLevel>().is_err());
    }
}
