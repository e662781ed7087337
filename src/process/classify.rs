//! Severity classification of child process output

use regex::Regex;
use std::sync::OnceLock;
use tracing::Level;

/// `2024-01-01 10:00:00,000` anywhere in an engine line
fn engine_timestamp() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}:\d{2}(?:[,.]\d+)?\s*").expect("valid regex")
    })
}

/// `[2024-01-01 10-00-00.000]` (brackets optional) in a mixer line
fn mixer_timestamp() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[?\d{4}-\d{2}-\d{2}[ T]\d{2}[-:]\d{2}[-:]\d{2}(?:[,.]\d+)?\]?\s*")
            .expect("valid regex")
    })
}

/// Severity markers per backend, highest severity first
const ENGINE_MARKERS: &[(&str, Level)] = &[
    ("ERROR", Level::ERROR),
    ("WARNING", Level::WARN),
    ("INFO", Level::INFO),
    ("DEBUG", Level::DEBUG),
];

const MIXER_MARKERS: &[(&str, Level)] = &[
    ("Error", Level::ERROR),
    ("Warn", Level::WARN),
    ("Notice", Level::INFO),
    ("Info", Level::INFO),
    ("Debug", Level::DEBUG),
];

/// A line of child output with its severity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedLine {
    pub level: Level,
    pub message: String,
}

/// Backend-specific rule for mapping output lines to log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogClassifier {
    /// Playback engine (`INFO`, `ERROR`, ... after a timestamp)
    Engine,
    /// Stream mixer (`[Info]`, `[Notice]`, ... after a bracketed timestamp)
    Mixer,
    /// Everything at debug
    Plain,
}

impl LogClassifier {
    pub fn classify(&self, line: &str) -> ClassifiedLine {
        let line = line.trim();
        match self {
            LogClassifier::Engine => {
                Self::with_markers(&engine_timestamp().replace(line, ""), ENGINE_MARKERS)
            }
            LogClassifier::Mixer => {
                Self::with_markers(&mixer_timestamp().replace(line, ""), MIXER_MARKERS)
            }
            LogClassifier::Plain => ClassifiedLine {
                level: Level::DEBUG,
                message: line.to_string(),
            },
        }
    }

    fn with_markers(message: &str, markers: &[(&str, Level)]) -> ClassifiedLine {
        let message = message.trim();
        let level = markers
            .iter()
            .find(|(marker, _)| message.contains(marker))
            .map(|(_, level)| *level)
            .unwrap_or(Level::DEBUG);

        ClassifiedLine {
            level,
            message: message.to_string(),
        }
    }

    /// Classify `line` and emit it as a tracing event tagged with `process`
    pub fn emit(&self, process: &str, line: &str) {
        let ClassifiedLine { level, message } = self.classify(line);
        if message.is_empty() {
            return;
        }

        match level {
            Level::ERROR => tracing::error!(process, "{}", message),
            Level::WARN => tracing::warn!(process, "{}", message),
            Level::INFO => tracing::info!(process, "{}", message),
            Level::DEBUG => tracing::debug!(process, "{}", message),
            _ => tracing::trace!(process, "{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_line() {
        let line = "2024-01-01 10:00:00,000 ERROR component message";
        let classified = LogClassifier::Engine.classify(line);

        assert_eq!(classified.level, Level::ERROR);
        assert_eq!(classified.message, "ERROR component message");
    }

    #[test]
    fn test_engine_levels() {
        let line = "INFO 2024-01-01 10:00:00,123 [1:MainThread] core";
        assert_eq!(LogClassifier::Engine.classify(line).level, Level::INFO);
        assert_eq!(
            LogClassifier::Engine.classify("2024-01-01 10:00:00,000 DEBUG audio").level,
            Level::DEBUG
        );
        assert_eq!(
            LogClassifier::Engine.classify("2024-01-01 10:00:00,000 WARNING low disk").level,
            Level::WARN
        );
        assert_eq!(LogClassifier::Engine.classify("plain output").level, Level::DEBUG);
    }

    #[test]
    fn test_engine_timestamp_stripped_mid_line() {
        let classified = LogClassifier::Engine.classify("INFO     2024-01-01 10:00:00,123 Started");
        assert_eq!(classified.message, "INFO     Started");
    }

    #[test]
    fn test_mixer_lines() {
        let classified =
            LogClassifier::Mixer.classify("[2024-01-01 10-00-00.123] [Error] (Server) bind failed");
        assert_eq!(classified.level, Level::ERROR);
        assert_eq!(classified.message, "[Error] (Server) bind failed");

        let notice = LogClassifier::Mixer
            .classify("2024-01-01 10-00-00.123 [Notice] (Snapserver) Settings file");
        assert_eq!(notice.level, Level::INFO);
        assert!(!notice.message.contains("2024"));

        assert_eq!(LogClassifier::Mixer.classify("[Debug] tick").level, Level::DEBUG);
        assert_eq!(LogClassifier::Mixer.classify("no markers").level, Level::DEBUG);
    }

    #[test]
    fn test_mixer_ignores_engine_markers() {
        // Case matters: mixer markers are capitalised words
        assert_eq!(LogClassifier::Mixer.classify("ERROR shouting").level, Level::DEBUG);
    }

    #[test]
    fn test_plain_is_debug() {
        let classified = LogClassifier::Plain.classify("2024-01-01 10:00:00,000 ERROR kept as is");
        assert_eq!(classified.level, Level::DEBUG);
        assert_eq!(classified.message, "2024-01-01 10:00:00,000 ERROR kept as is");
    }
}
