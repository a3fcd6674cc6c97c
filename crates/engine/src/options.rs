// Startup and per-media option parsing
//
// Options are free-form strings. The engine understands a handful of them and
// keeps everything else verbatim so callers can pass module options through.

use crate::instance::LogLevel;

/// Parse timeout applied when the caller does not give one (milliseconds)
pub const DEFAULT_PARSE_TIMEOUT_MS: u64 = 5000;

/// Upper bound for the pacing multiplier
const MAX_RATE: f64 = 64.0;

/// Resolved engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    /// Decode audio elementary streams
    pub audio: bool,
    /// Playback pacing multiplier (1.0 = real time)
    pub rate: f64,
    /// Default parse timeout in milliseconds; 0 waits forever
    pub parse_timeout_ms: u64,
    /// Most verbose level forwarded to the log callback; `None` forwards nothing
    pub verbosity: Option<LogLevel>,
    /// Options the engine does not interpret
    pub passthrough: Vec<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            audio: true,
            rate: 1.0,
            parse_timeout_ms: DEFAULT_PARSE_TIMEOUT_MS,
            verbosity: Some(LogLevel::Warning),
            passthrough: Vec::new(),
        }
    }
}

impl EngineOptions {
    /// Build options from startup strings such as `--no-audio` or `--rate=4`
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Self {
        let mut options = Self::default();
        for arg in args {
            options.apply(arg.as_ref());
        }
        options
    }

    /// Apply a single option string.
    ///
    /// Leading `-` and `:` are ignored, so `--no-audio`, `-no-audio` and the
    /// per-media form `:no-audio` are equivalent.
    pub fn apply(&mut self, raw: &str) {
        let trimmed = raw.trim().trim_start_matches(['-', ':']);
        let (name, value) = match trimmed.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (trimmed, None),
        };

        match (name, value) {
            ("no-audio", None) => self.audio = false,
            ("audio", None) => self.audio = true,
            // Audio only: there is no video output to switch off.
            ("no-video", None) | ("video", None) => log::debug!("Accepted {} (no video output)", raw),
            ("quiet", None) | ("q", None) => self.verbosity = None,
            ("rate", Some(value)) => match value.parse::<f64>() {
                Ok(rate) if rate.is_finite() && rate > 0.0 => self.rate = rate.min(MAX_RATE),
                _ => log::warn!("Ignoring invalid rate option: {}", raw),
            },
            ("parse-timeout", Some(value)) => match value.parse::<u64>() {
                Ok(ms) => self.parse_timeout_ms = ms,
                Err(_) => log::warn!("Ignoring invalid parse timeout option: {}", raw),
            },
            ("verbose", Some(value)) => match value.parse::<u8>() {
                Ok(level) => self.verbosity = Some(LogLevel::from_verbosity(level)),
                Err(_) => log::warn!("Ignoring invalid verbosity option: {}", raw),
            },
            _ => {
                log::debug!("Passing through unrecognised option: {}", raw);
                self.passthrough.push(raw.to_string());
            }
        }
    }

    /// Options for one playback session: engine options overlaid with media options
    pub fn merged_with(&self, media_options: &[String]) -> Self {
        let mut merged = self.clone();
        for option in media_options {
            merged.apply(option);
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = EngineOptions::parse::<&str>(&[]);
        assert!(options.audio);
        assert_eq!(options.rate, 1.0);
        assert_eq!(options.parse_timeout_ms, DEFAULT_PARSE_TIMEOUT_MS);
    }

    #[test]
    fn test_known_options() {
        let options = EngineOptions::parse(&["--no-audio", "--no-video", "--rate=4", "--parse-timeout=250"]);
        assert!(!options.audio);
        assert_eq!(options.rate, 4.0);
        assert_eq!(options.parse_timeout_ms, 250);
        assert!(options.passthrough.is_empty());
    }

    #[test]
    fn test_unknown_options_pass_through() {
        let options = EngineOptions::parse(&["-sout-all", "--rate=abc"]);
        assert_eq!(options.passthrough, vec!["-sout-all".to_string()]);
        assert_eq!(options.rate, 1.0);
    }

    #[test]
    fn test_verbosity() {
        assert_eq!(EngineOptions::parse(&["--quiet"]).verbosity, None);
        assert_eq!(
            EngineOptions::parse(&["--verbose=3"]).verbosity,
            Some(LogLevel::Debug)
        );
    }

    #[test]
    fn test_media_options_override() {
        let engine = EngineOptions::parse(&["--rate=2"]);
        let merged = engine.merged_with(&[":no-audio".to_string(), ":rate=8".to_string()]);
        assert!(!merged.audio);
        assert_eq!(merged.rate, 8.0);
        assert!(engine.audio);
    }
}
