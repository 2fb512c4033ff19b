//! Configuration (spec.md §6): flat `key = value` text, one assignment per
//! line, `#` starts a line comment, blank lines ignored. Parsed once into a
//! typed [`Config`] record — the stream server never re-reads the raw text
//! after startup, matching this crate's "dynamic option bag -> explicit
//! options" redesign note (spec.md §9) applied to configuration as well as
//! to per-decoder receiver options.

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("malformed line {line}: {text:?}")]
    MalformedLine { line: usize, text: String },
    #[error("unknown format tag: {0}")]
    UnknownFormatTag(String),
    #[error("malformed stream URL: {0}")]
    MalformedUrl(String),
    #[error("numeric value for key {key:?} is not valid: {value:?}")]
    BadNumber { key: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleTimeType {
    Gpst,
    Utc,
    Jst,
    Tow,
}

/// One `inpstrN`/`outstrN`/`logstrN` stanza: the stream's type tag is kept
/// as a free string here (`file`, `serial`, `tcpsvr`, ...) and resolved to a
/// [`crate::stream::StreamKind`] by the server at start, the same
/// "fail server start on unknown tag" policy spec.md §7 describes for
/// *ConfigError*.
#[derive(Debug, Clone, Default)]
pub struct StreamSpec {
    pub stream_type: String,
    pub path: String,
    pub format: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub console_passwd: Option<String>,
    pub console_timetype: ConsoleTimeType,

    /// `inpstrN-*`, 1-indexed to match the config key suffix.
    pub input_streams: HashMap<u32, StreamSpec>,
    /// `outstrN-*`.
    pub output_streams: HashMap<u32, StreamSpec>,
    /// `logstrN-*`.
    pub log_streams: HashMap<u32, StreamSpec>,

    pub svr_cycle_ms: u64,
    pub timeout_ms: u64,
    pub reconnect_ms: u64,
    pub nmea_cycle_ms: u64,
    pub buffer_size: usize,
    pub fswap_margin_s: f64,
    pub proxy_addr: Option<String>,

    /// Free-form processing parameters (`mode`, `elmask`, `navsys`, ...),
    /// kept as a string map rather than a closed struct since spec.md §6
    /// only says "processing parameters" without enumerating every key —
    /// consumers (the solver, out of this crate's scope) look these up by
    /// name.
    pub processing: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            console_passwd: None,
            console_timetype: ConsoleTimeType::Gpst,
            input_streams: HashMap::new(),
            output_streams: HashMap::new(),
            log_streams: HashMap::new(),
            svr_cycle_ms: 10,
            timeout_ms: 10_000,
            reconnect_ms: 10_000,
            nmea_cycle_ms: 0,
            buffer_size: 32_768,
            fswap_margin_s: 30.0,
            proxy_addr: None,
            processing: HashMap::new(),
        }
    }
}

impl Config {
    pub fn svr_cycle(&self) -> Duration {
        Duration::from_millis(self.svr_cycle_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_ms)
    }

    /// Parses `key = value` text per spec.md §6. Unrecognized keys are kept
    /// in `processing` rather than rejected — only a malformed *line*
    /// (no `=`) or an out-of-range numeric value is a [`ConfigError`],
    /// matching spec.md §7's "fail server start; report position in input"
    /// policy for *ConfigError*.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut cfg = Config::default();

        for (line_no, raw_line) in text.lines().enumerate() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::MalformedLine {
                    line: line_no + 1,
                    text: raw_line.to_string(),
                });
            };
            let key = key.trim();
            let value = value.trim();
            cfg.apply(key, value)?;
        }

        Ok(cfg)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let parse_u64 = |v: &str| -> Result<u64, ConfigError> {
            v.parse().map_err(|_| ConfigError::BadNumber {
                key: key.to_string(),
                value: v.to_string(),
            })
        };
        let parse_f64 = |v: &str| -> Result<f64, ConfigError> {
            v.parse().map_err(|_| ConfigError::BadNumber {
                key: key.to_string(),
                value: v.to_string(),
            })
        };

        match key {
            "console-passwd" => self.console_passwd = Some(value.to_string()),
            "console-timetype" => {
                self.console_timetype = match value {
                    "gpst" => ConsoleTimeType::Gpst,
                    "utc" => ConsoleTimeType::Utc,
                    "jst" => ConsoleTimeType::Jst,
                    "tow" => ConsoleTimeType::Tow,
                    _ => ConsoleTimeType::Gpst,
                };
            },
            "misc-svrcycle" => self.svr_cycle_ms = parse_u64(value)?,
            "misc-timeout" => self.timeout_ms = parse_u64(value)?,
            "misc-reconnect" => self.reconnect_ms = parse_u64(value)?,
            "misc-nmeacycle" => self.nmea_cycle_ms = parse_u64(value)?,
            "misc-buffsize" => self.buffer_size = parse_u64(value)? as usize,
            "misc-fswapmargin" => self.fswap_margin_s = parse_f64(value)?,
            "misc-proxyaddr" => self.proxy_addr = Some(value.to_string()),
            _ => {
                if let Some((n, field)) = split_indexed(key, "inpstr") {
                    apply_stream_field(self.input_streams.entry(n).or_default(), field, value);
                } else if let Some((n, field)) = split_indexed(key, "outstr") {
                    apply_stream_field(self.output_streams.entry(n).or_default(), field, value);
                } else if let Some((n, field)) = split_indexed(key, "logstr") {
                    apply_stream_field(self.log_streams.entry(n).or_default(), field, value);
                } else {
                    self.processing.insert(key.to_string(), value.to_string());
                }
            },
        }
        Ok(())
    }
}

/// Splits a key like `inpstr2-path` into `(2, "path")` when `key` starts
/// with `prefix` followed by digits then `-`.
fn split_indexed<'a>(key: &'a str, prefix: &str) -> Option<(u32, &'a str)> {
    let rest = key.strip_prefix(prefix)?;
    let dash = rest.find('-')?;
    let (digits, field) = rest.split_at(dash);
    let n: u32 = digits.parse().ok()?;
    Some((n, &field[1..]))
}

fn apply_stream_field(spec: &mut StreamSpec, field: &str, value: &str) {
    match field {
        "type" => spec.stream_type = value.to_string(),
        "path" => spec.path = value.to_string(),
        "format" => spec.format = value.to_string(),
        _ => {},
    }
}

/// Recognized `#fmt` format tags (spec.md §6).
pub const FORMAT_TAGS: &[&str] = &[
    "rtcm2", "rtcm3", "nov", "oem3", "ubx", "ss2", "hemis", "stq", "javad", "nvs", "binex", "rt17",
    "sbf", "rinex", "sp3",
];

pub fn validate_format_tag(tag: &str) -> Result<(), ConfigError> {
    if FORMAT_TAGS.contains(&tag) {
        Ok(())
    } else {
        Err(ConfigError::UnknownFormatTag(tag.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_keys_and_comments() {
        let text = "\
            # comment line\n\
            misc-svrcycle = 20\n\
            misc-timeout=5000\n\
            inpstr1-type = tcpcli\n\
            inpstr1-path = 127.0.0.1:29000\n\
            inpstr1-format = rtcm3\n\
            outstr1-type = file\n\
            outstr1-path = /tmp/out.bin\n\
        ";
        let cfg = Config::parse(text).unwrap();
        assert_eq!(cfg.svr_cycle_ms, 20);
        assert_eq!(cfg.timeout_ms, 5000);
        let input = &cfg.input_streams[&1];
        assert_eq!(input.stream_type, "tcpcli");
        assert_eq!(input.path, "127.0.0.1:29000");
        assert_eq!(input.format, "rtcm3");
        assert_eq!(cfg.output_streams[&1].stream_type, "file");
    }

    #[test]
    fn malformed_line_rejected() {
        assert!(Config::parse("not-a-kv-line").is_err());
    }

    #[test]
    fn bad_number_rejected() {
        assert!(Config::parse("misc-svrcycle = abc").is_err());
    }

    #[test]
    fn unknown_format_tag_rejected() {
        assert!(validate_format_tag("pdf").is_err());
        assert!(validate_format_tag("rtcm3").is_ok());
    }
}
