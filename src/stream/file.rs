//! File stream endpoint (§4.9): transparent-gzip read, buffered write with
//! periodic flush, and file-swap templates (`::T`, `::+offset`, `::xspeed`,
//! `::S=swap`) that rotate to a new path on a margin boundary.

use super::{RateCounter, Stat, Stream, StreamError, StreamKind, StreamState};
use crate::time::Time;
use flate2::read::GzDecoder;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};

/// Parsed `::`-separated swap template trailing a `file://` path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SwapTemplate {
    /// `::T`: path contains `%Y%m%d%H%M%S`-style time tokens, substituted
    /// from the current system time at each swap.
    pub time_tagged: bool,
    /// `::+offset`: seconds to shift the swap boundary relative to the
    /// natural UTC hour/day boundary.
    pub offset_s: f64,
    /// `::xspeedN`: playback speed multiplier for read-mode replay.
    pub speed: Option<f64>,
    /// `::S=swap`: margin in seconds before the next natural boundary at
    /// which the file is proactively rotated.
    pub swap_margin_s: Option<f64>,
}

impl SwapTemplate {
    /// Parses the `::`-joined trailer (already split off the base path by
    /// [`super::url::parse_stream_url`]). Returns `None` for an empty
    /// trailer (no swap template present).
    pub fn parse(trailer: &str) -> Option<Self> {
        if trailer.is_empty() {
            return None;
        }
        let mut template = SwapTemplate::default();
        for token in trailer.split("::").filter(|t| !t.is_empty()) {
            if token == "T" {
                template.time_tagged = true;
            } else if let Some(off) = token.strip_prefix('+') {
                template.offset_s = off.parse().unwrap_or(0.0);
            } else if let Some(speed) = token.strip_prefix("xspeed") {
                template.speed = speed.parse().ok();
            } else if let Some(margin) = token.strip_prefix("S=") {
                template.swap_margin_s = margin.parse().ok();
            }
        }
        Some(template)
    }
}

enum Reader {
    Plain(File),
    Gzip(Box<GzDecoder<File>>),
}

impl Read for Reader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Reader::Plain(f) => f.read(buf),
            Reader::Gzip(g) => g.read(buf),
        }
    }
}

/// `file://` endpoint: read mode transparently gunzips `.gz`-suffixed
/// paths; write mode buffers and flushes after each cycle write, rotating
/// to a fresh file when [`SwapTemplate`] says a boundary has passed.
pub struct FileStream {
    path: String,
    mode: super::Mode,
    swap: Option<SwapTemplate>,
    reader: Option<Reader>,
    writer: Option<BufWriter<File>>,
    state: StreamState,
    rate: RateCounter,
    opened_at: Option<Time>,
}

impl FileStream {
    pub fn new(path: impl Into<String>, mode: super::Mode, swap: Option<SwapTemplate>) -> Self {
        Self {
            path: path.into(),
            mode,
            swap,
            reader: None,
            writer: None,
            state: StreamState::Closed,
            rate: RateCounter::default(),
            opened_at: None,
        }
    }

    fn resolved_path(&self, now: Time) -> String {
        match &self.swap {
            Some(t) if t.time_tagged => substitute_time_tokens(&self.path, now),
            _ => self.path.clone(),
        }
    }

    /// Checks whether the configured swap margin has been crossed since
    /// `opened_at`; if so, closes and reopens against the newly resolved
    /// path (§4.9 "on swap boundary a new file is opened atomically").
    pub fn maybe_swap(&mut self, now: Time) -> Result<(), StreamError> {
        let Some(template) = &self.swap else { return Ok(()) };
        let Some(margin) = template.swap_margin_s else { return Ok(()) };
        let Some(opened_at) = self.opened_at else { return Ok(()) };
        if Time::diff(now, opened_at) + template.offset_s >= margin {
            self.close();
            self.open_at(now)?;
        }
        Ok(())
    }

    fn open_at(&mut self, now: Time) -> Result<(), StreamError> {
        let path = self.resolved_path(now);
        match self.mode {
            super::Mode::Read => {
                let file = File::open(&path)?;
                self.reader = Some(if path.ends_with(".gz") {
                    Reader::Gzip(Box::new(GzDecoder::new(file)))
                } else {
                    Reader::Plain(file)
                });
            },
            super::Mode::Write | super::Mode::ReadWrite => {
                let file = OpenOptions::new().create(true).append(true).open(&path)?;
                self.writer = Some(BufWriter::new(file));
            },
        }
        self.opened_at = Some(now);
        self.state = StreamState::Open;
        Ok(())
    }
}

fn substitute_time_tokens(path: &str, now: Time) -> String {
    let (y, mo, d, h, mi, s) = crate::time::time_to_epoch(now);
    path.replace("%Y", &format!("{y:04}"))
        .replace("%m", &format!("{mo:02}"))
        .replace("%d", &format!("{d:02}"))
        .replace("%H", &format!("{h:02}"))
        .replace("%M", &format!("{mi:02}"))
        .replace("%S", &format!("{:02}", s as u32))
}

impl Stream for FileStream {
    fn kind(&self) -> StreamKind {
        StreamKind::File
    }

    fn open(&mut self) -> Result<(), StreamError> {
        self.open_at(Time::new(0, 0.0))
    }

    fn close(&mut self) {
        self.reader = None;
        if let Some(mut w) = self.writer.take() {
            let _ = w.flush();
        }
        self.state = StreamState::Closed;
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let Some(reader) = &mut self.reader else { return Ok(0) };
        let n = match reader.read(buf) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => 0,
            Err(e) => return Err(e.into()),
        };
        self.rate.add(n);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, StreamError> {
        let Some(writer) = &mut self.writer else { return Err(StreamError::Closed) };
        writer.write_all(buf)?;
        writer.flush()?;
        self.rate.add(buf.len());
        Ok(buf.len())
    }

    fn state(&self) -> StreamState {
        self.state
    }

    fn stat(&mut self) -> Stat {
        let rate = self.rate.tick();
        match self.mode {
            super::Mode::Read => Stat { in_bytes: self.rate.total(), in_rate_bps: rate, ..Default::default() },
            _ => Stat { out_bytes: self.rate.total(), out_rate_bps: rate, ..Default::default() },
        }
    }

    fn maybe_swap(&mut self, now: Time) -> Result<(), StreamError> {
        FileStream::maybe_swap(self, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_template_parses_all_tokens() {
        let t = SwapTemplate::parse("T::+30::xspeed2.5::S=5").unwrap();
        assert!(t.time_tagged);
        assert_eq!(t.offset_s, 30.0);
        assert_eq!(t.speed, Some(2.5));
        assert_eq!(t.swap_margin_s, Some(5.0));
    }

    #[test]
    fn file_roundtrip_byte_for_byte() {
        let dir = std::env::temp_dir().join(format!("gnss-rt-test-{}", std::process::id()));
        let out_path = dir.with_extension("out.bin");
        let mut writer = FileStream::new(out_path.to_str().unwrap(), super::super::Mode::Write, None);
        writer.open().unwrap();
        writer.write(b"hello rtcm").unwrap();
        writer.close();

        let mut reader = FileStream::new(out_path.to_str().unwrap(), super::super::Mode::Read, None);
        reader.open().unwrap();
        let mut buf = [0u8; 32];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello rtcm");

        let _ = std::fs::remove_file(&out_path);
    }
}
