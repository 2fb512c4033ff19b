//! Stream endpoints (C9): a uniform read/write/open/close/stat capability
//! set over file/serial/TCP/NTRIP/UDP/memory-buffer/FTP/HTTP streams,
//! replacing the duck-typed stream handle of the source toolkit (§9
//! "duck-typed stream" redesign note) with a tagged [`StreamKind`] plus one
//! concrete type per variant, all implementing the [`Stream`] trait.
//!
//! Every variant is built on `std::net`/`std::fs` directly — no async
//! runtime, matching the cooperative single-threaded cycle loop
//! [`crate::server`] drives. The only non-std dependency is the `serial`
//! feature's `serialport` crate (no example in this crate's retrieval pack
//! carries serial I/O; `serialport` is the ecosystem-standard crate any
//! RTKLIB-style Rust tool would reach for, noted in DESIGN.md).

pub mod fetch;
pub mod file;
pub mod mem;
pub mod net;
pub mod ntrip;
#[cfg(feature = "serial")]
pub mod serial;
pub mod url;

use crate::time::Time;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};
use thiserror::Error;

pub use url::{parse_stream_url, StreamUrl};

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed stream URL: {0}")]
    MalformedUrl(String),
    #[error("unsupported stream kind: {0:?}")]
    Unsupported(StreamKind),
    #[error("stream is closed")]
    Closed,
    #[error("NTRIP handshake failed: {0}")]
    NtripHandshake(String),
    #[error("too many peers connected to this server stream")]
    TooManyPeers,
}

/// Tagged endpoint kind (§6 stream URL schemes / §9 "duck-typed stream").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    File,
    Serial,
    TcpServer,
    TcpClient,
    NtripClient,
    NtripServer,
    NtripCaster,
    UdpServer,
    UdpClient,
    MemBuffer,
    Ftp,
    Http,
}

impl StreamKind {
    /// Resolves a config `inpstrN-type`/`outstrN-type` tag to a
    /// [`StreamKind`], the same closed vocabulary §6's URL schemes use.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "file" => StreamKind::File,
            "serial" => StreamKind::Serial,
            "tcpsvr" => StreamKind::TcpServer,
            "tcpcli" => StreamKind::TcpClient,
            "ntripcli" => StreamKind::NtripClient,
            "ntripsvr" => StreamKind::NtripServer,
            "ntripcas" => StreamKind::NtripCaster,
            "udpsvr" => StreamKind::UdpServer,
            "udpcli" => StreamKind::UdpClient,
            "membuf" => StreamKind::MemBuffer,
            "ftp" => StreamKind::Ftp,
            "http" => StreamKind::Http,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
    ReadWrite,
}

/// Lifecycle state of one endpoint (§7 "one-character per-stream status").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Closed,
    Opening,
    Open,
    Waiting,
    Error,
}

impl StreamState {
    pub fn status_char(self) -> char {
        match self {
            StreamState::Open => '-',
            StreamState::Closed => 'C',
            StreamState::Opening | StreamState::Waiting => 'W',
            StreamState::Error => 'E',
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stat {
    pub in_bytes: u64,
    pub out_bytes: u64,
    pub in_rate_bps: f64,
    pub out_rate_bps: f64,
}

/// Sliding-window byte/rate counter (§4.9 "Rates are computed over a
/// sliding window at each stat tick"), shared by every endpoint via
/// composition rather than re-derived per variant.
#[derive(Debug)]
pub struct RateCounter {
    total: u64,
    window_bytes: u64,
    window_start: Instant,
    last_rate_bps: f64,
}

impl Default for RateCounter {
    fn default() -> Self {
        Self {
            total: 0,
            window_bytes: 0,
            window_start: Instant::now(),
            last_rate_bps: 0.0,
        }
    }
}

impl RateCounter {
    pub fn add(&mut self, n: usize) {
        self.total += n as u64;
        self.window_bytes += n as u64;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Folds the current window into a bytes-per-second rate and starts a
    /// fresh window; a tick shorter than 50ms reuses the previous rate
    /// rather than dividing by a near-zero duration.
    pub fn tick(&mut self) -> f64 {
        let elapsed = self.window_start.elapsed().as_secs_f64();
        if elapsed >= 0.05 {
            self.last_rate_bps = self.window_bytes as f64 / elapsed;
            self.window_bytes = 0;
            self.window_start = Instant::now();
        }
        self.last_rate_bps
    }
}

/// Shared endpoint contract (§9 "duck-typed stream" redesign: a capability
/// set plus a tagged variant, rather than a duck-typed handle). The
/// [`crate::server::StreamServer`] cycle loop holds every input/output
/// behind `Box<dyn Stream>` so it never needs to match on [`StreamKind`]
/// except at construction time.
pub trait Stream: Send {
    fn kind(&self) -> StreamKind;
    fn open(&mut self) -> Result<(), StreamError>;
    fn close(&mut self);
    /// Non-blocking read: returns `Ok(0)` rather than blocking when no
    /// bytes are currently available (§4.9 "non-blocking reads").
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError>;
    fn write(&mut self, buf: &[u8]) -> Result<usize, StreamError>;
    fn state(&self) -> StreamState;
    fn stat(&mut self) -> Stat;

    /// File-swap margin check (spec.md §4.10 step 7). A no-op for every
    /// variant except [`file::FileStream`], which rotates to a fresh path
    /// when its swap template's margin has been crossed.
    fn maybe_swap(&mut self, _now: Time) -> Result<(), StreamError> {
        Ok(())
    }
}

/// Maximum simultaneous peers a `tcpsvr://` endpoint accepts (spec.md §4.9
/// "accept queue (up to small N connections)").
pub const MAX_TCP_PEERS: usize = 15;

fn resolve_addr(host: &str, port: Option<u16>) -> Result<SocketAddr, StreamError> {
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    let port = port.ok_or_else(|| StreamError::MalformedUrl(format!("{host} missing port")))?;
    (host, port)
        .to_socket_addrs()
        .map_err(|e| StreamError::MalformedUrl(e.to_string()))?
        .next()
        .ok_or_else(|| StreamError::MalformedUrl(format!("{host}:{port} resolved to nothing")))
}

/// Builds a concrete endpoint from a `type`/`path` config stanza (spec.md
/// §6 `inpstrN-type`/`inpstrN-path`), the same split the server's
/// configuration keeps between a stream's kind and its address. `path`
/// carries whatever tail the scheme expects (a plain file path, a
/// `host:port`, a serial tuple, ...), matching how `§6`'s stream URLs
/// look once the scheme prefix is stripped off.
pub fn build_stream(
    stream_type: &str,
    path: &str,
    mode: Mode,
    reconnect_interval: Duration,
    timeout: Duration,
) -> Result<Box<dyn Stream>, StreamError> {
    let kind = StreamKind::from_tag(stream_type)
        .ok_or_else(|| StreamError::MalformedUrl(format!("unknown stream type {stream_type:?}")))?;

    // `membuf` takes no address and isn't part of `url::parse_stream_url`'s
    // scheme grammar (it has no wire representation to parse); every other
    // kind is round-tripped through that grammar, so the config-tag
    // vocabulary (`StreamKind::from_tag`) is translated to the URL scheme
    // vocabulary first rather than assumed identical to it.
    if kind == StreamKind::MemBuffer {
        return Ok(Box::new(mem::MemBufferStream::new(65_536, mode)));
    }

    let scheme = match kind {
        StreamKind::File => "file",
        StreamKind::Serial => "serial",
        StreamKind::TcpServer => "tcpsvr",
        StreamKind::TcpClient => "tcpcli",
        StreamKind::NtripClient => "ntrip",
        StreamKind::NtripServer => "ntrips",
        StreamKind::NtripCaster => "ntripc",
        StreamKind::UdpServer => "udpsvr",
        StreamKind::UdpClient => "udpcli",
        StreamKind::Ftp => "ftp",
        StreamKind::Http => "http",
        StreamKind::MemBuffer => unreachable!("handled above"),
    };
    let full_url = format!("{scheme}://{path}");
    let url = parse_stream_url(&full_url)?;
    build_stream_from_url(&url, mode, reconnect_interval, timeout)
}

/// As [`build_stream`], but from an already-parsed [`StreamUrl`] (e.g. one
/// taken straight off a `stream://...` literal rather than a config
/// stanza).
pub fn build_stream_from_url(
    url: &StreamUrl,
    mode: Mode,
    reconnect_interval: Duration,
    timeout: Duration,
) -> Result<Box<dyn Stream>, StreamError> {
    Ok(match url.kind {
        StreamKind::File => Box::new(file::FileStream::new(url.path.clone(), mode, url.swap.clone())),

        #[cfg(feature = "serial")]
        StreamKind::Serial => {
            let config = serial::SerialConfig::parse(&url.path)?;
            Box::new(serial::SerialStream::new(config))
        },
        #[cfg(not(feature = "serial"))]
        StreamKind::Serial => return Err(StreamError::Unsupported(StreamKind::Serial)),

        StreamKind::TcpServer => {
            let addr = resolve_addr(&url.host, url.port)?;
            Box::new(net::TcpServerStream::new(addr, MAX_TCP_PEERS))
        },
        StreamKind::TcpClient => {
            let addr = resolve_addr(&url.host, url.port)?;
            Box::new(net::TcpClientStream::new(addr, reconnect_interval))
        },
        StreamKind::UdpServer => {
            let addr = resolve_addr(&url.host, url.port)?;
            Box::new(net::UdpServerStream::new(addr))
        },
        StreamKind::UdpClient => {
            let addr = resolve_addr(&url.host, url.port)?;
            Box::new(net::UdpClientStream::new(addr))
        },
        StreamKind::NtripClient => {
            let addr = resolve_addr(&url.host, url.port.or(Some(2101)))?;
            Box::new(ntrip::NtripClientStream::new(
                addr,
                url.mountpoint.clone().unwrap_or_default(),
                url.user.clone(),
                url.passwd.clone(),
                timeout,
            ))
        },
        StreamKind::NtripServer => {
            let addr = resolve_addr(&url.host, url.port.or(Some(2101)))?;
            Box::new(ntrip::NtripServerStream::new(
                addr,
                url.mountpoint.clone().unwrap_or_default(),
                url.passwd.clone().unwrap_or_default(),
            ))
        },
        StreamKind::NtripCaster => {
            let addr = resolve_addr(&url.host, url.port.or(Some(2101)))?;
            Box::new(ntrip::NtripCasterStream::new(
                addr,
                url.mountpoint.clone().unwrap_or_default(),
                url.passwd.clone().unwrap_or_default(),
            ))
        },
        StreamKind::MemBuffer => Box::new(mem::MemBufferStream::new(65_536, mode)),
        StreamKind::Ftp => Box::new(fetch::FetchStream::ftp(
            url.host.clone(),
            url.port.unwrap_or(21),
            url.path.clone(),
            url.user.clone(),
            url.passwd.clone(),
            reconnect_interval,
        )),
        StreamKind::Http => Box::new(fetch::FetchStream::http(
            url.host.clone(),
            url.port.unwrap_or(80),
            url.path.clone(),
            reconnect_interval,
        )),
    })
}

#[cfg(test)]
mod build_tests {
    use super::*;

    #[test]
    fn builds_file_stream_from_type_and_path() {
        let s = build_stream("file", "/tmp/gnss-rt-build-test.bin", Mode::Write, Duration::from_secs(10), Duration::from_secs(10))
            .unwrap();
        assert_eq!(s.kind(), StreamKind::File);
    }

    #[test]
    fn builds_tcpcli_stream_from_type_and_path() {
        let s = build_stream("tcpcli", "127.0.0.1:29000", Mode::Read, Duration::from_secs(10), Duration::from_secs(10))
            .unwrap();
        assert_eq!(s.kind(), StreamKind::TcpClient);
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(build_stream("carrier-pigeon", "foo", Mode::Read, Duration::from_secs(1), Duration::from_secs(1)).is_err());
    }
}
