//! NTRIP client/server/caster endpoints (§4.9/§6), built directly on
//! `std::net::TcpStream` — no HTTP crate, matching this crate's
//! std::net-only decision for the stream layer (SPEC_FULL.md §9). NTRIP is
//! just HTTP/1.1 GET/POST/SOURCE framing over a raw TCP socket, so a
//! hand-rolled request line plus header block is the idiomatic minimum
//! here, the same level of hand-rolling this crate already applies to the
//! RTCM2/BINEX/novatel wire formats.

use super::{RateCounter, Stat, Stream, StreamError, StreamKind, StreamState};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

fn basic_auth(user: &str, passwd: &str) -> String {
    use std::fmt::Write as _;
    let raw = format!("{user}:{passwd}");
    let mut out = String::new();
    let _ = write!(out, "{}", base64_encode(raw.as_bytes()));
    out
}

/// Minimal base64 encoder (standard alphabet, padded), sized for short
/// NTRIP Basic-auth credential strings rather than general use.
fn base64_encode(input: &[u8]) -> String {
    const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity((input.len() + 2) / 3 * 4);
    for chunk in input.chunks(3) {
        let b0 = chunk[0];
        let b1 = chunk.get(1).copied();
        let b2 = chunk.get(2).copied();
        let n = (b0 as u32) << 16 | (b1.unwrap_or(0) as u32) << 8 | (b2.unwrap_or(0) as u32);
        out.push(ALPHABET[(n >> 18 & 0x3f) as usize] as char);
        out.push(ALPHABET[(n >> 12 & 0x3f) as usize] as char);
        out.push(if b1.is_some() { ALPHABET[(n >> 6 & 0x3f) as usize] as char } else { '=' });
        out.push(if b2.is_some() { ALPHABET[(n & 0x3f) as usize] as char } else { '=' });
    }
    out
}

/// `ntrip://`: GET request against a caster mountpoint, reconnecting with
/// backoff when the stream stalls beyond `timeout_interval` (§5 timeout
/// policy).
pub struct NtripClientStream {
    addr: SocketAddr,
    mountpoint: String,
    user: Option<String>,
    passwd: Option<String>,
    stream: Option<TcpStream>,
    state: StreamState,
    rate: RateCounter,
    last_byte_at: Option<Instant>,
    timeout_interval: Duration,
    last_attempt: Option<Instant>,
    backoff: Duration,
}

impl NtripClientStream {
    pub fn new(
        addr: SocketAddr,
        mountpoint: impl Into<String>,
        user: Option<String>,
        passwd: Option<String>,
        timeout_interval: Duration,
    ) -> Self {
        Self {
            addr,
            mountpoint: mountpoint.into(),
            user,
            passwd,
            stream: None,
            state: StreamState::Closed,
            rate: RateCounter::default(),
            last_byte_at: None,
            timeout_interval,
            last_attempt: None,
            backoff: Duration::from_secs(1),
        }
    }

    fn handshake(&self, stream: &mut TcpStream) -> Result<(), StreamError> {
        let mut request = format!(
            "GET /{} HTTP/1.1\r\nUser-Agent: gnss-rt/1.0\r\nNtrip-Version: Ntrip/2.0\r\n",
            self.mountpoint
        );
        if let (Some(user), Some(passwd)) = (&self.user, &self.passwd) {
            request.push_str(&format!("Authorization: Basic {}\r\n", basic_auth(user, passwd)));
        }
        request.push_str("Connection: close\r\n\r\n");
        stream.write_all(request.as_bytes())?;

        let mut reader = BufReader::new(stream.try_clone()?);
        let mut status = String::new();
        reader.read_line(&mut status)?;
        if !status.contains("200") && !status.to_uppercase().contains("ICY 200") {
            return Err(StreamError::NtripHandshake(status.trim().to_string()));
        }
        // drain header block up to the blank line; body bytes start after.
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 || line == "\r\n" || line == "\n" {
                break;
            }
        }
        Ok(())
    }

    fn try_reconnect(&mut self) {
        if self.state == StreamState::Open {
            return;
        }
        if let Some(last) = self.last_attempt {
            if last.elapsed() < self.backoff {
                return;
            }
        }
        self.last_attempt = Some(Instant::now());
        match TcpStream::connect_timeout(&self.addr, Duration::from_secs(3)) {
            Ok(mut stream) => match self.handshake(&mut stream) {
                Ok(()) => {
                    let _ = stream.set_nonblocking(true);
                    self.stream = Some(stream);
                    self.state = StreamState::Open;
                    self.last_byte_at = Some(Instant::now());
                    self.backoff = Duration::from_secs(1);
                },
                Err(_) => {
                    self.state = StreamState::Waiting;
                    self.backoff = (self.backoff * 2).min(Duration::from_secs(60));
                },
            },
            Err(_) => {
                self.state = StreamState::Waiting;
                self.backoff = (self.backoff * 2).min(Duration::from_secs(60));
            },
        }
    }

    fn stalled(&self) -> bool {
        self.last_byte_at
            .map(|t| t.elapsed() > self.timeout_interval)
            .unwrap_or(false)
    }
}

impl Stream for NtripClientStream {
    fn kind(&self) -> StreamKind {
        StreamKind::NtripClient
    }

    fn open(&mut self) -> Result<(), StreamError> {
        self.try_reconnect();
        Ok(())
    }

    fn close(&mut self) {
        self.stream = None;
        self.state = StreamState::Closed;
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        self.try_reconnect();
        if self.stalled() {
            self.stream = None;
            self.state = StreamState::Waiting;
            return Ok(0);
        }
        let Some(stream) = &mut self.stream else { return Ok(0) };
        match stream.read(buf) {
            Ok(0) => {
                self.stream = None;
                self.state = StreamState::Waiting;
                Ok(0)
            },
            Ok(n) => {
                self.rate.add(n);
                self.last_byte_at = Some(Instant::now());
                Ok(n)
            },
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(_) => {
                self.stream = None;
                self.state = StreamState::Waiting;
                Ok(0)
            },
        }
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize, StreamError> {
        // NMEA GGA upload to the caster is the one write path NTRIP clients
        // support; route it the same way as read-path reconnection state.
        self.try_reconnect();
        let Some(stream) = &mut self.stream else { return Ok(0) };
        let n = stream.write(_buf)?;
        Ok(n)
    }

    fn state(&self) -> StreamState {
        self.state
    }

    fn stat(&mut self) -> Stat {
        let rate = self.rate.tick();
        Stat { in_bytes: self.rate.total(), in_rate_bps: rate, ..Default::default() }
    }
}

/// `ntrips://`: uploads a stream to a caster mountpoint via NTRIP 1.0's
/// `SOURCE` method (source-side of the client/server pair).
pub struct NtripServerStream {
    addr: SocketAddr,
    mountpoint: String,
    passwd: String,
    stream: Option<TcpStream>,
    state: StreamState,
    rate: RateCounter,
}

impl NtripServerStream {
    pub fn new(addr: SocketAddr, mountpoint: impl Into<String>, passwd: impl Into<String>) -> Self {
        Self {
            addr,
            mountpoint: mountpoint.into(),
            passwd: passwd.into(),
            stream: None,
            state: StreamState::Closed,
            rate: RateCounter::default(),
        }
    }
}

impl Stream for NtripServerStream {
    fn kind(&self) -> StreamKind {
        StreamKind::NtripServer
    }

    fn open(&mut self) -> Result<(), StreamError> {
        let mut stream = TcpStream::connect(self.addr)?;
        let request = format!("SOURCE {} /{}\r\n\r\n", self.passwd, self.mountpoint);
        stream.write_all(request.as_bytes())?;

        let mut reader = BufReader::new(stream.try_clone()?);
        let mut status = String::new();
        reader.read_line(&mut status)?;
        if !status.to_uppercase().starts_with("OK") {
            return Err(StreamError::NtripHandshake(status.trim().to_string()));
        }
        stream.set_nonblocking(true)?;
        self.stream = Some(stream);
        self.state = StreamState::Open;
        Ok(())
    }

    fn close(&mut self) {
        self.stream = None;
        self.state = StreamState::Closed;
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, StreamError> {
        Ok(0)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, StreamError> {
        let Some(stream) = &mut self.stream else { return Err(StreamError::Closed) };
        stream.write_all(buf)?;
        self.rate.add(buf.len());
        Ok(buf.len())
    }

    fn state(&self) -> StreamState {
        self.state
    }

    fn stat(&mut self) -> Stat {
        let rate = self.rate.tick();
        Stat { out_bytes: self.rate.total(), out_rate_bps: rate, ..Default::default() }
    }
}

/// `ntripc://`: a minimal caster. Accepts `SOURCE` uploads (one writer per
/// mountpoint) and `GET` requests from clients, fanning each mountpoint's
/// bytes out to all subscribed clients. Intended for test harnesses and
/// small private networks, not a drop-in replacement for a production
/// caster (no source table persistence, no HTTPS).
pub struct NtripCasterStream {
    addr: SocketAddr,
    listener: Option<TcpListener>,
    mountpoint: String,
    source_passwd: String,
    source: Option<TcpStream>,
    clients: Vec<TcpStream>,
    pending: VecDeque<u8>,
    state: StreamState,
    rate: RateCounter,
}

impl NtripCasterStream {
    pub fn new(addr: SocketAddr, mountpoint: impl Into<String>, source_passwd: impl Into<String>) -> Self {
        Self {
            addr,
            listener: None,
            mountpoint: mountpoint.into(),
            source_passwd: source_passwd.into(),
            source: None,
            clients: Vec::new(),
            pending: VecDeque::new(),
            state: StreamState::Closed,
            rate: RateCounter::default(),
        }
    }

    fn accept_pending(&mut self) {
        let Some(listener) = &self.listener else { return };
        loop {
            let mut stream = match listener.accept() {
                Ok((s, _)) => s,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            };
            let _ = stream.set_nonblocking(true);
            let mut reader = BufReader::new(match stream.try_clone() {
                Ok(c) => c,
                Err(_) => continue,
            });
            let mut request_line = String::new();
            if reader.read_line(&mut request_line).unwrap_or(0) == 0 {
                continue;
            }
            if let Some(rest) = request_line.strip_prefix("SOURCE ") {
                let mut parts = rest.split_whitespace();
                let passwd = parts.next().unwrap_or("");
                let mnt = parts.next().unwrap_or("").trim_start_matches('/');
                if passwd == self.source_passwd && mnt == self.mountpoint {
                    let _ = stream.write_all(b"OK\r\n");
                    self.source = Some(stream);
                } else {
                    let _ = stream.write_all(b"ERROR - Bad Password\r\n");
                }
            } else if request_line.starts_with("GET ") {
                let _ = stream.write_all(b"ICY 200 OK\r\n\r\n");
                self.clients.push(stream);
            }
        }
    }

    fn pump_source(&mut self) {
        let Some(source) = &mut self.source else { return };
        let mut buf = [0u8; 4096];
        loop {
            match source.read(&mut buf) {
                Ok(0) => {
                    self.source = None;
                    break;
                },
                Ok(n) => self.pending.extend(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => {
                    self.source = None;
                    break;
                },
            }
        }
        if self.pending.is_empty() {
            return;
        }
        let bytes: Vec<u8> = self.pending.drain(..).collect();
        self.rate.add(bytes.len());
        self.clients.retain_mut(|client| client.write_all(&bytes).is_ok());
    }
}

impl Stream for NtripCasterStream {
    fn kind(&self) -> StreamKind {
        StreamKind::NtripCaster
    }

    fn open(&mut self) -> Result<(), StreamError> {
        let listener = TcpListener::bind(self.addr)?;
        listener.set_nonblocking(true)?;
        self.listener = Some(listener);
        self.state = StreamState::Open;
        Ok(())
    }

    fn close(&mut self) {
        self.listener = None;
        self.source = None;
        self.clients.clear();
        self.state = StreamState::Closed;
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        self.accept_pending();
        self.pump_source();
        let n = buf.len().min(self.pending.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.pending.pop_front().unwrap();
        }
        Ok(n)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize, StreamError> {
        Ok(0)
    }

    fn state(&self) -> StreamState {
        self.state
    }

    fn stat(&mut self) -> Stat {
        let rate = self.rate.tick();
        Stat { out_bytes: self.rate.total(), out_rate_bps: rate, ..Default::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_encodes_known_vector() {
        assert_eq!(base64_encode(b"user:pass"), "dXNlcjpwYXNz");
    }

    #[test]
    fn base64_pads_short_input() {
        assert_eq!(base64_encode(b"a"), "YQ==");
        assert_eq!(base64_encode(b"ab"), "YWI=");
    }
}
