//! FTP/HTTP one-shot fetchers with cyclic re-fetch (§4.9): pulls a whole
//! resource on a configured interval rather than streaming continuously,
//! the same "fetch on a timer, replace prior content" shape this crate
//! gives RINEX navigation downloads in batch post-processing workflows.
//! Built on raw `std::net::TcpStream`, matching [`super::ntrip`]'s
//! hand-rolled HTTP framing rather than pulling in an HTTP client crate.

use super::{RateCounter, Stat, Stream, StreamError, StreamKind, StreamState};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchProtocol {
    Http,
    Ftp,
}

/// One-shot fetcher re-run on a fixed cadence; each cycle replaces the
/// previously fetched bytes rather than appending to them.
pub struct FetchStream {
    protocol: FetchProtocol,
    host: String,
    port: u16,
    path: String,
    user: Option<String>,
    passwd: Option<String>,
    interval: Duration,
    last_fetch: Option<Instant>,
    buffered: Vec<u8>,
    cursor: usize,
    state: StreamState,
    rate: RateCounter,
}

impl FetchStream {
    pub fn http(host: impl Into<String>, port: u16, path: impl Into<String>, interval: Duration) -> Self {
        Self::new(FetchProtocol::Http, host, port, path, None, None, interval)
    }

    pub fn ftp(
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
        user: Option<String>,
        passwd: Option<String>,
        interval: Duration,
    ) -> Self {
        Self::new(FetchProtocol::Ftp, host, port, path, user, passwd, interval)
    }

    fn new(
        protocol: FetchProtocol,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
        user: Option<String>,
        passwd: Option<String>,
        interval: Duration,
    ) -> Self {
        Self {
            protocol,
            host: host.into(),
            port,
            path: path.into(),
            user,
            passwd,
            interval,
            last_fetch: None,
            buffered: Vec::new(),
            cursor: 0,
            state: StreamState::Closed,
            rate: RateCounter::default(),
        }
    }

    fn due(&self) -> bool {
        self.last_fetch.map(|t| t.elapsed() >= self.interval).unwrap_or(true)
    }

    fn fetch_http(&self) -> Result<Vec<u8>, StreamError> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))?;
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: gnss-rt/1.0\r\nConnection: close\r\n\r\n",
            self.path, self.host
        );
        stream.write_all(request.as_bytes())?;

        let mut reader = BufReader::new(stream);
        let mut status = String::new();
        reader.read_line(&mut status)?;
        if !status.contains("200") {
            return Err(StreamError::NtripHandshake(status.trim().to_string()));
        }
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 || line == "\r\n" || line == "\n" {
                break;
            }
        }
        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;
        Ok(body)
    }

    fn fetch_ftp(&self) -> Result<Vec<u8>, StreamError> {
        let mut control = TcpStream::connect((self.host.as_str(), self.port))?;
        let mut reader = BufReader::new(control.try_clone()?);
        let mut greeting = String::new();
        reader.read_line(&mut greeting)?;

        let user = self.user.as_deref().unwrap_or("anonymous");
        let passwd = self.passwd.as_deref().unwrap_or("anonymous@");
        control.write_all(format!("USER {user}\r\n").as_bytes())?;
        let mut line = String::new();
        reader.read_line(&mut line)?;
        control.write_all(format!("PASS {passwd}\r\n").as_bytes())?;
        line.clear();
        reader.read_line(&mut line)?;

        control.write_all(b"TYPE I\r\n")?;
        line.clear();
        reader.read_line(&mut line)?;

        control.write_all(b"PASV\r\n")?;
        line.clear();
        reader.read_line(&mut line)?;
        let (data_host, data_port) = parse_pasv_reply(&line)
            .ok_or_else(|| StreamError::MalformedUrl(format!("bad PASV reply: {line}")))?;

        control.write_all(format!("RETR {}\r\n", self.path).as_bytes())?;
        let mut data_stream = TcpStream::connect((data_host.as_str(), data_port))?;
        let mut body = Vec::new();
        data_stream.read_to_end(&mut body)?;

        line.clear();
        reader.read_line(&mut line)?;
        let _ = control.write_all(b"QUIT\r\n");
        Ok(body)
    }

    fn maybe_refetch(&mut self) {
        if !self.due() {
            return;
        }
        self.last_fetch = Some(Instant::now());
        let result = match self.protocol {
            FetchProtocol::Http => self.fetch_http(),
            FetchProtocol::Ftp => self.fetch_ftp(),
        };
        match result {
            Ok(bytes) => {
                self.rate.add(bytes.len());
                self.buffered = bytes;
                self.cursor = 0;
                self.state = StreamState::Open;
            },
            Err(_) => {
                self.state = StreamState::Waiting;
            },
        }
    }
}

/// Parses a standard `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
fn parse_pasv_reply(line: &str) -> Option<(String, u16)> {
    let open = line.find('(')?;
    let close = line.find(')')?;
    let nums: Vec<u32> = line[open + 1..close].split(',').filter_map(|s| s.parse().ok()).collect();
    if nums.len() != 6 {
        return None;
    }
    let host = format!("{}.{}.{}.{}", nums[0], nums[1], nums[2], nums[3]);
    let port = (nums[4] * 256 + nums[5]) as u16;
    Some((host, port))
}

impl Stream for FetchStream {
    fn kind(&self) -> StreamKind {
        match self.protocol {
            FetchProtocol::Http => StreamKind::Http,
            FetchProtocol::Ftp => StreamKind::Ftp,
        }
    }

    fn open(&mut self) -> Result<(), StreamError> {
        self.maybe_refetch();
        Ok(())
    }

    fn close(&mut self) {
        self.buffered.clear();
        self.cursor = 0;
        self.state = StreamState::Closed;
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        self.maybe_refetch();
        let remaining = &self.buffered[self.cursor..];
        let n = buf.len().min(remaining.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.cursor += n;
        Ok(n)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize, StreamError> {
        Err(StreamError::Unsupported(self.kind()))
    }

    fn state(&self) -> StreamState {
        self.state
    }

    fn stat(&mut self) -> Stat {
        let rate = self.rate.tick();
        Stat { in_bytes: self.rate.total(), in_rate_bps: rate, ..Default::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pasv_reply_parses_host_and_port() {
        let (host, port) = parse_pasv_reply("227 Entering Passive Mode (192,168,1,1,200,13).\r\n").unwrap();
        assert_eq!(host, "192.168.1.1");
        assert_eq!(port, 200 * 256 + 13);
    }

    #[test]
    fn pasv_reply_rejects_malformed_line() {
        assert!(parse_pasv_reply("227 nonsense").is_none());
    }
}
