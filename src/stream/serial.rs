//! Serial port endpoint (`serial://`), feature-gated behind `serial` since
//! it is the one stream variant pulling in a platform-specific crate
//! (`serialport`) rather than pure `std`.

use super::{RateCounter, Stat, Stream, StreamError, StreamKind, StreamState};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use std::io::{Read, Write};
use std::time::Duration;

/// `port[:brate[:bsize[:parity[:stopb[:fctr]]]]]`, the tuple stored whole
/// in [`super::url::StreamUrl::path`] by `parse_serial_url`.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialConfig {
    pub port: String,
    pub baud: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
}

impl SerialConfig {
    pub fn parse(tuple: &str) -> Result<Self, StreamError> {
        let mut fields = tuple.split(':');
        let port = fields
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| StreamError::MalformedUrl(tuple.to_string()))?
            .to_string();

        let baud = fields.next().and_then(|s| s.parse().ok()).unwrap_or(115200);
        let data_bits = match fields.next() {
            Some("7") => DataBits::Seven,
            Some("6") => DataBits::Six,
            Some("5") => DataBits::Five,
            _ => DataBits::Eight,
        };
        let parity = match fields.next() {
            Some("o") | Some("O") => Parity::Odd,
            Some("e") | Some("E") => Parity::Even,
            _ => Parity::None,
        };
        let stop_bits = match fields.next() {
            Some("2") => StopBits::Two,
            _ => StopBits::One,
        };
        let flow_control = match fields.next() {
            Some("rts") | Some("hw") => FlowControl::Hardware,
            Some("xon") | Some("sw") => FlowControl::Software,
            _ => FlowControl::None,
        };

        Ok(Self { port, baud, data_bits, parity, stop_bits, flow_control })
    }
}

pub struct SerialStream {
    config: SerialConfig,
    port: Option<Box<dyn serialport::SerialPort>>,
    state: StreamState,
    rate: RateCounter,
}

impl SerialStream {
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            port: None,
            state: StreamState::Closed,
            rate: RateCounter::default(),
        }
    }
}

impl Stream for SerialStream {
    fn kind(&self) -> StreamKind {
        StreamKind::Serial
    }

    fn open(&mut self) -> Result<(), StreamError> {
        let port = serialport::new(&self.config.port, self.config.baud)
            .data_bits(self.config.data_bits)
            .parity(self.config.parity)
            .stop_bits(self.config.stop_bits)
            .flow_control(self.config.flow_control)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| StreamError::MalformedUrl(e.to_string()))?;
        self.port = Some(port);
        self.state = StreamState::Open;
        Ok(())
    }

    fn close(&mut self) {
        self.port = None;
        self.state = StreamState::Closed;
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let Some(port) = &mut self.port else { return Ok(0) };
        match port.read(buf) {
            Ok(n) => {
                self.rate.add(n);
                Ok(n)
            },
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, StreamError> {
        let Some(port) = &mut self.port else { return Err(StreamError::Closed) };
        port.write_all(buf)?;
        self.rate.add(buf.len());
        Ok(buf.len())
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
    fn parses_full_tuple() {
        let c = SerialConfig::parse("/dev/ttyUSB0:9600:7:e:2:rts").unwrap();
        assert_eq!(c.port, "/dev/ttyUSB0");
        assert_eq!(c.baud, 9600);
        assert_eq!(c.data_bits, DataBits::Seven);
        assert_eq!(c.parity, Parity::Even);
        assert_eq!(c.stop_bits, StopBits::Two);
        assert_eq!(c.flow_control, FlowControl::Hardware);
    }

    #[test]
    fn defaults_missing_trailing_fields() {
        let c = SerialConfig::parse("/dev/ttyS0").unwrap();
        assert_eq!(c.baud, 115200);
        assert_eq!(c.data_bits, DataBits::Eight);
        assert_eq!(c.parity, Parity::None);
    }

    #[test]
    fn rejects_empty_port() {
        assert!(SerialConfig::parse("").is_err());
    }
}
