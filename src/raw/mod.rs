//! Raw-format decoders (C5): per-protocol framing state machines that
//! synchronize on a receiver's byte stream and emit typed records.
//!
//! Every decoder implements the shared [`RawDecoder`] contract from
//! spec.md §4.5: `feed_byte` advances one byte at a time and yields
//! [`DecodeEvent::NeedMore`] until a full record (or a protocol error) is
//! available. State never carries across a successful decode or a
//! reported error — the next byte always starts a fresh sync search.

pub mod binex;
pub mod hemisphere;
pub mod javad;
pub mod novatel;
pub mod nvs;
pub mod rt17;
pub mod rtcm2;
pub mod sbf;
pub mod skytraq;
pub mod ss2;
pub mod ubx;

use crate::nav::{Eph, GEph, SEph};
use crate::obs::Observation;
use crate::station::Station;
use crate::time::Time;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    #[error("CRC/parity/checksum mismatch")]
    ChecksumMismatch,
    #[error("bad sync pattern")]
    BadSync,
    #[error("frame truncated before length/payload complete")]
    Truncated,
    #[error("sub-record type not recognized")]
    UnknownSubRecord,
}

/// One decoded unit of work handed back to the caller (typically the
/// `StreamServer`'s cycle loop). The ephemeris/observation payloads are
/// *not* written to `Nav`/`ObsBuf` by the decoder itself (spec.md §4.5
/// invariant 3) — the caller owns that.
#[derive(Debug, Clone)]
pub enum DecodeEvent {
    NeedMore,
    Observation(Observation),
    Ephemeris(Box<Eph>),
    GlonassEphemeris(Box<GEph>),
    SbasEphemeris(Box<SEph>),
    StationInfo(Box<Station>),
    AntennaInfo(Box<Station>),
    ProtocolError(ProtocolErrorKind),
}

/// Receiver options, parsed once from the space-separated options string
/// (spec.md §4.5) into a typed record decoders consume directly, rather
/// than re-parsing a free-form string on every record.
#[derive(Debug, Clone, Default)]
pub struct RawOptions {
    pub keep_all_ephemeris: bool,
    pub galileo_inav: bool,
    pub galileo_fnav: bool,
    pub raw_opt_string: String,
}

impl RawOptions {
    pub fn parse(opt: &str) -> Self {
        let mut out = Self {
            raw_opt_string: opt.to_string(),
            ..Default::default()
        };
        for token in opt.split_whitespace() {
            match token {
                "-EPHALL" => out.keep_all_ephemeris = true,
                "-GALINAV" => out.galileo_inav = true,
                "-GALFNAV" => out.galileo_fnav = true,
                _ => {},
            }
        }
        out
    }

    /// Per-system signal-selection override (`-GLss`/`-RLss`/`-ELss`/
    /// `-JLss`/`-CLss`), consulted by [`crate::sat::CodePriority`].
    pub fn signal_selection(&self, flag: &str) -> Option<&str> {
        self.raw_opt_string
            .split_whitespace()
            .find_map(|t| t.strip_prefix(flag))
    }
}

/// Per-protocol scratch state shared across decode calls: lock-time
/// matrix, half-cycle-add flags, last message type, and the approximate
/// time hint used for week/day-number recovery (spec.md §3 "Raw decoder
/// context").
#[derive(Debug, Clone)]
pub struct RawContext {
    pub options: RawOptions,
    pub time_hint: Option<Time>,
    pub last_message_type: u32,
    /// `lock_time_s[sat_index][band_index]`, dense over `MAX_SAT` rows.
    pub lock_time_s: Vec<[f64; 8]>,
    pub half_cycle_added: Vec<[bool; 8]>,
}

impl RawContext {
    pub fn new(options: RawOptions, time_hint: Option<Time>) -> Self {
        Self {
            options,
            time_hint,
            last_message_type: 0,
            lock_time_s: vec![[0.0; 8]; crate::sat::MAX_SAT as usize + 1],
            half_cycle_added: vec![[false; 8]; crate::sat::MAX_SAT as usize + 1],
        }
    }
}

/// Shared decoder contract (spec.md §4.5). Implementors also typically
/// expose an inherent `feed_byte`/`read_record` pair; the trait exists so
/// the stream server's cycle loop can hold any decoder behind one
/// `Box<dyn RawDecoder>` regardless of protocol.
pub trait RawDecoder {
    /// Feed one more byte; returns `NeedMore` until a record is ready (or
    /// an error is reported, at which point sync search restarts on the
    /// next byte).
    fn feed_byte(&mut self, byte: u8) -> DecodeEvent;

    /// Drives `feed_byte` over `bytes`, returning every non-`NeedMore`
    /// event produced (a single byte sequence may close more than one
    /// record).
    fn feed(&mut self, bytes: &[u8]) -> Vec<DecodeEvent> {
        let mut out = Vec::new();
        for &b in bytes {
            match self.feed_byte(b) {
                DecodeEvent::NeedMore => {},
                event => out.push(event),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_parse_flags() {
        let opt = RawOptions::parse("-EPHALL -GALINAV -GLss1C");
        assert!(opt.keep_all_ephemeris);
        assert!(opt.galileo_inav);
        assert!(!opt.galileo_fnav);
        assert_eq!(opt.signal_selection("-GLss"), Some("1C"));
    }
}
