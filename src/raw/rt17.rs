//! Trimble RT17 decoder (C5): packet sync `0x02` (STX) ... `0x03` (ETX),
//! with a page header (status/type/length/sequence) and an 8-bit checksum
//! (sum of all header+data bytes, mod 256) preceding ETX.
//!
//! Only record type `0x57` ("raw observation", page type 1) is decoded to
//! an [`Observation`]; other record types are framed but left opaque, per
//! this crate's "representative record" scope for secondary protocols.

use super::{DecodeEvent, ProtocolErrorKind, RawContext, RawDecoder};
use crate::obs::{BandObs, Observation};
use crate::sat::{sat_no, ObsCode};
use crate::time::gps_to_time;
use gnss_rs::constellation::Constellation;

const STX: u8 = 0x02;
const ETX: u8 = 0x03;
const RECORD_TYPE_RAW_OBS: u8 = 0x57;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    HuntStx,
    ReadStatus,
    ReadType,
    ReadLength,
    ReadData,
    ReadChecksum,
    ReadEtx,
}

pub struct Rt17Decoder {
    ctx: RawContext,
    state: State,
    status: u8,
    record_type: u8,
    length: u8,
    data: Vec<u8>,
    checksum_running: u32,
    checksum_byte: u8,
}

impl Rt17Decoder {
    pub fn new(ctx: RawContext) -> Self {
        Self {
            ctx,
            state: State::HuntStx,
            status: 0,
            record_type: 0,
            length: 0,
            data: Vec::new(),
            checksum_running: 0,
            checksum_byte: 0,
        }
    }

    fn reset(&mut self) {
        self.state = State::HuntStx;
        self.data.clear();
        self.checksum_running = 0;
    }

    fn decode_raw_obs(&self) -> Option<DecodeEvent> {
        let d = &self.data;
        if d.len() < 12 {
            return None;
        }
        let week = u16::from_le_bytes(d[0..2].try_into().ok()?);
        let tow_ms = u32::from_le_bytes(d[2..6].try_into().ok()?);
        let prn = d[6];
        let pr_raw = i32::from_le_bytes(d[8..12].try_into().ok()?);

        let sat = sat_no(Constellation::GPS, prn).ok()?;
        let time = gps_to_time(week as u32, tow_ms as f64 * 1.0e-3);

        Some(DecodeEvent::Observation(Observation {
            time,
            sat,
            receiver: 0,
            bands: vec![BandObs {
                pseudorange_m: Some(pr_raw as f64 * 0.001 + 20_000_000.0),
                carrier_phase_cycles: None,
                doppler_hz: None,
                snr_db_hz: None,
                lli: 0,
                code: Some(ObsCode::L1C),
            }],
        }))
    }

    fn decode_record(&mut self) -> DecodeEvent {
        self.ctx.last_message_type = self.record_type as u32;
        let event = if self.record_type == RECORD_TYPE_RAW_OBS {
            self.decode_raw_obs()
        } else {
            None
        };
        event.unwrap_or(DecodeEvent::NeedMore)
    }
}

impl RawDecoder for Rt17Decoder {
    fn feed_byte(&mut self, byte: u8) -> DecodeEvent {
        match self.state {
            State::HuntStx => {
                if byte == STX {
                    self.state = State::ReadStatus;
                    self.checksum_running = 0;
                }
                DecodeEvent::NeedMore
            },
            State::ReadStatus => {
                self.status = byte;
                self.checksum_running += byte as u32;
                self.state = State::ReadType;
                DecodeEvent::NeedMore
            },
            State::ReadType => {
                self.record_type = byte;
                self.checksum_running += byte as u32;
                self.state = State::ReadLength;
                DecodeEvent::NeedMore
            },
            State::ReadLength => {
                self.length = byte;
                self.checksum_running += byte as u32;
                self.data.clear();
                self.state = if self.length == 0 {
                    State::ReadChecksum
                } else {
                    State::ReadData
                };
                DecodeEvent::NeedMore
            },
            State::ReadData => {
                self.data.push(byte);
                self.checksum_running += byte as u32;
                if self.data.len() == self.length as usize {
                    self.state = State::ReadChecksum;
                }
                DecodeEvent::NeedMore
            },
            State::ReadChecksum => {
                self.checksum_byte = byte;
                self.state = State::ReadEtx;
                DecodeEvent::NeedMore
            },
            State::ReadEtx => {
                if byte != ETX {
                    self.reset();
                    return DecodeEvent::ProtocolError(ProtocolErrorKind::BadSync);
                }
                let computed = (self.checksum_running & 0xFF) as u8;
                if computed != self.checksum_byte {
                    self.reset();
                    return DecodeEvent::ProtocolError(ProtocolErrorKind::ChecksumMismatch);
                }
                let event = self.decode_record();
                self.reset();
                event
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::RawOptions;

    fn encode_frame(record_type: u8, data: &[u8]) -> Vec<u8> {
        let status = 0u8;
        let length = data.len() as u8;
        let mut sum: u32 = status as u32 + record_type as u32 + length as u32;
        for &b in data {
            sum += b as u32;
        }
        let mut frame = vec![STX, status, record_type, length];
        frame.extend_from_slice(data);
        frame.push((sum & 0xFF) as u8);
        frame.push(ETX);
        frame
    }

    fn build_raw_obs_data() -> Vec<u8> {
        let mut d = Vec::new();
        d.extend_from_slice(&2200u16.to_le_bytes()); // week
        d.extend_from_slice(&456_000u32.to_le_bytes()); // tow ms
        d.push(9); // prn
        d.push(0); // reserved (byte 7)
        d.extend_from_slice(&1_500_000i32.to_le_bytes()); // pseudorange sub-part
        d
    }

    #[test]
    fn decodes_raw_observation_record() {
        let data = build_raw_obs_data();
        let frame = encode_frame(RECORD_TYPE_RAW_OBS, &data);
        let ctx = RawContext::new(RawOptions::default(), None);
        let mut decoder = Rt17Decoder::new(ctx);
        let events = decoder.feed(&frame);

        assert_eq!(events.len(), 1);
        match &events[0] {
            DecodeEvent::Observation(obs) => {
                assert_eq!(obs.sat, sat_no(Constellation::GPS, 9).unwrap());
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn bad_checksum_reported() {
        let data = build_raw_obs_data();
        let mut frame = encode_frame(RECORD_TYPE_RAW_OBS, &data);
        let checksum_idx = frame.len() - 2;
        frame[checksum_idx] ^= 0xFF;
        let ctx = RawContext::new(RawOptions::default(), None);
        let mut decoder = Rt17Decoder::new(ctx);
        let events = decoder.feed(&frame);
        assert!(matches!(
            events[0],
            DecodeEvent::ProtocolError(ProtocolErrorKind::ChecksumMismatch)
        ));
    }
}
