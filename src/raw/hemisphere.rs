//! Hemisphere Crescent (binary) decoder (C5): sync `0xE7 0xE7`, 16-bit
//! little-endian length (payload only), 1-byte message id, payload,
//! 16-bit CRC-CCITT over id+payload.
//!
//! Message dispatch: id `0x32` ("BIN1", raw measurements) is decoded; other
//! ids are recognized but left opaque, per this crate's "representative
//! record" scope for secondary protocols.

use super::{DecodeEvent, ProtocolErrorKind, RawContext, RawDecoder};
use crate::bits::crc16;
use crate::obs::{BandObs, Observation};
use crate::sat::{sat_no, ObsCode};
use crate::time::gps_to_time;
use gnss_rs::constellation::Constellation;

const SYNC: [u8; 2] = [0xE7, 0xE7];
const MSG_ID_BIN1: u8 = 0x32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    HuntSync(usize),
    ReadLenLo,
    ReadLenHi,
    ReadId,
    ReadPayload,
    ReadCrcLo,
    ReadCrcHi,
}

pub struct HemisphereDecoder {
    ctx: RawContext,
    state: State,
    len: u16,
    msg_id: u8,
    payload: Vec<u8>,
    crc_lo: u8,
}

impl HemisphereDecoder {
    pub fn new(ctx: RawContext) -> Self {
        Self {
            ctx,
            state: State::HuntSync(0),
            len: 0,
            msg_id: 0,
            payload: Vec::new(),
            crc_lo: 0,
        }
    }

    fn reset(&mut self) {
        self.state = State::HuntSync(0);
        self.payload.clear();
    }

    fn decode_bin1(&self) -> Option<DecodeEvent> {
        let p = &self.payload;
        if p.len() < 11 {
            return None;
        }
        let week = u16::from_le_bytes(p[0..2].try_into().ok()?);
        let tow_ms = u32::from_le_bytes(p[2..6].try_into().ok()?);
        let prn = p[6];
        let pr_raw = u32::from_le_bytes(p[7..11].try_into().ok()?);

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
        self.ctx.last_message_type = self.msg_id as u32;
        let event = if self.msg_id == MSG_ID_BIN1 { self.decode_bin1() } else { None };
        event.unwrap_or(DecodeEvent::NeedMore)
    }
}

impl RawDecoder for HemisphereDecoder {
    fn feed_byte(&mut self, byte: u8) -> DecodeEvent {
        match self.state {
            State::HuntSync(n) => {
                if byte == SYNC[n] {
                    self.state = if n + 1 == SYNC.len() { State::ReadLenLo } else { State::HuntSync(n + 1) };
                } else {
                    self.state = State::HuntSync(0);
                }
                DecodeEvent::NeedMore
            },
            State::ReadLenLo => {
                self.len = byte as u16;
                self.state = State::ReadLenHi;
                DecodeEvent::NeedMore
            },
            State::ReadLenHi => {
                self.len |= (byte as u16) << 8;
                self.state = State::ReadId;
                DecodeEvent::NeedMore
            },
            State::ReadId => {
                self.msg_id = byte;
                self.payload.clear();
                self.state = if self.len == 0 { State::ReadCrcLo } else { State::ReadPayload };
                DecodeEvent::NeedMore
            },
            State::ReadPayload => {
                self.payload.push(byte);
                if self.payload.len() as u16 == self.len {
                    self.state = State::ReadCrcLo;
                }
                DecodeEvent::NeedMore
            },
            State::ReadCrcLo => {
                self.crc_lo = byte;
                self.state = State::ReadCrcHi;
                DecodeEvent::NeedMore
            },
            State::ReadCrcHi => {
                let got = ((byte as u16) << 8) | self.crc_lo as u16;
                let mut frame = vec![self.msg_id];
                frame.extend_from_slice(&self.payload);
                if crc16(&frame) != got {
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

    fn encode_frame(msg_id: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&SYNC);
        frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        frame.push(msg_id);
        frame.extend_from_slice(payload);

        let mut crc_input = vec![msg_id];
        crc_input.extend_from_slice(payload);
        frame.extend_from_slice(&crc16(&crc_input).to_le_bytes());
        frame
    }

    fn build_bin1_payload() -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&2200u16.to_le_bytes());
        p.extend_from_slice(&456_000u32.to_le_bytes());
        p.push(22);
        p.extend_from_slice(&600_000u32.to_le_bytes());
        p
    }

    #[test]
    fn decodes_bin1_observation() {
        let payload = build_bin1_payload();
        let frame = encode_frame(MSG_ID_BIN1, &payload);
        let ctx = RawContext::new(RawOptions::default(), None);
        let mut decoder = HemisphereDecoder::new(ctx);
        let events = decoder.feed(&frame);

        assert_eq!(events.len(), 1);
        match &events[0] {
            DecodeEvent::Observation(obs) => {
                assert_eq!(obs.sat, sat_no(Constellation::GPS, 22).unwrap());
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
