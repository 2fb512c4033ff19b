//! NovAtel/CMC Superstar II decoder (C5): sync `0x7F 0x7E`, 1-byte message
//! id, 1-byte length (payload bytes), payload, 8-bit checksum (sum mod
//! 256 of id+length+payload).
//!
//! Message dispatch: id `0x06` ("measurement block") is decoded; other ids
//! are recognized but left opaque, per this crate's "representative
//! record" scope for secondary protocols.

use super::{DecodeEvent, ProtocolErrorKind, RawContext, RawDecoder};
use crate::obs::{BandObs, Observation};
use crate::sat::{sat_no, ObsCode};
use crate::time::gps_to_time;
use gnss_rs::constellation::Constellation;

const SYNC: [u8; 2] = [0x7F, 0x7E];
const MSG_ID_MEAS_BLOCK: u8 = 0x06;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    HuntSync(usize),
    ReadId,
    ReadLen,
    ReadPayload,
    ReadChecksum,
}

pub struct Ss2Decoder {
    ctx: RawContext,
    state: State,
    msg_id: u8,
    len: u8,
    payload: Vec<u8>,
}

impl Ss2Decoder {
    pub fn new(ctx: RawContext) -> Self {
        Self {
            ctx,
            state: State::HuntSync(0),
            msg_id: 0,
            len: 0,
            payload: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.state = State::HuntSync(0);
        self.payload.clear();
    }

    fn decode_meas_block(&self) -> Option<DecodeEvent> {
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
        let event = if self.msg_id == MSG_ID_MEAS_BLOCK { self.decode_meas_block() } else { None };
        event.unwrap_or(DecodeEvent::NeedMore)
    }
}

impl RawDecoder for Ss2Decoder {
    fn feed_byte(&mut self, byte: u8) -> DecodeEvent {
        match self.state {
            State::HuntSync(n) => {
                if byte == SYNC[n] {
                    self.state = if n + 1 == SYNC.len() { State::ReadId } else { State::HuntSync(n + 1) };
                } else {
                    self.state = State::HuntSync(0);
                }
                DecodeEvent::NeedMore
            },
            State::ReadId => {
                self.msg_id = byte;
                self.state = State::ReadLen;
                DecodeEvent::NeedMore
            },
            State::ReadLen => {
                self.len = byte;
                self.payload.clear();
                self.state = if self.len == 0 { State::ReadChecksum } else { State::ReadPayload };
                DecodeEvent::NeedMore
            },
            State::ReadPayload => {
                self.payload.push(byte);
                if self.payload.len() == self.len as usize {
                    self.state = State::ReadChecksum;
                }
                DecodeEvent::NeedMore
            },
            State::ReadChecksum => {
                let sum = self.msg_id as u32
                    + self.len as u32
                    + self.payload.iter().map(|&b| b as u32).sum::<u32>();
                if (sum & 0xFF) as u8 != byte {
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
        let len = payload.len() as u8;
        let sum = msg_id as u32 + len as u32 + payload.iter().map(|&b| b as u32).sum::<u32>();
        let mut frame = Vec::new();
        frame.extend_from_slice(&SYNC);
        frame.push(msg_id);
        frame.push(len);
        frame.extend_from_slice(payload);
        frame.push((sum & 0xFF) as u8);
        frame
    }

    fn build_meas_block_payload() -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&2200u16.to_le_bytes());
        p.extend_from_slice(&456_000u32.to_le_bytes());
        p.push(25);
        p.extend_from_slice(&400_000u32.to_le_bytes());
        p
    }

    #[test]
    fn decodes_measurement_block_observation() {
        let payload = build_meas_block_payload();
        let frame = encode_frame(MSG_ID_MEAS_BLOCK, &payload);
        let ctx = RawContext::new(RawOptions::default(), None);
        let mut decoder = Ss2Decoder::new(ctx);
        let events = decoder.feed(&frame);

        assert_eq!(events.len(), 1);
        match &events[0] {
            DecodeEvent::Observation(obs) => {
                assert_eq!(obs.sat, sat_no(Constellation::GPS, 25).unwrap());
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
