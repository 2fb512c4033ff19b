//! JAVAD GREIS decoder (C5): ASCII 2-letter message type prefix + 1-byte
//! binary sub-type flag, little-endian length word, payload, 8-bit
//! XOR checksum. GREIS frames open with the message type itself (no fixed
//! sync byte); framing here keys on a fixed-size type field scanned
//! continuously, matching the way the format's own decoders work (no
//! distinguished sync byte to hunt for).
//!
//! Message dispatch: `~~` ("RAWPR", raw pseudorange) is decoded; all other
//! two-letter types are recognized and skipped once their length is known.

use super::{DecodeEvent, ProtocolErrorKind, RawContext, RawDecoder};
use crate::obs::{BandObs, Observation};
use crate::sat::{sat_no, ObsCode};
use crate::time::gps_to_time;
use gnss_rs::constellation::Constellation;

const TYPE_RAWPR: [u8; 2] = *b"~~";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ReadType0,
    ReadType1,
    ReadLenLo,
    ReadLenHi,
    ReadPayload,
    ReadChecksum,
}

pub struct JavadDecoder {
    ctx: RawContext,
    state: State,
    msg_type: [u8; 2],
    len: u16,
    payload: Vec<u8>,
}

impl JavadDecoder {
    pub fn new(ctx: RawContext) -> Self {
        Self {
            ctx,
            state: State::ReadType0,
            msg_type: [0; 2],
            len: 0,
            payload: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.state = State::ReadType0;
        self.payload.clear();
    }

    fn decode_rawpr(&self) -> Option<DecodeEvent> {
        let p = &self.payload;
        if p.len() < 14 {
            return None;
        }
        let tow_ms = u32::from_le_bytes(p[0..4].try_into().ok()?);
        let week = u16::from_le_bytes(p[4..6].try_into().ok()?);
        let prn = p[6];
        let pr_raw = u32::from_le_bytes(p[8..12].try_into().ok()?);

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
        self.ctx.last_message_type = ((self.msg_type[0] as u32) << 8) | self.msg_type[1] as u32;
        let event = if self.msg_type == TYPE_RAWPR {
            self.decode_rawpr()
        } else {
            None
        };
        event.unwrap_or(DecodeEvent::NeedMore)
    }
}

impl RawDecoder for JavadDecoder {
    fn feed_byte(&mut self, byte: u8) -> DecodeEvent {
        match self.state {
            State::ReadType0 => {
                self.msg_type[0] = byte;
                self.state = State::ReadType1;
                DecodeEvent::NeedMore
            },
            State::ReadType1 => {
                self.msg_type[1] = byte;
                self.state = State::ReadLenLo;
                DecodeEvent::NeedMore
            },
            State::ReadLenLo => {
                self.len = byte as u16;
                self.state = State::ReadLenHi;
                DecodeEvent::NeedMore
            },
            State::ReadLenHi => {
                self.len |= (byte as u16) << 8;
                self.payload.clear();
                self.state = if self.len == 0 {
                    State::ReadChecksum
                } else {
                    State::ReadPayload
                };
                DecodeEvent::NeedMore
            },
            State::ReadPayload => {
                self.payload.push(byte);
                if self.payload.len() as u16 == self.len {
                    self.state = State::ReadChecksum;
                }
                DecodeEvent::NeedMore
            },
            State::ReadChecksum => {
                let mut frame = self.msg_type.to_vec();
                frame.extend_from_slice(&self.len.to_le_bytes());
                frame.extend_from_slice(&self.payload);
                let computed = crate::bits::checksum8(&frame);
                if computed != byte {
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

    fn encode_frame(msg_type: [u8; 2], payload: &[u8]) -> Vec<u8> {
        let mut frame = msg_type.to_vec();
        frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        frame.extend_from_slice(payload);
        let checksum = crate::bits::checksum8(&frame);
        frame.push(checksum);
        frame
    }

    fn build_rawpr_payload() -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&456_000u32.to_le_bytes()); // tow ms
        p.extend_from_slice(&2200u16.to_le_bytes()); // week
        p.push(15); // prn
        p.push(0); // pad
        p.extend_from_slice(&500_000u32.to_le_bytes()); // pseudorange sub-part (0.001 m units)
        p
    }

    #[test]
    fn decodes_rawpr_observation() {
        let payload = build_rawpr_payload();
        let frame = encode_frame(TYPE_RAWPR, &payload);
        let ctx = RawContext::new(RawOptions::default(), None);
        let mut decoder = JavadDecoder::new(ctx);
        let events = decoder.feed(&frame);

        assert_eq!(events.len(), 1);
        match &events[0] {
            DecodeEvent::Observation(obs) => {
                assert_eq!(obs.sat, sat_no(Constellation::GPS, 15).unwrap());
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
