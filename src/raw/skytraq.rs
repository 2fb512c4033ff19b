//! SkyTraq STQ (binary) decoder (C5): sync `0xA0 0xA1`, 16-bit big-endian
//! length, 1-byte message id, payload, 8-bit XOR checksum, trailer
//! `0x0D 0x0A`.
//!
//! Message dispatch: id `0xDE` ("raw measurements") is decoded to an
//! observation; other ids are recognized but left opaque, per this
//! crate's "representative record" scope for secondary protocols.

use super::{DecodeEvent, ProtocolErrorKind, RawContext, RawDecoder};
use crate::obs::{BandObs, Observation};
use crate::sat::{sat_no, ObsCode};
use crate::time::gps_to_time;
use gnss_rs::constellation::Constellation;

const SYNC: [u8; 2] = [0xA0, 0xA1];
const TRAILER: [u8; 2] = [0x0D, 0x0A];
const MSG_ID_RAW_MEAS: u8 = 0xDE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    HuntSync(usize),
    ReadLenHi,
    ReadLenLo,
    ReadId,
    ReadPayload,
    ReadChecksum,
    ReadTrailer(usize),
}

pub struct SkytraqDecoder {
    ctx: RawContext,
    state: State,
    len: u16,
    msg_id: u8,
    payload: Vec<u8>,
}

impl SkytraqDecoder {
    pub fn new(ctx: RawContext) -> Self {
        Self {
            ctx,
            state: State::HuntSync(0),
            len: 0,
            msg_id: 0,
            payload: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.state = State::HuntSync(0);
        self.payload.clear();
    }

    fn decode_raw_meas(&self) -> Option<DecodeEvent> {
        let p = &self.payload;
        if p.len() < 11 {
            return None;
        }
        let week = u16::from_be_bytes(p[0..2].try_into().ok()?);
        let tow_ms = u32::from_be_bytes(p[2..6].try_into().ok()?);
        let prn = p[6];
        let pr_raw = u32::from_be_bytes(p[7..11].try_into().ok()?);

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
        let event = if self.msg_id == MSG_ID_RAW_MEAS {
            self.decode_raw_meas()
        } else {
            None
        };
        event.unwrap_or(DecodeEvent::NeedMore)
    }
}

impl RawDecoder for SkytraqDecoder {
    fn feed_byte(&mut self, byte: u8) -> DecodeEvent {
        match self.state {
            State::HuntSync(n) => {
                if byte == SYNC[n] {
                    self.state = if n + 1 == SYNC.len() { State::ReadLenHi } else { State::HuntSync(n + 1) };
                } else {
                    self.state = State::HuntSync(0);
                }
                DecodeEvent::NeedMore
            },
            State::ReadLenHi => {
                self.len = (byte as u16) << 8;
                self.state = State::ReadLenLo;
                DecodeEvent::NeedMore
            },
            State::ReadLenLo => {
                self.len |= byte as u16;
                self.state = State::ReadId;
                DecodeEvent::NeedMore
            },
            State::ReadId => {
                self.msg_id = byte;
                self.payload.clear();
                // `len` counts the id byte plus the payload that follows it.
                self.state = if self.len <= 1 { State::ReadChecksum } else { State::ReadPayload };
                DecodeEvent::NeedMore
            },
            State::ReadPayload => {
                self.payload.push(byte);
                if self.payload.len() as u16 == self.len - 1 {
                    self.state = State::ReadChecksum;
                }
                DecodeEvent::NeedMore
            },
            State::ReadChecksum => {
                let mut frame = vec![self.msg_id];
                frame.extend_from_slice(&self.payload);
                let computed = crate::bits::checksum8(&frame);
                if computed != byte {
                    self.reset();
                    return DecodeEvent::ProtocolError(ProtocolErrorKind::ChecksumMismatch);
                }
                self.state = State::ReadTrailer(0);
                DecodeEvent::NeedMore
            },
            State::ReadTrailer(n) => {
                if byte != TRAILER[n] {
                    self.reset();
                    return DecodeEvent::ProtocolError(ProtocolErrorKind::BadSync);
                }
                if n + 1 == TRAILER.len() {
                    let event = self.decode_record();
                    self.reset();
                    return event;
                }
                self.state = State::ReadTrailer(n + 1);
                DecodeEvent::NeedMore
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::RawOptions;

    fn encode_frame(msg_id: u8, payload: &[u8]) -> Vec<u8> {
        let len = (payload.len() + 1) as u16;
        let mut frame = Vec::new();
        frame.extend_from_slice(&SYNC);
        frame.extend_from_slice(&len.to_be_bytes());
        frame.push(msg_id);
        frame.extend_from_slice(payload);

        let mut cksum_input = vec![msg_id];
        cksum_input.extend_from_slice(payload);
        frame.push(crate::bits::checksum8(&cksum_input));
        frame.extend_from_slice(&TRAILER);
        frame
    }

    fn build_raw_meas_payload() -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&2200u16.to_be_bytes());
        p.extend_from_slice(&456_000u32.to_be_bytes());
        p.push(18);
        p.extend_from_slice(&900_000u32.to_be_bytes());
        p
    }

    #[test]
    fn decodes_raw_measurement_observation() {
        let payload = build_raw_meas_payload();
        let frame = encode_frame(MSG_ID_RAW_MEAS, &payload);
        let ctx = RawContext::new(RawOptions::default(), None);
        let mut decoder = SkytraqDecoder::new(ctx);
        let events = decoder.feed(&frame);

        assert_eq!(events.len(), 1);
        match &events[0] {
            DecodeEvent::Observation(obs) => {
                assert_eq!(obs.sat, sat_no(Constellation::GPS, 18).unwrap());
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
