//! NVS BINR decoder (C5): sync `0x10`, message id, payload terminated by
//! `0x10 0x03` (DLE STX framing where `0x10` bytes inside the payload are
//! byte-stuffed as `0x10 0x10`).
//!
//! Message dispatch: id `0xF1` ("raw measurements") is decoded to an
//! observation; other ids are recognized (sync/unstuff/terminator checked)
//! but left opaque, per this crate's "representative record" scope for
//! secondary protocols.

use super::{DecodeEvent, ProtocolErrorKind, RawContext, RawDecoder};
use crate::obs::{BandObs, Observation};
use crate::sat::{sat_no, ObsCode};
use crate::time::gps_to_time;
use gnss_rs::constellation::Constellation;

const DLE: u8 = 0x10;
const ETX: u8 = 0x03;
const MSG_ID_RAW_MEAS: u8 = 0xF1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    HuntDle,
    ReadId,
    ReadBody,
    SawDleInBody,
}

pub struct NvsDecoder {
    ctx: RawContext,
    state: State,
    msg_id: u8,
    body: Vec<u8>,
}

impl NvsDecoder {
    pub fn new(ctx: RawContext) -> Self {
        Self {
            ctx,
            state: State::HuntDle,
            msg_id: 0,
            body: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.state = State::HuntDle;
        self.body.clear();
    }

    fn decode_raw_meas(&self) -> Option<DecodeEvent> {
        let b = &self.body;
        if b.len() < 12 {
            return None;
        }
        let tow_ms = u32::from_le_bytes(b[0..4].try_into().ok()?);
        let week = u16::from_le_bytes(b[4..6].try_into().ok()?);
        let prn = b[6];
        let pr_raw = u32::from_le_bytes(b[8..12].try_into().ok()?);

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

impl RawDecoder for NvsDecoder {
    fn feed_byte(&mut self, byte: u8) -> DecodeEvent {
        match self.state {
            State::HuntDle => {
                if byte == DLE {
                    self.state = State::ReadId;
                }
                DecodeEvent::NeedMore
            },
            State::ReadId => {
                self.msg_id = byte;
                self.body.clear();
                self.state = State::ReadBody;
                DecodeEvent::NeedMore
            },
            State::ReadBody => {
                if byte == DLE {
                    self.state = State::SawDleInBody;
                    return DecodeEvent::NeedMore;
                }
                self.body.push(byte);
                DecodeEvent::NeedMore
            },
            State::SawDleInBody => {
                if byte == DLE {
                    // stuffed 0x10 0x10 -> one literal 0x10 byte in the body
                    self.body.push(DLE);
                    self.state = State::ReadBody;
                    DecodeEvent::NeedMore
                } else if byte == ETX {
                    let event = self.decode_record();
                    self.reset();
                    event
                } else {
                    self.reset();
                    DecodeEvent::ProtocolError(ProtocolErrorKind::BadSync)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::RawOptions;

    fn encode_frame(msg_id: u8, body: &[u8]) -> Vec<u8> {
        let mut frame = vec![DLE, msg_id];
        for &b in body {
            frame.push(b);
            if b == DLE {
                frame.push(DLE); // byte-stuff
            }
        }
        frame.push(DLE);
        frame.push(ETX);
        frame
    }

    fn build_raw_meas_body() -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&456_000u32.to_le_bytes());
        b.extend_from_slice(&2200u16.to_le_bytes());
        b.push(20); // prn, chosen to avoid accidental 0x10 bytes nearby
        b.push(0);
        b.extend_from_slice(&750_000u32.to_le_bytes());
        b
    }

    #[test]
    fn decodes_raw_measurement_observation() {
        let body = build_raw_meas_body();
        let frame = encode_frame(MSG_ID_RAW_MEAS, &body);
        let ctx = RawContext::new(RawOptions::default(), None);
        let mut decoder = NvsDecoder::new(ctx);
        let events = decoder.feed(&frame);

        assert_eq!(events.len(), 1);
        match &events[0] {
            DecodeEvent::Observation(obs) => {
                assert_eq!(obs.sat, sat_no(Constellation::GPS, 20).unwrap());
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
