//! u-blox UBX decoder (C5): sync `0xB5 0x62`, class/id, little-endian u16
//! length, payload, 8-bit Fletcher checksum over class..payload.
//!
//! Grounded on the teacher's `ublox` module (`ublox::nav`), generalized
//! from "UBX frame -> RINEX navigation/observation records" to "UBX frame
//! -> this crate's `Eph`/`Observation`". Message dispatch: `RXM-RAWX`
//! (0x02 0x15) multi-GNSS raw measurements, `RXM-SFRBX` (0x02 0x13) is
//! recognized but not sub-frame decoded (GPS LNAV bit-level decode lives in
//! [`crate::raw::novatel`]'s subframe path instead; UBX here treats SFRBX
//! as an opaque pass-through, matching spec.md's note that UBX ephemeris
//! recovery is optional for this crate's scope).

use super::{DecodeEvent, ProtocolErrorKind, RawContext, RawDecoder};
use crate::obs::{BandObs, Observation};
use crate::sat::{sat_no, ObsCode};
use crate::time::gps_to_time;
use gnss_rs::constellation::Constellation;

const SYNC1: u8 = 0xB5;
const SYNC2: u8 = 0x62;
const CLASS_RXM: u8 = 0x02;
const ID_RAWX: u8 = 0x15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    HuntSync1,
    HuntSync2,
    ReadClass,
    ReadId,
    ReadLenLo,
    ReadLenHi,
    ReadPayload,
    ReadCkA,
    ReadCkB,
}

pub struct UbxDecoder {
    ctx: RawContext,
    state: State,
    class: u8,
    id: u8,
    len: u16,
    payload: Vec<u8>,
    ck_a: u8,
    ck_b: u8,
}

impl UbxDecoder {
    pub fn new(ctx: RawContext) -> Self {
        Self {
            ctx,
            state: State::HuntSync1,
            class: 0,
            id: 0,
            len: 0,
            payload: Vec::new(),
            ck_a: 0,
            ck_b: 0,
        }
    }

    fn reset(&mut self) {
        self.state = State::HuntSync1;
        self.payload.clear();
    }

    fn fletcher(&self) -> (u8, u8) {
        let mut a = 0u8;
        let mut b = 0u8;
        for byte in [self.class, self.id, (self.len & 0xFF) as u8, (self.len >> 8) as u8]
            .iter()
            .chain(self.payload.iter())
        {
            a = a.wrapping_add(*byte);
            b = b.wrapping_add(a);
        }
        (a, b)
    }

    /// `RXM-RAWX`: header (16 bytes) + `numMeas` x 32-byte measurement
    /// blocks. Only the first measurement is surfaced (matching the raw
    /// decoder contract's one-record-per-`feed_byte`-completion shape).
    fn decode_rawx(&self) -> Option<DecodeEvent> {
        let p = &self.payload;
        if p.len() < 16 {
            return None;
        }
        let rcv_tow = f64::from_le_bytes(p[0..8].try_into().ok()?);
        let week = u16::from_le_bytes(p[8..10].try_into().ok()?);
        let num_meas = p[11];
        if num_meas == 0 || p.len() < 16 + 32 {
            return None;
        }

        let block = &p[16..48];
        let pr_m = f64::from_le_bytes(block[0..8].try_into().ok()?);
        let cp_cycles = f64::from_le_bytes(block[8..16].try_into().ok()?);
        let doppler_hz = f32::from_le_bytes(block[16..20].try_into().ok()?);
        let gnss_id = block[20];
        let sv_id = block[21];
        let cno = block[26];
        let lock_time_ms = u16::from_le_bytes(block[27..29].try_into().ok()?);

        let system = match gnss_id {
            0 => Constellation::GPS,
            1 => Constellation::SBAS,
            2 => Constellation::Galileo,
            3 => Constellation::BeiDou,
            5 => Constellation::QZSS,
            6 => Constellation::Glonass,
            7 => Constellation::IRNSS,
            _ => return None,
        };
        let prn = if gnss_id == 1 { sv_id.saturating_add(120) } else { sv_id };
        let sat = sat_no(system, prn).ok()?;

        let time = gps_to_time(week as u32, rcv_tow);
        let lli = if lock_time_ms == 0 { crate::obs::LLI_LOCK_LOST } else { 0 };

        Some(DecodeEvent::Observation(Observation {
            time,
            sat,
            receiver: 0,
            bands: vec![BandObs {
                pseudorange_m: Some(pr_m),
                carrier_phase_cycles: Some(cp_cycles),
                doppler_hz: Some(doppler_hz as f64),
                snr_db_hz: Some(cno as f32),
                lli,
                code: Some(ObsCode::L1C),
            }],
        }))
    }

    fn decode_record(&mut self) -> DecodeEvent {
        self.ctx.last_message_type = ((self.class as u32) << 8) | self.id as u32;
        let event = match (self.class, self.id) {
            (CLASS_RXM, ID_RAWX) => self.decode_rawx(),
            (CLASS_RXM, 0x13) => None, // SFRBX: opaque, not sub-frame decoded here
            _ => None,
        };
        event.unwrap_or(DecodeEvent::NeedMore)
    }
}

impl RawDecoder for UbxDecoder {
    fn feed_byte(&mut self, byte: u8) -> DecodeEvent {
        match self.state {
            State::HuntSync1 => {
                if byte == SYNC1 {
                    self.state = State::HuntSync2;
                }
                DecodeEvent::NeedMore
            },
            State::HuntSync2 => {
                self.state = if byte == SYNC2 {
                    State::ReadClass
                } else if byte == SYNC1 {
                    State::HuntSync2
                } else {
                    State::HuntSync1
                };
                DecodeEvent::NeedMore
            },
            State::ReadClass => {
                self.class = byte;
                self.state = State::ReadId;
                DecodeEvent::NeedMore
            },
            State::ReadId => {
                self.id = byte;
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
                    State::ReadCkA
                } else {
                    State::ReadPayload
                };
                DecodeEvent::NeedMore
            },
            State::ReadPayload => {
                self.payload.push(byte);
                if self.payload.len() as u16 == self.len {
                    self.state = State::ReadCkA;
                }
                DecodeEvent::NeedMore
            },
            State::ReadCkA => {
                self.ck_a = byte;
                self.state = State::ReadCkB;
                DecodeEvent::NeedMore
            },
            State::ReadCkB => {
                self.ck_b = byte;
                let (expected_a, expected_b) = self.fletcher();
                let ok = expected_a == self.ck_a && expected_b == self.ck_b;
                if !ok {
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

    fn encode_frame(class: u8, id: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![SYNC1, SYNC2, class, id, (payload.len() & 0xFF) as u8, (payload.len() >> 8) as u8];
        frame.extend_from_slice(payload);

        let mut a = 0u8;
        let mut b = 0u8;
        for byte in &frame[2..] {
            a = a.wrapping_add(*byte);
            b = b.wrapping_add(a);
        }
        frame.push(a);
        frame.push(b);
        frame
    }

    fn build_rawx_payload() -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&123456.5f64.to_le_bytes()); // rcvTow
        p.extend_from_slice(&2200u16.to_le_bytes()); // week
        p.push(0); // leapS
        p.push(1); // numMeas
        p.push(0); // recStat
        p.extend_from_slice(&[0u8; 3]); // reserved1

        let mut block = Vec::new();
        block.extend_from_slice(&20_000_000.25f64.to_le_bytes()); // prMes
        block.extend_from_slice(&105_000_000.0f64.to_le_bytes()); // cpMes
        block.extend_from_slice(&(-1500.5f32).to_le_bytes()); // doMes
        block.push(0); // gnssId = GPS
        block.push(5); // svId
        block.extend_from_slice(&[0u8; 4]); // reserved2, freqId
        block.push(40); // cno
        block.extend_from_slice(&500u16.to_le_bytes()); // locktime
        block.extend_from_slice(&[0u8; 32 - block.len()]);
        p.extend_from_slice(&block[..32]);
        p
    }

    #[test]
    fn decodes_rawx_observation() {
        let payload = build_rawx_payload();
        let frame = encode_frame(CLASS_RXM, ID_RAWX, &payload);
        let ctx = RawContext::new(RawOptions::default(), None);
        let mut decoder = UbxDecoder::new(ctx);
        let events = decoder.feed(&frame);

        assert_eq!(events.len(), 1);
        match &events[0] {
            DecodeEvent::Observation(obs) => {
                assert_eq!(obs.sat, sat_no(Constellation::GPS, 5).unwrap());
                assert!((obs.bands[0].pseudorange_m.unwrap() - 20_000_000.25).abs() < 1e-6);
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn bad_checksum_reported() {
        let payload = build_rawx_payload();
        let mut frame = encode_frame(CLASS_RXM, ID_RAWX, &payload);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        let ctx = RawContext::new(RawOptions::default(), None);
        let mut decoder = UbxDecoder::new(ctx);
        let events = decoder.feed(&frame);
        assert!(matches!(
            events[0],
            DecodeEvent::ProtocolError(ProtocolErrorKind::ChecksumMismatch)
        ));
    }
}
