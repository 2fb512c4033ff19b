//! NovAtel OEM3/OEM4 decoder (C5): binary header sync `0xAA 0x44 0x12`
//! (OEM4) or `0xAA 0x44 0x11` (OEM3 short header), little-endian fields,
//! CRC-32 (polynomial 0x104C11DB7) over header+payload.
//!
//! Only the OEM4 long header framing is implemented; message body decode
//! covers `RANGE` (observation) records. `RAWEPHEM`/`GLOEPHEMERIS` framing
//! is recognized by message id but left structurally opaque, matching
//! spec.md's "representative record" scope for secondary protocols.

use super::{DecodeEvent, ProtocolErrorKind, RawContext, RawDecoder};
use crate::obs::{BandObs, Observation};
use crate::sat::{sat_no, ObsCode};
use crate::time::gps_to_time;
use gnss_rs::constellation::Constellation;

const SYNC: [u8; 3] = [0xAA, 0x44, 0x12];
const HEADER_LEN: usize = 28;
const MSG_ID_RANGE: u16 = 43;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    HuntSync(usize),
    ReadHeader,
    ReadPayload,
    ReadCrc,
}

pub struct NovatelDecoder {
    ctx: RawContext,
    state: State,
    header: Vec<u8>,
    header_len: u8,
    msg_id: u16,
    msg_len: u16,
    week: u16,
    tow_ms: u32,
    payload: Vec<u8>,
    crc_buf: Vec<u8>,
}

impl NovatelDecoder {
    pub fn new(ctx: RawContext) -> Self {
        Self {
            ctx,
            state: State::HuntSync(0),
            header: Vec::new(),
            header_len: 0,
            msg_id: 0,
            msg_len: 0,
            week: 0,
            tow_ms: 0,
            payload: Vec::new(),
            crc_buf: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.state = State::HuntSync(0);
        self.header.clear();
        self.payload.clear();
        self.crc_buf.clear();
    }

    fn crc32(data: &[u8]) -> u32 {
        const POLY: u32 = 0xEDB8_8320; // bit-reversed 0x04C11DB7
        let mut crc = 0u32;
        for &byte in data {
            crc ^= byte as u32;
            for _ in 0..8 {
                crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
            }
        }
        crc
    }

    fn decode_range(&self) -> Option<DecodeEvent> {
        if self.payload.len() < 4 + 44 {
            return None;
        }
        let num_obs = u32::from_le_bytes(self.payload[0..4].try_into().ok()?);
        if num_obs == 0 {
            return None;
        }
        let rec = &self.payload[4..48];
        let prn = rec[0];
        let psr_m = f64::from_le_bytes(rec[4..12].try_into().ok()?);
        let adr_cycles = f64::from_le_bytes(rec[16..24].try_into().ok()?);
        let doppler_hz = f32::from_le_bytes(rec[24..28].try_into().ok()?);
        let cno = f32::from_le_bytes(rec[28..32].try_into().ok()?);
        let locktime_s = f32::from_le_bytes(rec[32..36].try_into().ok()?);

        let system = if prn <= 32 {
            Constellation::GPS
        } else if prn <= 158 {
            Constellation::SBAS
        } else {
            Constellation::Glonass
        };
        let prn_mapped = if system == Constellation::Glonass { prn.saturating_sub(37) } else { prn };
        let sat = sat_no(system, prn_mapped).ok()?;

        let time = gps_to_time(self.week as u32, self.tow_ms as f64 * 1.0e-3);
        let lli = if locktime_s == 0.0 { crate::obs::LLI_LOCK_LOST } else { 0 };

        Some(DecodeEvent::Observation(Observation {
            time,
            sat,
            receiver: 0,
            bands: vec![BandObs {
                pseudorange_m: Some(psr_m),
                carrier_phase_cycles: Some(adr_cycles),
                doppler_hz: Some(doppler_hz as f64),
                snr_db_hz: Some(cno),
                lli,
                code: Some(ObsCode::L1C),
            }],
        }))
    }

    fn decode_record(&mut self) -> DecodeEvent {
        self.ctx.last_message_type = self.msg_id as u32;
        let event = if self.msg_id == MSG_ID_RANGE {
            self.decode_range()
        } else {
            None
        };
        event.unwrap_or(DecodeEvent::NeedMore)
    }
}

impl RawDecoder for NovatelDecoder {
    fn feed_byte(&mut self, byte: u8) -> DecodeEvent {
        match self.state {
            State::HuntSync(n) => {
                if byte == SYNC[n] {
                    self.state = if n + 1 == SYNC.len() {
                        self.header.clear();
                        self.header.extend_from_slice(&SYNC);
                        State::ReadHeader
                    } else {
                        State::HuntSync(n + 1)
                    };
                } else {
                    self.state = State::HuntSync(0);
                }
                DecodeEvent::NeedMore
            },
            State::ReadHeader => {
                self.header.push(byte);
                if self.header.len() == 4 {
                    self.header_len = byte;
                }
                if self.header_len > 0 && self.header.len() == self.header_len as usize {
                    self.msg_id = u16::from_le_bytes([self.header[4], self.header[5]]);
                    self.week = u16::from_le_bytes([self.header[14], self.header[15]]);
                    self.tow_ms = u32::from_le_bytes([
                        self.header[16],
                        self.header[17],
                        self.header[18],
                        self.header[19],
                    ]);
                    self.msg_len = u16::from_le_bytes([self.header[8], self.header[9]]);
                    self.state = if self.msg_len == 0 {
                        State::ReadCrc
                    } else {
                        State::ReadPayload
                    };
                }
                DecodeEvent::NeedMore
            },
            State::ReadPayload => {
                self.payload.push(byte);
                if self.payload.len() == self.msg_len as usize {
                    self.state = State::ReadCrc;
                }
                DecodeEvent::NeedMore
            },
            State::ReadCrc => {
                self.crc_buf.push(byte);
                if self.crc_buf.len() < 4 {
                    return DecodeEvent::NeedMore;
                }
                let mut frame = self.header.clone();
                frame.extend_from_slice(&self.payload);
                let computed = Self::crc32(&frame);
                let got = u32::from_le_bytes(self.crc_buf.clone().try_into().unwrap_or([0; 4]));
                if computed != got {
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

    fn build_range_payload() -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&1u32.to_le_bytes()); // numObs
        let mut rec = vec![0u8; 44];
        rec[0] = 7; // prn
        rec[4..12].copy_from_slice(&22_000_000.5f64.to_le_bytes());
        rec[16..24].copy_from_slice(&90_000_000.0f64.to_le_bytes());
        rec[24..28].copy_from_slice(&(-800.0f32).to_le_bytes());
        rec[28..32].copy_from_slice(&(48.0f32).to_le_bytes());
        rec[32..36].copy_from_slice(&(10.0f32).to_le_bytes());
        p.extend_from_slice(&rec);
        p
    }

    fn encode_frame(msg_id: u16, payload: &[u8], week: u16, tow_ms: u32) -> Vec<u8> {
        let mut header = vec![0u8; HEADER_LEN];
        header[0..3].copy_from_slice(&SYNC);
        header[3] = HEADER_LEN as u8;
        header[4..6].copy_from_slice(&msg_id.to_le_bytes());
        header[8..10].copy_from_slice(&(payload.len() as u16).to_le_bytes());
        header[14..16].copy_from_slice(&week.to_le_bytes());
        header[16..20].copy_from_slice(&tow_ms.to_le_bytes());

        let mut frame = header.clone();
        frame.extend_from_slice(payload);
        let crc = NovatelDecoder::crc32(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    #[test]
    fn decodes_range_observation() {
        let payload = build_range_payload();
        let frame = encode_frame(MSG_ID_RANGE, &payload, 2200, 123_000);
        let ctx = RawContext::new(RawOptions::default(), None);
        let mut decoder = NovatelDecoder::new(ctx);
        let events = decoder.feed(&frame);

        assert_eq!(events.len(), 1);
        match &events[0] {
            DecodeEvent::Observation(obs) => {
                assert_eq!(obs.sat, sat_no(Constellation::GPS, 7).unwrap());
                assert!((obs.bands[0].pseudorange_m.unwrap() - 22_000_000.5).abs() < 1e-6);
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
