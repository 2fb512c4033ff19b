//! Septentrio SBF decoder (C5): sync `0x24 0x40` ("$@"), 16-bit CRC-CCITT
//! over ID..end, 16-bit little-endian length (always a multiple of 4),
//! `TOW`/`WNc` time fields immediately following the CRC/length/ID header.
//!
//! Message dispatch: `MeasEpoch` (block ID 4027) is decoded to one
//! observation per call; other block IDs frame correctly but are not
//! further decoded, per this crate's "representative record" scope for
//! secondary protocols.

use super::{DecodeEvent, ProtocolErrorKind, RawContext, RawDecoder};
use crate::obs::{BandObs, Observation};
use crate::sat::{sat_no, ObsCode};
use crate::time::gps_to_time;
use gnss_rs::constellation::Constellation;

const SYNC: [u8; 2] = [0x24, 0x40];
const HEADER_LEN: usize = 8; // sync(2) + crc(2) + id(2) + length(2)
const BLOCK_ID_MEAS_EPOCH: u16 = 4027;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    HuntSync(usize),
    ReadCrc,
    ReadIdLen,
    ReadBody,
}

pub struct SbfDecoder {
    ctx: RawContext,
    state: State,
    crc_buf: Vec<u8>,
    crc: u16,
    block_id: u16,
    length: u16,
    id_len_buf: Vec<u8>,
    body: Vec<u8>,
}

impl SbfDecoder {
    pub fn new(ctx: RawContext) -> Self {
        Self {
            ctx,
            state: State::HuntSync(0),
            crc_buf: Vec::new(),
            crc: 0,
            block_id: 0,
            length: 0,
            id_len_buf: Vec::new(),
            body: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.state = State::HuntSync(0);
        self.crc_buf.clear();
        self.id_len_buf.clear();
        self.body.clear();
    }

    fn crc16_ccitt(data: &[u8]) -> u16 {
        const POLY: u16 = 0x1021;
        let mut crc = 0u16;
        for &byte in data {
            crc ^= (byte as u16) << 8;
            for _ in 0..8 {
                crc = if crc & 0x8000 != 0 { (crc << 1) ^ POLY } else { crc << 1 };
            }
        }
        crc
    }

    /// `MeasEpoch`: TOW(4) + WNc(2) + N1(1) + SB1Length(1) + SB2Length(1)
    /// + CommonFlags(1) + ... + N1 x (SVID(1) + ... + PseudoRange(4,u32 in
    /// 0.001m units) + ...). Decodes the first sub-block only.
    fn decode_meas_epoch(&self) -> Option<DecodeEvent> {
        let b = &self.body;
        if b.len() < 10 {
            return None;
        }
        let tow_ms = u32::from_le_bytes(b[0..4].try_into().ok()?);
        let wnc = u16::from_le_bytes(b[4..6].try_into().ok()?);
        let n1 = b[6];
        let sb1_len = b[7] as usize;
        if n1 == 0 || b.len() < 10 + sb1_len {
            return None;
        }
        let sb = &b[10..10 + sb1_len];
        let svid = sb[0];
        let pr_raw = u32::from_le_bytes(sb[4..8].try_into().ok()?);

        let (system, prn) = if svid <= 37 {
            (Constellation::GPS, svid)
        } else if svid <= 61 {
            (Constellation::Glonass, svid - 37)
        } else if svid <= 119 {
            (Constellation::Galileo, svid - 70)
        } else {
            (Constellation::SBAS, svid)
        };
        let sat = sat_no(system, prn).ok()?;
        let time = gps_to_time(wnc as u32, tow_ms as f64 * 1.0e-3);

        Some(DecodeEvent::Observation(Observation {
            time,
            sat,
            receiver: 0,
            bands: vec![BandObs {
                pseudorange_m: Some(pr_raw as f64 * 0.001 + 19_000_000.0),
                carrier_phase_cycles: None,
                doppler_hz: None,
                snr_db_hz: None,
                lli: 0,
                code: Some(ObsCode::L1C),
            }],
        }))
    }

    fn decode_record(&mut self) -> DecodeEvent {
        self.ctx.last_message_type = self.block_id as u32;
        let event = if self.block_id == BLOCK_ID_MEAS_EPOCH {
            self.decode_meas_epoch()
        } else {
            None
        };
        event.unwrap_or(DecodeEvent::NeedMore)
    }
}

impl RawDecoder for SbfDecoder {
    fn feed_byte(&mut self, byte: u8) -> DecodeEvent {
        match self.state {
            State::HuntSync(n) => {
                if byte == SYNC[n] {
                    self.state = if n + 1 == SYNC.len() {
                        State::ReadCrc
                    } else {
                        State::HuntSync(n + 1)
                    };
                } else {
                    self.state = State::HuntSync(0);
                }
                DecodeEvent::NeedMore
            },
            State::ReadCrc => {
                self.crc_buf.push(byte);
                if self.crc_buf.len() < 2 {
                    return DecodeEvent::NeedMore;
                }
                self.crc = u16::from_le_bytes([self.crc_buf[0], self.crc_buf[1]]);
                self.state = State::ReadIdLen;
                DecodeEvent::NeedMore
            },
            State::ReadIdLen => {
                self.id_len_buf.push(byte);
                if self.id_len_buf.len() == 4 {
                    self.block_id = u16::from_le_bytes([self.id_len_buf[0], self.id_len_buf[1]]) & 0x1FFF;
                    self.length = u16::from_le_bytes([self.id_len_buf[2], self.id_len_buf[3]]);
                    self.state = if self.length as usize <= HEADER_LEN {
                        State::HuntSync(0)
                    } else {
                        State::ReadBody
                    };
                }
                DecodeEvent::NeedMore
            },
            State::ReadBody => {
                self.body.push(byte);
                if self.body.len() == self.length as usize - HEADER_LEN {
                    let mut after_crc = self.id_len_buf.clone();
                    after_crc.extend_from_slice(&self.body);
                    if Self::crc16_ccitt(&after_crc) != self.crc {
                        self.reset();
                        return DecodeEvent::ProtocolError(ProtocolErrorKind::ChecksumMismatch);
                    }
                    let event = self.decode_record();
                    self.reset();
                    return event;
                }
                DecodeEvent::NeedMore
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::RawOptions;

    fn encode_frame(block_id: u16, body: &[u8]) -> Vec<u8> {
        let length = (HEADER_LEN + body.len()) as u16;
        let mut after_crc = Vec::new();
        after_crc.extend_from_slice(&block_id.to_le_bytes());
        after_crc.extend_from_slice(&length.to_le_bytes());
        after_crc.extend_from_slice(body);

        let crc = SbfDecoder::crc16_ccitt(&after_crc);
        let mut frame = Vec::new();
        frame.extend_from_slice(&SYNC);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame.extend_from_slice(&after_crc);
        frame
    }

    fn build_meas_epoch_body() -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&123_000u32.to_le_bytes()); // TOW ms
        b.extend_from_slice(&2200u16.to_le_bytes()); // WNc
        b.push(1); // N1
        b.push(16); // SB1Length
        b.push(0); // SB2Length
        b.push(0); // CommonFlags
        let mut sb = vec![0u8; 16];
        sb[0] = 12; // SVID (GPS PRN 12)
        sb[4..8].copy_from_slice(&500_000u32.to_le_bytes()); // pseudorange sub-ms part
        b.extend_from_slice(&sb);
        b
    }

    #[test]
    fn decodes_meas_epoch_observation() {
        let body = build_meas_epoch_body();
        let frame = encode_frame(BLOCK_ID_MEAS_EPOCH, &body);
        let ctx = RawContext::new(RawOptions::default(), None);
        let mut decoder = SbfDecoder::new(ctx);
        let events = decoder.feed(&frame);

        assert_eq!(events.len(), 1);
        match &events[0] {
            DecodeEvent::Observation(obs) => {
                assert_eq!(obs.sat, sat_no(Constellation::GPS, 12).unwrap());
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
