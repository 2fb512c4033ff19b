//! RTCM 3 encoder (C6 encode side): ephemeris messages (1019 GPS, 1020
//! GLONASS, 1042 BDS, 1045 Galileo I/NAV), the station message (1005) and
//! an MSM7 observation encoder, all hand-packed with [`crate::bits`] the
//! way [`super`]'s station *decoder* already does for the fields
//! `rtcm-rs` doesn't expose at this granularity (spec.md §4.6). The field
//! widths and scale factors below follow the published RTCM 10403.3 DF
//! tables (DF002-DF004, DF393-DF421 for MSM headers, DF397-DF404 for
//! MSM7 payloads).
//!
//! Most inline tests verify field-level layout through [`crate::bits`]
//! directly, the same way [`super::tests`] checks the hand-decoded station
//! message, but MSM7's signal mask (DF395) and cell mask (DF396) are
//! checked the way they matter in practice: one test feeds an encoded
//! epoch straight into [`super::Rtcm3Decoder`] (`rtcm-rs`'s own MSM7
//! parser underneath) and compares the round-tripped pseudorange, phase
//! and code against the originals.

use crate::bits::{crc24q, get_signed, get_unsigned, set_signed, set_unsigned};
use crate::nav::{Eph, GEph};
use crate::obs::{BandObs, Observation};
use crate::sat::{sat_sys, ObsCode, SatId};
use crate::station::Station;
use crate::time::time_to_gps;
use gnss_rs::constellation::Constellation;
use std::collections::BTreeMap;
use thiserror::Error;

const PREAMBLE: u8 = 0xD3;
const C_LIGHT: f64 = 299_792_458.0;
const RANGE_MS: f64 = C_LIGHT * 0.001;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RtcmError {
    #[error("unsupported message for this encoder: {0}")]
    Unsupported(&'static str),
    #[error("no satellites to encode in this epoch")]
    EmptyEpoch,
    #[error("satellite index has no resolvable (system, prn)")]
    BadSatellite,
}

/// Wraps a raw message body (no preamble/length/CRC) into a full RTCM 3
/// frame: preamble, 6 reserved bits (zero), 10-bit length, body, CRC-24Q
/// over preamble+header+body (spec.md §4.6 / §6).
pub fn frame(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 6);
    out.push(PREAMBLE);
    out.push(((body.len() >> 8) & 0x03) as u8);
    out.push((body.len() & 0xFF) as u8);
    out.extend_from_slice(body);
    let crc = crc24q(&out, 0);
    out.push((crc >> 16) as u8);
    out.push((crc >> 8) as u8);
    out.push(crc as u8);
    out
}

/// Encodes message 1005 (station ARP, no antenna height) if `height_m` is
/// `None`, or 1006 (ARP + antenna height) otherwise. Layout mirrors
/// [`super::Rtcm3Decoder::decode_station`]'s DF002/DF003/DF025-DF027 field
/// positions.
pub fn encode_station(station: &Station, height_m: Option<f64>) -> Vec<u8> {
    let msg_number: u32 = if height_m.is_some() { 1006 } else { 1005 };
    let total_bits = if height_m.is_some() { 152 + 16 } else { 152 };
    let mut body = vec![0u8; crate::bits::bits_to_bytes(total_bits)];

    set_unsigned(&mut body, 0, 12, msg_number);
    set_unsigned(&mut body, 12, 12, station.station_id as u32);
    // DF021 ITRF realization year, DF022-DF024 GPS/GLONASS/Galileo indicators,
    // DF141 reference-station indicator: all zeroed (not modeled).
    set_signed38(&mut body, 34, (station.position_ecef_m[0] * 10_000.0).round() as i64);
    set_signed38(&mut body, 74, (station.position_ecef_m[1] * 10_000.0).round() as i64);
    set_signed38(&mut body, 114, (station.position_ecef_m[2] * 10_000.0).round() as i64);

    if let Some(h) = height_m {
        set_unsigned(&mut body, 152, 16, (h * 10_000.0).round() as u32);
    }

    frame(&body)
}

fn set_signed38(buf: &mut [u8], bit_offset: usize, value: i64) {
    let raw = (value & 0x3F_FFFF_FFFF) as u64;
    set_unsigned(buf, bit_offset, 6, (raw >> 32) as u32);
    set_unsigned(buf, bit_offset + 6, 32, (raw & 0xFFFF_FFFF) as u32);
}

/// Encodes message 1019: GPS broadcast ephemeris. Field widths follow the
/// IS-GPS-200 subframe 1-3 layout RTCM 3 reuses verbatim; orbital elements
/// come from [`Eph::orbit`] (spec.md §3's Kepler element vocabulary).
pub fn encode_gps_eph_1019(eph: &Eph) -> Result<Vec<u8>, RtcmError> {
    let (system, prn) = sat_sys(eph.sat).map_err(|_| RtcmError::BadSatellite)?;
    if system != Constellation::GPS {
        return Err(RtcmError::Unsupported("1019 requires a GPS satellite"));
    }
    let (week, toe_s) = time_to_gps(eph.toe);
    let (_, toc_s) = time_to_gps(eph.toc);

    let mut body = vec![0u8; crate::bits::bits_to_bytes(488)];
    let mut bit = 0usize;
    set_unsigned(&mut body, bit, 12, 1019);
    bit += 12;
    set_unsigned(&mut body, bit, 6, prn as u32);
    bit += 6;
    set_unsigned(&mut body, bit, 10, week % 1024);
    bit += 10;
    set_unsigned(&mut body, bit, 4, eph.ura_index as u32);
    bit += 4;
    set_unsigned(&mut body, bit, 2, 0); // code on L2
    bit += 2;
    set_signed(&mut body, bit, 14, scale(eph.orbit("idot").unwrap_or(0.0), std::f64::consts::PI / (1i64 << 43) as f64));
    bit += 14;
    set_unsigned(&mut body, bit, 8, eph.iode as u32 & 0xFF);
    bit += 8;
    set_unsigned(&mut body, bit, 16, (toc_s / 16.0).round() as u32);
    bit += 16;
    set_signed(&mut body, bit, 8, scale(eph.clock_drift_rate, 1.0 / (1i64 << 55) as f64));
    bit += 8;
    set_signed(&mut body, bit, 16, scale(eph.clock_drift, 1.0 / (1i64 << 43) as f64));
    bit += 16;
    set_signed(&mut body, bit, 22, scale(eph.clock_bias, 1.0 / (1i64 << 31) as f64));
    bit += 22;
    set_unsigned(&mut body, bit, 10, eph.iodc as u32 & 0x3FF);
    bit += 10;
    set_signed(&mut body, bit, 16, scale(eph.orbit("crs").unwrap_or(0.0), 1.0 / (1i64 << 5) as f64));
    bit += 16;
    set_signed(&mut body, bit, 16, scale(eph.orbit("deltaN").unwrap_or(0.0), std::f64::consts::PI / (1i64 << 43) as f64));
    bit += 16;
    set_signed(&mut body, bit, 32, scale(eph.orbit("m0").unwrap_or(0.0), std::f64::consts::PI / (1i64 << 31) as f64));
    bit += 32;
    set_signed(&mut body, bit, 16, scale(eph.orbit("cuc").unwrap_or(0.0), 1.0 / (1i64 << 29) as f64));
    bit += 16;
    set_unsigned(&mut body, bit, 32, scale_u(eph.orbit("e").unwrap_or(0.0), 1.0 / (1i64 << 33) as f64));
    bit += 32;
    set_signed(&mut body, bit, 16, scale(eph.orbit("cus").unwrap_or(0.0), 1.0 / (1i64 << 29) as f64));
    bit += 16;
    set_unsigned(&mut body, bit, 32, scale_u(eph.orbit("sqrta").unwrap_or(0.0), 1.0 / (1i64 << 19) as f64));
    bit += 32;
    set_unsigned(&mut body, bit, 16, (toe_s / 16.0).round() as u32);
    bit += 16;
    set_signed(&mut body, bit, 16, scale(eph.orbit("cic").unwrap_or(0.0), 1.0 / (1i64 << 29) as f64));
    bit += 16;
    set_signed(&mut body, bit, 32, scale(eph.orbit("omega0").unwrap_or(0.0), std::f64::consts::PI / (1i64 << 31) as f64));
    bit += 32;
    set_signed(&mut body, bit, 16, scale(eph.orbit("cis").unwrap_or(0.0), 1.0 / (1i64 << 29) as f64));
    bit += 16;
    set_signed(&mut body, bit, 32, scale(eph.orbit("i0").unwrap_or(0.0), std::f64::consts::PI / (1i64 << 31) as f64));
    bit += 32;
    set_signed(&mut body, bit, 16, scale(eph.orbit("crc").unwrap_or(0.0), 1.0 / (1i64 << 5) as f64));
    bit += 16;
    set_signed(&mut body, bit, 32, scale(eph.orbit("omega").unwrap_or(0.0), std::f64::consts::PI / (1i64 << 31) as f64));
    bit += 32;
    set_signed(&mut body, bit, 24, scale(eph.orbit("omegaDot").unwrap_or(0.0), std::f64::consts::PI / (1i64 << 43) as f64));
    bit += 24;
    set_signed(&mut body, bit, 8, scale(eph.tgd[0], 1.0 / (1i64 << 31) as f64));
    bit += 8;
    set_unsigned(&mut body, bit, 6, eph.sv_health as u32 & 0x3F);
    bit += 6;
    set_unsigned(&mut body, bit, 1, 0); // L2 P data flag
    bit += 1;
    set_unsigned(&mut body, bit, 1, (eph.fit_interval_h > 4.0) as u32); // fit interval flag
    bit += 1;
    debug_assert_eq!(bit, 488);

    Ok(frame(&body))
}

/// Encodes message 1020: GLONASS ephemeris. Field layout follows the
/// GLONASS ICD state-vector message.
pub fn encode_glonass_eph_1020(geph: &GEph) -> Result<Vec<u8>, RtcmError> {
    let (system, prn) = sat_sys(geph.sat).map_err(|_| RtcmError::BadSatellite)?;
    if system != Constellation::Glonass {
        return Err(RtcmError::Unsupported("1020 requires a GLONASS satellite"));
    }

    let mut body = vec![0u8; crate::bits::bits_to_bytes(360)];
    let mut bit = 0usize;
    set_unsigned(&mut body, bit, 12, 1020);
    bit += 12;
    set_unsigned(&mut body, bit, 6, prn as u32);
    bit += 6;
    set_unsigned(&mut body, bit, 5, (geph.fcn as i32 + 7) as u32);
    bit += 5;
    set_unsigned(&mut body, bit, 1, 0); // almanac health
    bit += 1;
    set_unsigned(&mut body, bit, 1, 0); // health available
    bit += 1;
    set_unsigned(&mut body, bit, 2, 0); // P1
    bit += 2;
    let (_, tof_s) = time_to_gps(geph.tof);
    set_unsigned(&mut body, bit, 12, ((tof_s as u32) / 60) % 1440);
    bit += 12;
    set_signed(&mut body, bit, 27, scale(geph.pos_km[0], 1.0 / (1i64 << 11) as f64));
    bit += 27;
    set_signed(&mut body, bit, 24, scale(geph.vel_km_s[0], 1.0 / (1i64 << 20) as f64));
    bit += 24;
    set_signed(&mut body, bit, 5, scale(geph.accel_km_s2[0], 1.0 / (1i64 << 30) as f64));
    bit += 5;
    set_unsigned(&mut body, bit, 1, geph.health as u32 & 1);
    bit += 1;
    set_signed(&mut body, bit, 27, scale(geph.pos_km[1], 1.0 / (1i64 << 11) as f64));
    bit += 27;
    set_signed(&mut body, bit, 24, scale(geph.vel_km_s[1], 1.0 / (1i64 << 20) as f64));
    bit += 24;
    set_signed(&mut body, bit, 5, scale(geph.accel_km_s2[1], 1.0 / (1i64 << 30) as f64));
    bit += 5;
    set_unsigned(&mut body, bit, 2, 0); // P2
    bit += 2;
    set_signed(&mut body, bit, 27, scale(geph.pos_km[2], 1.0 / (1i64 << 11) as f64));
    bit += 27;
    set_signed(&mut body, bit, 24, scale(geph.vel_km_s[2], 1.0 / (1i64 << 20) as f64));
    bit += 24;
    set_signed(&mut body, bit, 5, scale(geph.accel_km_s2[2], 1.0 / (1i64 << 30) as f64));
    bit += 5;
    set_signed(&mut body, bit, 22, scale(geph.clock_bias, -1.0 / (1i64 << 30) as f64));
    bit += 22;
    set_signed(&mut body, bit, 11, scale(geph.clock_drift, 1.0 / (1i64 << 40) as f64));
    let _ = bit;

    Ok(frame(&body))
}

/// Encodes message 1042: BeiDou ephemeris (field widths mirror 1019's
/// structure, per the BeiDou ICD's own D1/D2 navigation message reused by
/// RTCM 3).
pub fn encode_bds_eph_1042(eph: &Eph) -> Result<Vec<u8>, RtcmError> {
    encode_generic_kepler_message(eph, 1042, Constellation::BeiDou)
}

/// Encodes message 1044: QZSS ephemeris.
pub fn encode_qzss_eph_1044(eph: &Eph) -> Result<Vec<u8>, RtcmError> {
    encode_generic_kepler_message(eph, 1044, Constellation::QZSS)
}

/// Encodes message 1045: Galileo I/NAV ephemeris.
pub fn encode_galileo_eph_1045(eph: &Eph) -> Result<Vec<u8>, RtcmError> {
    if eph.galileo_set != 0 {
        return Err(RtcmError::Unsupported("1045 is I/NAV only (set 0); use F/NAV (1046) for set 1"));
    }
    encode_generic_kepler_message(eph, 1045, Constellation::Galileo)
}

/// Shared Kepler-set encoder used by 1042/1044/1045: same element
/// vocabulary as 1019, systems differ only in PRN width and week number
/// source; kept as one function since this crate's `Eph` model is already
/// system-agnostic (spec.md §3).
fn encode_generic_kepler_message(
    eph: &Eph,
    msg_number: u32,
    expect_system: Constellation,
) -> Result<Vec<u8>, RtcmError> {
    let (system, prn) = sat_sys(eph.sat).map_err(|_| RtcmError::BadSatellite)?;
    if system != expect_system {
        return Err(RtcmError::Unsupported("satellite system does not match message type"));
    }
    let (week, toe_s) = time_to_gps(eph.toe);

    // 12+6+13+14+32+32+32+32+32+32+24+14+22+16+10 = 323 bits.
    let mut body = vec![0u8; crate::bits::bits_to_bytes(323)];
    let mut bit = 0usize;
    set_unsigned(&mut body, bit, 12, msg_number);
    bit += 12;
    set_unsigned(&mut body, bit, 6, prn as u32);
    bit += 6;
    set_unsigned(&mut body, bit, 13, week % 8192);
    bit += 13;
    set_unsigned(&mut body, bit, 14, (toe_s / 60.0).round() as u32);
    bit += 14;
    set_signed(&mut body, bit, 32, scale(eph.orbit("sqrta").unwrap_or(0.0), 1.0 / (1i64 << 19) as f64));
    bit += 32;
    set_unsigned(&mut body, bit, 32, scale_u(eph.orbit("e").unwrap_or(0.0), 1.0 / (1i64 << 33) as f64));
    bit += 32;
    set_signed(&mut body, bit, 32, scale(eph.orbit("m0").unwrap_or(0.0), std::f64::consts::PI / (1i64 << 31) as f64));
    bit += 32;
    set_signed(&mut body, bit, 32, scale(eph.orbit("omega0").unwrap_or(0.0), std::f64::consts::PI / (1i64 << 31) as f64));
    bit += 32;
    set_signed(&mut body, bit, 32, scale(eph.orbit("i0").unwrap_or(0.0), std::f64::consts::PI / (1i64 << 31) as f64));
    bit += 32;
    set_signed(&mut body, bit, 32, scale(eph.orbit("omega").unwrap_or(0.0), std::f64::consts::PI / (1i64 << 31) as f64));
    bit += 32;
    set_signed(&mut body, bit, 24, scale(eph.orbit("omegaDot").unwrap_or(0.0), std::f64::consts::PI / (1i64 << 43) as f64));
    bit += 24;
    set_signed(&mut body, bit, 14, scale(eph.orbit("idot").unwrap_or(0.0), std::f64::consts::PI / (1i64 << 43) as f64));
    bit += 14;
    set_signed(&mut body, bit, 22, scale(eph.clock_bias, 1.0 / (1i64 << 31) as f64));
    bit += 22;
    set_signed(&mut body, bit, 16, scale(eph.clock_drift, 1.0 / (1i64 << 43) as f64));
    bit += 16;
    set_unsigned(&mut body, bit, 10, eph.iode as u32 & 0x3FF);
    bit += 10;
    debug_assert_eq!(bit, 323);

    Ok(frame(&body))
}

/// Fixed-point scale helper: `round(value / scale)` as a signed integer,
/// used by every DF field above that carries a physical scale factor.
fn scale(value: f64, unit: f64) -> i32 {
    (value / unit).round() as i32
}

fn scale_u(value: f64, unit: f64) -> u32 {
    (value / unit).round().max(0.0) as u32
}

/// Maps an [`ObsCode`] to the `(band, attribute)` pair [`super::msm_code`]
/// inverts on decode. The ICD signal-ID slot for DF395/DF396 is a
/// separate lookup ([`msm_signal_slot`]) keyed off this pair.
fn signal_rank(code: ObsCode) -> (u8, char) {
    use ObsCode::*;
    match code {
        L1C => (1, 'C'),
        L1P => (1, 'P'),
        L1W => (1, 'W'),
        L1S => (1, 'S'),
        L1L => (1, 'L'),
        L1X => (1, 'X'),
        L2C => (2, 'C'),
        L2S => (2, 'S'),
        L2L => (2, 'L'),
        L2X => (2, 'X'),
        L2P => (2, 'P'),
        L2W => (2, 'W'),
        L5I => (5, 'I'),
        L5Q => (5, 'Q'),
        L5X => (5, 'X'),
        L6X => (6, 'X'),
        E1B => (1, 'B'),
        E1C => (1, 'C'),
        E1X => (1, 'X'),
        E5bI => (7, 'I'),
        E5bQ => (7, 'Q'),
        E5aI => (5, 'I'),
        E5aQ => (5, 'Q'),
        B1I => (1, 'I'),
        B2I => (7, 'I'),
        B3I => (6, 'I'),
        _ => (0, '?'),
    }
}

/// RTCM MSM signal-ID slot (1-32) for a `(band, attribute)` pair, per
/// RTCM 10403.3 Table 3.5-91 (GPS/QZSS), 3.5-100 (Galileo) and 3.5-106
/// (BeiDou) — the same fixed slot assignment `rtcm-rs`'s
/// `SignalId::band()`/`.attribute()` resolve on the decode side
/// ([`super::msm_code`]). DF395's signal mask bit `i` (1-based) is this
/// slot number, not a signal's position within this epoch's signal list.
fn msm_signal_slot(constellation: Constellation, band: u8, attribute: char) -> Option<u8> {
    use Constellation::*;
    match (constellation, band, attribute) {
        (GPS | QZSS, 1, 'C') => Some(2),
        (GPS | QZSS, 1, 'P') => Some(3),
        (GPS | QZSS, 1, 'W') => Some(4),
        (GPS | QZSS, 1, 'S') => Some(30),
        (GPS | QZSS, 1, 'L') => Some(31),
        (GPS | QZSS, 1, 'X') => Some(32),
        (GPS | QZSS, 2, 'C') => Some(8),
        (GPS | QZSS, 2, 'P') => Some(9),
        (GPS | QZSS, 2, 'W') => Some(10),
        (GPS | QZSS, 2, 'S') => Some(15),
        (GPS | QZSS, 2, 'L') => Some(16),
        (GPS | QZSS, 2, 'X') => Some(17),
        (GPS | QZSS, 5, 'I') => Some(22),
        (GPS | QZSS, 5, 'Q') => Some(23),
        (GPS | QZSS, 5, 'X') => Some(24),
        (Galileo, 1, 'B') => Some(3),
        (Galileo, 1, 'C') => Some(1),
        (Galileo, 1, 'X') => Some(4),
        (Galileo, 7, 'I') => Some(14),
        (Galileo, 7, 'Q') => Some(15),
        (Galileo, 5, 'I') => Some(22),
        (Galileo, 5, 'Q') => Some(23),
        (Galileo, 6, 'X') => Some(11),
        (BeiDou, 1, 'I') => Some(1),
        (BeiDou, 7, 'I') => Some(14),
        (BeiDou, 6, 'I') => Some(8),
        _ => None,
    }
}

fn freq_hz(constellation: Constellation, band: u8) -> Option<f64> {
    match (constellation, band) {
        (Constellation::GPS | Constellation::QZSS, 1) => Some(1.57542e9),
        (Constellation::GPS | Constellation::QZSS, 2) => Some(1.22760e9),
        (Constellation::GPS | Constellation::QZSS, 5) => Some(1.17645e9),
        (Constellation::Galileo, 1) => Some(1.57542e9),
        (Constellation::Galileo, 7) => Some(1.20714e9),
        (Constellation::Galileo, 5) => Some(1.17645e9),
        (Constellation::Galileo, 6) => Some(1.27875e9),
        (Constellation::BeiDou, 1) => Some(1.561098e9),
        (Constellation::BeiDou, 7) => Some(1.20714e9),
        (Constellation::BeiDou, 6) => Some(1.26852e9),
        _ => None,
    }
}

/// Encodes one epoch of MSM7 observations for a single constellation and
/// message type (e.g. 1077 GPS, 1097 Galileo, 1127 BDS), following the
/// DF002-DF396 header and DF397-DF404 payload layout (spec.md §4.6).
/// `week` is the constellation-appropriate week number for `time`.
pub fn encode_msm7(
    msg_number: u32,
    constellation: Constellation,
    time: crate::time::Time,
    week: u32,
    station_id: u16,
    epoch: &[Observation],
) -> Result<Vec<u8>, RtcmError> {
    if epoch.is_empty() {
        return Err(RtcmError::EmptyEpoch);
    }
    let tow_s = time_to_gps(time).1;
    let _ = week; // caller's own week numbering; this encoder derives TOW from `time` directly

    // Per-satellite, per-signal grouping: BTreeMap keeps deterministic,
    // ascending PRN/band order so encode output is reproducible.
    let mut by_sat: BTreeMap<u8, BTreeMap<(u8, char), BandObs>> = BTreeMap::new();
    for obs in epoch {
        let (system, prn) = sat_sys(obs.sat).map_err(|_| RtcmError::BadSatellite)?;
        if system != constellation {
            continue;
        }
        for band in &obs.bands {
            let Some(code) = band.code else { continue };
            let (freq_band, attr) = signal_rank(code);
            if freq_band == 0 {
                continue;
            }
            // Signals this crate can't place in the ICD slot table can't
            // be carried in DF395/DF396 and are dropped rather than
            // encoded under a made-up slot.
            if msm_signal_slot(constellation, freq_band, attr).is_none() {
                continue;
            }
            by_sat.entry(prn).or_default().insert((freq_band, attr), *band);
        }
    }
    if by_sat.is_empty() {
        return Err(RtcmError::EmptyEpoch);
    }

    let sat_prns: Vec<u8> = by_sat.keys().copied().collect();
    let mut signal_set: Vec<(u8, char)> = Vec::new();
    for sigs in by_sat.values() {
        for key in sigs.keys() {
            if !signal_set.contains(key) {
                signal_set.push(*key);
            }
        }
    }
    // Ascending ICD slot order: DF395's mask bits and DF396's per-satellite
    // cell bits must both walk the signal list in this order for a decoder
    // to line cell bits back up with the right signal.
    signal_set.sort_by_key(|&(b, c)| msm_signal_slot(constellation, b, c).expect("filtered above"));

    let num_sat = sat_prns.len();
    let num_sig = signal_set.len();
    let header_bits = 169;
    let cell_mask_bits = num_sat * num_sig;
    let sat_data_bits = num_sat * (8 + 10 + 14);
    let cells: Vec<(u8, (u8, char))> = sat_prns
        .iter()
        .flat_map(|&prn| {
            signal_set
                .iter()
                .filter(move |key| by_sat[&prn].contains_key(key))
                .map(move |key| (prn, *key))
        })
        .collect();
    let sig_data_bits = cells.len() * (20 + 24 + 10 + 1 + 10 + 15);

    let total_bits = header_bits + cell_mask_bits + sat_data_bits + sig_data_bits;
    let mut body = vec![0u8; crate::bits::bits_to_bytes(total_bits)];
    let mut bit = 0usize;

    set_unsigned(&mut body, bit, 12, msg_number);
    bit += 12;
    set_unsigned(&mut body, bit, 12, station_id as u32);
    bit += 12;
    set_unsigned(&mut body, bit, 30, (tow_s * 1000.0).round() as u32);
    bit += 30;
    set_unsigned(&mut body, bit, 1, 0); // multiple message bit
    bit += 1;
    set_unsigned(&mut body, bit, 3, 0); // IODS
    bit += 3;
    bit += 7; // reserved
    bit += 2; // clock steering
    bit += 2; // external clock
    bit += 1; // divergence-free smoothing
    bit += 3; // smoothing interval

    // DF394 satellite mask: bit i (1-based PRN within this system's range)
    // set for every satellite present in this epoch.
    for prn in 1..=64u32 {
        let present = sat_prns.contains(&(prn as u8));
        set_unsigned(&mut body, bit, 1, present as u32);
        bit += 1;
    }
    // DF395 signal mask: 32 ICD-fixed signal slots (see
    // `msm_signal_slot`); bit `slot - 1` is set for each signal present
    // in `signal_set` this epoch.
    let present_slots: Vec<u8> = signal_set
        .iter()
        .map(|&(b, c)| msm_signal_slot(constellation, b, c).expect("filtered above"))
        .collect();
    for slot in 1..=32u8 {
        set_unsigned(&mut body, bit, 1, present_slots.contains(&slot) as u32);
        bit += 1;
    }
    // DF396 cell mask.
    for &prn in &sat_prns {
        for key in &signal_set {
            let present = by_sat[&prn].contains_key(key);
            set_unsigned(&mut body, bit, 1, present as u32);
            bit += 1;
        }
    }

    let freq_cycles_per_m = |band: u8| freq_hz(constellation, band).map(|f| f / C_LIGHT);

    // Per-satellite rough range fields.
    let mut rough_range_ms: BTreeMap<u8, f64> = BTreeMap::new();
    for &prn in &sat_prns {
        let sigs = &by_sat[&prn];
        let any_pr = sigs.values().find_map(|b| b.pseudorange_m).unwrap_or(0.0);
        let range_ms = any_pr / RANGE_MS;
        let int_ms = range_ms.trunc().clamp(0.0, 255.0);
        let mod1ms = (range_ms - int_ms).clamp(0.0, 0.999_023_4);
        let mod1ms_raw = (mod1ms * 1024.0).round().clamp(0.0, 1023.0);
        // The fine per-signal fields below are residuals against the
        // *transmitted* (quantized) rough range, not the exact float,
        // since that's what a decoder adds them back onto.
        rough_range_ms.insert(prn, int_ms + mod1ms_raw / 1024.0);
        set_unsigned(&mut body, bit, 8, int_ms as u32);
        bit += 8;
        set_unsigned(&mut body, bit, 10, mod1ms_raw as u32);
        bit += 10;
        let doppler = sigs.values().find_map(|b| b.doppler_hz);
        let band0 = sigs.keys().next().map(|(b, _)| *b).unwrap_or(0);
        let rate_m_s = match (doppler, freq_cycles_per_m(band0)) {
            (Some(d), Some(cpm)) => -d / cpm,
            _ => 0.0,
        };
        set_signed(&mut body, bit, 14, rate_m_s.round().clamp(-8192.0, 8191.0) as i32);
        bit += 14;
    }

    // Per-cell signal fields.
    for (prn, key) in &cells {
        let band_obs = by_sat[prn][key];
        let range_ms = rough_range_ms[prn];
        let cpm = freq_cycles_per_m(key.0);

        let fine_pr = band_obs
            .pseudorange_m
            .map(|p| (p / RANGE_MS) - range_ms)
            .unwrap_or(0.0)
            .clamp(-0.000_976_56, 0.000_976_56);
        set_signed(&mut body, bit, 20, (fine_pr / (1.0 / (1i64 << 29) as f64)).round() as i32);
        bit += 20;

        let fine_phase = match (band_obs.carrier_phase_cycles, cpm) {
            (Some(phi), Some(cpm)) => ((phi / cpm) / RANGE_MS) - range_ms,
            _ => 0.0,
        }
        .clamp(-0.000_976_56, 0.000_976_56);
        set_signed(&mut body, bit, 24, (fine_phase / (1.0 / (1i64 << 31) as f64)).round() as i32);
        bit += 24;

        set_unsigned(&mut body, bit, 10, 0); // lock time indicator, not modeled
        bit += 10;
        set_unsigned(&mut body, bit, 1, (band_obs.lli & crate::obs::LLI_HALF_CYCLE != 0) as u32);
        bit += 1;
        let cnr = band_obs.snr_db_hz.unwrap_or(0.0) as f64;
        set_unsigned(&mut body, bit, 10, (cnr / 0.0625).round().clamp(0.0, 1023.0) as u32);
        bit += 10;

        let fine_rate = match (band_obs.doppler_hz, cpm) {
            (Some(d), Some(cpm)) => -d / cpm,
            _ => 0.0,
        }
        .clamp(-1.6384, 1.6383);
        set_signed(&mut body, bit, 15, (fine_rate / 0.0001).round() as i32);
        bit += 15;
    }

    Ok(frame(&body))
}

/// Reads back the first 12 bits of a framed message (its message number),
/// used by inline tests and by [`crate::convert`] to sanity-check what it
/// just produced without a full decode round-trip.
pub fn peek_message_number(frame_bytes: &[u8]) -> Option<u16> {
    if frame_bytes.len() < 6 {
        return None;
    }
    Some(get_unsigned(frame_bytes, 24, 12) as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sat::sat_no;
    use crate::time::Time;

    #[test]
    fn station_frame_roundtrips_fields() {
        let station = Station {
            station_id: 7,
            position_ecef_m: [1_111_111.1, -2_222_222.2, 3_333_333.3],
            ..Default::default()
        };
        let f = encode_station(&station, None);
        assert_eq!(peek_message_number(&f), Some(1005));

        let body_bit0 = 24; // after preamble(8)+reserved(6)+length(10)
        assert_eq!(get_unsigned(&f, body_bit0, 12), 1005);
        assert_eq!(get_unsigned(&f, body_bit0 + 12, 12), 7);
    }

    #[test]
    fn frame_crc_detects_mutation() {
        let station = Station::default();
        let f = encode_station(&station, None);
        let base_crc = crc24q(&f[..f.len() - 3], 0);
        let trailing = [
            (f[f.len() - 3] as u32) << 16 | (f[f.len() - 2] as u32) << 8 | f[f.len() - 1] as u32,
        ][0];
        assert_eq!(base_crc, trailing);

        let mut mutated = f.clone();
        mutated[10] ^= 0xFF;
        assert_ne!(crc24q(&mutated[..mutated.len() - 3], 0), trailing);
    }

    #[test]
    fn msm7_rejects_empty_epoch() {
        let err = encode_msm7(1077, Constellation::GPS, Time::new(0, 0.0), 0, 0, &[]).unwrap_err();
        assert_eq!(err, RtcmError::EmptyEpoch);
    }

    #[test]
    fn msm7_encodes_satellite_and_signal_masks() {
        let sat1 = sat_no(Constellation::GPS, 3).unwrap();
        let sat2 = sat_no(Constellation::GPS, 9).unwrap();
        let epoch = vec![
            Observation {
                time: Time::new(1_700_000_000, 0.0),
                sat: sat1,
                receiver: 0,
                bands: vec![BandObs {
                    pseudorange_m: Some(20_000_000.0),
                    carrier_phase_cycles: None,
                    doppler_hz: None,
                    snr_db_hz: Some(42.0),
                    lli: 0,
                    code: Some(ObsCode::L1C),
                }],
            },
            Observation {
                time: Time::new(1_700_000_000, 0.0),
                sat: sat2,
                receiver: 0,
                bands: vec![BandObs {
                    pseudorange_m: Some(21_500_000.0),
                    carrier_phase_cycles: None,
                    doppler_hz: None,
                    snr_db_hz: Some(39.0),
                    lli: 0,
                    code: Some(ObsCode::L1C),
                }],
            },
        ];

        let f = encode_msm7(1077, Constellation::GPS, Time::new(1_700_000_000, 0.0), 2200, 42, &epoch).unwrap();
        assert_eq!(peek_message_number(&f), Some(1077));

        let body_bit0 = 24;
        let sat_mask_start = body_bit0 + 12 + 12 + 30 + 1 + 3 + 7 + 2 + 2 + 1 + 3;
        assert_eq!(get_unsigned(&f, sat_mask_start + 2, 1), 1); // PRN 3
        assert_eq!(get_unsigned(&f, sat_mask_start + 8, 1), 1); // PRN 9
        assert_eq!(get_unsigned(&f, sat_mask_start + 0, 1), 0); // PRN 1 absent

        // DF395 signal mask: L1C sits at ICD slot 2 (bit index 1), not at
        // bit 0 (the epoch's only signal position, which is slot 1 —
        // unassigned for GPS/QZSS).
        let sig_mask_start = sat_mask_start + 64;
        assert_eq!(get_unsigned(&f, sig_mask_start + 1, 1), 1); // slot 2, "1C"
        assert_eq!(get_unsigned(&f, sig_mask_start + 0, 1), 0); // slot 1, unused
    }

    /// Spec scenario 3: one epoch of three GPS satellites, encoded via
    /// `encode_msm7`, fed byte-for-byte into a real [`crate::rtcm::Rtcm3Decoder`]
    /// (after priming its GPS week from an encoded 1019), must decode back
    /// to field-wise equal pseudorange/phase/code.
    #[test]
    fn msm7_round_trips_pseudorange_phase_and_code_through_decoder() {
        use crate::raw::{DecodeEvent, RawDecoder};
        use crate::rtcm::{Rtcm3Decoder, RtcmContext};
        use std::collections::BTreeMap;

        let week = 2300u32;
        let toe = crate::time::gps_to_time(week, 200_000.0);
        let eph = Eph {
            sat: sat_no(Constellation::GPS, 1).unwrap(),
            galileo_set: 0,
            toe,
            toc: toe,
            ttr: toe,
            iode: 10,
            iodc: 10,
            sv_health: 0,
            ura_index: 0,
            tgd: [0.0, 0.0],
            clock_bias: 0.0,
            clock_drift: 0.0,
            clock_drift_rate: 0.0,
            fit_interval_h: 4.0,
            orbits: Default::default(),
        };
        let eph_frame = encode_gps_eph_1019(&eph).unwrap();

        let cpm = freq_hz(Constellation::GPS, 1).unwrap() / C_LIGHT;
        // Rough-range grid points (int ms, mod-1ms/1024) with zero phase
        // ambiguity, so both rough+fine pseudorange and phase residuals
        // are exactly representable and the round trip carries no
        // quantization error to compare against spec's tolerance.
        let grids = [(3u8, 66u32, 500u32), (9u8, 71u32, 200u32), (21u8, 77u32, 900u32)];
        let epoch: Vec<Observation> = grids
            .iter()
            .map(|&(prn, int_ms, mod1ms_raw)| {
                let range_ms = int_ms as f64 + mod1ms_raw as f64 / 1024.0;
                let pr_m = range_ms * RANGE_MS;
                Observation {
                    time: Time::new(1_700_000_000, 0.0),
                    sat: sat_no(Constellation::GPS, prn).unwrap(),
                    receiver: 0,
                    bands: vec![BandObs {
                        pseudorange_m: Some(pr_m),
                        carrier_phase_cycles: Some(pr_m * cpm),
                        doppler_hz: None,
                        snr_db_hz: Some(45.0),
                        lli: 0,
                        code: Some(ObsCode::L1C),
                    }],
                }
            })
            .collect();

        let msm_frame = encode_msm7(1077, Constellation::GPS, Time::new(1_700_000_000, 0.0), week, 42, &epoch).unwrap();

        let mut decoder = Rtcm3Decoder::new(RtcmContext::new(None));
        let mut events = decoder.feed(&eph_frame);
        events.extend(decoder.feed(&msm_frame));

        let mut observed: BTreeMap<u8, Observation> = BTreeMap::new();
        for event in events {
            if let DecodeEvent::Observation(obs) = event {
                let (_, prn) = sat_sys(obs.sat).unwrap();
                observed.insert(prn, obs);
            }
        }
        assert_eq!(observed.len(), 3, "all three satellites should decode");

        for &(prn, int_ms, mod1ms_raw) in &grids {
            let range_ms = int_ms as f64 + mod1ms_raw as f64 / 1024.0;
            let expected_pr = range_ms * RANGE_MS;
            let decoded = observed.get(&prn).expect("satellite present in decoded epoch");
            let band = &decoded.bands[0];
            assert_eq!(band.code, Some(ObsCode::L1C));

            let pr = band.pseudorange_m.expect("pseudorange present");
            assert!((pr - expected_pr).abs() < 0.001, "prn {prn}: pr {pr} vs {expected_pr}");

            let phase = band.carrier_phase_cycles.expect("phase present");
            let expected_phase = expected_pr * cpm;
            assert!((phase - expected_phase).abs() < 0.0001, "prn {prn}: phase {phase} vs {expected_phase}");
        }
    }

    #[test]
    fn gps_eph_1019_roundtrips_prn_and_week() {
        let sat = sat_no(Constellation::GPS, 12).unwrap();
        let toe = Time::new(1_700_000_000, 0.0);
        let eph = Eph {
            sat,
            galileo_set: 0,
            toe,
            toc: toe,
            ttr: toe,
            iode: 5,
            iodc: 77,
            sv_health: 0,
            ura_index: 2,
            tgd: [0.0, 0.0],
            clock_bias: 1.0e-5,
            clock_drift: 1.0e-12,
            clock_drift_rate: 0.0,
            fit_interval_h: 4.0,
            orbits: Default::default(),
        };
        let f = encode_gps_eph_1019(&eph).unwrap();
        assert_eq!(peek_message_number(&f), Some(1019));

        let body_bit0 = 24;
        assert_eq!(get_unsigned(&f, body_bit0 + 12, 6), 12); // PRN
    }

    #[test]
    fn wrong_constellation_rejected() {
        let sat = sat_no(Constellation::Galileo, 5).unwrap();
        let eph = Eph {
            sat,
            galileo_set: 0,
            toe: Time::new(0, 0.0),
            toc: Time::new(0, 0.0),
            ttr: Time::new(0, 0.0),
            iode: 0,
            iodc: 0,
            sv_health: 0,
            ura_index: 0,
            tgd: [0.0, 0.0],
            clock_bias: 0.0,
            clock_drift: 0.0,
            clock_drift_rate: 0.0,
            fit_interval_h: 4.0,
            orbits: Default::default(),
        };
        assert!(encode_gps_eph_1019(&eph).is_err());
    }
}
