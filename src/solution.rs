//! Solution buffer & sinks (C11): a ring of position/velocity solutions,
//! written at epoch closure and consumed time-ordered.
//!
//! Out of core scope (spec.md §1): persistence to any external sink
//! (InfluxDB/Clickhouse/KML/GPX/...) — this module only owns the in-process
//! ring and the time-indexed reader a host process polls. Grounded on
//! [`crate::obs::ObsBuf`]'s ring-and-drain shape, generalized from
//! observation epochs to position epochs.

use crate::time::Time;
use std::collections::VecDeque;

/// Fix quality, closed enumeration mirroring the usual RTK solver output
/// classes (spec.md §4.11 "quality").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolQuality {
    None,
    Fix,
    Float,
    Sbas,
    Dgps,
    Single,
    Ppp,
}

/// One epoch's position/velocity solution: position + velocity (ECEF,
/// meters/m-s), covariance (upper triangular, position-only, `[xx, xy, xz,
/// yy, yz, zz]`), fix quality, solution age and ambiguity ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sol {
    pub time: Time,
    pub pos_ecef_m: [f64; 3],
    pub vel_ecef_m_s: [f64; 3],
    pub covariance_m2: [f64; 6],
    pub quality: SolQuality,
    pub age_s: f64,
    pub ratio: f64,
}

impl Sol {
    /// A zeroed, no-fix placeholder: what the NMEA uploader falls back to
    /// before any solution has ever been pushed.
    pub fn none(time: Time) -> Self {
        Self {
            time,
            pos_ecef_m: [0.0; 3],
            vel_ecef_m_s: [0.0; 3],
            covariance_m2: [0.0; 6],
            quality: SolQuality::None,
            age_s: 0.0,
            ratio: 0.0,
        }
    }
}

/// Fixed-capacity ring of solutions (C11). Writers push at epoch closure;
/// the oldest entry is dropped once `capacity` is exceeded, the same
/// bounded-ring policy [`crate::obs::ObsBuf`] would need were it not
/// instead drained explicitly — here there's no "atomic consumer" so a
/// ring with readers tracking their own cursor is the right shape.
#[derive(Debug)]
pub struct SolBuf {
    ring: VecDeque<Sol>,
    capacity: usize,
}

impl SolBuf {
    pub fn new(capacity: usize) -> Self {
        Self { ring: VecDeque::with_capacity(capacity), capacity: capacity.max(1) }
    }

    pub fn push(&mut self, sol: Sol) {
        if self.ring.len() >= self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(sol);
    }

    pub fn latest(&self) -> Option<&Sol> {
        self.ring.back()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// A [`SolReader`] starting just before the oldest solution currently
    /// buffered, so the first `poll` returns everything available.
    pub fn reader(&self) -> SolReader {
        SolReader { last_time: None }
    }
}

/// Time-indexed reader over a [`SolBuf`]: tracks the last solution time
/// handed out and returns only solutions strictly newer than that on each
/// poll, regardless of how many pushes happened between polls.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolReader {
    last_time: Option<Time>,
}

impl SolReader {
    pub fn new() -> Self {
        Self { last_time: None }
    }

    /// Returns every solution in `buf` strictly newer than the last one
    /// this reader returned, oldest first.
    pub fn poll(&mut self, buf: &SolBuf) -> Vec<Sol> {
        let out: Vec<Sol> = buf
            .ring
            .iter()
            .filter(|s| match self.last_time {
                Some(t) => Time::diff(s.time, t) > 0.0,
                None => true,
            })
            .copied()
            .collect();
        if let Some(last) = out.last() {
            self.last_time = Some(last.time);
        }
        out
    }
}

/// Synthesizes a GPGGA sentence from a solution, for the stream server's
/// NMEA-upload cadence (spec.md §4.10 step 4). Returns `None` when the
/// solution carries no fix (`SolQuality::None`), matching a real receiver
/// emitting nothing until it has a position.
pub fn gpgga(sol: &Sol) -> Option<String> {
    if sol.quality == SolQuality::None {
        return None;
    }
    let (lat_deg, lon_deg, alt_m) = crate::station::ecef_to_geodetic(sol.pos_ecef_m);
    let (lat_deg, lon_deg) = (lat_deg.to_degrees(), lon_deg.to_degrees());

    let (_, _, _, hh, mm, ss) = crate::time::time_to_epoch(sol.time);
    let lat_hemi = if lat_deg >= 0.0 { 'N' } else { 'S' };
    let lon_hemi = if lon_deg >= 0.0 { 'E' } else { 'W' };
    let lat_abs = lat_deg.abs();
    let lon_abs = lon_deg.abs();
    let lat_deg_int = lat_abs.trunc() as u32;
    let lat_min = (lat_abs - lat_deg_int as f64) * 60.0;
    let lon_deg_int = lon_abs.trunc() as u32;
    let lon_min = (lon_abs - lon_deg_int as f64) * 60.0;

    let fix_quality = match sol.quality {
        SolQuality::None => 0,
        SolQuality::Single => 1,
        SolQuality::Dgps => 2,
        SolQuality::Fix => 4,
        SolQuality::Float => 5,
        SolQuality::Sbas => 2,
        SolQuality::Ppp => 6,
    };

    let body = format!(
        "GPGGA,{hh:02}{mm:02}{ss:06.3},{lat_deg_int:02}{lat_min:07.4},{lat_hemi},\
         {lon_deg_int:03}{lon_min:07.4},{lon_hemi},{fix_quality},08,1.0,{alt_m:.2},M,0.0,M,,",
        ss = ss
    );
    let checksum = nmea_checksum(&body);
    Some(format!("${body}*{checksum:02X}\r\n"))
}

/// XOR of all bytes between `$` and `*`, the standard NMEA checksum.
fn nmea_checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sol_at(t: Time, quality: SolQuality) -> Sol {
        Sol {
            time: t,
            pos_ecef_m: [4_027_893.7, 307_045.6, 4_919_474.9],
            vel_ecef_m_s: [0.0; 3],
            covariance_m2: [0.0; 6],
            quality,
            age_s: 0.0,
            ratio: 3.0,
        }
    }

    #[test]
    fn ring_drops_oldest_past_capacity() {
        let mut buf = SolBuf::new(2);
        let t0 = Time::new(1000, 0.0);
        buf.push(sol_at(t0, SolQuality::Fix));
        buf.push(sol_at(t0.add(1.0), SolQuality::Fix));
        buf.push(sol_at(t0.add(2.0), SolQuality::Fix));
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.latest().unwrap().time.secs, t0.add(2.0).secs);
    }

    #[test]
    fn reader_only_returns_strictly_newer_solutions() {
        let mut buf = SolBuf::new(8);
        let t0 = Time::new(1000, 0.0);
        buf.push(sol_at(t0, SolQuality::Fix));
        let mut reader = buf.reader();
        let first = reader.poll(&buf);
        assert_eq!(first.len(), 1);

        assert!(reader.poll(&buf).is_empty(), "no new pushes since last poll");

        buf.push(sol_at(t0.add(1.0), SolQuality::Fix));
        buf.push(sol_at(t0.add(2.0), SolQuality::Fix));
        let second = reader.poll(&buf);
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn gpgga_is_none_without_a_fix() {
        let sol = sol_at(Time::new(1000, 0.0), SolQuality::None);
        assert!(gpgga(&sol).is_none());
    }

    #[test]
    fn gpgga_checksum_matches_body() {
        let sol = sol_at(Time::new(1_700_000_000, 0.5), SolQuality::Fix);
        let sentence = gpgga(&sol).unwrap();
        assert!(sentence.starts_with("$GPGGA,"));
        let (body, tail) = sentence[1..].split_once('*').unwrap();
        let expected = nmea_checksum(body);
        let actual = u8::from_str_radix(&tail[..2], 16).unwrap();
        assert_eq!(actual, expected);
    }
}
