//! Weekly/daily calendar arithmetic across GPS/UTC/GLONASS/Galileo/BDS time
//! systems, plus the monotonic tick clock that drives the stream server's
//! cycle scheduler.
//!
//! [`Time`] is the wire-level representation spec'd for this crate: a pair
//! of integer seconds since the Unix epoch and a fractional remainder in
//! `[0, 1)`. Calendar and leap-second bookkeeping is delegated to
//! [`hifitime`], which the rest of the ecosystem (and this crate's teacher)
//! already relies on for that; `Time` itself stays a plain, copyable pair so
//! decoders can do sub-second arithmetic without touching `hifitime`'s
//! richer (and heavier) `Epoch` API on every field access.

use hifitime::{Epoch, TimeScale};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
pub enum TimeError {
    #[error("fractional seconds out of [0,1) range")]
    BadFraction,
}

/// GNSS time system tag, used by callers that need to know which system a
/// `Time` value is expressed in (the pair itself carries no tag; callers
/// track it alongside, matching how spec.md §3 phrases the invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeSystem {
    Gps,
    Utc,
    Glonass,
    Galileo,
    Bds,
}

/// A GNSS timestamp: whole seconds since 1970-01-01T00:00:00Z, plus a
/// fractional remainder in `[0, 1)`. Arithmetic always renormalizes so the
/// fraction stays in range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Time {
    pub secs: i64,
    pub frac: f64,
}

impl Time {
    pub fn new(secs: i64, frac: f64) -> Self {
        let mut t = Self { secs, frac };
        t.normalize();
        t
    }

    fn normalize(&mut self) {
        if self.frac >= 1.0 || self.frac < 0.0 {
            let whole = self.frac.floor();
            self.secs += whole as i64;
            self.frac -= whole;
        }
    }

    pub fn to_epoch_hifitime(self, scale: TimeScale) -> Epoch {
        Epoch::from_unix_seconds(self.secs as f64 + self.frac).to_time_scale(scale)
    }

    pub fn from_epoch_hifitime(epoch: Epoch) -> Self {
        let unix = epoch.to_time_scale(TimeScale::UTC).to_unix_seconds();
        let secs = unix.floor() as i64;
        let frac = unix - secs as f64;
        Self::new(secs, frac)
    }

    /// `time_add`: returns `self + delta_seconds`.
    pub fn add(self, delta_seconds: f64) -> Time {
        let total = self.frac + delta_seconds.fract();
        let whole = delta_seconds.trunc() as i64;
        Time::new(self.secs + whole, total)
    }

    /// `time_diff`: signed seconds `a - b`.
    pub fn diff(a: Time, b: Time) -> f64 {
        (a.secs - b.secs) as f64 + (a.frac - b.frac)
    }
}

/// `epoch_to_time(y, m, d, h, mi, s)`. `s` may carry a fractional part.
pub fn epoch_to_time(year: i32, month: u8, day: u8, hour: u8, minute: u8, second: f64) -> Time {
    let whole_s = second.floor() as u8;
    let frac = second - whole_s as f64;
    let epoch = Epoch::from_gregorian(
        year,
        month,
        day,
        hour,
        minute,
        whole_s,
        (frac * 1.0e9).round() as u32,
        TimeScale::UTC,
    );
    Time::from_epoch_hifitime(epoch)
}

/// `time_to_epoch`: inverse of [`epoch_to_time`], returns
/// `(year, month, day, hour, minute, second_with_fraction)`.
pub fn time_to_epoch(t: Time) -> (i32, u8, u8, u8, u8, f64) {
    let epoch = t.to_epoch_hifitime(TimeScale::UTC);
    let (y, mo, d, h, mi, s, ns) = epoch.to_gregorian_utc();
    (y, mo, d, h, mi, s as f64 + ns as f64 * 1.0e-9)
}

/// `gps_to_time(week, tow)`.
pub fn gps_to_time(week: u32, tow: f64) -> Time {
    let nanos = (tow * 1.0e9).round() as u64;
    let epoch = Epoch::from_time_of_week(week, nanos, TimeScale::GPST);
    Time::from_epoch_hifitime(epoch)
}

/// `time_to_gps`: inverse of [`gps_to_time`], returns `(week, tow_seconds)`.
pub fn time_to_gps(t: Time) -> (u32, f64) {
    let epoch = t.to_epoch_hifitime(TimeScale::GPST);
    let (week, nanos) = epoch.to_time_of_week();
    (week, nanos as f64 * 1.0e-9)
}

/// `utc_to_gps`: applies the current leap-second offset (via `hifitime`'s
/// built-in leap-second table).
pub fn utc_to_gps(t: Time) -> Time {
    let utc = t.to_epoch_hifitime(TimeScale::UTC);
    Time::from_epoch_hifitime(utc.to_time_scale(TimeScale::GPST))
}

/// Inverse of [`utc_to_gps`].
pub fn gps_to_utc(t: Time) -> Time {
    let gps = t.to_epoch_hifitime(TimeScale::GPST);
    Time::from_epoch_hifitime(gps.to_time_scale(TimeScale::UTC))
}

/// `bdt_to_gps`: BeiDou Time to GPS time (+14 s, week offset +1356).
pub fn bdt_to_gps(t: Time) -> Time {
    t.add(14.0)
}

/// Inverse of [`bdt_to_gps`].
pub fn gps_to_bdt(t: Time) -> Time {
    t.add(-14.0)
}

/// Week-number recovery: given an approximate reference time `t_ref` and a
/// candidate time-of-week `tow`, returns the week number that places the
/// resulting time within `+/-302400 s` of `t_ref` (half a GPS week).
pub fn adjweek(t_ref: Time, tow: f64) -> u32 {
    let (ref_week, ref_tow) = time_to_gps(t_ref);
    let mut week = ref_week as i64;
    let delta = tow - ref_tow;
    if delta < -302400.0 {
        week += 1;
    } else if delta > 302400.0 {
        week -= 1;
    }
    week.max(0) as u32
}

/// Day rollover analog of [`adjweek`], used by protocols (e.g. some BINEX
/// sub-records) that only encode time-of-day: returns the day-start `Time`
/// that places `tod` within `+/-43200 s` of `t_ref`.
pub fn adjday(t_ref: Time, tod: f64) -> Time {
    const DAY: f64 = 86400.0;
    let day_start_ref = Time::new(t_ref.secs - (t_ref.secs.rem_euclid(86400)), 0.0);
    let delta = Time::diff(day_start_ref.add(tod), t_ref);
    if delta < -43200.0 {
        day_start_ref.add(DAY)
    } else if delta > 43200.0 {
        day_start_ref.add(-DAY)
    } else {
        day_start_ref
    }
}

/// Monotonic millisecond tick, independent of GPS/UTC time. Drives the
/// stream server's cycle scheduler and periodic-command timers.
#[derive(Debug, Clone, Copy)]
pub struct Tick(pub u64);

impl Tick {
    /// Current tick, derived from `SystemTime` (monotonic enough for the
    /// scheduling granularity this crate needs; the server never depends on
    /// it for calendar correctness, only for elapsed-interval comparisons).
    pub fn now() -> Self {
        let since = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Tick(since.as_millis() as u64)
    }

    pub fn elapsed_ms(self, since: Tick) -> u64 {
        self.0.saturating_sub(since.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_roundtrip() {
        let t = epoch_to_time(2023, 6, 15, 12, 30, 45.5);
        let (y, mo, d, h, mi, s) = time_to_epoch(t);
        assert_eq!((y, mo, d, h, mi), (2023, 6, 15, 12, 30));
        assert!((s - 45.5).abs() < 1e-6);
    }

    #[test]
    fn gps_roundtrip() {
        let t = gps_to_time(2200, 123456.25);
        let (week, tow) = time_to_gps(t);
        assert_eq!(week, 2200);
        assert!((tow - 123456.25).abs() < 1e-6);
    }

    #[test]
    fn week_rollover_within_half_week() {
        let t_ref = gps_to_time(2000, 300000.0);
        for delta in [-302000.0, -1000.0, 0.0, 1000.0, 302000.0] {
            let candidate_abs = t_ref.add(delta);
            let (_, tow) = time_to_gps(candidate_abs);
            let week = adjweek(t_ref, tow);
            let reconstructed = gps_to_time(week, tow);
            let diff = Time::diff(reconstructed, candidate_abs).abs();
            assert!(diff < 1.0, "delta={delta} diff={diff}");
        }
    }

    #[test]
    fn bdt_gps_offset_is_14s() {
        let t = Time::new(1_700_000_000, 0.0);
        let gps = bdt_to_gps(t);
        assert!((Time::diff(gps, t) - 14.0).abs() < 1e-9);
        let back = gps_to_bdt(gps);
        assert!((Time::diff(back, t)).abs() < 1e-9);
    }

    #[test]
    fn tick_elapsed_is_monotonic_nonneg() {
        let a = Tick(1000);
        let b = Tick(1500);
        assert_eq!(b.elapsed_ms(a), 500);
        assert_eq!(a.elapsed_ms(b), 0);
    }
}
