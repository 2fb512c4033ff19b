//! Ephemeris / navigation store (C4): per-satellite arrays of broadcast,
//! GLONASS, SBAS and precise ephemerides, iono/UTC parameters, DCBs, PCVs
//! and SSR corrections, with insert-or-replace and time-window selection.
//!
//! Grounded on the teacher's `navigation::ephemeris` module (`Ephemeris`,
//! its validity-duration table and `toe()`/selection helpers), generalized
//! from "one decoded RINEX NAV record" to "the live store a raw decoder
//! inserts into and a solver selects from".

pub mod eph;
pub mod kepler;
pub mod peph;
pub mod ssr;

pub use eph::{Eph, GEph, SEph};
pub use peph::{PClk, PEph};
pub use ssr::Ssr;

use crate::sat::{ObsCode, SatId};
use crate::time::Time;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Clone, Copy)]
pub enum NavError {
    #[error("no ephemeris candidate within validity window")]
    OutOfRange,
    #[error("invalid satellite index")]
    BadSatellite,
}

/// Validity windows (`MAX_DTOE`), seconds, matching spec.md §4.4 /
/// teacher's `Ephemeris::validity_duration`.
pub fn max_dtoe(system: gnss_rs::constellation::Constellation) -> f64 {
    use gnss_rs::constellation::Constellation::*;
    match system {
        GPS | QZSS => 7200.0,
        Galileo => 10800.0,
        BeiDou => 21600.0,
        IRNSS => 7200.0,
        Glonass => 1800.0,
        c if c.is_sbas() => 360.0,
        _ => 7200.0,
    }
}

/// Galileo data-source selection mask (I/NAV vs F/NAV), consulted on
/// insertion per spec.md §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GalileoSet {
    Inav = 0,
    Fnav = 1,
}

#[derive(Debug, Clone, Default)]
pub struct NavOptions {
    /// `-EPHALL`: keep every ephemeris instead of replacing on identity match.
    pub keep_all: bool,
    /// `-GALINAV` / `-GALFNAV`: restrict accepted Galileo message set.
    pub galileo_set: Option<GalileoSet>,
}

/// The live navigation database (C4). One instance is shared by a
/// `StreamServer`'s decoders (writer) and any number of read-only snapshot
/// consumers (see §5 "shared-resource policy").
#[derive(Debug, Default)]
pub struct Nav {
    pub eph: Vec<Eph>,
    pub geph: Vec<GEph>,
    pub seph: Vec<SEph>,
    pub peph: Vec<PEph>,
    pub pclk: Vec<PClk>,
    pub ssr: HashMap<SatId, Ssr>,
    pub dcb_sat: HashMap<(SatId, ObsCode, ObsCode), f64>,
    pub dcb_rcv: HashMap<(ObsCode, ObsCode), f64>,
    pub glo_fcn: HashMap<SatId, i8>,
    pub options: NavOptions,
}

impl Nav {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert-or-replace a broadcast ephemeris following spec.md §4.4's
    /// per-constellation rule. Returns `true` if the store changed.
    pub fn insert_eph(&mut self, new_eph: Eph) -> bool {
        if let Some(set) = self.options.galileo_set {
            if new_eph.sat_system() == gnss_rs::constellation::Constellation::Galileo
                && new_eph.galileo_set != set as u8
            {
                return false;
            }
        }

        if self.options.keep_all {
            if self.eph.iter().any(|e| e.identity_eq(&new_eph)) {
                return false; // idempotent: identical insert twice is a no-op
            }
            self.eph.push(new_eph);
            return true;
        }

        match self
            .eph
            .iter_mut()
            .find(|e| e.sat == new_eph.sat && e.galileo_set == new_eph.galileo_set)
        {
            Some(existing) if existing.identity_eq(&new_eph) => false,
            Some(existing) => {
                *existing = new_eph;
                true
            },
            None => {
                self.eph.push(new_eph);
                true
            },
        }
    }

    /// GLONASS insert rule: replace when `|Toe - prior.Toe| > 1s` or health
    /// changed.
    pub fn insert_geph(&mut self, new_geph: GEph) -> bool {
        match self.geph.iter_mut().find(|g| g.sat == new_geph.sat) {
            Some(existing) => {
                let dt = Time::diff(new_geph.toe, existing.toe).abs();
                if dt > 1.0 || existing.health != new_geph.health {
                    *existing = new_geph;
                    true
                } else {
                    false
                }
            },
            None => {
                self.geph.push(new_geph);
                true
            },
        }
    }

    /// SBAS insert rule: replace when `|t0 - prior.t0| > 1s` or accuracy
    /// changed.
    pub fn insert_seph(&mut self, new_seph: SEph) -> bool {
        match self.seph.iter_mut().find(|s| s.sat == new_seph.sat) {
            Some(existing) => {
                let dt = Time::diff(new_seph.t0, existing.t0).abs();
                if dt > 1.0 || existing.accuracy_m != new_seph.accuracy_m {
                    *existing = new_seph;
                    true
                } else {
                    false
                }
            },
            None => {
                self.seph.push(new_seph);
                true
            },
        }
    }

    /// Select the best broadcast ephemeris for `sat` at time `t`: smallest
    /// `|t - Toe|` among candidates inside `MAX_DTOE`, ties broken by higher
    /// IODC. Returns `None` (not an error) when nothing qualifies, per
    /// spec.md §4.4's failure policy.
    pub fn select_eph(&self, sat: SatId, t: Time) -> Option<&Eph> {
        let system = crate::sat::sat_sys(sat).ok()?.0;
        let window = max_dtoe(system);
        self.eph
            .iter()
            .filter(|e| e.sat == sat)
            .filter(|e| Time::diff(t, e.toe).abs() <= window)
            .min_by(|a, b| {
                let da = Time::diff(t, a.toe).abs();
                let db = Time::diff(t, b.toe).abs();
                da.partial_cmp(&db)
                    .unwrap()
                    .then(b.iodc.cmp(&a.iodc))
            })
    }

    pub fn select_geph(&self, sat: SatId, t: Time) -> Option<&GEph> {
        let window = max_dtoe(gnss_rs::constellation::Constellation::Glonass);
        self.geph
            .iter()
            .filter(|g| g.sat == sat)
            .filter(|g| Time::diff(t, g.toe).abs() <= window)
            .min_by(|a, b| {
                Time::diff(t, a.toe)
                    .abs()
                    .partial_cmp(&Time::diff(t, b.toe).abs())
                    .unwrap()
            })
    }

    pub fn select_seph(&self, sat: SatId, t: Time) -> Option<&SEph> {
        let window = 360.0;
        self.seph
            .iter()
            .filter(|s| s.sat == sat)
            .filter(|s| Time::diff(t, s.t0).abs() <= window)
            .min_by(|a, b| {
                Time::diff(t, a.t0)
                    .abs()
                    .partial_cmp(&Time::diff(t, b.t0).abs())
                    .unwrap()
            })
    }

    /// Resolve GLONASS FCN per the REDESIGN FLAGS precedence: decoded flag
    /// bits (`decoded`) take precedence, then `Nav.glo_fcn`, then "unknown".
    pub fn resolve_glonass_fcn(&self, sat: SatId, decoded: Option<i8>) -> Option<i8> {
        decoded.or_else(|| self.glo_fcn.get(&sat).copied())
    }

    /// Sat-DCB lookup: `(sat, code1, code2) -> bias seconds`.
    pub fn dcb(&self, sat: SatId, c1: ObsCode, c2: ObsCode) -> Option<f64> {
        self.dcb_sat
            .get(&(sat, c1, c2))
            .copied()
            .or_else(|| self.dcb_sat.get(&(sat, c2, c1)).map(|v| -v))
    }

    /// Unique-ify precise ephemeris sequence by exact `(time, sat)` and
    /// ensure strict time ordering (spec.md §3 invariant).
    pub fn uniquify_peph(&mut self) {
        self.peph.sort_by(|a, b| a.time.secs.cmp(&b.time.secs).then(
            a.time.frac.partial_cmp(&b.time.frac).unwrap(),
        ));
        self.peph.dedup_by(|a, b| {
            Time::diff(a.time, b.time).abs() < 1e-6
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sat::sat_no;
    use gnss_rs::constellation::Constellation;

    fn gps_eph(sat: SatId, toe: Time, iode: u16, iodc: u16) -> Eph {
        Eph {
            sat,
            galileo_set: 0,
            toe,
            toc: toe,
            ttr: toe,
            iode,
            iodc,
            sv_health: 0,
            ura_index: 0,
            tgd: [0.0; 2],
            clock_bias: 0.0,
            clock_drift: 0.0,
            clock_drift_rate: 0.0,
            fit_interval_h: 4.0,
            orbits: Default::default(),
        }
    }

    #[test]
    fn insertion_idempotent() {
        let mut nav = Nav::new();
        let sat = sat_no(Constellation::GPS, 1).unwrap();
        let t = Time::new(1_700_000_000, 0.0);
        let e = gps_eph(sat, t, 10, 20);
        assert!(nav.insert_eph(e.clone()));
        assert!(!nav.insert_eph(e));
        assert_eq!(nav.eph.len(), 1);
    }

    #[test]
    fn selection_monotonicity() {
        let mut nav = Nav::new();
        let sat = sat_no(Constellation::GPS, 1).unwrap();
        let toe1 = Time::new(1_700_000_000, 0.0);
        let toe2 = Time::new(1_700_003_600, 0.0); // +1h
        nav.insert_eph(gps_eph(sat, toe1, 1, 1));
        nav.insert_eph(gps_eph(sat, toe2, 2, 2));

        let t = toe2.add(1000.0); // within window of toe2 only barely further from toe1
        let picked = nav.select_eph(sat, t).unwrap();
        assert_eq!(picked.toe.secs, toe2.secs);
    }

    #[test]
    fn selection_returns_none_outside_window() {
        let mut nav = Nav::new();
        let sat = sat_no(Constellation::GPS, 1).unwrap();
        let toe = Time::new(1_700_000_000, 0.0);
        nav.insert_eph(gps_eph(sat, toe, 1, 1));
        let far = toe.add(100_000.0);
        assert!(nav.select_eph(sat, far).is_none());
    }
}
