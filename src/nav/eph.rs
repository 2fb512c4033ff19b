//! Broadcast ephemeris ([`Eph`]), GLONASS state-vector ephemeris ([`GEph`])
//! and SBAS state-vector ephemeris ([`SEph`]) — spec.md §3.

use crate::sat::SatId;
use crate::time::Time;
use gnss_rs::constellation::Constellation;

/// Classical Keplerian broadcast set (GPS/QZSS/Galileo/BDS/IRNSS), plus
/// clock polynomial, IODE/IODC, health, URA/SISA and group delays.
///
/// Identity: `(sat, set, iode, iodc, toe)`. Galileo carries two `set`
/// values (0 = I/NAV, 1 = F/NAV); all other constellations always use 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Eph {
    pub sat: SatId,
    pub galileo_set: u8,
    pub toe: Time,
    pub toc: Time,
    pub ttr: Time,
    pub iode: u16,
    pub iodc: u16,
    pub sv_health: u16,
    /// URA (GPS/QZSS/BDS) or SISA (Galileo) index.
    pub ura_index: u16,
    /// Group delay(s): `[TGD]` for GPS/QZSS/BDS, `[BGD_e5a_e1, BGD_e5b_e1]`
    /// for Galileo.
    pub tgd: [f64; 2],
    pub clock_bias: f64,
    pub clock_drift: f64,
    pub clock_drift_rate: f64,
    pub fit_interval_h: f64,
    /// Kepler orbital elements, keyed the way the teacher's `Ephemeris`
    /// dictionary is keyed (`sqrta`, `e`, `m0`, `i0`, `omega`, `omega0`,
    /// `deltaN`, `idot`, `omegaDot`, `cuc`, `cus`, `cic`, `cis`, `crc`,
    /// `crs`), so the kepler solver and the wire encoders/decoders share one
    /// vocabulary.
    pub orbits: std::collections::HashMap<&'static str, f64>,
}

impl Eph {
    pub fn sat_system(&self) -> Constellation {
        crate::sat::sat_sys(self.sat).map(|(s, _)| s).unwrap_or(Constellation::Mixed)
    }

    /// Identity comparison per spec.md §3: `(sat, set, iode, iodc, toe)`.
    pub fn identity_eq(&self, other: &Eph) -> bool {
        self.sat == other.sat
            && self.galileo_set == other.galileo_set
            && self.iode == other.iode
            && self.iodc == other.iodc
            && (Time::diff(self.toe, other.toe)).abs() < 0.5
    }

    pub fn orbit(&self, key: &str) -> Option<f64> {
        self.orbits.get(key).copied()
    }
}

/// GLONASS ephemeris: ECEF position/velocity/acceleration state vector,
/// clock bias/drift, frequency channel number, Toe/Tof.
///
/// Identity: `(sat, toe)` to within +/-1s.
#[derive(Debug, Clone, PartialEq)]
pub struct GEph {
    pub sat: SatId,
    pub toe: Time,
    pub tof: Time,
    /// IODE, derived from `Tb` (the 15-minute interval index within the
    /// day) per the GLONASS ICD.
    pub iode: u16,
    pub fcn: i8,
    pub health: u8,
    pub pos_km: [f64; 3],
    pub vel_km_s: [f64; 3],
    pub accel_km_s2: [f64; 3],
    pub clock_bias: f64,
    pub clock_drift: f64,
}

impl GEph {
    /// Derives the GLONASS IODE from `Tb` (minutes within the UTC+3 day),
    /// per the ICD's `IODE = floor(tb / 15) mod 128` convention this crate
    /// uses consistently at insertion time.
    pub fn iode_from_tb_minutes(tb_minutes: u32) -> u16 {
        ((tb_minutes / 15) % 128) as u16
    }
}

/// SBAS ephemeris: state vector, clock offset/drift, accuracy.
///
/// Identity: `(sat, t0)` to within +/-1s.
#[derive(Debug, Clone, PartialEq)]
pub struct SEph {
    pub sat: SatId,
    pub t0: Time,
    pub pos_km: [f64; 3],
    pub vel_km_s: [f64; 3],
    pub accel_km_s2: [f64; 3],
    pub clock_offset: f64,
    pub clock_drift: f64,
    pub accuracy_m: f32,
}
