//! Precise ephemeris ([`PEph`]) and precise clock ([`PClk`]) — spec.md §3,
//! plus the 10th-order Neville interpolation (§4.4) used to resolve a
//! satellite's precise position/clock between tabulated epochs.

use crate::sat::SatId;
use crate::time::Time;
use std::collections::HashMap;

/// One epoch of precise ephemeris: 4-vector `{x, y, z, clock}` (km, km,
/// km, seconds) per satellite, with standard deviations and, where
/// available, velocity/clock-rate.
#[derive(Debug, Clone)]
pub struct PEph {
    pub time: Time,
    pub pos_km: HashMap<SatId, [f64; 4]>,
    pub std_dev: HashMap<SatId, [f32; 4]>,
    pub vel_km_s: HashMap<SatId, [f64; 4]>,
}

/// One epoch of precise clock: offsets (+ std-dev) per satellite.
#[derive(Debug, Clone)]
pub struct PClk {
    pub time: Time,
    pub offset_s: HashMap<SatId, f64>,
    pub std_dev_s: HashMap<SatId, f32>,
}

const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// 10th-order Neville polynomial interpolation over the `+/-5` epochs
/// surrounding `t`, for a single satellite's position. Clock is linearly
/// interpolated between the two bracketing epochs (spec.md §4.4), then has
/// the relativistic correction `-2(r.v)/c^2` applied.
///
/// Returns `None` ("out-of-range") if fewer than 2 epochs bracket `t`
/// within the sequence, or the satellite is absent from those epochs.
pub fn interpolate(peph: &[PEph], sat: SatId, t: Time) -> Option<([f64; 3], f64)> {
    // `peph` must already be time-sorted (Nav::uniquify_peph maintains this).
    let idx = peph.partition_point(|e| Time::diff(e.time, t) < 0.0);
    if idx == 0 || idx >= peph.len() {
        return None;
    }

    let lo = idx.saturating_sub(5);
    let hi = (idx + 5).min(peph.len());
    let window: Vec<&PEph> = peph[lo..hi].iter().filter(|e| e.pos_km.contains_key(&sat)).collect();
    if window.len() < 2 {
        return None;
    }

    let xs: Vec<f64> = window.iter().map(|e| Time::diff(e.time, t)).collect();
    let pos: Vec<[f64; 3]> = window
        .iter()
        .map(|e| {
            let p = e.pos_km[&sat];
            [p[0], p[1], p[2]]
        })
        .collect();

    let interp_pos = [
        neville(&xs, &pos.iter().map(|p| p[0]).collect::<Vec<_>>(), 0.0),
        neville(&xs, &pos.iter().map(|p| p[1]).collect::<Vec<_>>(), 0.0),
        neville(&xs, &pos.iter().map(|p| p[2]).collect::<Vec<_>>(), 0.0),
    ];

    // Linear clock interpolation between the two bracketing samples.
    let before = peph[..idx].iter().rev().find(|e| e.pos_km.contains_key(&sat))?;
    let after = peph[idx..].iter().find(|e| e.pos_km.contains_key(&sat))?;
    let dt_total = Time::diff(after.time, before.time);
    let clock = if dt_total.abs() < 1e-9 {
        before.pos_km[&sat][3]
    } else {
        let frac = Time::diff(t, before.time) / dt_total;
        before.pos_km[&sat][3] + frac * (after.pos_km[&sat][3] - before.pos_km[&sat][3])
    };

    // Relativistic correction needs a velocity estimate; derive it from the
    // same Neville polynomial's numerical derivative via a tiny central
    // difference, matching the accuracy precise-ephemeris users expect.
    let eps = 1.0; // seconds
    let pos_plus = [
        neville(&xs, &pos.iter().map(|p| p[0]).collect::<Vec<_>>(), eps),
        neville(&xs, &pos.iter().map(|p| p[1]).collect::<Vec<_>>(), eps),
        neville(&xs, &pos.iter().map(|p| p[2]).collect::<Vec<_>>(), eps),
    ];
    let vel = [
        (pos_plus[0] - interp_pos[0]) / eps,
        (pos_plus[1] - interp_pos[1]) / eps,
        (pos_plus[2] - interp_pos[2]) / eps,
    ];

    let r_dot_v = interp_pos[0] * vel[0] + interp_pos[1] * vel[1] + interp_pos[2] * vel[2];
    // positions are in km, velocities in km/s: convert to meters for the
    // canonical relativistic correction formula.
    let rel_correction = -2.0 * (r_dot_v * 1.0e6) / (SPEED_OF_LIGHT * SPEED_OF_LIGHT);

    Some((interp_pos, clock + rel_correction))
}

/// Classical Neville's algorithm, evaluating the unique degree-`(n-1)`
/// polynomial through `(xs[i], ys[i])` at `x`.
fn neville(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let n = xs.len();
    let mut tableau = ys.to_vec();
    for k in 1..n {
        for i in 0..(n - k) {
            tableau[i] = ((x - xs[i + k]) * tableau[i] - (x - xs[i]) * tableau[i + 1])
                / (xs[i] - xs[i + k]);
        }
    }
    tableau[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sat::sat_no;
    use gnss_rs::constellation::Constellation;

    #[test]
    fn neville_reproduces_linear_data_exactly() {
        let xs = vec![-2.0, -1.0, 0.0, 1.0, 2.0];
        let ys: Vec<f64> = xs.iter().map(|&x| 3.0 * x + 1.0).collect();
        let v = neville(&xs, &ys, 0.5);
        assert!((v - 2.5).abs() < 1e-9);
    }

    #[test]
    fn interpolation_out_of_range_returns_none() {
        let sat = sat_no(Constellation::GPS, 1).unwrap();
        let peph = vec![PEph {
            time: Time::new(0, 0.0),
            pos_km: HashMap::from([(sat, [1.0, 2.0, 3.0, 0.0])]),
            std_dev: HashMap::new(),
            vel_km_s: HashMap::new(),
        }];
        assert!(interpolate(&peph, sat, Time::new(10_000, 0.0)).is_none());
    }
}
