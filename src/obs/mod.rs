//! Observation record and buffer (C7): per-epoch grouping, stable sort and
//! duplicate coalescing.

use crate::sat::{ObsCode, SatId};
use crate::time::Time;

/// Loss-of-lock indicator flag byte, field-wise OR'd on merge (spec.md §3).
pub type Lli = u8;

pub const LLI_LOCK_LOST: Lli = 0x01;
pub const LLI_HALF_CYCLE: Lli = 0x02;
pub const LLI_BOUNDARY: Lli = 0x04;

/// One frequency band's worth of observable data within an [`Observation`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BandObs {
    pub pseudorange_m: Option<f64>,
    pub carrier_phase_cycles: Option<f64>,
    pub doppler_hz: Option<f64>,
    pub snr_db_hz: Option<f32>,
    pub lli: Lli,
    pub code: Option<ObsCode>,
}

impl BandObs {
    /// Field-wise merge used when two records share `(time, sat, receiver)`:
    /// LLI flags are OR'd, and the higher-priority code wins (spec.md §3).
    pub fn merge(&mut self, other: &BandObs, pri: impl Fn(Option<ObsCode>) -> i32) {
        self.lli |= other.lli;
        if other.pseudorange_m.is_some() {
            self.pseudorange_m = other.pseudorange_m;
        }
        if other.carrier_phase_cycles.is_some() {
            self.carrier_phase_cycles = other.carrier_phase_cycles;
        }
        if other.doppler_hz.is_some() {
            self.doppler_hz = other.doppler_hz;
        }
        if other.snr_db_hz.is_some() {
            self.snr_db_hz = other.snr_db_hz;
        }
        if pri(other.code) > pri(self.code) {
            self.code = other.code;
        }
    }
}

/// `{ time, sat, receiver, per-band arrays }` — spec.md §3. `bands.len() ==
/// NFREQ + NEXOBS` for the configuration this record was decoded under.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub time: Time,
    pub sat: SatId,
    pub receiver: u8,
    pub bands: Vec<BandObs>,
}

impl Observation {
    pub fn key(&self) -> (Time, u8, SatId) {
        (self.time, self.receiver, self.sat)
    }
}

/// Default epoch-boundary tolerance (ms), per spec.md §4.5 invariant 4.
pub const DEFAULT_EPOCH_TOLERANCE_MS: i64 = 5;

/// Time-ordered observation sequence (C7). Sort key `(time, receiver, sat)`;
/// duplicate epochs across receivers are preserved, only exact
/// `(time, sat, receiver)` triples are coalesced.
#[derive(Debug, Default)]
pub struct ObsBuf {
    records: Vec<Observation>,
    epoch_tolerance_s: f64,
}

impl ObsBuf {
    pub fn new(epoch_tolerance_ms: i64) -> Self {
        Self {
            records: Vec::new(),
            epoch_tolerance_s: epoch_tolerance_ms as f64 / 1000.0,
        }
    }

    /// Appends `obs`, merging into any existing record that shares
    /// `(time, sat, receiver)` exactly (sub-millisecond tolerance), per
    /// spec.md §3's merge invariant.
    pub fn push(&mut self, obs: Observation, pri: impl Fn(Option<ObsCode>) -> i32 + Copy) {
        if let Some(existing) = self.records.iter_mut().find(|r| {
            r.receiver == obs.receiver
                && r.sat == obs.sat
                && Time::diff(r.time, obs.time).abs() < 1e-6
        }) {
            for (i, band) in obs.bands.iter().enumerate() {
                if let Some(slot) = existing.bands.get_mut(i) {
                    slot.merge(band, pri);
                } else {
                    existing.bands.push(*band);
                }
            }
        } else {
            self.records.push(obs);
        }
    }

    /// Stable sort by `(time, receiver, sat)`. Per-band code order within a
    /// record is untouched by the sort (spec.md §8 "obs buffer sort
    /// stable").
    pub fn sort(&mut self) {
        self.records
            .sort_by(|a, b| a.key().partial_cmp_time(&b.key()));
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.records.iter()
    }

    /// Groups contiguous records (after [`ObsBuf::sort`]) sharing a time
    /// within `epoch_tolerance`, returning each group as a slice. This is
    /// the "epoch closure" the raw decoders' `complete` flag models.
    pub fn epochs(&self) -> EpochIter<'_> {
        EpochIter {
            records: &self.records,
            tolerance_s: self.epoch_tolerance_s,
            pos: 0,
        }
    }

    /// Removes and returns every record at or before the closed epoch
    /// (`complete`), leaving later (pending) records in the buffer — this
    /// is how the solver atomically consumes one epoch at a time
    /// (spec.md §3 entity lifecycle).
    pub fn drain_closed_epoch(&mut self) -> Option<Vec<Observation>> {
        if self.records.len() < 2 {
            return None;
        }
        self.sort();
        let t0 = self.records[0].time;
        let split = self
            .records
            .iter()
            .position(|r| Time::diff(r.time, t0).abs() > self.epoch_tolerance_s)?;
        Some(self.records.drain(..split).collect())
    }
}

trait KeyOrd {
    fn partial_cmp_time(&self, other: &Self) -> std::cmp::Ordering;
}

impl KeyOrd for (Time, u8, SatId) {
    fn partial_cmp_time(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .secs
            .cmp(&other.0.secs)
            .then_with(|| self.0.frac.partial_cmp(&other.0.frac).unwrap())
            .then_with(|| self.1.cmp(&other.1))
            .then_with(|| self.2.cmp(&other.2))
    }
}

pub struct EpochIter<'a> {
    records: &'a [Observation],
    tolerance_s: f64,
    pos: usize,
}

impl<'a> Iterator for EpochIter<'a> {
    type Item = &'a [Observation];

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.records.len() {
            return None;
        }
        let t0 = self.records[self.pos].time;
        let start = self.pos;
        let mut end = start + 1;
        while end < self.records.len()
            && Time::diff(self.records[end].time, t0).abs() <= self.tolerance_s
        {
            end += 1;
        }
        self.pos = end;
        Some(&self.records[start..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sat::sat_no;
    use gnss_rs::constellation::Constellation;

    fn obs(t: Time, sat: SatId, rcv: u8) -> Observation {
        Observation {
            time: t,
            sat,
            receiver: rcv,
            bands: vec![BandObs {
                pseudorange_m: Some(1.0),
                ..Default::default()
            }],
        }
    }

    #[test]
    fn sort_is_stable_and_by_time_receiver_sat() {
        let sat1 = sat_no(Constellation::GPS, 1).unwrap();
        let sat2 = sat_no(Constellation::GPS, 2).unwrap();
        let t0 = Time::new(1000, 0.0);
        let t1 = Time::new(1001, 0.0);

        let mut buf = ObsBuf::new(5);
        buf.push(obs(t1, sat2, 0), |_| 0);
        buf.push(obs(t0, sat2, 0), |_| 0);
        buf.push(obs(t0, sat1, 0), |_| 0);
        buf.sort();

        let times: Vec<_> = buf.iter().map(|o| (o.time.secs, o.sat)).collect();
        assert_eq!(times, vec![(1000, sat1), (1000, sat2), (1001, sat2)]);
    }

    #[test]
    fn duplicate_time_sat_receiver_is_merged() {
        let sat = sat_no(Constellation::GPS, 1).unwrap();
        let t = Time::new(1000, 0.0);
        let mut buf = ObsBuf::new(5);
        let mut a = obs(t, sat, 0);
        a.bands[0].lli = LLI_LOCK_LOST;
        let mut b = obs(t, sat, 0);
        b.bands[0].lli = LLI_HALF_CYCLE;
        buf.push(a, |_| 0);
        buf.push(b, |_| 0);
        assert_eq!(buf.len(), 1);
        let merged = buf.iter().next().unwrap();
        assert_eq!(merged.bands[0].lli, LLI_LOCK_LOST | LLI_HALF_CYCLE);
    }

    #[test]
    fn epoch_grouping_respects_tolerance() {
        let sat = sat_no(Constellation::GPS, 1).unwrap();
        let t0 = Time::new(1000, 0.0);
        let t_close = Time::new(1000, 0.002); // 2ms
        let t_far = Time::new(1001, 0.0);

        let mut buf = ObsBuf::new(5);
        buf.push(obs(t0, sat, 0), |_| 0);
        buf.push(obs(t_close, sat, 1), |_| 0);
        buf.push(obs(t_far, sat, 0), |_| 0);
        buf.sort();

        let groups: Vec<usize> = buf.epochs().map(|g| g.len()).collect();
        assert_eq!(groups, vec![2, 1]);
    }
}
