//! State-Space Representation (SSR) corrections — one table per satellite,
//! six time-tagged sections (spec.md §3): orbit/clock, high-rate clock,
//! URA, code bias, phase bias. RTCM 3 message 4076 (IGS SSR) and the legacy
//! 1057-1068 family are decode-only (REDESIGN FLAGS / Open Questions).

use crate::time::Time;

#[derive(Debug, Clone, Default)]
pub struct SsrSection<T: Clone> {
    pub update_time: Option<Time>,
    pub iod: u8,
    pub value: Option<T>,
}

#[derive(Debug, Clone)]
pub struct SsrOrbit {
    pub radial_m: f64,
    pub along_m: f64,
    pub cross_m: f64,
    pub radial_rate_m_s: f64,
    pub along_rate_m_s: f64,
    pub cross_rate_m_s: f64,
}

#[derive(Debug, Clone)]
pub struct SsrClock {
    pub c0_m: f64,
    pub c1_m_s: f64,
    pub c2_m_s2: f64,
}

#[derive(Debug, Clone)]
pub struct SsrBias {
    pub code_biases_m: Vec<(crate::sat::ObsCode, f64)>,
}

/// Per-satellite SSR record: six independently time-tagged sections.
#[derive(Debug, Clone, Default)]
pub struct Ssr {
    pub orbit: SsrSection<SsrOrbit>,
    pub clock: SsrSection<SsrClock>,
    pub hr_clock: SsrSection<f64>,
    pub ura: SsrSection<u8>,
    pub code_bias: SsrSection<SsrBias>,
    pub phase_bias: SsrSection<SsrBias>,
}

impl Ssr {
    /// Combined clock correction at `t`, applying the high-rate clock term
    /// on top of the polynomial clock section when both are fresh enough
    /// relative to `t` (within `max_age_s`).
    pub fn clock_correction_m(&self, t: Time, max_age_s: f64) -> Option<f64> {
        let clock = self.clock.value.as_ref()?;
        let update = self.clock.update_time?;
        let dt = Time::diff(t, update);
        if dt.abs() > max_age_s {
            return None;
        }
        let mut correction = clock.c0_m + clock.c1_m_s * dt + clock.c2_m_s2 * dt * dt;
        if let (Some(hr), Some(hr_update)) = (self.hr_clock.value, self.hr_clock.update_time) {
            if (Time::diff(t, hr_update)).abs() <= max_age_s {
                correction += hr;
            }
        }
        Some(correction)
    }
}
