use fixed::types::I32F32;

/// Simulation time in seconds as Q32.32 fixed-point.
///
/// Fixed-point gives events a total order and makes time arithmetic
/// deterministic across platforms, which floating point does not.
pub type SimTime = I32F32;

/// The start of every simulation run.
pub const ZERO: SimTime = SimTime::ZERO;

/// Convert seconds to [`SimTime`]. Use at the boundary (config, UI, network).
/// Out-of-range values saturate; NaN maps to zero.
#[inline]
pub fn secs(v: f64) -> SimTime {
    if v.is_nan() {
        return ZERO;
    }
    SimTime::saturating_from_num(v)
}

/// Convert [`SimTime`] back to seconds. Use only for display and pacing.
#[inline]
pub fn to_secs(t: SimTime) -> f64 {
    t.to_num::<f64>()
}

/// Add a step to a time, saturating at [`SimTime::MAX`] instead of wrapping.
#[inline]
pub fn advance(t: SimTime, step: SimTime) -> SimTime {
    t.saturating_add(step)
}
