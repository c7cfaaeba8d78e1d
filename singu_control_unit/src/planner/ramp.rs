//! Acceleration-limited ramp.

/// Move `current` toward `target` by at most `max_step`.
///
/// ```text
/// Δ = target − current
/// out = target                       if |Δ| <= max_step
///     = current + sign(Δ)·max_step   otherwise
/// ```
///
/// A non-positive `max_step` holds `current`.
#[inline]
pub fn ramp_step(current: f64, target: f64, max_step: f64) -> f64 {
    if max_step <= 0.0 {
        return current;
    }
    let delta = target - current;
    if delta.abs() <= max_step {
        target
    } else {
        current + max_step.copysign(delta)
    }
}

/// Effective per-cycle step: the tuning limit, tightened by the hardware
/// acceleration bound when one is configured.
#[inline]
pub fn effective_step(tuning_step: f64, hardware_accel: Option<f64>, dt_secs: f64) -> f64 {
    match hardware_accel {
        Some(accel) => tuning_step.min(accel * dt_secs),
        None => tuning_step,
    }
}
