//! Position sizing
//!
//! Turns a monetary risk budget into a broker-valid volume. The budget is
//! recomputed from the live balance every cycle so sizing follows drawdown
//! and growth instead of a stale snapshot.

use tracing::warn;

use crate::broker::SymbolSpec;

/// Volume for a trade risking `risk_fraction` of `balance` over the given
/// stop distance, scaled by the signal's size multiplier and clamped to the
/// broker's volume constraints.
///
/// Returns `None` when the stop distance is not positive or the instrument
/// metadata cannot support sizing.
pub fn position_volume(
    balance: f64,
    risk_fraction: f64,
    entry: f64,
    stop: f64,
    multiplier: f64,
    spec: &SymbolSpec,
) -> Option<f64> {
    let stop_distance = (entry - stop).abs();
    if stop_distance <= 0.0 || spec.value_per_unit <= 0.0 || spec.volume_step <= 0.0 {
        return None;
    }
    if balance <= 0.0 || risk_fraction <= 0.0 {
        return None;
    }

    let budget = balance * risk_fraction * multiplier;
    let raw = budget / (stop_distance * spec.value_per_unit);

    // Snap to the step grid, then clamp into the broker's range
    let stepped = (raw / spec.volume_step).round() * spec.volume_step;
    let clamped = stepped.clamp(spec.volume_min, spec.volume_max);
    if (clamped - stepped).abs() > f64::EPSILON {
        // Clamping changes the risk actually taken, worth surfacing
        warn!(raw, stepped, clamped, "volume clamped to broker constraints");
    }
    Some(clamped)
}
