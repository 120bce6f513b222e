//! Technical indicator library
//!
//! Pure transforms over bar windows. Every function returns `None` when the
//! history is too short to define the indicator; callers must check before
//! use, a short series is never silently zero.

use crate::broker::Bar;

/// Extract the close series from a bar window
pub fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

/// Exponential moving average, smoothing constant `2 / (period + 1)`.
///
/// Seeded with the simple mean of the first `period` values; the returned
/// series is aligned so that the last element corresponds to the last input.
pub fn ema(values: &[f64], period: usize) -> Option<Vec<f64>> {
    if period == 0 || values.len() < period {
        return None;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;
    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    let mut current = seed;
    for &v in &values[period..] {
        current = alpha * v + (1.0 - alpha) * current;
        out.push(current);
    }
    Some(out)
}

/// Average true range with Wilder smoothing.
///
/// Needs `period + 1` bars for the first value; last element is current.
pub fn atr(bars: &[Bar], period: usize) -> Option<Vec<f64>> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }
    let trs: Vec<f64> = bars
        .windows(2)
        .map(|w| w[1].true_range(w[0].close))
        .collect();
    let mut current = trs[..period].iter().sum::<f64>() / period as f64;
    let mut out = Vec::with_capacity(trs.len() - period + 1);
    out.push(current);
    for &tr in &trs[period..] {
        current = (current * (period as f64 - 1.0) + tr) / period as f64;
        out.push(current);
    }
    Some(out)
}

/// Relative strength index (Wilder), last value only
pub fn rsi(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period + 1 {
        return None;
    }
    let deltas: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    let mut avg_gain = deltas[..period].iter().filter(|d| **d > 0.0).sum::<f64>() / period as f64;
    let mut avg_loss =
        deltas[..period].iter().filter(|d| **d < 0.0).map(|d| -d).sum::<f64>() / period as f64;
    for &d in &deltas[period..] {
        let gain = d.max(0.0);
        let loss = (-d).max(0.0);
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }
    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Average directional index (0-100 trend strength), last value only.
///
/// Needs roughly `2 * period` bars before the ADX smoothing is defined.
pub fn adx(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < 2 * period + 1 {
        return None;
    }

    let mut trs = Vec::with_capacity(bars.len() - 1);
    let mut plus_dm = Vec::with_capacity(bars.len() - 1);
    let mut minus_dm = Vec::with_capacity(bars.len() - 1);
    for w in bars.windows(2) {
        let (prev, cur) = (&w[0], &w[1]);
        trs.push(cur.true_range(prev.close));
        let up = cur.high - prev.high;
        let down = prev.low - cur.low;
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
    }

    // Wilder-smoothed running sums
    let mut tr_s = trs[..period].iter().sum::<f64>();
    let mut plus_s = plus_dm[..period].iter().sum::<f64>();
    let mut minus_s = minus_dm[..period].iter().sum::<f64>();

    let dx_at = |tr_s: f64, plus_s: f64, minus_s: f64| -> f64 {
        if tr_s == 0.0 {
            return 0.0;
        }
        let plus_di = 100.0 * plus_s / tr_s;
        let minus_di = 100.0 * minus_s / tr_s;
        let sum = plus_di + minus_di;
        if sum == 0.0 {
            0.0
        } else {
            100.0 * (plus_di - minus_di).abs() / sum
        }
    };

    let mut dxs = vec![dx_at(tr_s, plus_s, minus_s)];
    for i in period..trs.len() {
        tr_s = tr_s - tr_s / period as f64 + trs[i];
        plus_s = plus_s - plus_s / period as f64 + plus_dm[i];
        minus_s = minus_s - minus_s / period as f64 + minus_dm[i];
        dxs.push(dx_at(tr_s, plus_s, minus_s));
    }

    if dxs.len() < period {
        return None;
    }
    let mut adx = dxs[..period].iter().sum::<f64>() / period as f64;
    for &dx in &dxs[period..] {
        adx = (adx * (period as f64 - 1.0) + dx) / period as f64;
    }
    Some(adx)
}

/// Donchian channel over the `period` bars preceding the most recent bar.
///
/// The evaluation bar itself is excluded so that "close beyond the channel"
/// is a real breakout test rather than a comparison against its own high.
#[derive(Debug, Clone, Copy)]
pub struct DonchianChannel {
    pub upper: f64,
    pub lower: f64,
}

pub fn donchian(bars: &[Bar], period: usize) -> Option<DonchianChannel> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }
    let window = &bars[bars.len() - 1 - period..bars.len() - 1];
    let upper = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let lower = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    Some(DonchianChannel { upper, lower })
}

/// Bollinger bandwidth series: `(upper - lower) / middle`.
pub fn bollinger_bandwidth(values: &[f64], period: usize, stddev: f64) -> Option<Vec<f64>> {
    if period == 0 || values.len() < period {
        return None;
    }
    let mut out = Vec::with_capacity(values.len() - period + 1);
    for window in values.windows(period) {
        let mean = window.iter().sum::<f64>() / period as f64;
        let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
        let sd = var.sqrt();
        if mean == 0.0 {
            return None;
        }
        out.push(2.0 * stddev * sd / mean);
    }
    Some(out)
}

/// Volatility regime derived from bandwidth against its own rolling mean
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqueezeState {
    /// Bandwidth compressed below `squeeze_ratio` of its rolling mean
    Squeeze,
    /// Bandwidth already expanded above `expansion_ratio` of the mean
    Expansion,
    Normal,
}

pub fn squeeze_state(
    bandwidth: &[f64],
    mean_window: usize,
    squeeze_ratio: f64,
    expansion_ratio: f64,
) -> Option<SqueezeState> {
    if mean_window == 0 || bandwidth.len() < mean_window {
        return None;
    }
    let tail = &bandwidth[bandwidth.len() - mean_window..];
    let mean = tail.iter().sum::<f64>() / mean_window as f64;
    let current = *bandwidth.last()?;
    if mean <= 0.0 {
        return None;
    }
    if current < mean * squeeze_ratio {
        Some(SqueezeState::Squeeze)
    } else if current > mean * expansion_ratio {
        Some(SqueezeState::Expansion)
    } else {
        Some(SqueezeState::Normal)
    }
}

/// A fractal pivot in the bar series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwingPoint {
    /// Index into the bar window the pivot was detected in
    pub index: usize,
    pub price: f64,
    pub kind: SwingKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwingKind {
    High,
    Low,
}

/// Local fractal highs/lows: a bar whose high (low) exceeds (undercuts) every
/// neighbor within `window` bars on both sides. Ordered by index.
pub fn swing_points(bars: &[Bar], window: usize) -> Vec<SwingPoint> {
    let mut out = Vec::new();
    if window == 0 || bars.len() < 2 * window + 1 {
        return out;
    }
    for i in window..bars.len() - window {
        let left = &bars[i - window..i];
        let right = &bars[i + 1..i + 1 + window];
        let high = bars[i].high;
        let low = bars[i].low;
        if left.iter().chain(right.iter()).all(|b| b.high < high) {
            out.push(SwingPoint {
                index: i,
                price: high,
                kind: SwingKind::High,
            });
        }
        if left.iter().chain(right.iter()).all(|b| b.low > low) {
            out.push(SwingPoint {
                index: i,
                price: low,
                kind: SwingKind::Low,
            });
        }
    }
    out
}

/// Most recent swing of a given kind, if any
pub fn last_swing(swings: &[SwingPoint], kind: SwingKind) -> Option<&SwingPoint> {
    swings.iter().rev().find(|s| s.kind == kind)
}
