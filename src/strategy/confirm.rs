//! Confirmation filters
//!
//! Five independent boolean checks run after a trigger fires. Each is a
//! directional read of the same bar window; the signal pipeline only demands
//! that a configured minimum of them hold, with no weighting.

use crate::broker::{Bar, TradeSide};
use crate::config::StrategyConfig;
use crate::indicators::{self, SwingKind, SwingPoint};

/// Bars scanned back for a fair value gap
const FVG_LOOKBACK: usize = 10;
/// Bars scanned back for a liquidity sweep
const SWEEP_LOOKBACK: usize = 10;
/// Prior bars averaged for the volume check
const VOLUME_LOOKBACK: usize = 20;

/// Which confirmations held for one candidate entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Confirmations {
    /// Close beyond the most recent opposing swing point
    pub structural_break: bool,
    /// Unfilled price imbalance in the trade direction
    pub fair_value_gap: bool,
    /// A recent wick through a swing level that closed back inside
    pub liquidity_sweep: bool,
    /// The protecting swing has not been traded through since it formed
    pub unrecovered_swing: bool,
    /// Current volume above its recent average
    pub rising_volume: bool,
}

impl Confirmations {
    pub fn count(&self) -> usize {
        [
            self.structural_break,
            self.fair_value_gap,
            self.liquidity_sweep,
            self.unrecovered_swing,
            self.rising_volume,
        ]
        .iter()
        .filter(|b| **b)
        .count()
    }
}

/// Evaluate every confirmation for a candidate in `side` direction
pub fn evaluate(bars: &[Bar], side: TradeSide, atr: f64, cfg: &StrategyConfig) -> Confirmations {
    let swings = indicators::swing_points(bars, cfg.swing_window);
    Confirmations {
        structural_break: structural_break(bars, &swings, side),
        fair_value_gap: fair_value_gap(bars, side, atr, cfg),
        liquidity_sweep: liquidity_sweep(bars, &swings, side),
        unrecovered_swing: unrecovered_swing(bars, &swings, side),
        rising_volume: rising_volume(bars),
    }
}

fn structural_break(bars: &[Bar], swings: &[SwingPoint], side: TradeSide) -> bool {
    let Some(cur) = bars.last() else {
        return false;
    };
    match side {
        TradeSide::Long => indicators::last_swing(swings, SwingKind::High)
            .is_some_and(|s| cur.close > s.price),
        TradeSide::Short => indicators::last_swing(swings, SwingKind::Low)
            .is_some_and(|s| cur.close < s.price),
    }
}

/// Three-bar imbalance: for a long, a bar whose low sits fully above the
/// high from two bars earlier, by at least `fvg_atr_ratio` ATRs.
fn fair_value_gap(bars: &[Bar], side: TradeSide, atr: f64, cfg: &StrategyConfig) -> bool {
    let min_gap = cfg.fvg_atr_ratio * atr;
    let start = bars.len().saturating_sub(FVG_LOOKBACK);
    bars[start..].windows(3).any(|w| match side {
        TradeSide::Long => w[2].low - w[0].high >= min_gap,
        TradeSide::Short => w[0].low - w[2].high >= min_gap,
    })
}

/// For a long: some recent bar wicked below the previous swing low and closed
/// back above it, taking resting liquidity before the move.
fn liquidity_sweep(bars: &[Bar], swings: &[SwingPoint], side: TradeSide) -> bool {
    let start = bars.len().saturating_sub(SWEEP_LOOKBACK);
    match side {
        TradeSide::Long => swings
            .iter()
            .filter(|s| s.kind == SwingKind::Low)
            .any(|s| {
                bars[start.max(s.index + 1)..]
                    .iter()
                    .any(|b| b.low < s.price && b.close > s.price)
            }),
        TradeSide::Short => swings
            .iter()
            .filter(|s| s.kind == SwingKind::High)
            .any(|s| {
                bars[start.max(s.index + 1)..]
                    .iter()
                    .any(|b| b.high > s.price && b.close < s.price)
            }),
    }
}

/// The swing that would protect the trade still holds: no close through it
/// since it formed.
fn unrecovered_swing(bars: &[Bar], swings: &[SwingPoint], side: TradeSide) -> bool {
    match side {
        TradeSide::Long => indicators::last_swing(swings, SwingKind::Low)
            .is_some_and(|s| bars[s.index + 1..].iter().all(|b| b.close > s.price)),
        TradeSide::Short => indicators::last_swing(swings, SwingKind::High)
            .is_some_and(|s| bars[s.index + 1..].iter().all(|b| b.close < s.price)),
    }
}

fn rising_volume(bars: &[Bar]) -> bool {
    let Some(cur) = bars.last() else {
        return false;
    };
    let prior = &bars[..bars.len() - 1];
    let start = prior.len().saturating_sub(VOLUME_LOOKBACK);
    let window = &prior[start..];
    if window.is_empty() {
        return false;
    }
    let mean = window.iter().map(|b| b.volume as f64).sum::<f64>() / window.len() as f64;
    cur.volume as f64 > mean
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn bar(i: i64, open: f64, high: f64, low: f64, close: f64, volume: u64) -> Bar {
        Bar {
            timestamp: Utc::now() + Duration::minutes(i),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    fn flat(i: i64, close: f64) -> Bar {
        bar(i, close, close + 0.2, close - 0.2, close, 100)
    }

    fn cfg() -> StrategyConfig {
        StrategyConfig {
            swing_window: 2,
            fvg_atr_ratio: 0.3,
            ..StrategyConfig::default()
        }
    }

    #[test]
    fn test_structural_break_long() {
        // Pivot high at 102.2, final close above it
        let mut bars: Vec<Bar> = (0..20).map(|i| flat(i, 100.0)).collect();
        bars[10] = bar(10, 101.8, 102.2, 101.5, 102.0, 100);
        bars.push(bar(20, 102.0, 102.8, 101.9, 102.7, 100));

        let c = evaluate(&bars, TradeSide::Long, 1.0, &cfg());
        assert!(c.structural_break);

        // A close below the pivot is not a break
        let c = evaluate(&bars[..20], TradeSide::Long, 1.0, &cfg());
        assert!(!c.structural_break);
    }

    #[test]
    fn test_fair_value_gap_long() {
        // Gap: bar 18 high 100.2, bar 20 low 101.0 leaves a 0.8 imbalance
        let mut bars: Vec<Bar> = (0..19).map(|i| flat(i, 100.0)).collect();
        bars.push(bar(19, 100.1, 101.2, 100.0, 101.1, 100));
        bars.push(bar(20, 101.2, 101.8, 101.0, 101.7, 100));

        let c = evaluate(&bars, TradeSide::Long, 1.0, &cfg());
        assert!(c.fair_value_gap);
        assert!(!evaluate(&bars, TradeSide::Short, 1.0, &cfg()).fair_value_gap);
    }

    #[test]
    fn test_fair_value_gap_too_small() {
        // Same shape but the gap is under 0.3 ATRs
        let mut bars: Vec<Bar> = (0..19).map(|i| flat(i, 100.0)).collect();
        bars.push(bar(19, 100.1, 100.5, 100.0, 100.4, 100));
        bars.push(bar(20, 100.4, 100.7, 100.3, 100.6, 100));
        let c = evaluate(&bars, TradeSide::Long, 1.0, &cfg());
        assert!(!c.fair_value_gap);
    }

    #[test]
    fn test_liquidity_sweep_long() {
        // Swing low at 98.8, later bar wicks to 98.5 but closes at 99.9
        let mut bars: Vec<Bar> = (0..15).map(|i| flat(i, 100.0)).collect();
        bars[8] = bar(8, 99.2, 99.5, 98.8, 99.1, 100);
        bars.push(bar(15, 100.0, 100.1, 98.5, 99.9, 100));
        bars.push(flat(16, 100.0));

        let c = evaluate(&bars, TradeSide::Long, 1.0, &cfg());
        assert!(c.liquidity_sweep);
    }

    #[test]
    fn test_unrecovered_swing_long() {
        let mut bars: Vec<Bar> = (0..20).map(|i| flat(i, 100.0)).collect();
        bars[10] = bar(10, 99.2, 99.5, 98.8, 99.1, 100);

        // All closes since the pivot stayed above 98.8
        let c = evaluate(&bars, TradeSide::Long, 1.0, &cfg());
        assert!(c.unrecovered_swing);

        // A close through the swing recovers it
        bars.push(bar(20, 99.0, 99.1, 98.0, 98.2, 100));
        bars.push(flat(21, 100.0));
        let c = evaluate(&bars, TradeSide::Long, 1.0, &cfg());
        assert!(!c.unrecovered_swing);
    }

    #[test]
    fn test_rising_volume() {
        let mut bars: Vec<Bar> = (0..20).map(|i| flat(i, 100.0)).collect();
        bars.push(bar(20, 100.0, 100.2, 99.8, 100.0, 250));
        assert!(evaluate(&bars, TradeSide::Long, 1.0, &cfg()).rising_volume);

        let quiet: Vec<Bar> = (0..21).map(|i| flat(i, 100.0)).collect();
        assert!(!evaluate(&quiet, TradeSide::Long, 1.0, &cfg()).rising_volume);
    }

    #[test]
    fn test_count() {
        let c = Confirmations {
            structural_break: true,
            rising_volume: true,
            ..Confirmations::default()
        };
        assert_eq!(c.count(), 2);
    }
}
