//! Entry trigger detection
//!
//! Four interchangeable triggers behind one detection entry point. A trigger
//! only proposes a direction and, when it has one, a structural stop anchor;
//! bias agreement, confirmations and risk checks happen downstream.

use crate::broker::{Bar, TradeSide};
use crate::config::{StrategyConfig, TriggerKind};
use crate::indicators::{self, SwingKind};

/// How many closed bars back a crossover still counts as fresh
const CROSS_LOOKBACK: usize = 3;
/// Supply/demand zone height as an ATR ratio
const ZONE_ATR_RATIO: f64 = 0.5;
/// Accumulation window for the manipulation trigger
const ACCUM_BARS: usize = 12;
/// Price tolerance between pattern extremes, as an ATR ratio
const PATTERN_TOLERANCE_ATR: f64 = 0.25;

/// A raw entry proposal from one trigger
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trigger {
    pub side: TradeSide,
    /// Structural level the stop anchors to; `None` means ATR-distance stop
    pub stop_anchor: Option<f64>,
}

/// Run the configured trigger over the execution-timeframe window
pub fn detect(bars: &[Bar], atr: f64, cfg: &StrategyConfig) -> Option<Trigger> {
    match cfg.trigger {
        TriggerKind::EmaCrossDonchian => ema_cross_donchian(bars, cfg),
        TriggerKind::SupplyDemandZone => supply_demand_zone(bars, atr, cfg),
        TriggerKind::AmdManipulation => amd_manipulation(bars, atr, cfg),
        TriggerKind::ChartPattern => chart_pattern(bars, atr, cfg),
    }
}

/// Fresh 9/21 EMA crossover confirmed by a close beyond the prior Donchian
/// channel in the same direction.
fn ema_cross_donchian(bars: &[Bar], cfg: &StrategyConfig) -> Option<Trigger> {
    let closes = indicators::closes(bars);
    let fast = indicators::ema(&closes, cfg.fast_ema_period)?;
    let slow = indicators::ema(&closes, cfg.slow_ema_period)?;
    let n = fast.len().min(slow.len());
    if n < CROSS_LOOKBACK + 1 {
        return None;
    }
    let f = &fast[fast.len() - n..];
    let s = &slow[slow.len() - n..];

    let crossed_up =
        f[n - 1] > s[n - 1] && (1..=CROSS_LOOKBACK).any(|k| f[n - 1 - k] <= s[n - 1 - k]);
    let crossed_down =
        f[n - 1] < s[n - 1] && (1..=CROSS_LOOKBACK).any(|k| f[n - 1 - k] >= s[n - 1 - k]);

    let channel = indicators::donchian(bars, cfg.donchian_period)?;
    let close = bars.last()?.close;

    if crossed_up && close > channel.upper {
        Some(Trigger {
            side: TradeSide::Long,
            stop_anchor: None,
        })
    } else if crossed_down && close < channel.lower {
        Some(Trigger {
            side: TradeSide::Short,
            stop_anchor: None,
        })
    } else {
        None
    }
}

/// Rejection candle out of a pivot-derived demand (supply) zone
fn supply_demand_zone(bars: &[Bar], atr: f64, cfg: &StrategyConfig) -> Option<Trigger> {
    let cur = bars.last()?;
    let swings = indicators::swing_points(bars, cfg.swing_window);
    let zone = ZONE_ATR_RATIO * atr;

    if let Some(demand) = indicators::last_swing(&swings, SwingKind::Low) {
        let top = demand.price + zone;
        if cur.low <= top && cur.close > top && cur.is_bullish() {
            return Some(Trigger {
                side: TradeSide::Long,
                stop_anchor: Some(demand.price),
            });
        }
    }
    if let Some(supply) = indicators::last_swing(&swings, SwingKind::High) {
        let bottom = supply.price - zone;
        if cur.high >= bottom && cur.close < bottom && !cur.is_bullish() {
            return Some(Trigger {
                side: TradeSide::Short,
                stop_anchor: Some(supply.price),
            });
        }
    }
    None
}

/// Fake breakout of a tight accumulation range: the previous bar sweeps one
/// side of the range and the current bar closes back inside.
fn amd_manipulation(bars: &[Bar], atr: f64, cfg: &StrategyConfig) -> Option<Trigger> {
    if bars.len() < ACCUM_BARS + 2 {
        return None;
    }
    let cur = bars.last()?;
    let prev = &bars[bars.len() - 2];
    let accum = &bars[bars.len() - 2 - ACCUM_BARS..bars.len() - 2];

    let range_high = accum.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let range_low = accum.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    if range_high - range_low > cfg.range_atr_threshold * atr {
        return None;
    }

    if prev.low < range_low && cur.close > range_low && cur.is_bullish() {
        return Some(Trigger {
            side: TradeSide::Long,
            stop_anchor: Some(prev.low),
        });
    }
    if prev.high > range_high && cur.close < range_high && !cur.is_bullish() {
        return Some(Trigger {
            side: TradeSide::Short,
            stop_anchor: Some(prev.high),
        });
    }
    None
}

/// Double bottom (top) at matching pivots, entered on the neckline break
fn chart_pattern(bars: &[Bar], atr: f64, cfg: &StrategyConfig) -> Option<Trigger> {
    let cur = bars.last()?;
    let swings = indicators::swing_points(bars, cfg.swing_window);
    let tolerance = PATTERN_TOLERANCE_ATR * atr;

    let lows: Vec<_> = swings.iter().filter(|s| s.kind == SwingKind::Low).collect();
    if let [.., a, b] = lows.as_slice() {
        if (a.price - b.price).abs() <= tolerance {
            let neckline = bars[a.index..=b.index]
                .iter()
                .map(|bar| bar.high)
                .fold(f64::MIN, f64::max);
            if cur.close > neckline {
                return Some(Trigger {
                    side: TradeSide::Long,
                    stop_anchor: Some(a.price.min(b.price)),
                });
            }
        }
    }

    let highs: Vec<_> = swings.iter().filter(|s| s.kind == SwingKind::High).collect();
    if let [.., a, b] = highs.as_slice() {
        if (a.price - b.price).abs() <= tolerance {
            let neckline = bars[a.index..=b.index]
                .iter()
                .map(|bar| bar.low)
                .fold(f64::MAX, f64::min);
            if cur.close < neckline {
                return Some(Trigger {
                    side: TradeSide::Short,
                    stop_anchor: Some(a.price.max(b.price)),
                });
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn bar(i: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: Utc::now() + Duration::minutes(i),
            open,
            high,
            low,
            close,
            volume: 100,
        }
    }

    fn flat(i: i64, close: f64) -> Bar {
        bar(i, close, close + 0.2, close - 0.2, close)
    }

    #[test]
    fn test_ema_cross_with_breakout_fires_long() {
        let cfg = StrategyConfig::default();
        // Long consolidation, then three rising closes: the 9 EMA crosses the
        // 21 EMA on the first rising bar and the last close clears the
        // 20-bar channel high.
        let mut bars: Vec<Bar> = (0..60).map(|i| flat(i, 100.0)).collect();
        bars.push(flat(60, 101.0));
        bars.push(flat(61, 102.0));
        bars.push(flat(62, 103.0));

        let trig = detect(&bars, 1.0, &cfg).expect("trigger");
        assert_eq!(trig.side, TradeSide::Long);
        assert_eq!(trig.stop_anchor, None);
    }

    #[test]
    fn test_consolidation_alone_does_not_fire() {
        let cfg = StrategyConfig::default();
        let bars: Vec<Bar> = (0..80).map(|i| flat(i, 100.0)).collect();
        assert!(detect(&bars, 1.0, &cfg).is_none());
    }

    #[test]
    fn test_breakout_without_cross_does_not_fire() {
        let cfg = StrategyConfig::default();
        // Steady uptrend: the fast EMA has been above the slow one for a long
        // time, so a further breakout is not a fresh crossover.
        let bars: Vec<Bar> = (0..80).map(|i| flat(i, 100.0 + i as f64)).collect();
        assert!(detect(&bars, 1.0, &cfg).is_none());
    }

    #[test]
    fn test_demand_zone_rejection_fires_long() {
        let cfg = StrategyConfig {
            trigger: TriggerKind::SupplyDemandZone,
            swing_window: 2,
            ..StrategyConfig::default()
        };
        // Pivot low at 96.5, zone top 96.5 + 0.5 * atr = 97.0
        let mut bars: Vec<Bar> = (0..30).map(|i| flat(i, 100.0)).collect();
        bars[20] = bar(20, 97.5, 98.0, 96.5, 97.5);
        // Current bar dips into the zone and closes back above it
        bars.push(bar(30, 97.2, 98.6, 96.9, 98.5));

        let trig = detect(&bars, 1.0, &cfg).expect("trigger");
        assert_eq!(trig.side, TradeSide::Long);
        assert_eq!(trig.stop_anchor, Some(96.5));
    }

    #[test]
    fn test_amd_sweep_and_reclaim_fires_long() {
        let cfg = StrategyConfig {
            trigger: TriggerKind::AmdManipulation,
            range_atr_threshold: 1.5,
            ..StrategyConfig::default()
        };
        // Tight range 99.8..100.2, previous bar sweeps to 99.0, current bar
        // closes back inside the range
        let mut bars: Vec<Bar> = (0..20).map(|i| flat(i, 100.0)).collect();
        bars.push(bar(20, 100.0, 100.1, 99.0, 99.2));
        bars.push(bar(21, 99.2, 100.4, 99.1, 100.3));

        let trig = detect(&bars, 1.0, &cfg).expect("trigger");
        assert_eq!(trig.side, TradeSide::Long);
        assert_eq!(trig.stop_anchor, Some(99.0));
    }

    #[test]
    fn test_amd_wide_range_is_ignored() {
        let cfg = StrategyConfig {
            trigger: TriggerKind::AmdManipulation,
            range_atr_threshold: 1.5,
            ..StrategyConfig::default()
        };
        // Same sweep shape but the "range" is far wider than the threshold
        let mut bars: Vec<Bar> = (0..20)
            .map(|i| bar(i, 100.0, 103.0, 97.0, 100.0))
            .collect();
        bars.push(bar(20, 100.0, 100.1, 96.0, 96.5));
        bars.push(bar(21, 96.5, 100.4, 96.2, 100.3));
        assert!(detect(&bars, 1.0, &cfg).is_none());
    }

    #[test]
    fn test_double_bottom_neckline_break_fires_long() {
        let cfg = StrategyConfig {
            trigger: TriggerKind::ChartPattern,
            swing_window: 2,
            ..StrategyConfig::default()
        };
        // Two matching pivot lows at ~97 with a bounce to 101 between them,
        // then a close above the neckline
        let mut bars: Vec<Bar> = (0..8).map(|i| flat(i, 100.0)).collect();
        bars.push(bar(8, 98.0, 98.2, 97.0, 97.5)); // first bottom
        bars.extend((9..13).map(|i| flat(i, 100.5)));
        bars[11] = bar(11, 100.8, 101.0, 100.3, 100.9); // bounce high
        bars.push(bar(13, 98.1, 98.3, 97.1, 97.6)); // second bottom
        bars.extend((14..18).map(|i| flat(i, 99.5)));
        bars.push(bar(18, 99.8, 101.6, 99.5, 101.5)); // neckline break

        let trig = detect(&bars, 1.0, &cfg).expect("trigger");
        assert_eq!(trig.side, TradeSide::Long);
        assert_eq!(trig.stop_anchor, Some(97.0));
    }
}
