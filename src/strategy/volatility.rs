//! Quiet-market volatility gate
//!
//! Dead sessions produce the worst signals, so the whole analysis cycle is
//! skipped when the gate timeframe ATR sits too far below its own recent
//! average.

use tracing::debug;

use crate::broker::Bar;
use crate::config::StrategyConfig;
use crate::indicators;

/// Gate verdict for one analysis cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MarketActivity {
    Active,
    /// ATR fell below `quiet_ratio` of its rolling mean
    Quiet { atr: f64, mean_atr: f64 },
}

impl MarketActivity {
    pub fn is_quiet(&self) -> bool {
        matches!(self, Self::Quiet { .. })
    }
}

/// Compare current ATR against its mean over `gate_lookback` values.
///
/// Too little history passes the gate open: refusing to trade forever on a
/// fresh feed would be worse than trading without the filter.
pub fn market_activity(gate_bars: &[Bar], cfg: &StrategyConfig) -> MarketActivity {
    let series = match indicators::atr(gate_bars, cfg.gate_atr_period) {
        Some(s) if s.len() >= cfg.gate_lookback => s,
        _ => return MarketActivity::Active,
    };

    let tail = &series[series.len() - cfg.gate_lookback..];
    let mean_atr = tail.iter().sum::<f64>() / cfg.gate_lookback as f64;
    let atr = *series.last().unwrap_or(&0.0);
    if mean_atr > 0.0 && atr < mean_atr * cfg.quiet_ratio {
        debug!(atr, mean_atr, ratio = atr / mean_atr, "quiet market");
        MarketActivity::Quiet { atr, mean_atr }
    } else {
        MarketActivity::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn ranged_bar(i: i64, range: f64) -> Bar {
        Bar {
            timestamp: Utc::now() + Duration::hours(i),
            open: 100.0,
            high: 100.0 + range / 2.0,
            low: 100.0 - range / 2.0,
            close: 100.0,
            volume: 100,
        }
    }

    fn cfg() -> StrategyConfig {
        StrategyConfig {
            gate_atr_period: 5,
            gate_lookback: 20,
            quiet_ratio: 0.7,
            ..StrategyConfig::default()
        }
    }

    #[test]
    fn test_steady_range_is_active() {
        let bars: Vec<Bar> = (0..60).map(|i| ranged_bar(i, 2.0)).collect();
        assert_eq!(market_activity(&bars, &cfg()), MarketActivity::Active);
    }

    #[test]
    fn test_collapsed_range_is_quiet() {
        // Wide ranges, then the range collapses to a tenth
        let mut bars: Vec<Bar> = (0..50).map(|i| ranged_bar(i, 2.0)).collect();
        bars.extend((50..60).map(|i| ranged_bar(i, 0.2)));
        let verdict = market_activity(&bars, &cfg());
        assert!(verdict.is_quiet(), "got {:?}", verdict);
    }

    #[test]
    fn test_ratio_half_trips_seventy_percent_gate() {
        // Current ATR near half the rolling mean must be quiet: the mean
        // still carries the wide regime while the current value has decayed
        let mut bars: Vec<Bar> = (0..40).map(|i| ranged_bar(i, 3.0)).collect();
        bars.extend((40..48).map(|i| ranged_bar(i, 1.0)));
        let verdict = market_activity(&bars, &cfg());
        match verdict {
            MarketActivity::Quiet { atr, mean_atr } => {
                assert!(atr < mean_atr * 0.7);
            }
            MarketActivity::Active => panic!("expected quiet"),
        }
    }

    #[test]
    fn test_short_history_passes_open() {
        let bars: Vec<Bar> = (0..10).map(|i| ranged_bar(i, 0.1)).collect();
        assert_eq!(market_activity(&bars, &cfg()), MarketActivity::Active);
    }
}
