//! Higher-timeframe directional bias

use tracing::debug;

use crate::broker::Bar;
use crate::config::StrategyConfig;
use crate::indicators::{self, SwingKind};

/// Directional context from the higher timeframe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendBias {
    Up,
    Down,
    /// No edge, or not enough history to say
    Neutral,
}

impl std::fmt::Display for TrendBias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// Classify the higher-timeframe bias.
///
/// Price on the closed side of a rising (falling) EMA gives an up (down)
/// bias. Both conditions must agree; anything mixed is neutral. With
/// `structure_break_override` enabled, a close beyond the most recent swing
/// extreme takes priority over the EMA read.
pub fn trend_bias(bars: &[Bar], cfg: &StrategyConfig) -> TrendBias {
    let closes = indicators::closes(bars);
    let ema = match indicators::ema(&closes, cfg.trend_ema_period) {
        Some(e) if e.len() > cfg.trend_buffer_bars => e,
        _ => return TrendBias::Neutral,
    };

    let last_close = *closes.last().unwrap_or(&0.0);
    let ema_now = *ema.last().unwrap_or(&0.0);
    let ema_then = ema[ema.len() - 1 - cfg.trend_buffer_bars];

    if cfg.structure_break_override {
        let swings = indicators::swing_points(bars, cfg.swing_window);
        // Ignore pivots formed by the evaluation bar's own neighborhood
        let cutoff = bars.len().saturating_sub(cfg.swing_window + 1);
        if let Some(high) = indicators::last_swing(&swings, SwingKind::High) {
            if high.index < cutoff && last_close > high.price {
                debug!(price = last_close, swing = high.price, "structure break up");
                return TrendBias::Up;
            }
        }
        if let Some(low) = indicators::last_swing(&swings, SwingKind::Low) {
            if low.index < cutoff && last_close < low.price {
                debug!(price = last_close, swing = low.price, "structure break down");
                return TrendBias::Down;
            }
        }
    }

    if last_close > ema_now && ema_now > ema_then {
        TrendBias::Up
    } else if last_close < ema_now && ema_now < ema_then {
        TrendBias::Down
    } else {
        TrendBias::Neutral
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn bar(i: i64, close: f64) -> Bar {
        Bar {
            timestamp: Utc::now() + Duration::minutes(5 * i),
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume: 100,
        }
    }

    fn cfg() -> StrategyConfig {
        StrategyConfig {
            trend_ema_period: 10,
            trend_buffer_bars: 3,
            ..StrategyConfig::default()
        }
    }

    #[test]
    fn test_rising_series_is_up() {
        let bars: Vec<Bar> = (0..60).map(|i| bar(i, 100.0 + i as f64)).collect();
        assert_eq!(trend_bias(&bars, &cfg()), TrendBias::Up);
    }

    #[test]
    fn test_falling_series_is_down() {
        let bars: Vec<Bar> = (0..60).map(|i| bar(i, 200.0 - i as f64)).collect();
        assert_eq!(trend_bias(&bars, &cfg()), TrendBias::Down);
    }

    #[test]
    fn test_flat_series_is_neutral() {
        let bars: Vec<Bar> = (0..60).map(|i| bar(i, 100.0)).collect();
        assert_eq!(trend_bias(&bars, &cfg()), TrendBias::Neutral);
    }

    #[test]
    fn test_short_history_is_neutral() {
        let bars: Vec<Bar> = (0..5).map(|i| bar(i, 100.0 + i as f64)).collect();
        assert_eq!(trend_bias(&bars, &cfg()), TrendBias::Neutral);
    }

    #[test]
    fn test_structure_break_overrides_ema_read() {
        let mut c = cfg();
        c.structure_break_override = true;
        c.swing_window = 2;

        // Steep decline, then a small base with a pivot high at 106.5, then a
        // close above that pivot while price is still under the heavy EMA.
        let mut bars: Vec<Bar> = (0..31).map(|i| bar(i, 180.0 - 2.5 * i as f64)).collect();
        bars.extend((31..36).map(|i| bar(i, 105.0)));
        bars[33] = bar(33, 106.0);
        bars.push(bar(36, 107.0));

        assert_eq!(trend_bias(&bars, &c), TrendBias::Up);
        // Without the override the falling EMA still reads the decline
        c.structure_break_override = false;
        assert_eq!(trend_bias(&bars, &c), TrendBias::Down);
    }
}
