//! Entry-decision pipeline
//!
//! Pure function of the two bar windows: higher-timeframe bias, trigger
//! detection, momentum filters, confirmation count, then stop/target and
//! size-multiplier construction. Any failed stage yields `None`; there is
//! exactly one place that builds a `Signal`.

use tracing::debug;

use crate::broker::{Bar, TradeSide};
use crate::config::{StrategyConfig, TriggerKind};
use crate::indicators::{self, SqueezeState, SwingKind};
use crate::strategy::confirm;
use crate::strategy::trend::{self, TrendBias};
use crate::strategy::trigger;

/// A fully specified entry candidate
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub symbol: String,
    pub side: TradeSide,
    /// Close of the evaluation bar; actual fill may differ
    pub entry_hint: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Which trigger produced this entry
    pub reason: TriggerKind,
    pub confirmation_count: usize,
    /// Volume scale from the squeeze read, applied on top of risk sizing
    pub size_multiplier: f64,
}

/// Run the whole pipeline for one symbol.
///
/// `trend_bars` is the higher-timeframe window, `exec_bars` the execution
/// timeframe. The volatility gate runs before this is called.
pub fn evaluate(
    symbol: &str,
    trend_bars: &[Bar],
    exec_bars: &[Bar],
    cfg: &StrategyConfig,
) -> Option<Signal> {
    let bias = trend::trend_bias(trend_bars, cfg);
    if bias == TrendBias::Neutral {
        return None;
    }

    let atr = *indicators::atr(exec_bars, cfg.atr_period)?.last()?;
    if atr <= 0.0 {
        return None;
    }

    let trig = trigger::detect(exec_bars, atr, cfg)?;
    let aligned = matches!(
        (bias, trig.side),
        (TrendBias::Up, TradeSide::Long) | (TrendBias::Down, TradeSide::Short)
    );
    if !aligned {
        debug!(symbol, %bias, side = %trig.side, "trigger against bias, dropped");
        return None;
    }

    let entry = exec_bars.last()?.close;
    let closes = indicators::closes(exec_bars);

    if !momentum_filters_pass(exec_bars, &closes, entry, trig.side, cfg) {
        return None;
    }

    let confirmations = confirm::evaluate(exec_bars, trig.side, atr, cfg);
    if confirmations.count() < cfg.min_confirmations {
        debug!(
            symbol,
            count = confirmations.count(),
            required = cfg.min_confirmations,
            "confirmation count too low"
        );
        return None;
    }

    let stop_loss = match (trig.side, trig.stop_anchor) {
        (TradeSide::Long, Some(anchor)) => anchor - cfg.anchor_atr_buffer * atr,
        (TradeSide::Long, None) => entry - cfg.stop_atr_multiplier * atr,
        (TradeSide::Short, Some(anchor)) => anchor + cfg.anchor_atr_buffer * atr,
        (TradeSide::Short, None) => entry + cfg.stop_atr_multiplier * atr,
    };
    let stop_distance = match trig.side {
        TradeSide::Long => entry - stop_loss,
        TradeSide::Short => stop_loss - entry,
    };
    if stop_distance <= 0.0 {
        return None;
    }

    let take_profit = capped_target(exec_bars, entry, stop_distance, trig.side, cfg);
    let reward = match trig.side {
        TradeSide::Long => take_profit - entry,
        TradeSide::Short => entry - take_profit,
    };
    if reward / stop_distance < cfg.min_reward_risk {
        debug!(
            symbol,
            rr = reward / stop_distance,
            min = cfg.min_reward_risk,
            "reward:risk below minimum"
        );
        return None;
    }

    Some(Signal {
        symbol: symbol.to_string(),
        side: trig.side,
        entry_hint: entry,
        stop_loss,
        take_profit,
        reason: cfg.trigger,
        confirmation_count: confirmations.count(),
        size_multiplier: size_multiplier(&closes, cfg),
    })
}

/// Long-EMA location, ADX strength and RSI direction checks
fn momentum_filters_pass(
    exec_bars: &[Bar],
    closes: &[f64],
    entry: f64,
    side: TradeSide,
    cfg: &StrategyConfig,
) -> bool {
    if cfg.king_ema_period > 0 {
        let Some(king) = indicators::ema(closes, cfg.king_ema_period) else {
            return false;
        };
        let Some(&king_now) = king.last() else {
            return false;
        };
        let above = entry > king_now;
        if (side == TradeSide::Long && !above) || (side == TradeSide::Short && above) {
            return false;
        }
    }

    if cfg.adx_threshold > 0.0 {
        match indicators::adx(exec_bars, cfg.adx_period) {
            Some(adx) if adx >= cfg.adx_threshold => {}
            _ => return false,
        }
    }

    let Some(rsi) = indicators::rsi(closes, cfg.rsi_period) else {
        return false;
    };
    match side {
        TradeSide::Long => rsi > cfg.rsi_buy_threshold,
        TradeSide::Short => rsi < cfg.rsi_sell_threshold,
    }
}

/// Raw target is stop distance times the configured ratio; a swing level
/// sitting between entry and that target caps it, which is what the minimum
/// reward:risk check then rejects.
fn capped_target(
    bars: &[Bar],
    entry: f64,
    stop_distance: f64,
    side: TradeSide,
    cfg: &StrategyConfig,
) -> f64 {
    let swings = indicators::swing_points(bars, cfg.swing_window);
    match side {
        TradeSide::Long => {
            let raw = entry + cfg.reward_risk * stop_distance;
            let obstacle = swings
                .iter()
                .filter(|s| s.kind == SwingKind::High && s.price > entry)
                .map(|s| s.price)
                .fold(f64::MAX, f64::min);
            raw.min(obstacle)
        }
        TradeSide::Short => {
            let raw = entry - cfg.reward_risk * stop_distance;
            let obstacle = swings
                .iter()
                .filter(|s| s.kind == SwingKind::Low && s.price < entry)
                .map(|s| s.price)
                .fold(f64::MIN, f64::max);
            raw.max(obstacle)
        }
    }
}

fn size_multiplier(closes: &[f64], cfg: &StrategyConfig) -> f64 {
    let state = indicators::bollinger_bandwidth(closes, cfg.bb_period, cfg.bb_stddev)
        .as_deref()
        .and_then(|bw| {
            indicators::squeeze_state(
                bw,
                cfg.bbw_mean_window,
                cfg.squeeze_ratio,
                cfg.expansion_ratio,
            )
        });
    match state {
        Some(SqueezeState::Squeeze) => cfg.squeeze_size_multiplier,
        Some(SqueezeState::Expansion) => cfg.expansion_size_multiplier,
        Some(SqueezeState::Normal) | None => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn bar(i: i64, close: f64, volume: u64) -> Bar {
        Bar {
            timestamp: Utc::now() + Duration::minutes(i),
            open: close - 0.1,
            high: close + 0.2,
            low: close - 0.2,
            close,
            volume,
        }
    }

    fn rising_trend() -> Vec<Bar> {
        (0..80).map(|i| bar(i, 100.0 + 0.5 * i as f64, 100)).collect()
    }

    fn falling_trend() -> Vec<Bar> {
        (0..80).map(|i| bar(i, 140.0 - 0.5 * i as f64, 100)).collect()
    }

    /// Consolidation then a three-bar breakout with a volume spike; fires the
    /// crossover trigger and confirms on fair value gap plus volume.
    fn breakout_exec() -> Vec<Bar> {
        let mut bars: Vec<Bar> = (0..260).map(|i| bar(i, 100.0, 100)).collect();
        bars.push(bar(260, 101.0, 120));
        bars.push(bar(261, 102.0, 150));
        bars.push(bar(262, 103.0, 300));
        bars
    }

    fn cfg() -> StrategyConfig {
        StrategyConfig {
            // The breakout fixture consolidates first, so trend strength and
            // momentum filters are relaxed where the fixture cannot express them
            adx_threshold: 0.0,
            min_confirmations: 2,
            ..StrategyConfig::default()
        }
    }

    #[test]
    fn test_valid_crossover_long() {
        let exec = breakout_exec();
        let sig = evaluate("XAUUSD", &rising_trend(), &exec, &cfg()).expect("signal");

        assert_eq!(sig.side, TradeSide::Long);
        assert_eq!(sig.reason, TriggerKind::EmaCrossDonchian);
        assert!(sig.confirmation_count >= 2);
        assert_eq!(sig.entry_hint, 103.0);
        assert!(sig.stop_loss < sig.entry_hint);

        // Stop is 1.5 ATR below entry, target twice the stop distance above
        let stop_dist = sig.entry_hint - sig.stop_loss;
        let reward = sig.take_profit - sig.entry_hint;
        assert!((reward - 2.0 * stop_dist).abs() < 1e-9);
    }

    #[test]
    fn test_neutral_bias_blocks_everything() {
        let flat: Vec<Bar> = (0..80).map(|i| bar(i, 100.0, 100)).collect();
        assert!(evaluate("XAUUSD", &flat, &breakout_exec(), &cfg()).is_none());
    }

    #[test]
    fn test_direction_consistency_against_bias() {
        // Long trigger under a down bias never becomes a signal
        assert!(evaluate("XAUUSD", &falling_trend(), &breakout_exec(), &cfg()).is_none());
    }

    #[test]
    fn test_confirmation_count_gate() {
        let mut c = cfg();
        c.min_confirmations = 5;
        assert!(evaluate("XAUUSD", &rising_trend(), &breakout_exec(), &c).is_none());
    }

    #[test]
    fn test_reward_risk_rejection_on_capped_target() {
        // A pivot high just above entry caps the target; the realized
        // reward:risk collapses and the signal is rejected.
        let mut exec = breakout_exec();
        exec[200] = bar(200, 103.2, 100);
        let result = evaluate("XAUUSD", &rising_trend(), &exec, &cfg());
        assert!(result.is_none());
    }

    #[test]
    fn test_king_filter_blocks_long_below_long_ema() {
        // Entry below the 200 EMA: decline from far above, then the same
        // breakout shape well under the long average
        let mut exec: Vec<Bar> = (0..200).map(|i| bar(i, 300.0 - i as f64, 100)).collect();
        exec.extend((200..260).map(|i| bar(i, 100.0, 100)));
        exec.push(bar(260, 101.0, 120));
        exec.push(bar(261, 102.0, 150));
        exec.push(bar(262, 103.0, 300));
        assert!(evaluate("XAUUSD", &rising_trend(), &exec, &cfg()).is_none());
    }

    #[test]
    fn test_rsi_filter_blocks_weak_long() {
        let mut c = cfg();
        c.rsi_buy_threshold = 100.0;
        assert!(evaluate("XAUUSD", &rising_trend(), &breakout_exec(), &c).is_none());
    }

    #[test]
    fn test_squeeze_multiplier_scales_up() {
        let mut c = cfg();
        // Volatile closes whose dispersion collapses near the end
        let mut closes: Vec<f64> = (0..80)
            .map(|i| 100.0 + if i % 2 == 0 { 2.0 } else { -2.0 })
            .collect();
        closes.extend(std::iter::repeat(100.0).take(25));
        c.bbw_mean_window = 30;
        assert_eq!(size_multiplier(&closes, &c), c.squeeze_size_multiplier);
    }
}
