//! Bot and strategy configuration
//!
//! Every threshold the strategy variants disagree on lives here as a plain
//! field with a default, so experiments change configuration rather than
//! code. Strategy overrides can be loaded from a JSON file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::broker::Timeframe;

/// Which entry trigger the shared pipeline runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// EMA 9/21 crossover confirmed by a Donchian channel break
    EmaCrossDonchian,
    /// Rejection candle inside a pivot-derived supply/demand zone
    SupplyDemandZone,
    /// Fake breakout out of a detected accumulation range
    AmdManipulation,
    /// Double top/bottom at swing pivots
    ChartPattern,
}

impl Default for TriggerKind {
    fn default() -> Self {
        Self::EmaCrossDonchian
    }
}

impl TriggerKind {
    /// Stable tag used in journal records and log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmaCrossDonchian => "ema_cross_donchian",
            Self::SupplyDemandZone => "supply_demand_zone",
            Self::AmdManipulation => "amd_manipulation",
            Self::ChartPattern => "chart_pattern",
        }
    }
}

/// Strategy parameters shared by every symbol loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Entry trigger variant
    pub trigger: TriggerKind,

    /// Higher timeframe used for the directional bias
    pub trend_timeframe: Timeframe,
    /// Execution timeframe the trigger runs on
    pub exec_timeframe: Timeframe,
    /// Timeframe for the volatility gate ATR
    pub gate_timeframe: Timeframe,

    /// Bias EMA period on the higher timeframe
    pub trend_ema_period: usize,
    /// Extra bars required beyond the period before the bias is defined
    pub trend_buffer_bars: usize,
    /// Treat a close beyond the last swing high/low as a direct bias override
    pub structure_break_override: bool,

    /// Long-period safety EMA on the execution timeframe (0 disables)
    pub king_ema_period: usize,
    pub fast_ema_period: usize,
    pub slow_ema_period: usize,
    pub donchian_period: usize,

    pub adx_period: usize,
    pub adx_threshold: f64,
    pub rsi_period: usize,
    /// RSI must exceed this for longs
    pub rsi_buy_threshold: f64,
    /// RSI must be below this for shorts
    pub rsi_sell_threshold: f64,

    pub atr_period: usize,
    /// Stop distance as ATR multiple when the trigger has no structural anchor
    pub stop_atr_multiplier: f64,
    /// Extra ATR buffer beyond a structural stop anchor
    pub anchor_atr_buffer: f64,
    /// Take-profit distance as a multiple of the stop distance
    pub reward_risk: f64,
    /// Reject signals whose realized reward:risk falls below this
    pub min_reward_risk: f64,

    /// Independent confirmations required before entry
    pub min_confirmations: usize,
    /// Fair-value-gap threshold as an ATR ratio
    pub fvg_atr_ratio: f64,
    /// Accumulation range height as an ATR multiple (AMD trigger)
    pub range_atr_threshold: f64,

    // Squeeze sizing
    pub bb_period: usize,
    pub bb_stddev: f64,
    pub bbw_mean_window: usize,
    pub squeeze_ratio: f64,
    pub expansion_ratio: f64,
    pub squeeze_size_multiplier: f64,
    pub expansion_size_multiplier: f64,

    // Volatility gate
    pub gate_atr_period: usize,
    pub gate_lookback: usize,
    /// Current ATR below this fraction of its rolling mean skips the cycle
    pub quiet_ratio: f64,

    // Money management
    /// Fraction of balance risked per trade
    pub risk_fraction: f64,
    /// Realized daily loss (as balance fraction) that pauses new entries
    pub max_daily_loss: f64,

    // Position management
    /// Profit distance as a multiple of initial risk that arms break-even
    pub breakeven_multiplier: f64,
    /// Fraction of volume closed at break-even
    pub partial_fraction: f64,
    /// Stop buffer past entry at break-even, as an ATR ratio
    pub breakeven_buffer_atr: f64,
    /// Profit in ATR multiples before the trail activates
    pub trail_activation_atr: f64,
    /// Trail distance as an ATR multiple
    pub trail_atr_multiplier: f64,
    /// Force-close on an opposite break of structure
    pub exit_on_reversal: bool,

    /// Bars fetched for the higher timeframe
    pub trend_bars: usize,
    /// Bars fetched for the execution timeframe
    pub exec_bars: usize,
    /// Bars fetched for the gate timeframe
    pub gate_bars: usize,
    /// Fractal window for swing detection
    pub swing_window: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            trigger: TriggerKind::default(),
            trend_timeframe: Timeframe::M5,
            exec_timeframe: Timeframe::M1,
            gate_timeframe: Timeframe::H1,
            trend_ema_period: 50,
            trend_buffer_bars: 5,
            structure_break_override: false,
            king_ema_period: 200,
            fast_ema_period: 9,
            slow_ema_period: 21,
            donchian_period: 20,
            adx_period: 14,
            adx_threshold: 20.0,
            rsi_period: 14,
            rsi_buy_threshold: 55.0,
            rsi_sell_threshold: 45.0,
            atr_period: 14,
            stop_atr_multiplier: 1.5,
            anchor_atr_buffer: 0.5,
            reward_risk: 2.0,
            min_reward_risk: 1.2,
            min_confirmations: 2,
            fvg_atr_ratio: 0.3,
            range_atr_threshold: 1.5,
            bb_period: 20,
            bb_stddev: 2.0,
            bbw_mean_window: 30,
            squeeze_ratio: 0.85,
            expansion_ratio: 1.15,
            squeeze_size_multiplier: 1.5,
            expansion_size_multiplier: 0.5,
            gate_atr_period: 14,
            gate_lookback: 50,
            quiet_ratio: 0.7,
            risk_fraction: 0.01,
            max_daily_loss: 0.05,
            breakeven_multiplier: 1.0,
            partial_fraction: 0.5,
            breakeven_buffer_atr: 0.1,
            trail_activation_atr: 1.5,
            trail_atr_multiplier: 1.2,
            exit_on_reversal: false,
            trend_bars: 150,
            exec_bars: 300,
            gate_bars: 80,
            swing_window: 3,
        }
    }
}

impl StrategyConfig {
    /// Load overrides from a JSON file on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read strategy config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid strategy config {}", path.display()))
    }
}

/// Process-level run mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// In-memory simulated terminal with a synthetic feed
    Simulation,
    /// Real terminal bridge
    Live,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simulation => write!(f, "simulation"),
            Self::Live => write!(f, "live"),
        }
    }
}

/// Top-level bot wiring
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub symbols: Vec<String>,
    /// Pause between analysis cycles
    pub analysis_interval_secs: u64,
    /// Pause between supervision polls of an open position
    pub supervise_interval_secs: u64,
    /// Longer pause after the volatility gate rejects a quiet market
    pub quiet_backoff_secs: u64,
    /// Pause while waiting for the terminal connection to come back
    pub reconnect_wait_secs: u64,
    /// Consecutive disconnected checks before an operator notification
    pub disconnect_alert_cycles: u32,
    pub strategy: StrategyConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["XAUUSD".to_string()],
            analysis_interval_secs: 10,
            supervise_interval_secs: 5,
            quiet_backoff_secs: 300,
            reconnect_wait_secs: 5,
            disconnect_alert_cycles: 24,
            strategy: StrategyConfig::default(),
        }
    }
}
