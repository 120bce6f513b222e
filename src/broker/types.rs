//! Broker Terminal Data Types
//!
//! Value types exchanged with the broker session: bars, quotes, positions,
//! orders and symbol constraints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single OHLCV price bar
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Tick volume for the bar
    pub volume: u64,
}

impl Bar {
    /// True range against the previous bar's close
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }

    /// Candle body magnitude
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}

/// Current bid/ask quote
#[derive(Debug, Clone, Copy)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
}

impl Quote {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }
}

/// Chart timeframe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
}

impl Timeframe {
    /// Duration of one bar in seconds
    pub fn seconds(&self) -> i64 {
        match self {
            Self::M1 => 60,
            Self::M5 => 300,
            Self::M15 => 900,
            Self::M30 => 1800,
            Self::H1 => 3600,
            Self::H4 => 14400,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::M1 => "M1",
            Self::M5 => "M5",
            Self::M15 => "M15",
            Self::M30 => "M30",
            Self::H1 => "H1",
            Self::H4 => "H4",
        };
        write!(f, "{}", s)
    }
}

/// Direction of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Long,
    Short,
}

impl TradeSide {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// An open position as reported by the broker
#[derive(Debug, Clone)]
pub struct PositionInfo {
    /// Broker-assigned position ticket
    pub ticket: u64,
    pub symbol: String,
    pub side: TradeSide,
    /// Current volume in lots (shrinks on partial close)
    pub volume: f64,
    pub entry_price: f64,
    /// Current stop loss (0.0 when unset)
    pub stop_loss: f64,
    /// Current take profit (0.0 when unset)
    pub take_profit: f64,
    /// Floating profit in account currency
    pub profit: f64,
    pub opened_at: DateTime<Utc>,
}

/// A settled deal from the broker's trade history
#[derive(Debug, Clone)]
pub struct Deal {
    pub ticket: u64,
    pub price: f64,
    /// Realized profit contribution (commission/swap included by the broker)
    pub profit: f64,
    pub time: DateTime<Utc>,
}

/// Market order request with protective levels
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: TradeSide,
    pub volume: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Order comment shown in the terminal journal
    pub comment: String,
}

/// Result of a successfully filled order
#[derive(Debug, Clone)]
pub struct OrderResult {
    /// Ticket of the resulting position (or closing deal)
    pub ticket: u64,
    pub fill_price: f64,
}

/// Per-symbol trading constraints published by the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolSpec {
    pub symbol: String,
    /// Minimum order volume in lots
    pub volume_min: f64,
    /// Maximum order volume in lots
    pub volume_max: f64,
    /// Volume granularity in lots
    pub volume_step: f64,
    /// Account-currency value of a one-unit price move per lot
    pub value_per_unit: f64,
    /// Minimum distance between price and protective levels
    pub min_stop_distance: f64,
    /// Price decimal digits, for display rounding
    pub digits: u32,
}

impl SymbolSpec {
    /// Reasonable defaults for gold CFDs, used by simulation and tests
    pub fn xauusd() -> Self {
        Self {
            symbol: "XAUUSD".to_string(),
            volume_min: 0.01,
            volume_max: 100.0,
            volume_step: 0.01,
            value_per_unit: 100.0,
            min_stop_distance: 0.5,
            digits: 2,
        }
    }
}

/// Snapshot of account state, fetched fresh each cycle
#[derive(Debug, Clone)]
pub struct AccountSnapshot {
    /// Login/account number
    pub account: u64,
    pub balance: f64,
    pub currency: String,
}
