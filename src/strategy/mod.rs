//! Signal generation pipeline: bias, gate, trigger, confirmations, signal

pub mod confirm;
pub mod signal;
pub mod trend;
pub mod trigger;
pub mod volatility;

pub use confirm::Confirmations;
pub use signal::{evaluate, Signal};
pub use trend::{trend_bias, TrendBias};
pub use trigger::Trigger;
pub use volatility::{market_activity, MarketActivity};
