//! Broker session trait
//!
//! The terminal exposes a single login context for the whole process, so every
//! caller goes through one `SharedSession` mutex. The guard is held for the
//! duration of a single broker call and never across a sleep.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::types::{
    AccountSnapshot, Bar, Deal, OrderRequest, OrderResult, PositionInfo, Quote, SymbolSpec,
    Timeframe,
};

/// Connection to the broker terminal.
///
/// Data-fetch methods return `None` for "unavailable this cycle"; callers
/// skip the cycle rather than treat it as an error. Order-send methods return
/// `Result` because a rejected order carries a reason worth logging.
#[async_trait]
pub trait BrokerSession: Send {
    /// Whether the terminal currently reports a live connection
    async fn is_connected(&self) -> bool;

    /// Current account state; read fresh, never cached by callers
    async fn account(&self) -> Option<AccountSnapshot>;

    /// Trading constraints for a symbol
    async fn symbol_spec(&self, symbol: &str) -> Option<SymbolSpec>;

    /// The `count` most recent bars, oldest first
    async fn bars(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Option<Vec<Bar>>;

    /// Current bid/ask
    async fn quote(&self, symbol: &str) -> Option<Quote>;

    /// Open positions for a symbol
    async fn open_positions(&self, symbol: &str) -> Option<Vec<PositionInfo>>;

    /// A single open position by ticket, `Ok(None)` when it no longer exists
    async fn position(&self, ticket: u64) -> Result<Option<PositionInfo>>;

    /// Submit a market order with protective levels. Single attempt.
    async fn submit_order(&mut self, request: &OrderRequest) -> Result<OrderResult>;

    /// Replace the stop loss / take profit of an open position
    async fn modify_stops(&mut self, ticket: u64, stop_loss: f64, take_profit: f64) -> Result<()>;

    /// Close part (or all) of a position at market
    async fn close_volume(&mut self, ticket: u64, volume: f64) -> Result<OrderResult>;

    /// Settled deals belonging to a position ticket
    async fn deal_history(&self, ticket: u64) -> Option<Vec<Deal>>;

    /// Clean terminal disconnect
    async fn disconnect(&mut self);
}

/// The one process-wide session handle shared by all symbol loops
pub type SharedSession = Arc<Mutex<Box<dyn BrokerSession>>>;

/// Wrap a concrete session into the shared handle
pub fn shared<S: BrokerSession + 'static>(session: S) -> SharedSession {
    Arc::new(Mutex::new(Box::new(session)))
}
