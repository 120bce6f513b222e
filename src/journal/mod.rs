//! Trade journal
//!
//! Records opened and closed trades in a document store keyed by
//! (account, instrument, ticket). Both writes are upserts: the supervisor
//! retries failed writes on later polls and the dashboard may replay events,
//! so duplicates and out-of-order arrival must converge to the same record.

pub mod http;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broker::TradeSide;

pub use http::HttpJournal;
pub use memory::MemoryJournal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Open,
    PartialTaken,
    Closed,
}

/// Identity of one journaled trade
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradeKey {
    pub account: String,
    pub symbol: String,
    pub ticket: u64,
}

/// Fields written when a position opens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRecord {
    #[serde(flatten)]
    pub key: TradeKey,
    pub side: TradeSide,
    pub volume: f64,
    pub open_price: f64,
    pub open_time: DateTime<Utc>,
    /// Trigger tag from the signal
    pub reason: String,
}

/// Fields written when a position closes (or partially closes)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseRecord {
    #[serde(flatten)]
    pub key: TradeKey,
    pub close_price: f64,
    pub close_time: DateTime<Utc>,
    pub profit: f64,
    pub status: TradeStatus,
}

/// Upsert-only persistence boundary
#[async_trait]
pub trait TradeJournal: Send + Sync {
    /// Create the record if absent; never overwrites close fields or
    /// downgrades status on an existing record.
    async fn record_open(&self, open: &OpenRecord) -> Result<()>;

    /// Set close fields and status, creating the record if the open write
    /// never landed.
    async fn record_close(&self, close: &CloseRecord) -> Result<()>;
}

pub type SharedJournal = std::sync::Arc<dyn TradeJournal>;
