//! In-memory journal backend for simulation runs and tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{CloseRecord, OpenRecord, TradeJournal, TradeKey, TradeStatus};
use crate::broker::TradeSide;

/// One fully merged journal document
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub key: TradeKey,
    pub side: Option<TradeSide>,
    pub volume: Option<f64>,
    pub open_price: Option<f64>,
    pub open_time: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub close_price: Option<f64>,
    pub close_time: Option<DateTime<Utc>>,
    pub profit: Option<f64>,
    pub status: TradeStatus,
}

/// HashMap-backed journal with the same upsert shape as the store backend.
/// Clones share the map so tests can inspect what the bot wrote.
#[derive(Clone, Default)]
pub struct MemoryJournal {
    records: Arc<Mutex<HashMap<TradeKey, TradeRecord>>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &TradeKey) -> Option<TradeRecord> {
        self.records.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TradeJournal for MemoryJournal {
    async fn record_open(&self, open: &OpenRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let entry = records.entry(open.key.clone()).or_insert_with(|| TradeRecord {
            key: open.key.clone(),
            side: None,
            volume: None,
            open_price: None,
            open_time: None,
            reason: None,
            close_price: None,
            close_time: None,
            profit: None,
            status: TradeStatus::Open,
        });
        // Set-on-insert semantics: only fill what is still missing, so a
        // replayed open never clobbers a close that already landed
        entry.side.get_or_insert(open.side);
        entry.volume.get_or_insert(open.volume);
        entry.open_price.get_or_insert(open.open_price);
        entry.open_time.get_or_insert(open.open_time);
        entry.reason.get_or_insert_with(|| open.reason.clone());
        Ok(())
    }

    async fn record_close(&self, close: &CloseRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let entry = records.entry(close.key.clone()).or_insert_with(|| TradeRecord {
            key: close.key.clone(),
            side: None,
            volume: None,
            open_price: None,
            open_time: None,
            reason: None,
            close_price: None,
            close_time: None,
            profit: None,
            status: TradeStatus::Open,
        });
        entry.close_price = Some(close.close_price);
        entry.close_time = Some(close.close_time);
        entry.profit = Some(close.profit);
        entry.status = close.status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> TradeKey {
        TradeKey {
            account: "10001".to_string(),
            symbol: "XAUUSD".to_string(),
            ticket: 42,
        }
    }

    fn open() -> OpenRecord {
        OpenRecord {
            key: key(),
            side: TradeSide::Long,
            volume: 0.5,
            open_price: 2000.0,
            open_time: Utc::now(),
            reason: "ema_cross_donchian".to_string(),
        }
    }

    fn close(profit: f64) -> CloseRecord {
        CloseRecord {
            key: key(),
            close_price: 2010.0,
            close_time: Utc::now(),
            profit,
            status: TradeStatus::Closed,
        }
    }

    #[tokio::test]
    async fn test_open_then_close_round_trip() {
        let journal = MemoryJournal::new();
        journal.record_open(&open()).await.unwrap();
        journal.record_close(&close(500.0)).await.unwrap();

        let record = journal.get(&key()).unwrap();
        assert_eq!(record.status, TradeStatus::Closed);
        assert_eq!(record.profit, Some(500.0));
        assert_eq!(record.open_price, Some(2000.0));
    }

    #[tokio::test]
    async fn test_close_before_open_still_closed() {
        let journal = MemoryJournal::new();
        journal.record_close(&close(500.0)).await.unwrap();
        journal.record_open(&open()).await.unwrap();

        let record = journal.get(&key()).unwrap();
        assert_eq!(record.status, TradeStatus::Closed);
        assert_eq!(record.profit, Some(500.0));
        // The late open fills the open-side fields without downgrading
        assert_eq!(record.open_price, Some(2000.0));
    }

    #[tokio::test]
    async fn test_duplicate_writes_converge() {
        let journal = MemoryJournal::new();
        journal.record_open(&open()).await.unwrap();
        journal.record_open(&open()).await.unwrap();
        journal.record_close(&close(500.0)).await.unwrap();
        journal.record_close(&close(500.0)).await.unwrap();

        assert_eq!(journal.len(), 1);
        let record = journal.get(&key()).unwrap();
        assert_eq!(record.status, TradeStatus::Closed);
        assert_eq!(record.profit, Some(500.0));
    }
}
