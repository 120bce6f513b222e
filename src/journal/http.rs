//! Journal backend over the document-store HTTP service
//!
//! The store service owns the real upsert (keyed on account, symbol and
//! ticket); this client only ships the records. Failures surface as errors
//! so the supervisor can retry on its next poll.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use super::{CloseRecord, OpenRecord, TradeJournal};

pub struct HttpJournal {
    client: Client,
    base_url: String,
}

impl HttpJournal {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl TradeJournal for HttpJournal {
    async fn record_open(&self, open: &OpenRecord) -> Result<()> {
        self.client
            .post(format!("{}/trades/open", self.base_url))
            .json(open)
            .send()
            .await
            .context("journal open request failed")?
            .error_for_status()
            .context("journal rejected open record")?;
        Ok(())
    }

    async fn record_close(&self, close: &CloseRecord) -> Result<()> {
        self.client
            .post(format!("{}/trades/close", self.base_url))
            .json(close)
            .send()
            .await
            .context("journal close request failed")?
            .error_for_status()
            .context("journal rejected close record")?;
        Ok(())
    }
}
