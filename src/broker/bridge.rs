//! Terminal bridge session
//!
//! HTTP client for a broker terminal REST bridge (the thin gateway process
//! sitting in front of the single-login terminal). Token-based auth; every
//! call is a single attempt; retries belong to the caller's next poll cycle.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::session::BrokerSession;
use super::types::{
    AccountSnapshot, Bar, Deal, OrderRequest, OrderResult, PositionInfo, Quote, SymbolSpec,
    TradeSide, Timeframe,
};

// ============================================================================
// Wire models
// ============================================================================

#[derive(Debug, Serialize)]
struct LoginBody<'a> {
    account: u64,
    password: &'a str,
    server: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginReply {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HealthReply {
    connected: bool,
}

#[derive(Debug, Deserialize)]
struct AccountReply {
    account: u64,
    balance: f64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct BarWire {
    /// Unix seconds of the bar open
    time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    tick_volume: u64,
}

#[derive(Debug, Deserialize)]
struct QuoteWire {
    bid: f64,
    ask: f64,
}

#[derive(Debug, Deserialize)]
struct PositionWire {
    ticket: u64,
    symbol: String,
    /// "buy" or "sell"
    side: String,
    volume: f64,
    price_open: f64,
    #[serde(default)]
    sl: f64,
    #[serde(default)]
    tp: f64,
    #[serde(default)]
    profit: f64,
    time: i64,
}

#[derive(Debug, Deserialize)]
struct DealWire {
    ticket: u64,
    price: f64,
    profit: f64,
    time: i64,
}

#[derive(Debug, Serialize)]
struct OrderBody<'a> {
    symbol: &'a str,
    side: &'a str,
    volume: f64,
    sl: f64,
    tp: f64,
    comment: &'a str,
}

#[derive(Debug, Deserialize)]
struct OrderReply {
    #[serde(default)]
    ticket: Option<u64>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct StopsBody {
    sl: f64,
    tp: f64,
}

#[derive(Debug, Serialize)]
struct CloseBody {
    volume: f64,
}

fn wire_time(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

fn wire_side(side: &str) -> Option<TradeSide> {
    match side {
        "buy" => Some(TradeSide::Long),
        "sell" => Some(TradeSide::Short),
        _ => None,
    }
}

fn position_from_wire(w: PositionWire) -> Option<PositionInfo> {
    Some(PositionInfo {
        ticket: w.ticket,
        symbol: w.symbol,
        side: wire_side(&w.side)?,
        volume: w.volume,
        entry_price: w.price_open,
        stop_loss: w.sl,
        take_profit: w.tp,
        profit: w.profit,
        opened_at: wire_time(w.time),
    })
}

// ============================================================================
// Session
// ============================================================================

/// Connection parameters for the terminal bridge
#[derive(Debug, Clone)]
pub struct BridgeCredentials {
    pub base_url: String,
    pub account: u64,
    pub password: String,
    pub server: String,
}

/// `BrokerSession` over the terminal REST bridge
pub struct BridgeSession {
    client: Client,
    base_url: String,
    token: String,
    account: u64,
}

impl BridgeSession {
    /// Authenticate against the bridge. Startup-fatal on failure; restart
    /// policy belongs to whatever supervises the process.
    pub async fn connect(credentials: &BridgeCredentials) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("failed to build HTTP client")?;

        info!(
            "Connecting to terminal bridge at {} (account {})",
            credentials.base_url, credentials.account
        );

        let reply: LoginReply = client
            .post(format!("{}/login", credentials.base_url))
            .json(&LoginBody {
                account: credentials.account,
                password: &credentials.password,
                server: &credentials.server,
            })
            .send()
            .await
            .context("login request failed")?
            .json()
            .await
            .context("invalid login reply")?;

        if let Some(error) = reply.error {
            bail!("terminal login rejected: {}", error);
        }
        let token = reply.token.ok_or_else(|| anyhow!("no session token returned"))?;

        info!("Terminal session established");
        Ok(Self {
            client,
            base_url: credentials.base_url.clone(),
            token,
            account: credentials.account,
        })
    }

    /// GET a JSON payload; `None` means "unavailable this cycle"
    async fn fetch<T: serde::de::DeserializeOwned>(&self, path: &str) -> Option<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = match self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                debug!("bridge fetch {} failed: {}", path, e);
                return None;
            }
        };
        if !response.status().is_success() {
            debug!("bridge fetch {} returned {}", path, response.status());
            return None;
        }
        match response.json().await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("bridge fetch {} returned invalid body: {}", path, e);
                None
            }
        }
    }

    async fn send_order_reply(&self, request: reqwest::RequestBuilder) -> Result<OrderReply> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .context("bridge request failed")?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("bridge returned {}: {}", status, body);
        }
        serde_json::from_str(&body).context("invalid bridge reply")
    }
}

#[async_trait]
impl BrokerSession for BridgeSession {
    async fn is_connected(&self) -> bool {
        self.fetch::<HealthReply>("/health")
            .await
            .map(|h| h.connected)
            .unwrap_or(false)
    }

    async fn account(&self) -> Option<AccountSnapshot> {
        let reply: AccountReply = self.fetch("/account").await?;
        Some(AccountSnapshot {
            account: reply.account,
            balance: reply.balance,
            currency: reply.currency,
        })
    }

    async fn symbol_spec(&self, symbol: &str) -> Option<SymbolSpec> {
        self.fetch(&format!("/symbols/{}", symbol)).await
    }

    async fn bars(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Option<Vec<Bar>> {
        let wires: Vec<BarWire> = self
            .fetch(&format!(
                "/bars?symbol={}&timeframe={}&count={}",
                symbol, timeframe, count
            ))
            .await?;
        if wires.is_empty() {
            return None;
        }
        Some(
            wires
                .into_iter()
                .map(|w| Bar {
                    timestamp: wire_time(w.time),
                    open: w.open,
                    high: w.high,
                    low: w.low,
                    close: w.close,
                    volume: w.tick_volume,
                })
                .collect(),
        )
    }

    async fn quote(&self, symbol: &str) -> Option<Quote> {
        let w: QuoteWire = self.fetch(&format!("/quote/{}", symbol)).await?;
        Some(Quote {
            bid: w.bid,
            ask: w.ask,
        })
    }

    async fn open_positions(&self, symbol: &str) -> Option<Vec<PositionInfo>> {
        let wires: Vec<PositionWire> =
            self.fetch(&format!("/positions?symbol={}", symbol)).await?;
        Some(wires.into_iter().filter_map(position_from_wire).collect())
    }

    async fn position(&self, ticket: u64) -> Result<Option<PositionInfo>> {
        let url = format!("{}/positions/{}", self.base_url, ticket);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("position query failed")?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            bail!("position query returned {}", response.status());
        }
        let wire: PositionWire = response.json().await.context("invalid position body")?;
        Ok(position_from_wire(wire))
    }

    async fn submit_order(&mut self, request: &OrderRequest) -> Result<OrderResult> {
        let side = match request.side {
            TradeSide::Long => "buy",
            TradeSide::Short => "sell",
        };
        let body = OrderBody {
            symbol: &request.symbol,
            side,
            volume: request.volume,
            sl: request.stop_loss,
            tp: request.take_profit,
            comment: &request.comment,
        };
        let reply = self
            .send_order_reply(
                self.client
                    .post(format!("{}/orders", self.base_url))
                    .json(&body),
            )
            .await?;
        if let Some(error) = reply.error {
            bail!("order rejected: {}", error);
        }
        Ok(OrderResult {
            ticket: reply.ticket.ok_or_else(|| anyhow!("no ticket in fill reply"))?,
            fill_price: reply.price.ok_or_else(|| anyhow!("no price in fill reply"))?,
        })
    }

    async fn modify_stops(&mut self, ticket: u64, stop_loss: f64, take_profit: f64) -> Result<()> {
        let reply = self
            .send_order_reply(
                self.client
                    .patch(format!("{}/positions/{}/stops", self.base_url, ticket))
                    .json(&StopsBody {
                        sl: stop_loss,
                        tp: take_profit,
                    }),
            )
            .await?;
        if let Some(error) = reply.error {
            bail!("modify rejected: {}", error);
        }
        Ok(())
    }

    async fn close_volume(&mut self, ticket: u64, volume: f64) -> Result<OrderResult> {
        let reply = self
            .send_order_reply(
                self.client
                    .post(format!("{}/positions/{}/close", self.base_url, ticket))
                    .json(&CloseBody { volume }),
            )
            .await?;
        if let Some(error) = reply.error {
            bail!("close rejected: {}", error);
        }
        Ok(OrderResult {
            ticket,
            fill_price: reply.price.ok_or_else(|| anyhow!("no price in close reply"))?,
        })
    }

    async fn deal_history(&self, ticket: u64) -> Option<Vec<Deal>> {
        let wires: Vec<DealWire> = self.fetch(&format!("/history/{}", ticket)).await?;
        Some(
            wires
                .into_iter()
                .map(|w| Deal {
                    ticket: w.ticket,
                    price: w.price,
                    profit: w.profit,
                    time: wire_time(w.time),
                })
                .collect(),
        )
    }

    async fn disconnect(&mut self) {
        let url = format!("{}/logout", self.base_url);
        if let Err(e) = self.client.post(&url).bearer_auth(&self.token).send().await {
            warn!("bridge logout failed: {}", e);
        } else {
            info!("Terminal session {} closed", self.account);
        }
    }
}
