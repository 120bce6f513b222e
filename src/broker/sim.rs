//! Simulated broker session
//!
//! Deterministic in-memory terminal used by simulation mode and the test
//! suite. Bars are scripted through the control handle; protective levels are
//! filled against each pushed bar the way the terminal would fill them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::session::BrokerSession;
use super::types::{
    AccountSnapshot, Bar, Deal, OrderRequest, OrderResult, PositionInfo, Quote, SymbolSpec,
    TradeSide, Timeframe,
};

#[derive(Debug)]
struct SimState {
    connected: bool,
    account: AccountSnapshot,
    specs: HashMap<String, SymbolSpec>,
    series: HashMap<(String, Timeframe), Vec<Bar>>,
    quotes: HashMap<String, Quote>,
    positions: HashMap<u64, PositionInfo>,
    deals: HashMap<u64, Vec<Deal>>,
    next_ticket: u64,
    /// When set, the next submit/modify/close fails once (failure-path tests)
    fail_next_order: bool,
    /// When set, the next open_positions query reports unavailable once
    fail_next_position_scan: bool,
    spread: f64,
}

/// Simulated broker session. Clones share the same underlying state, so a
/// test can keep one handle for scripting while the bot owns the other.
#[derive(Clone)]
pub struct SimSession {
    state: Arc<StdMutex<SimState>>,
}

impl SimSession {
    pub fn new(balance: f64) -> Self {
        Self {
            state: Arc::new(StdMutex::new(SimState {
                connected: true,
                account: AccountSnapshot {
                    account: 10_000_001,
                    balance,
                    currency: "USD".to_string(),
                },
                specs: HashMap::new(),
                series: HashMap::new(),
                quotes: HashMap::new(),
                positions: HashMap::new(),
                deals: HashMap::new(),
                next_ticket: 1000,
                fail_next_order: false,
                fail_next_position_scan: false,
                spread: 0.2,
            })),
        }
    }

    pub fn with_symbol(self, spec: SymbolSpec) -> Self {
        {
            let mut st = self.state.lock().unwrap();
            st.specs.insert(spec.symbol.clone(), spec);
        }
        self
    }

    /// Replace an entire scripted series
    pub fn set_series(&self, symbol: &str, timeframe: Timeframe, bars: Vec<Bar>) {
        let mut st = self.state.lock().unwrap();
        if let Some(last) = bars.last() {
            let half = st.spread / 2.0;
            st.quotes.insert(
                symbol.to_string(),
                Quote {
                    bid: last.close - half,
                    ask: last.close + half,
                },
            );
        }
        st.series.insert((symbol.to_string(), timeframe), bars);
    }

    /// Append one bar, move the quote to its close, and fill any protective
    /// level the bar's range crossed.
    pub fn push_bar(&self, symbol: &str, timeframe: Timeframe, bar: Bar) {
        let mut st = self.state.lock().unwrap();
        let half = st.spread / 2.0;
        st.quotes.insert(
            symbol.to_string(),
            Quote {
                bid: bar.close - half,
                ask: bar.close + half,
            },
        );
        st.series
            .entry((symbol.to_string(), timeframe))
            .or_default()
            .push(bar);
        fill_protective_levels(&mut st, symbol, &bar);
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.lock().unwrap().connected = connected;
    }

    pub fn fail_next_order(&self) {
        self.state.lock().unwrap().fail_next_order = true;
    }

    pub fn fail_next_position_scan(&self) {
        self.state.lock().unwrap().fail_next_position_scan = true;
    }

    pub fn open_position_count(&self, symbol: &str) -> usize {
        let st = self.state.lock().unwrap();
        st.positions.values().filter(|p| p.symbol == symbol).count()
    }

    /// Force-close a position at the current quote (manual close from the
    /// terminal side, which the bot must detect by polling)
    pub fn force_close(&self, ticket: u64) {
        let mut st = self.state.lock().unwrap();
        if let Some(pos) = st.positions.remove(&ticket) {
            let quote = st.quotes.get(&pos.symbol).copied().unwrap_or(Quote {
                bid: pos.entry_price,
                ask: pos.entry_price,
            });
            let price = match pos.side {
                TradeSide::Long => quote.bid,
                TradeSide::Short => quote.ask,
            };
            record_close_deal(&mut st, &pos, price, pos.volume);
        }
    }
}

fn floating_profit(pos: &PositionInfo, quote: Quote, spec: &SymbolSpec) -> f64 {
    let distance = match pos.side {
        TradeSide::Long => quote.bid - pos.entry_price,
        TradeSide::Short => pos.entry_price - quote.ask,
    };
    distance * pos.volume * spec.value_per_unit
}

fn record_close_deal(st: &mut SimState, pos: &PositionInfo, price: f64, volume: f64) {
    let spec = st
        .specs
        .get(&pos.symbol)
        .cloned()
        .unwrap_or_else(SymbolSpec::xauusd);
    let distance = match pos.side {
        TradeSide::Long => price - pos.entry_price,
        TradeSide::Short => pos.entry_price - price,
    };
    let profit = distance * volume * spec.value_per_unit;
    st.account.balance += profit;
    st.deals.entry(pos.ticket).or_default().push(Deal {
        ticket: pos.ticket,
        price,
        profit,
        time: Utc::now(),
    });
}

/// Fill stop loss / take profit orders the bar's range touched, stop first;
/// the pessimistic fill a real terminal applies when both sit inside one bar.
fn fill_protective_levels(st: &mut SimState, symbol: &str, bar: &Bar) {
    let tickets: Vec<u64> = st
        .positions
        .values()
        .filter(|p| p.symbol == symbol)
        .map(|p| p.ticket)
        .collect();

    for ticket in tickets {
        let pos = match st.positions.get(&ticket) {
            Some(p) => p.clone(),
            None => continue,
        };

        let fill = match pos.side {
            TradeSide::Long => {
                if pos.stop_loss > 0.0 && bar.low <= pos.stop_loss {
                    Some(pos.stop_loss)
                } else if pos.take_profit > 0.0 && bar.high >= pos.take_profit {
                    Some(pos.take_profit)
                } else {
                    None
                }
            }
            TradeSide::Short => {
                if pos.stop_loss > 0.0 && bar.high >= pos.stop_loss {
                    Some(pos.stop_loss)
                } else if pos.take_profit > 0.0 && bar.low <= pos.take_profit {
                    Some(pos.take_profit)
                } else {
                    None
                }
            }
        };

        if let Some(price) = fill {
            debug!("sim fill: ticket {} @ {:.2}", ticket, price);
            let pos = st.positions.remove(&ticket).unwrap();
            record_close_deal(st, &pos, price, pos.volume);
        }
    }
}

#[async_trait]
impl BrokerSession for SimSession {
    async fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    async fn account(&self) -> Option<AccountSnapshot> {
        let st = self.state.lock().unwrap();
        if !st.connected {
            return None;
        }
        Some(st.account.clone())
    }

    async fn symbol_spec(&self, symbol: &str) -> Option<SymbolSpec> {
        self.state.lock().unwrap().specs.get(symbol).cloned()
    }

    async fn bars(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Option<Vec<Bar>> {
        let st = self.state.lock().unwrap();
        if !st.connected {
            return None;
        }
        let series = st.series.get(&(symbol.to_string(), timeframe))?;
        if series.is_empty() {
            return None;
        }
        let start = series.len().saturating_sub(count);
        Some(series[start..].to_vec())
    }

    async fn quote(&self, symbol: &str) -> Option<Quote> {
        let st = self.state.lock().unwrap();
        if !st.connected {
            return None;
        }
        st.quotes.get(symbol).copied()
    }

    async fn open_positions(&self, symbol: &str) -> Option<Vec<PositionInfo>> {
        let mut st = self.state.lock().unwrap();
        if !st.connected {
            return None;
        }
        if st.fail_next_position_scan {
            st.fail_next_position_scan = false;
            return None;
        }
        let mut out: Vec<PositionInfo> = st
            .positions
            .values()
            .filter(|p| p.symbol == symbol)
            .cloned()
            .collect();
        for pos in &mut out {
            if let (Some(quote), Some(spec)) =
                (st.quotes.get(&pos.symbol), st.specs.get(&pos.symbol))
            {
                pos.profit = floating_profit(pos, *quote, spec);
            }
        }
        Some(out)
    }

    async fn position(&self, ticket: u64) -> Result<Option<PositionInfo>> {
        let st = self.state.lock().unwrap();
        if !st.connected {
            bail!("terminal not connected");
        }
        let mut pos = match st.positions.get(&ticket) {
            Some(p) => p.clone(),
            None => return Ok(None),
        };
        if let (Some(quote), Some(spec)) = (st.quotes.get(&pos.symbol), st.specs.get(&pos.symbol)) {
            pos.profit = floating_profit(&pos, *quote, spec);
        }
        Ok(Some(pos))
    }

    async fn submit_order(&mut self, request: &OrderRequest) -> Result<OrderResult> {
        let mut st = self.state.lock().unwrap();
        if !st.connected {
            bail!("terminal not connected");
        }
        if st.fail_next_order {
            st.fail_next_order = false;
            bail!("order rejected: requote");
        }
        let quote = st
            .quotes
            .get(&request.symbol)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no quote for {}", request.symbol))?;
        let fill_price = match request.side {
            TradeSide::Long => quote.ask,
            TradeSide::Short => quote.bid,
        };
        st.next_ticket += 1;
        let ticket = st.next_ticket;
        st.positions.insert(
            ticket,
            PositionInfo {
                ticket,
                symbol: request.symbol.clone(),
                side: request.side,
                volume: request.volume,
                entry_price: fill_price,
                stop_loss: request.stop_loss,
                take_profit: request.take_profit,
                profit: 0.0,
                opened_at: Utc::now(),
            },
        );
        Ok(OrderResult { ticket, fill_price })
    }

    async fn modify_stops(&mut self, ticket: u64, stop_loss: f64, take_profit: f64) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        if st.fail_next_order {
            st.fail_next_order = false;
            bail!("modify rejected");
        }
        match st.positions.get_mut(&ticket) {
            Some(pos) => {
                pos.stop_loss = stop_loss;
                pos.take_profit = take_profit;
                Ok(())
            }
            None => bail!("position {} not found", ticket),
        }
    }

    async fn close_volume(&mut self, ticket: u64, volume: f64) -> Result<OrderResult> {
        let mut st = self.state.lock().unwrap();
        if st.fail_next_order {
            st.fail_next_order = false;
            bail!("close rejected");
        }
        let pos = match st.positions.get(&ticket) {
            Some(p) => p.clone(),
            None => bail!("position {} not found", ticket),
        };
        let quote = st.quotes.get(&pos.symbol).copied().unwrap_or(Quote {
            bid: pos.entry_price,
            ask: pos.entry_price,
        });
        let price = match pos.side {
            TradeSide::Long => quote.bid,
            TradeSide::Short => quote.ask,
        };
        let closed = volume.min(pos.volume);
        record_close_deal(&mut st, &pos, price, closed);
        if closed >= pos.volume - 1e-9 {
            st.positions.remove(&ticket);
        } else if let Some(p) = st.positions.get_mut(&ticket) {
            p.volume -= closed;
        }
        Ok(OrderResult {
            ticket,
            fill_price: price,
        })
    }

    async fn deal_history(&self, ticket: u64) -> Option<Vec<Deal>> {
        self.state.lock().unwrap().deals.get(&ticket).cloned()
    }

    async fn disconnect(&mut self) {
        self.state.lock().unwrap().connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(close: f64) -> Bar {
        Bar {
            timestamp: Utc::now(),
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume: 100,
        }
    }

    fn long_request(volume: f64, sl: f64, tp: f64) -> OrderRequest {
        OrderRequest {
            symbol: "XAUUSD".to_string(),
            side: TradeSide::Long,
            volume,
            stop_loss: sl,
            take_profit: tp,
            comment: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_order_lifecycle() {
        let sim = SimSession::new(10_000.0).with_symbol(SymbolSpec::xauusd());
        let mut session = sim.clone();
        sim.push_bar("XAUUSD", Timeframe::M1, bar(2000.0));

        let result = session
            .submit_order(&long_request(0.1, 1990.0, 2020.0))
            .await
            .unwrap();
        assert!(result.fill_price > 2000.0); // ask side

        let pos = session.position(result.ticket).await.unwrap().unwrap();
        assert_eq!(pos.side, TradeSide::Long);
        assert_eq!(pos.stop_loss, 1990.0);
    }

    #[tokio::test]
    async fn test_stop_fill_on_pushed_bar() {
        let sim = SimSession::new(10_000.0).with_symbol(SymbolSpec::xauusd());
        let mut session = sim.clone();
        sim.push_bar("XAUUSD", Timeframe::M1, bar(2000.0));

        let result = session
            .submit_order(&long_request(0.1, 1995.0, 0.0))
            .await
            .unwrap();

        // Bar trades down through the stop
        sim.push_bar("XAUUSD", Timeframe::M1, bar(1994.0));

        assert!(session.position(result.ticket).await.unwrap().is_none());
        let deals = session.deal_history(result.ticket).await.unwrap();
        assert_eq!(deals.len(), 1);
        assert_eq!(deals[0].price, 1995.0);
        assert!(deals[0].profit < 0.0);
    }

    #[tokio::test]
    async fn test_partial_close_shrinks_volume() {
        let sim = SimSession::new(10_000.0).with_symbol(SymbolSpec::xauusd());
        let mut session = sim.clone();
        sim.push_bar("XAUUSD", Timeframe::M1, bar(2000.0));

        let result = session
            .submit_order(&long_request(0.10, 0.0, 0.0))
            .await
            .unwrap();
        session.close_volume(result.ticket, 0.05).await.unwrap();

        let pos = session.position(result.ticket).await.unwrap().unwrap();
        assert!((pos.volume - 0.05).abs() < 1e-9);
    }
}
