//! Order gateway
//!
//! Thin order-action layer over the shared session. Strictly single-attempt:
//! a failed send returns the error and the caller decides whether the next
//! poll cycle retries (supervision) or the signal is dropped (entry).

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::broker::{OrderRequest, OrderResult, SharedSession, TradeSide};
use crate::strategy::Signal;

pub struct OrderGateway {
    session: SharedSession,
}

impl OrderGateway {
    pub fn new(session: SharedSession) -> Self {
        Self { session }
    }

    /// Submit a market order for a sized signal.
    ///
    /// A stop closer than the broker's minimum distance is pushed out to the
    /// minimum rather than rejected; the widening changes realized risk and
    /// is logged.
    pub async fn open(&self, signal: &Signal, volume: f64) -> Result<OrderResult> {
        if volume <= 0.0 {
            bail!("refusing order with volume {volume}");
        }

        let mut session = self.session.lock().await;
        let spec = session
            .symbol_spec(&signal.symbol)
            .await
            .with_context(|| format!("no symbol spec for {}", signal.symbol))?;

        let mut stop_loss = signal.stop_loss;
        let distance = (signal.entry_hint - stop_loss).abs();
        if distance < spec.min_stop_distance {
            stop_loss = match signal.side {
                TradeSide::Long => signal.entry_hint - spec.min_stop_distance,
                TradeSide::Short => signal.entry_hint + spec.min_stop_distance,
            };
            warn!(
                symbol = %signal.symbol,
                requested = signal.stop_loss,
                widened = stop_loss,
                "stop inside broker minimum distance, widened"
            );
        }

        let request = OrderRequest {
            symbol: signal.symbol.clone(),
            side: signal.side,
            volume,
            stop_loss,
            take_profit: signal.take_profit,
            comment: signal.reason.as_str().to_string(),
        };
        let result = session
            .submit_order(&request)
            .await
            .with_context(|| format!("order submission failed for {}", signal.symbol))?;
        info!(
            symbol = %signal.symbol,
            side = %signal.side,
            volume,
            ticket = result.ticket,
            fill = result.fill_price,
            "position opened"
        );
        Ok(result)
    }

    pub async fn modify_stops(&self, ticket: u64, stop_loss: f64, take_profit: f64) -> Result<()> {
        let mut session = self.session.lock().await;
        session
            .modify_stops(ticket, stop_loss, take_profit)
            .await
            .with_context(|| format!("stop modify failed for ticket {ticket}"))
    }

    pub async fn close_volume(&self, ticket: u64, volume: f64) -> Result<OrderResult> {
        let mut session = self.session.lock().await;
        let result = session
            .close_volume(ticket, volume)
            .await
            .with_context(|| format!("close failed for ticket {ticket}"))?;
        info!(ticket, volume, fill = result.fill_price, "volume closed");
        Ok(result)
    }
}
