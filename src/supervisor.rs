//! Position supervision
//!
//! Per-position lifecycle state machine, driven by polling. Each poll takes
//! at most one management action, in priority order: reversal exit, then the
//! one-time break-even partial, then a trailing-stop improvement. A broker
//! call that fails is logged and simply retried by the next poll.

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::broker::{PositionInfo, Quote, SharedSession, TradeSide};
use crate::config::StrategyConfig;
use crate::gateway::OrderGateway;
use crate::indicators::{self, SwingKind};
use crate::journal::{CloseRecord, SharedJournal, TradeKey, TradeStatus};
use crate::notify::SharedNotifier;

/// Polls tolerated with the position unqueryable before it is presumed closed
const MISSING_POLL_LIMIT: u32 = 10;

/// Management phase of one supervised position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedPhase {
    /// Break-even partial not yet taken
    Unmanaged,
    /// Partial taken, stop at or beyond entry
    PartialTaken,
}

/// Locally tracked state for one open ticket
#[derive(Debug, Clone)]
pub struct SupervisedPosition {
    pub ticket: u64,
    pub symbol: String,
    pub side: TradeSide,
    pub entry_price: f64,
    /// Entry-to-initial-stop distance, fixed at open
    pub initial_risk: f64,
    pub phase: ManagedPhase,
    /// The protective stop has been confirmed at or beyond entry
    breakeven_stop_set: bool,
    missing_polls: u32,
}

impl SupervisedPosition {
    pub fn new(ticket: u64, symbol: &str, side: TradeSide, entry_price: f64, stop_loss: f64) -> Self {
        Self {
            ticket,
            symbol: symbol.to_string(),
            side,
            entry_price,
            initial_risk: (entry_price - stop_loss).abs(),
            phase: ManagedPhase::Unmanaged,
            breakeven_stop_set: false,
            missing_polls: 0,
        }
    }
}

/// What one poll concluded
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollOutcome {
    StillOpen,
    Closed { profit: f64 },
}

pub struct PositionSupervisor {
    session: SharedSession,
    gateway: OrderGateway,
    journal: SharedJournal,
    notifier: SharedNotifier,
    account: String,
    cfg: StrategyConfig,
}

impl PositionSupervisor {
    pub fn new(
        session: SharedSession,
        journal: SharedJournal,
        notifier: SharedNotifier,
        account: String,
        cfg: StrategyConfig,
    ) -> Self {
        let gateway = OrderGateway::new(session.clone());
        Self {
            session,
            gateway,
            journal,
            notifier,
            account,
            cfg,
        }
    }

    /// One supervision cycle for one position
    pub async fn poll(&self, state: &mut SupervisedPosition) -> PollOutcome {
        let position = {
            let session = self.session.lock().await;
            session.position(state.ticket).await
        };

        let position = match position {
            Ok(Some(p)) => {
                state.missing_polls = 0;
                p
            }
            Ok(None) => return self.settle(state).await,
            Err(err) => {
                state.missing_polls += 1;
                warn!(
                    ticket = state.ticket,
                    polls = state.missing_polls,
                    error = %err,
                    "position query failed"
                );
                if state.missing_polls >= MISSING_POLL_LIMIT {
                    // Unqueryable for too long: presume closed and settle
                    return self.settle(state).await;
                }
                return PollOutcome::StillOpen;
            }
        };

        // Market context for this cycle; skip management when unavailable
        let (bars, quote) = {
            let session = self.session.lock().await;
            let bars = session
                .bars(&state.symbol, self.cfg.exec_timeframe, self.cfg.exec_bars)
                .await;
            let quote = session.quote(&state.symbol).await;
            (bars, quote)
        };
        let (Some(bars), Some(quote)) = (bars, quote) else {
            debug!(ticket = state.ticket, "market data unavailable, skipping poll");
            return PollOutcome::StillOpen;
        };
        let Some(atr) = indicators::atr(&bars, self.cfg.atr_period)
            .and_then(|s| s.last().copied())
        else {
            return PollOutcome::StillOpen;
        };

        if self.cfg.exit_on_reversal && self.reversal_detected(&bars, state.side) {
            info!(ticket = state.ticket, "opposite structure break, closing");
            if let Err(err) = self
                .gateway
                .close_volume(state.ticket, position.volume)
                .await
            {
                warn!(ticket = state.ticket, error = %err, "reversal close failed");
            }
            return PollOutcome::StillOpen; // closure confirmed by next poll
        }

        let profit_distance = profit_distance(&position, quote);

        let breakeven_due =
            profit_distance >= state.initial_risk * self.cfg.breakeven_multiplier;
        if breakeven_due && !state.breakeven_stop_set {
            self.take_breakeven(state, &position, atr).await;
            return PollOutcome::StillOpen;
        }

        if profit_distance > self.cfg.trail_activation_atr * atr {
            self.trail_stop(state, &position, quote, atr).await;
        }

        PollOutcome::StillOpen
    }

    /// Break-even transition: close a fraction of the volume, then move the
    /// stop just past entry. The partial runs once per position; the stop
    /// move re-arms on every poll until the broker confirms a stop at or
    /// beyond entry.
    async fn take_breakeven(&self, state: &mut SupervisedPosition, position: &PositionInfo, atr: f64) {
        if state.phase == ManagedPhase::Unmanaged {
            let spec = {
                let session = self.session.lock().await;
                session.symbol_spec(&state.symbol).await
            };
            let Some(spec) = spec else {
                return;
            };

            let raw = position.volume * self.cfg.partial_fraction;
            let close_volume = (raw / spec.volume_step + 1e-9).floor() * spec.volume_step;
            if close_volume >= spec.volume_min
                && position.volume - close_volume >= spec.volume_min
            {
                match self.gateway.close_volume(state.ticket, close_volume).await {
                    Ok(result) => {
                        state.phase = ManagedPhase::PartialTaken;
                        info!(
                            ticket = state.ticket,
                            volume = close_volume,
                            fill = result.fill_price,
                            "break-even partial taken"
                        );
                        self.journal_partial(state, result.fill_price).await;
                    }
                    Err(err) => {
                        warn!(ticket = state.ticket, error = %err, "partial close failed");
                        return; // retry whole transition next poll
                    }
                }
            } else {
                // Too small to split; just protect what is there
                state.phase = ManagedPhase::PartialTaken;
            }
        }

        let buffer = self.cfg.breakeven_buffer_atr * atr;
        let stop = match state.side {
            TradeSide::Long => state.entry_price + buffer,
            TradeSide::Short => state.entry_price - buffer,
        };
        // Trailing may already have placed something tighter
        let already_protected = match state.side {
            TradeSide::Long => position.stop_loss >= stop,
            TradeSide::Short => position.stop_loss > 0.0 && position.stop_loss <= stop,
        };
        if already_protected {
            state.breakeven_stop_set = true;
            return;
        }
        match self
            .gateway
            .modify_stops(state.ticket, stop, position.take_profit)
            .await
        {
            Ok(()) => {
                state.breakeven_stop_set = true;
                info!(ticket = state.ticket, stop, "stop moved to break-even");
            }
            Err(err) => {
                warn!(ticket = state.ticket, error = %err, "break-even stop move failed, will retry");
            }
        }
    }

    /// Tighten the stop behind price by an ATR distance, never loosening it
    async fn trail_stop(
        &self,
        state: &SupervisedPosition,
        position: &PositionInfo,
        quote: Quote,
        atr: f64,
    ) {
        let trail = self.cfg.trail_atr_multiplier * atr;
        let candidate = match state.side {
            TradeSide::Long => quote.bid - trail,
            TradeSide::Short => quote.ask + trail,
        };
        let improves = match state.side {
            TradeSide::Long => candidate > position.stop_loss,
            TradeSide::Short => position.stop_loss == 0.0 || candidate < position.stop_loss,
        };
        if !improves {
            return;
        }
        match self
            .gateway
            .modify_stops(state.ticket, candidate, position.take_profit)
            .await
        {
            Ok(()) => debug!(
                ticket = state.ticket,
                from = position.stop_loss,
                to = candidate,
                "stop trailed"
            ),
            Err(err) => warn!(ticket = state.ticket, error = %err, "trail modify failed"),
        }
    }

    fn reversal_detected(&self, bars: &[crate::broker::Bar], side: TradeSide) -> bool {
        let Some(close) = bars.last().map(|b| b.close) else {
            return false;
        };
        let swings = indicators::swing_points(bars, self.cfg.swing_window);
        match side {
            TradeSide::Long => indicators::last_swing(&swings, SwingKind::Low)
                .is_some_and(|s| close < s.price),
            TradeSide::Short => indicators::last_swing(&swings, SwingKind::High)
                .is_some_and(|s| close > s.price),
        }
    }

    /// The broker no longer reports the position: pull realized results from
    /// deal history and write the terminal journal record. Only reports
    /// `Closed` once the journal write lands, so a failed write is retried.
    async fn settle(&self, state: &mut SupervisedPosition) -> PollOutcome {
        let deals = {
            let session = self.session.lock().await;
            session.deal_history(state.ticket).await
        };

        let (profit, close_price, close_time) = match deals {
            Some(deals) if !deals.is_empty() => {
                let profit = deals.iter().map(|d| d.profit).sum();
                let last = &deals[deals.len() - 1];
                (profit, last.price, last.time)
            }
            _ if state.missing_polls < MISSING_POLL_LIMIT => {
                // History not visible yet; give it another cycle
                state.missing_polls += 1;
                return PollOutcome::StillOpen;
            }
            _ => {
                warn!(ticket = state.ticket, "no deal history, journaling close without fill data");
                (0.0, 0.0, Utc::now())
            }
        };

        let record = CloseRecord {
            key: self.key(state),
            close_price,
            close_time,
            profit,
            status: TradeStatus::Closed,
        };
        if let Err(err) = self.journal.record_close(&record).await {
            warn!(ticket = state.ticket, error = %err, "journal close failed, will retry");
            return PollOutcome::StillOpen;
        }

        info!(ticket = state.ticket, profit, "position closed");
        self.notifier
            .notify(&format!(
                "closed {} {} ticket {} profit {:.2}",
                state.symbol, state.side, state.ticket, profit
            ))
            .await;
        PollOutcome::Closed { profit }
    }

    async fn journal_partial(&self, state: &SupervisedPosition, fill_price: f64) {
        let profit = {
            let session = self.session.lock().await;
            session
                .deal_history(state.ticket)
                .await
                .map(|deals| deals.iter().map(|d| d.profit).sum())
                .unwrap_or(0.0)
        };
        let record = CloseRecord {
            key: self.key(state),
            close_price: fill_price,
            close_time: Utc::now(),
            profit,
            status: TradeStatus::PartialTaken,
        };
        if let Err(err) = self.journal.record_close(&record).await {
            warn!(ticket = state.ticket, error = %err, "journal partial failed");
        }
    }

    fn key(&self, state: &SupervisedPosition) -> TradeKey {
        TradeKey {
            account: self.account.clone(),
            symbol: state.symbol.clone(),
            ticket: state.ticket,
        }
    }
}

fn profit_distance(position: &PositionInfo, quote: Quote) -> f64 {
    match position.side {
        TradeSide::Long => quote.bid - position.entry_price,
        TradeSide::Short => position.entry_price - quote.ask,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{shared, Bar, BrokerSession, OrderRequest, SimSession, SymbolSpec, Timeframe};
    use crate::journal::MemoryJournal;
    use crate::notify::NullNotifier;
    use chrono::Duration;
    use std::sync::Arc;

    fn bar(i: i64, close: f64) -> Bar {
        Bar {
            timestamp: Utc::now() + Duration::minutes(i),
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume: 100,
        }
    }

    fn cfg() -> StrategyConfig {
        StrategyConfig {
            atr_period: 5,
            breakeven_multiplier: 1.0,
            partial_fraction: 0.5,
            breakeven_buffer_atr: 0.1,
            trail_activation_atr: 1.5,
            trail_atr_multiplier: 1.2,
            ..StrategyConfig::default()
        }
    }

    struct Rig {
        sim: SimSession,
        supervisor: PositionSupervisor,
        journal: MemoryJournal,
    }

    async fn rig() -> (Rig, SupervisedPosition) {
        rig_with_volume(0.10).await
    }

    async fn rig_with_volume(volume: f64) -> (Rig, SupervisedPosition) {
        let sim = SimSession::new(10_000.0).with_symbol(SymbolSpec::xauusd());
        let history: Vec<Bar> = (0..30).map(|i| bar(i, 2000.0)).collect();
        sim.set_series("XAUUSD", Timeframe::M1, history);

        let ticket = {
            let mut s = sim.clone();
            s.submit_order(&OrderRequest {
                symbol: "XAUUSD".to_string(),
                side: TradeSide::Long,
                volume,
                stop_loss: 1998.0,
                take_profit: 0.0,
                comment: "test".to_string(),
            })
            .await
            .unwrap()
            .ticket
        };

        let journal = MemoryJournal::new();
        let supervisor = PositionSupervisor::new(
            shared(sim.clone()),
            Arc::new(journal.clone()),
            Arc::new(NullNotifier),
            "10001".to_string(),
            cfg(),
        );
        // Fill at the ask (2000.1); initial stop at 1998.0
        let state = SupervisedPosition::new(ticket, "XAUUSD", TradeSide::Long, 2000.1, 1998.0);
        (
            Rig {
                sim,
                supervisor,
                journal,
            },
            state,
        )
    }

    #[tokio::test]
    async fn test_breakeven_partial_is_idempotent() {
        let (rig, mut state) = rig().await;
        // Profit distance 2.2 exceeds the 2.1 initial risk
        rig.sim.push_bar("XAUUSD", Timeframe::M1, bar(30, 2002.4));

        assert_eq!(rig.supervisor.poll(&mut state).await, PollOutcome::StillOpen);
        assert_eq!(state.phase, ManagedPhase::PartialTaken);

        let pos = {
            let session = shared(rig.sim.clone());
            let s = session.lock().await;
            s.position(state.ticket).await.unwrap().unwrap()
        };
        assert!((pos.volume - 0.05).abs() < 1e-9);
        // Stop moved just past entry
        assert!(pos.stop_loss >= state.entry_price);

        // Second poll at the same price takes no second partial
        rig.supervisor.poll(&mut state).await;
        let pos = {
            let session = shared(rig.sim.clone());
            let s = session.lock().await;
            s.position(state.ticket).await.unwrap().unwrap()
        };
        assert!((pos.volume - 0.05).abs() < 1e-9);
        assert_eq!(state.phase, ManagedPhase::PartialTaken);
    }

    #[tokio::test]
    async fn test_breakeven_stop_retried_after_failed_move() {
        // At the minimum volume there is nothing to split, so the transition
        // is only the stop move; a rejected modify must not end it
        let (rig, mut state) = rig_with_volume(0.01).await;
        rig.sim.push_bar("XAUUSD", Timeframe::M1, bar(30, 2002.4));

        rig.sim.fail_next_order();
        rig.supervisor.poll(&mut state).await;
        assert_eq!(state.phase, ManagedPhase::PartialTaken);

        let session = shared(rig.sim.clone());
        let pos = session
            .lock()
            .await
            .position(state.ticket)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pos.stop_loss, 1998.0); // modify rejected, stop untouched

        // Next poll re-attempts the stop move without another partial
        rig.supervisor.poll(&mut state).await;
        let pos = session
            .lock()
            .await
            .position(state.ticket)
            .await
            .unwrap()
            .unwrap();
        assert!((pos.volume - 0.01).abs() < 1e-9);
        assert!(pos.stop_loss >= state.entry_price);
    }

    #[tokio::test]
    async fn test_trailing_stop_is_monotonic() {
        let (rig, mut state) = rig().await;
        state.phase = ManagedPhase::PartialTaken; // skip the break-even path
        state.breakeven_stop_set = true;

        let mut last_stop = 1998.0;
        for step in 1..=10 {
            rig.sim.push_bar(
                "XAUUSD",
                Timeframe::M1,
                bar(30 + step, 2000.0 + 2.0 * step as f64),
            );
            rig.supervisor.poll(&mut state).await;

            let session = shared(rig.sim.clone());
            let pos = session.lock().await.position(state.ticket).await.unwrap();
            let Some(pos) = pos else {
                panic!("position stopped out unexpectedly at step {step}");
            };
            assert!(
                pos.stop_loss >= last_stop - 1e-9,
                "stop went backwards: {} -> {}",
                last_stop,
                pos.stop_loss
            );
            last_stop = pos.stop_loss;
        }
        // The trail engaged and pulled the stop above the original level
        assert!(last_stop > 1998.0);
    }

    #[tokio::test]
    async fn test_pullback_does_not_loosen_stop() {
        let (rig, mut state) = rig().await;
        state.phase = ManagedPhase::PartialTaken;
        state.breakeven_stop_set = true;

        rig.sim.push_bar("XAUUSD", Timeframe::M1, bar(31, 2010.0));
        rig.supervisor.poll(&mut state).await;
        let session = shared(rig.sim.clone());
        let stop_after_rally = session
            .lock()
            .await
            .position(state.ticket)
            .await
            .unwrap()
            .unwrap()
            .stop_loss;
        assert!(stop_after_rally > 1998.0);

        // Price pulls back but stays above the stop; the stop must hold
        rig.sim.push_bar("XAUUSD", Timeframe::M1, bar(32, stop_after_rally + 1.0));
        rig.supervisor.poll(&mut state).await;
        let stop_after_pullback = session
            .lock()
            .await
            .position(state.ticket)
            .await
            .unwrap()
            .unwrap()
            .stop_loss;
        assert_eq!(stop_after_rally, stop_after_pullback);
    }

    #[tokio::test]
    async fn test_closure_settles_from_deal_history() {
        let (rig, mut state) = rig().await;
        rig.sim.push_bar("XAUUSD", Timeframe::M1, bar(31, 2005.0));
        rig.sim.force_close(state.ticket);

        let outcome = rig.supervisor.poll(&mut state).await;
        let PollOutcome::Closed { profit } = outcome else {
            panic!("expected closure, got {outcome:?}");
        };
        assert!(profit > 0.0);

        let record = rig
            .journal
            .get(&TradeKey {
                account: "10001".to_string(),
                symbol: "XAUUSD".to_string(),
                ticket: state.ticket,
            })
            .expect("journal record");
        assert_eq!(record.status, TradeStatus::Closed);
        assert_eq!(record.profit, Some(profit));
    }

    #[tokio::test]
    async fn test_failed_modify_retries_next_poll() {
        let (rig, mut state) = rig().await;
        state.phase = ManagedPhase::PartialTaken;
        state.breakeven_stop_set = true;

        rig.sim.push_bar("XAUUSD", Timeframe::M1, bar(31, 2010.0));
        rig.sim.fail_next_order();
        rig.supervisor.poll(&mut state).await;

        let session = shared(rig.sim.clone());
        let stop = session
            .lock()
            .await
            .position(state.ticket)
            .await
            .unwrap()
            .unwrap()
            .stop_loss;
        assert_eq!(stop, 1998.0); // modify failed, stop untouched

        rig.supervisor.poll(&mut state).await;
        let stop = session
            .lock()
            .await
            .position(state.ticket)
            .await
            .unwrap()
            .unwrap()
            .stop_loss;
        assert!(stop > 1998.0);
    }
}
