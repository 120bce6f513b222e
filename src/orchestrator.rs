//! Per-symbol trading loops
//!
//! One task per traded symbol, all funneling broker calls through the shared
//! session mutex. Each loop iteration: connection health, daily loss guard,
//! adopt-or-supervise any open position, volatility gate, signal evaluation,
//! entry. A supervised position keeps its symbol's loop busy until closure.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::broker::SharedSession;
use crate::config::BotConfig;
use crate::gateway::OrderGateway;
use crate::journal::{OpenRecord, SharedJournal, TradeKey};
use crate::notify::SharedNotifier;
use crate::risk;
use crate::strategy::{self, MarketActivity};
use crate::supervisor::{PollOutcome, PositionSupervisor, SupervisedPosition};

/// What one analysis cycle decided
#[derive(Debug)]
pub enum EntryDecision {
    Opened(SupervisedPosition),
    /// Volatility gate rejected the cycle; back off longer
    QuietMarket,
    NoSignal,
    /// Bars/quote/account unavailable this cycle
    NoData,
}

/// What the open-position scan at the top of a cycle found
#[derive(Debug)]
enum PositionScan {
    Found(SupervisedPosition),
    /// The broker confirmed no position is open for the symbol
    Clear,
    /// Query unavailable this cycle; entering now could duplicate a position
    Unavailable,
}

/// Rolling day anchor for the realized daily loss guard
struct DayAnchor {
    date: NaiveDate,
    start_balance: f64,
}

pub struct Orchestrator {
    session: SharedSession,
    journal: SharedJournal,
    notifier: SharedNotifier,
    gateway: OrderGateway,
    account: String,
    cfg: BotConfig,
}

impl Orchestrator {
    pub fn new(
        session: SharedSession,
        journal: SharedJournal,
        notifier: SharedNotifier,
        account: String,
        cfg: BotConfig,
    ) -> Arc<Self> {
        let gateway = OrderGateway::new(session.clone());
        Arc::new(Self {
            session,
            journal,
            notifier,
            gateway,
            account,
            cfg,
        })
    }

    /// Run every symbol loop until shutdown flips
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let mut handles = Vec::new();
        for symbol in self.cfg.symbols.clone() {
            let orchestrator = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                orchestrator.symbol_loop(symbol, shutdown).await;
            }));
        }
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "symbol loop panicked");
            }
        }
    }

    async fn symbol_loop(&self, symbol: String, mut shutdown: watch::Receiver<bool>) {
        info!(symbol, "symbol loop started");
        let mut day: Option<DayAnchor> = None;
        let mut disconnected_cycles: u32 = 0;

        while !*shutdown.borrow() {
            if !self.session.lock().await.is_connected().await {
                disconnected_cycles += 1;
                if disconnected_cycles == self.cfg.disconnect_alert_cycles {
                    self.notifier
                        .notify(&format!("{symbol}: terminal connection lost"))
                        .await;
                }
                if self
                    .pause(self.cfg.reconnect_wait_secs, &mut shutdown)
                    .await
                {
                    break;
                }
                continue;
            }
            if disconnected_cycles >= self.cfg.disconnect_alert_cycles {
                self.notifier
                    .notify(&format!("{symbol}: terminal connection restored"))
                    .await;
            }
            disconnected_cycles = 0;

            // Adopt a position left over from a previous run (or this loop's
            // own entry) and supervise it to closure before analyzing again.
            // New entries wait until the broker confirms the symbol is clear.
            match self.find_open_position(&symbol).await {
                PositionScan::Found(open) => {
                    self.supervise(open, &mut shutdown).await;
                    continue;
                }
                PositionScan::Unavailable => {
                    warn!(symbol, "position scan unavailable, holding entries");
                    if self
                        .pause(self.cfg.analysis_interval_secs, &mut shutdown)
                        .await
                    {
                        break;
                    }
                    continue;
                }
                PositionScan::Clear => {}
            }

            if self.daily_loss_hit(&mut day).await {
                if self
                    .pause(self.cfg.analysis_interval_secs, &mut shutdown)
                    .await
                {
                    break;
                }
                continue;
            }

            let backoff = match self.try_enter(&symbol).await {
                EntryDecision::Opened(state) => {
                    self.supervise(state, &mut shutdown).await;
                    continue;
                }
                EntryDecision::QuietMarket => self.cfg.quiet_backoff_secs,
                EntryDecision::NoSignal | EntryDecision::NoData => {
                    self.cfg.analysis_interval_secs
                }
            };
            if self.pause(backoff, &mut shutdown).await {
                break;
            }
        }
        info!(symbol, "symbol loop stopped");
    }

    /// One analysis cycle: gate, evaluate, size, submit, journal
    pub async fn try_enter(&self, symbol: &str) -> EntryDecision {
        let tuning = &self.cfg.strategy;

        let gate_bars = {
            let session = self.session.lock().await;
            session
                .bars(symbol, tuning.gate_timeframe, tuning.gate_bars)
                .await
        };
        let Some(gate_bars) = gate_bars else {
            return EntryDecision::NoData;
        };
        if let MarketActivity::Quiet { atr, mean_atr } =
            strategy::market_activity(&gate_bars, tuning)
        {
            info!(symbol, atr, mean_atr, "quiet market, backing off");
            return EntryDecision::QuietMarket;
        }

        let (trend_bars, exec_bars) = {
            let session = self.session.lock().await;
            let trend = session
                .bars(symbol, tuning.trend_timeframe, tuning.trend_bars)
                .await;
            let exec = session
                .bars(symbol, tuning.exec_timeframe, tuning.exec_bars)
                .await;
            (trend, exec)
        };
        let (Some(trend_bars), Some(exec_bars)) = (trend_bars, exec_bars) else {
            return EntryDecision::NoData;
        };

        let Some(signal) = strategy::evaluate(symbol, &trend_bars, &exec_bars, tuning) else {
            return EntryDecision::NoSignal;
        };
        info!(
            symbol,
            side = %signal.side,
            reason = signal.reason.as_str(),
            confirmations = signal.confirmation_count,
            "signal"
        );

        // Balance read fresh so sizing follows realized results
        let (account, spec) = {
            let session = self.session.lock().await;
            let account = session.account().await;
            let spec = session.symbol_spec(symbol).await;
            (account, spec)
        };
        let (Some(account), Some(spec)) = (account, spec) else {
            return EntryDecision::NoData;
        };

        let Some(volume) = risk::position_volume(
            account.balance,
            tuning.risk_fraction,
            signal.entry_hint,
            signal.stop_loss,
            signal.size_multiplier,
            &spec,
        ) else {
            warn!(symbol, "signal produced an unusable stop distance, dropped");
            return EntryDecision::NoSignal;
        };

        let result = match self.gateway.open(&signal, volume).await {
            Ok(result) => result,
            Err(err) => {
                // Single attempt only: a fresh evaluation decides the next entry
                warn!(symbol, error = %err, "entry failed, signal dropped");
                return EntryDecision::NoSignal;
            }
        };

        let open = OpenRecord {
            key: TradeKey {
                account: self.account.clone(),
                symbol: symbol.to_string(),
                ticket: result.ticket,
            },
            side: signal.side,
            volume,
            open_price: result.fill_price,
            open_time: Utc::now(),
            reason: signal.reason.as_str().to_string(),
        };
        if let Err(err) = self.journal.record_open(&open).await {
            warn!(symbol, error = %err, "journal open failed");
        }
        self.notifier
            .notify(&format!(
                "opened {symbol} {} {volume} @ {:.2} ticket {}",
                signal.side, result.fill_price, result.ticket
            ))
            .await;

        EntryDecision::Opened(SupervisedPosition::new(
            result.ticket,
            symbol,
            signal.side,
            result.fill_price,
            signal.stop_loss,
        ))
    }

    async fn find_open_position(&self, symbol: &str) -> PositionScan {
        let positions = {
            let session = self.session.lock().await;
            session.open_positions(symbol).await
        };
        let Some(positions) = positions else {
            return PositionScan::Unavailable;
        };
        let Some(pos) = positions.into_iter().next() else {
            return PositionScan::Clear;
        };
        info!(symbol, ticket = pos.ticket, "supervising existing position");
        PositionScan::Found(SupervisedPosition::new(
            pos.ticket,
            symbol,
            pos.side,
            pos.entry_price,
            pos.stop_loss,
        ))
    }

    async fn supervise(&self, mut state: SupervisedPosition, shutdown: &mut watch::Receiver<bool>) {
        let supervisor = PositionSupervisor::new(
            self.session.clone(),
            self.journal.clone(),
            self.notifier.clone(),
            self.account.clone(),
            self.cfg.strategy.clone(),
        );
        while !*shutdown.borrow() {
            if let PollOutcome::Closed { .. } = supervisor.poll(&mut state).await {
                break;
            }
            if self
                .pause(self.cfg.supervise_interval_secs, shutdown)
                .await
            {
                break;
            }
        }
    }

    /// Realized loss since the UTC day started, against the day's opening
    /// balance. Positions already open keep being supervised; only new
    /// entries pause.
    async fn daily_loss_hit(&self, day: &mut Option<DayAnchor>) -> bool {
        let balance = {
            let session = self.session.lock().await;
            match session.account().await {
                Some(account) => account.balance,
                None => return false,
            }
        };
        let today = Utc::now().date_naive();
        let anchor = match day {
            Some(anchor) if anchor.date == today => anchor,
            _ => {
                *day = Some(DayAnchor {
                    date: today,
                    start_balance: balance,
                });
                return false;
            }
        };

        let limit = anchor.start_balance * self.cfg.strategy.max_daily_loss;
        let drawdown = anchor.start_balance - balance;
        if drawdown >= limit && limit > 0.0 {
            warn!(drawdown, limit, "daily loss limit reached, pausing entries");
            return true;
        }
        false
    }

    /// Sleep that wakes early on shutdown; returns true when shutting down
    async fn pause(&self, secs: u64, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = sleep(Duration::from_secs(secs)) => *shutdown.borrow(),
            _ = shutdown.changed() => true,
        }
    }
}
