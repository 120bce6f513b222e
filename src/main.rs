use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use structurebot::broker::{
    shared, Bar, BridgeCredentials, BridgeSession, SharedSession, SimSession, SymbolSpec,
    Timeframe,
};
use structurebot::config::{BotConfig, RunMode, StrategyConfig};
use structurebot::journal::{HttpJournal, MemoryJournal, SharedJournal};
use structurebot::notify::{NullNotifier, SharedNotifier, TelegramNotifier};
use structurebot::orchestrator::Orchestrator;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Run mode: "simulation" or "live"
    #[arg(long, env = "BOT_MODE", default_value = "simulation")]
    mode: String,

    /// Symbols to trade (comma-separated)
    #[arg(long, env = "BOT_SYMBOLS", default_value = "XAUUSD")]
    symbols: String,

    /// Terminal bridge base URL (live mode)
    #[arg(long, env = "BRIDGE_URL", default_value = "http://127.0.0.1:8787")]
    bridge_url: String,

    /// Broker account number (live mode)
    #[arg(long, env = "BROKER_ACCOUNT")]
    account: Option<u64>,

    /// Broker password (live mode)
    #[arg(long, env = "BROKER_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Broker server name (live mode)
    #[arg(long, env = "BROKER_SERVER")]
    server: Option<String>,

    /// Journal service base URL; in-memory journal when unset
    #[arg(long, env = "JOURNAL_URL")]
    journal_url: Option<String>,

    /// Telegram bot token for operator notifications
    #[arg(long, env = "TELEGRAM_TOKEN", hide_env_values = true)]
    telegram_token: Option<String>,

    /// Telegram chat to notify
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    telegram_chat: Option<String>,

    /// JSON file with strategy overrides
    #[arg(long, env = "STRATEGY_CONFIG")]
    strategy_config: Option<PathBuf>,

    /// Seconds between analysis cycles
    #[arg(long, default_value = "10")]
    analysis_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("structurebot=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let mode = match args.mode.as_str() {
        "simulation" => RunMode::Simulation,
        "live" => RunMode::Live,
        other => bail!("unknown mode {other:?}, expected \"simulation\" or \"live\""),
    };
    let symbols: Vec<String> = args
        .symbols
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() {
        bail!("no symbols configured");
    }

    let strategy = match &args.strategy_config {
        Some(path) => StrategyConfig::from_file(path)?,
        None => StrategyConfig::default(),
    };
    let cfg = BotConfig {
        symbols: symbols.clone(),
        analysis_interval_secs: args.analysis_interval,
        strategy,
        ..BotConfig::default()
    };

    info!(%mode, symbols = %args.symbols, trigger = cfg.strategy.trigger.as_str(), "starting");

    let session: SharedSession = match mode {
        RunMode::Simulation => shared(seeded_simulation(&symbols)),
        RunMode::Live => {
            let credentials = BridgeCredentials {
                base_url: args.bridge_url.clone(),
                account: args.account.context("BROKER_ACCOUNT required in live mode")?,
                password: args.password.context("BROKER_PASSWORD required in live mode")?,
                server: args.server.context("BROKER_SERVER required in live mode")?,
            };
            shared(BridgeSession::connect(&credentials).await?)
        }
    };

    let snapshot = session
        .lock()
        .await
        .account()
        .await
        .context("account state unavailable at startup")?;
    info!(
        account = snapshot.account,
        balance = snapshot.balance,
        currency = %snapshot.currency,
        "connected"
    );

    let journal: SharedJournal = match &args.journal_url {
        Some(url) => Arc::new(HttpJournal::new(url.clone())),
        None => {
            if mode == RunMode::Live {
                warn!("no JOURNAL_URL set, trades will not be persisted");
            }
            Arc::new(MemoryJournal::new())
        }
    };
    let notifier: SharedNotifier = match (&args.telegram_token, &args.telegram_chat) {
        (Some(token), Some(chat)) => Arc::new(TelegramNotifier::new(token.clone(), chat.clone())),
        _ => Arc::new(NullNotifier),
    };
    notifier
        .notify(&format!("bot started ({mode}) on {}", args.symbols))
        .await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let orchestrator = Orchestrator::new(
        session.clone(),
        journal,
        notifier.clone(),
        snapshot.account.to_string(),
        cfg,
    );
    orchestrator.run(shutdown_rx).await;

    session.lock().await.disconnect().await;
    notifier.notify("bot stopped").await;
    info!("shutdown complete");
    Ok(())
}

/// Sim session seeded with a deterministic synthetic feed so the full loop
/// can run without a terminal. Two superimposed cycles over a slow drift,
/// which is enough to move every indicator through its regimes.
fn seeded_simulation(symbols: &[String]) -> SimSession {
    let sim = SimSession::new(10_000.0);
    let mut sim = sim;
    for symbol in symbols {
        let spec = SymbolSpec {
            symbol: symbol.clone(),
            ..SymbolSpec::xauusd()
        };
        sim = sim.with_symbol(spec);
        for (timeframe, count) in [
            (Timeframe::H1, 120),
            (Timeframe::M5, 400),
            (Timeframe::M1, 600),
        ] {
            sim.set_series(symbol, timeframe, synthetic_series(count, timeframe));
        }
    }
    sim
}

fn synthetic_series(count: usize, timeframe: Timeframe) -> Vec<Bar> {
    let step_secs = timeframe.seconds() as i64;
    let start = chrono::Utc::now() - chrono::Duration::seconds(step_secs * count as i64);
    (0..count)
        .map(|i| {
            let t = i as f64;
            let close = 2000.0 + 0.05 * t + 6.0 * (t / 19.0).sin() + 2.5 * (t / 5.0).sin();
            let swing = 1.2 + (t / 7.0).cos().abs();
            Bar {
                timestamp: start + chrono::Duration::seconds(step_secs * i as i64),
                open: close - 0.3,
                high: close + swing / 2.0,
                low: close - swing / 2.0,
                close,
                volume: 80 + ((t / 3.0).sin().abs() * 120.0) as u64,
            }
        })
        .collect()
}
