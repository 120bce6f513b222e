//! Multi-timeframe trading bot for gold CFDs and synthetic volatility
//! indices: higher-timeframe bias, pluggable entry triggers, confirmation
//! filters, ATR-based risk management and per-position supervision, with
//! trade outcomes journaled to a document store.

pub mod broker;
pub mod config;
pub mod gateway;
pub mod indicators;
pub mod journal;
pub mod notify;
pub mod orchestrator;
pub mod risk;
pub mod strategy;
pub mod supervisor;
