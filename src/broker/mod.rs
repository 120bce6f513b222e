//! Broker Terminal Boundary
//!
//! The core never talks to the terminal API directly: everything goes through
//! the `BrokerSession` trait behind one process-wide mutex. `SimSession` is
//! the deterministic in-memory implementation used by simulation mode and the
//! test suite.

pub mod bridge;
pub mod session;
pub mod sim;
pub mod types;

pub use bridge::{BridgeCredentials, BridgeSession};
pub use session::{shared, BrokerSession, SharedSession};
pub use sim::SimSession;
pub use types::{
    AccountSnapshot, Bar, Deal, OrderRequest, OrderResult, PositionInfo, Quote, SymbolSpec,
    Timeframe, TradeSide,
};
