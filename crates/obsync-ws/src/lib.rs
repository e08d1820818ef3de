//! Market data source contract and a shared WebSocket transport.
//!
//! - `MarketDataSource`: the only boundary between the tracker and
//!   exchange-specific networking
//! - `ConnectionManager`: one shared connection with reconnect, keep-alive
//!   and re-subscription of every registered market
//! - `ExchangeAdapter`: the exchange-specific request builders and parser
//!   plugged into the transport

pub mod adapter;
pub mod connection;
pub mod data_source;
pub mod error;
pub mod fanout;
pub mod heartbeat;
pub mod source;
pub mod subscription;

pub use adapter::ExchangeAdapter;
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState};
pub use data_source::MarketDataSource;
pub use error::{SourceError, SourceResult};
pub use fanout::EventFanout;
pub use heartbeat::HeartbeatMonitor;
pub use source::WsMarketDataSource;
pub use subscription::{RequestIdGenerator, SubscriptionRegistry};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Install the TLS crypto provider.
/// Must be called before any `wss://` connection is made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
