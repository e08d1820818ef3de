//! Order book synchronization demo.
//!
//! Replays a recorded feed through the tracker:
//! - Newline-delimited JSON feed as the market data source
//! - Scheduled runtime add/remove of markets
//! - Periodic top-of-book and metrics reports

pub mod app;
pub mod config;
pub mod error;
pub mod replay;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use replay::ReplayDataSource;
