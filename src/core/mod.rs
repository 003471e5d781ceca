//! Valuation and refresh pipeline

pub mod cache;
pub mod config;
pub mod currency;
pub mod events;
pub mod history;
pub mod log;
pub mod market;
pub mod model;
pub mod refresh;
pub mod refresh_log;
pub mod schedule;
pub mod series;
pub mod store;
pub mod valuation;

// Re-export main types for cleaner imports
pub use market::{MarketDataSource, PricePoint, Quote};
pub use refresh::{RefreshOrchestrator, RefreshResult, RefreshTier};
pub use store::PortfolioStore;
pub use valuation::{GroupBy, ValuationEngine};
