//! Market data abstractions and core types

use crate::core::model::ExchangeRate;
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Latest quote for an instrument. A quote without `value` is a failed fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub value: Option<f64>,
    pub date: NaiveDate,
    pub currency: Option<String>,
    pub name: Option<String>,
    pub ticker: Option<String>,
}

/// A single close of a historical series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub value: f64,
    pub currency: Option<String>,
}

/// Reference series fetched alongside instrument prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Benchmark {
    EquityIndex,
    Gold,
    WorldIndex,
}

impl Benchmark {
    pub const ALL: [Benchmark; 3] = [
        Benchmark::EquityIndex,
        Benchmark::Gold,
        Benchmark::WorldIndex,
    ];
}

impl Display for Benchmark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Benchmark::EquityIndex => "equity index",
                Benchmark::Gold => "gold",
                Benchmark::WorldIndex => "world index",
            }
        )
    }
}

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Fetches the current price and metadata of an instrument. `ticker` is
    /// used when known, otherwise the source resolves `identifier` itself.
    async fn fetch_quote(&self, identifier: &str, ticker: Option<&str>) -> Result<Quote>;

    async fn fetch_exchange_rate(&self, from: &str, to: &str) -> Result<ExchangeRate>;

    /// Fetches closes of `symbol` over `period` (e.g. `1y`) sampled at `interval` (e.g. `1d`).
    async fn fetch_historical_series(
        &self,
        symbol: &str,
        period: &str,
        interval: &str,
    ) -> Result<Vec<PricePoint>>;
}
