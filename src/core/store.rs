//! Storage abstraction shared by the valuation engine and the refresh
//! orchestrator.

use crate::core::model::{BankAccount, ExchangeRate, Holding, Instrument, Price, Quadrant};
use anyhow::Result;
use chrono::NaiveDate;

/// Settings key holding the RFC 3339 timestamp of the last completed refresh.
pub const LAST_REFRESH_KEY: &str = "last_refresh";

/// Time-series store of portfolio data.
///
/// Reads return a consistent snapshot of the current state and never fail;
/// missing rows are `None` or empty. Writes are serialized by the
/// implementation and bump [`PortfolioStore::data_version`].
pub trait PortfolioStore: Send + Sync {
    /// Monotonic counter incremented by every successful write.
    fn data_version(&self) -> u64;

    fn list_instruments(&self) -> Vec<Instrument>;
    fn get_instrument(&self, id: &str) -> Option<Instrument>;

    fn latest_price(&self, id: &str) -> Option<Price>;
    /// All prices of an instrument in ascending date order, ties in insertion order.
    fn price_history(&self, id: &str) -> Vec<Price>;
    fn price_at(&self, id: &str, date: NaiveDate) -> Option<Price>;
    fn price_on_or_before(&self, id: &str, date: NaiveDate) -> Option<Price>;
    fn price_before(&self, id: &str, date: NaiveDate) -> Option<Price>;

    fn latest_rate(&self, from: &str, to: &str) -> Option<ExchangeRate>;
    fn rate_on_or_before(&self, from: &str, to: &str, date: NaiveDate) -> Option<ExchangeRate>;

    fn list_holdings(&self) -> Vec<Holding>;
    fn list_account_holdings(&self, account_id: &str) -> Vec<Holding>;
    fn list_accounts(&self) -> Vec<BankAccount>;
    fn list_quadrants(&self) -> Vec<Quadrant>;

    fn append_price(&self, price: Price) -> Result<()>;
    fn append_exchange_rate(&self, rate: ExchangeRate) -> Result<()>;
    /// Updates the mutable metadata of an instrument. Returns whether anything changed.
    fn upsert_instrument_metadata(
        &self,
        id: &str,
        name: Option<&str>,
        ticker: Option<&str>,
    ) -> Result<bool>;

    /// Creates an instrument or updates its name, ticker and quadrant.
    /// Fails when the currency differs from the stored one.
    fn insert_instrument(&self, instrument: Instrument) -> Result<()>;
    fn upsert_account(&self, account: BankAccount) -> Result<()>;
    fn upsert_quadrant(&self, quadrant: Quadrant) -> Result<()>;
    /// Fails when the account or instrument is unknown or the quantity is invalid.
    fn upsert_holding(&self, holding: Holding) -> Result<()>;
    fn remove_holding(&self, account_id: &str, instrument_id: &str) -> Result<bool>;

    fn setting(&self, key: &str) -> Option<String>;
    fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}
