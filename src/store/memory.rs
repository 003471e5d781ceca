use crate::core::model::{BankAccount, ExchangeRate, Holding, Instrument, Price, Quadrant};
use crate::core::series;
use crate::core::store::PortfolioStore;
use anyhow::{Result, anyhow, bail};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[derive(Default)]
struct Tables {
    instruments: BTreeMap<String, Instrument>,
    prices: HashMap<String, Vec<Price>>,
    rates: HashMap<(String, String), Vec<ExchangeRate>>,
    holdings: BTreeMap<(String, String), Holding>,
    accounts: BTreeMap<String, BankAccount>,
    quadrants: BTreeMap<String, Quadrant>,
    settings: HashMap<String, String>,
}

/// In-memory portfolio store. Also serves as the read side of the disk store.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    version: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    fn bump(&self) {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Store data version is now {}", version);
    }

    /// Merges `instrument` with the stored one. `None` means nothing changes.
    pub(crate) fn prepare_instrument(&self, instrument: &Instrument) -> Result<Option<Instrument>> {
        if instrument.isin.trim().is_empty() {
            bail!("Instrument identifier must not be empty");
        }
        let tables = self.read();
        match tables.instruments.get(&instrument.isin) {
            Some(existing) if existing.currency != instrument.currency => Err(anyhow!(
                "Instrument {} is denominated in {} and cannot be changed to {}",
                instrument.isin,
                existing.currency,
                instrument.currency
            )),
            Some(existing) if existing == instrument => Ok(None),
            _ => Ok(Some(instrument.clone())),
        }
    }

    pub(crate) fn prepare_metadata(
        &self,
        id: &str,
        name: Option<&str>,
        ticker: Option<&str>,
    ) -> Result<Option<Instrument>> {
        let tables = self.read();
        let existing = tables
            .instruments
            .get(id)
            .ok_or_else(|| anyhow!("Unknown instrument: {}", id))?;
        let mut updated = existing.clone();
        if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
            updated.name = name.to_string();
        }
        if let Some(ticker) = ticker.filter(|t| !t.trim().is_empty()) {
            updated.ticker = Some(ticker.to_string());
        }
        Ok((&updated != existing).then_some(updated))
    }

    pub(crate) fn validate_holding(&self, holding: &Holding) -> Result<()> {
        if !holding.quantity.is_finite() || holding.quantity < 0.0 {
            bail!(
                "Invalid quantity {} for {} in account {}",
                holding.quantity,
                holding.instrument_id,
                holding.account_id
            );
        }
        let tables = self.read();
        if !tables.accounts.contains_key(&holding.account_id) {
            bail!("Unknown account: {}", holding.account_id);
        }
        if !tables.instruments.contains_key(&holding.instrument_id) {
            bail!("Unknown instrument: {}", holding.instrument_id);
        }
        Ok(())
    }

    pub(crate) fn holding_exists(&self, account_id: &str, instrument_id: &str) -> bool {
        self.read()
            .holdings
            .contains_key(&(account_id.to_string(), instrument_id.to_string()))
    }

    pub(crate) fn apply_price(&self, price: Price) {
        let mut tables = self.write();
        let rows = tables.prices.entry(price.instrument_id.clone()).or_default();
        series::insert_sorted(rows, price);
        drop(tables);
        self.bump();
    }

    pub(crate) fn apply_rate(&self, rate: ExchangeRate) {
        let mut tables = self.write();
        let rows = tables
            .rates
            .entry((rate.from.clone(), rate.to.clone()))
            .or_default();
        series::insert_sorted(rows, rate);
        drop(tables);
        self.bump();
    }

    pub(crate) fn apply_instrument(&self, instrument: Instrument) {
        self.write()
            .instruments
            .insert(instrument.isin.clone(), instrument);
        self.bump();
    }

    pub(crate) fn apply_account(&self, account: BankAccount) {
        self.write().accounts.insert(account.id.clone(), account);
        self.bump();
    }

    pub(crate) fn apply_quadrant(&self, quadrant: Quadrant) {
        self.write().quadrants.insert(quadrant.id.clone(), quadrant);
        self.bump();
    }

    pub(crate) fn apply_holding(&self, holding: Holding) {
        let key = (holding.account_id.clone(), holding.instrument_id.clone());
        self.write().holdings.insert(key, holding);
        self.bump();
    }

    pub(crate) fn apply_holding_removal(&self, account_id: &str, instrument_id: &str) -> bool {
        let removed = self
            .write()
            .holdings
            .remove(&(account_id.to_string(), instrument_id.to_string()))
            .is_some();
        if removed {
            self.bump();
        }
        removed
    }

    pub(crate) fn apply_setting(&self, key: &str, value: &str) {
        self.write()
            .settings
            .insert(key.to_string(), value.to_string());
    }

    fn with_prices<T>(&self, id: &str, f: impl FnOnce(&[Price]) -> T) -> T {
        let tables = self.read();
        f(tables.prices.get(id).map(Vec::as_slice).unwrap_or_default())
    }

    fn with_rates<T>(&self, from: &str, to: &str, f: impl FnOnce(&[ExchangeRate]) -> T) -> T {
        let tables = self.read();
        f(tables
            .rates
            .get(&(from.to_string(), to.to_string()))
            .map(Vec::as_slice)
            .unwrap_or_default())
    }
}

impl PortfolioStore for MemoryStore {
    fn data_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    fn list_instruments(&self) -> Vec<Instrument> {
        self.read().instruments.values().cloned().collect()
    }

    fn get_instrument(&self, id: &str) -> Option<Instrument> {
        self.read().instruments.get(id).cloned()
    }

    fn latest_price(&self, id: &str) -> Option<Price> {
        self.with_prices(id, |s| s.last().cloned())
    }

    fn price_history(&self, id: &str) -> Vec<Price> {
        self.with_prices(id, |s| s.to_vec())
    }

    fn price_at(&self, id: &str, date: NaiveDate) -> Option<Price> {
        self.with_prices(id, |s| series::exact(s, date).cloned())
    }

    fn price_on_or_before(&self, id: &str, date: NaiveDate) -> Option<Price> {
        self.with_prices(id, |s| series::on_or_before(s, date).cloned())
    }

    fn price_before(&self, id: &str, date: NaiveDate) -> Option<Price> {
        self.with_prices(id, |s| series::before(s, date).cloned())
    }

    fn latest_rate(&self, from: &str, to: &str) -> Option<ExchangeRate> {
        self.with_rates(from, to, |s| s.last().cloned())
    }

    fn rate_on_or_before(&self, from: &str, to: &str, date: NaiveDate) -> Option<ExchangeRate> {
        self.with_rates(from, to, |s| series::on_or_before(s, date).cloned())
    }

    fn list_holdings(&self) -> Vec<Holding> {
        self.read().holdings.values().cloned().collect()
    }

    fn list_account_holdings(&self, account_id: &str) -> Vec<Holding> {
        self.read()
            .holdings
            .values()
            .filter(|h| h.account_id == account_id)
            .cloned()
            .collect()
    }

    fn list_accounts(&self) -> Vec<BankAccount> {
        self.read().accounts.values().cloned().collect()
    }

    fn list_quadrants(&self) -> Vec<Quadrant> {
        self.read().quadrants.values().cloned().collect()
    }

    fn append_price(&self, price: Price) -> Result<()> {
        if !price.value.is_finite() {
            bail!("Invalid price {} for {}", price.value, price.instrument_id);
        }
        self.apply_price(price);
        Ok(())
    }

    fn append_exchange_rate(&self, rate: ExchangeRate) -> Result<()> {
        if !rate.rate.is_finite() || rate.rate <= 0.0 {
            bail!("Invalid rate {} for {}->{}", rate.rate, rate.from, rate.to);
        }
        self.apply_rate(rate);
        Ok(())
    }

    fn upsert_instrument_metadata(
        &self,
        id: &str,
        name: Option<&str>,
        ticker: Option<&str>,
    ) -> Result<bool> {
        match self.prepare_metadata(id, name, ticker)? {
            Some(updated) => {
                self.apply_instrument(updated);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn insert_instrument(&self, instrument: Instrument) -> Result<()> {
        if let Some(instrument) = self.prepare_instrument(&instrument)? {
            self.apply_instrument(instrument);
        }
        Ok(())
    }

    fn upsert_account(&self, account: BankAccount) -> Result<()> {
        if self.read().accounts.get(&account.id) != Some(&account) {
            self.apply_account(account);
        }
        Ok(())
    }

    fn upsert_quadrant(&self, quadrant: Quadrant) -> Result<()> {
        if self.read().quadrants.get(&quadrant.id) != Some(&quadrant) {
            self.apply_quadrant(quadrant);
        }
        Ok(())
    }

    fn upsert_holding(&self, holding: Holding) -> Result<()> {
        self.validate_holding(&holding)?;
        let unchanged = {
            let tables = self.read();
            tables
                .holdings
                .get(&(holding.account_id.clone(), holding.instrument_id.clone()))
                == Some(&holding)
        };
        if !unchanged {
            self.apply_holding(holding);
        }
        Ok(())
    }

    fn remove_holding(&self, account_id: &str, instrument_id: &str) -> Result<bool> {
        Ok(self.apply_holding_removal(account_id, instrument_id))
    }

    fn setting(&self, key: &str) -> Option<String> {
        self.read().settings.get(key).cloned()
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.apply_setting(key, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn instrument(isin: &str, currency: &str) -> Instrument {
        Instrument {
            isin: isin.to_string(),
            name: format!("Fund {isin}"),
            ticker: None,
            currency: currency.to_string(),
            quadrant: None,
        }
    }

    fn price(id: &str, date: &str, value: f64) -> Price {
        Price {
            instrument_id: id.to_string(),
            date: d(date),
            value,
            currency: "EUR".to_string(),
        }
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_instrument(instrument("IE1", "EUR")).unwrap();
        store
            .upsert_account(BankAccount {
                id: "acc".to_string(),
                bank: "Bank".to_string(),
                name: "Broker".to_string(),
            })
            .unwrap();
        store
    }

    #[test]
    fn test_price_lookups_ignore_insertion_order() {
        let store = seeded();
        store.append_price(price("IE1", "2026-01-10", 12.0)).unwrap();
        store.append_price(price("IE1", "2026-01-01", 10.0)).unwrap();
        store.append_price(price("IE1", "2026-01-05", 11.0)).unwrap();

        assert_eq!(store.latest_price("IE1").unwrap().value, 12.0);
        assert_eq!(store.price_on_or_before("IE1", d("2026-01-07")).unwrap().value, 11.0);
        assert_eq!(store.price_before("IE1", d("2026-01-05")).unwrap().value, 10.0);
        assert_eq!(store.price_at("IE1", d("2026-01-05")).unwrap().value, 11.0);
        assert!(store.price_at("IE1", d("2026-01-06")).is_none());

        let dates: Vec<_> = store.price_history("IE1").iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![d("2026-01-01"), d("2026-01-05"), d("2026-01-10")]);
    }

    #[test]
    fn test_unknown_series_is_empty() {
        let store = MemoryStore::new();
        assert!(store.latest_price("nope").is_none());
        assert!(store.price_history("nope").is_empty());
        assert!(store.latest_rate("USD", "EUR").is_none());
    }

    #[test]
    fn test_every_write_bumps_version() {
        let store = seeded();
        let v0 = store.data_version();

        store.append_price(price("IE1", "2026-01-01", 10.0)).unwrap();
        let v1 = store.data_version();
        assert!(v1 > v0);

        store
            .append_exchange_rate(ExchangeRate {
                from: "USD".to_string(),
                to: "EUR".to_string(),
                date: d("2026-01-01"),
                rate: 0.9,
            })
            .unwrap();
        let v2 = store.data_version();
        assert!(v2 > v1);

        store
            .upsert_holding(Holding {
                account_id: "acc".to_string(),
                instrument_id: "IE1".to_string(),
                quantity: 1.0,
                purchase_date: None,
                purchase_price: None,
            })
            .unwrap();
        let v3 = store.data_version();
        assert!(v3 > v2);

        assert!(store.remove_holding("acc", "IE1").unwrap());
        assert!(store.data_version() > v3);
    }

    #[test]
    fn test_currency_is_immutable() {
        let store = seeded();
        let err = store.insert_instrument(instrument("IE1", "USD")).unwrap_err();
        assert!(err.to_string().contains("cannot be changed"));
        assert_eq!(store.get_instrument("IE1").unwrap().currency, "EUR");
    }

    #[test]
    fn test_metadata_update_keeps_currency() {
        let store = seeded();
        assert!(
            store
                .upsert_instrument_metadata("IE1", Some("Renamed"), Some("IWDA.AS"))
                .unwrap()
        );
        let updated = store.get_instrument("IE1").unwrap();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.ticker.as_deref(), Some("IWDA.AS"));
        assert_eq!(updated.currency, "EUR");

        // Same values again is a no-op
        let version = store.data_version();
        assert!(
            !store
                .upsert_instrument_metadata("IE1", Some("Renamed"), None)
                .unwrap()
        );
        assert_eq!(store.data_version(), version);
    }

    #[test]
    fn test_holding_requires_existing_references() {
        let store = seeded();
        let mut holding = Holding {
            account_id: "missing".to_string(),
            instrument_id: "IE1".to_string(),
            quantity: 1.0,
            purchase_date: None,
            purchase_price: None,
        };
        assert!(store.upsert_holding(holding.clone()).is_err());

        holding.account_id = "acc".to_string();
        holding.quantity = -1.0;
        assert!(store.upsert_holding(holding.clone()).is_err());

        holding.quantity = 3.0;
        store.upsert_holding(holding.clone()).unwrap();
        // Same pair replaces the existing row
        holding.quantity = 4.0;
        store.upsert_holding(holding).unwrap();
        let holdings = store.list_account_holdings("acc");
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].quantity, 4.0);
    }

    #[test]
    fn test_settings_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.setting("last_refresh").is_none());
        store.set_setting("last_refresh", "2026-01-01T00:00:00Z").unwrap();
        assert_eq!(
            store.setting("last_refresh").as_deref(),
            Some("2026-01-01T00:00:00Z")
        );
    }
}
