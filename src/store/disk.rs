use crate::core::model::{BankAccount, ExchangeRate, Holding, Instrument, Price, Quadrant};
use crate::core::store::PortfolioStore;
use crate::store::memory::MemoryStore;
use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use serde::{Serialize, de::DeserializeOwned};
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

struct Partitions {
    instruments: PartitionHandle,
    prices: PartitionHandle,
    rates: PartitionHandle,
    holdings: PartitionHandle,
    accounts: PartitionHandle,
    quadrants: PartitionHandle,
    settings: PartitionHandle,
}

/// Another process holds the store open.
#[derive(Debug, thiserror::Error)]
#[error("The store at {} is in use by another quadfolio process", .path.display())]
pub struct StoreLocked {
    pub path: PathBuf,
}

/// Portfolio store persisted in a fjall keyspace.
///
/// Only one process may open a data directory at a time: an exclusive lock
/// on `store.lock` is held until the store is dropped. The whole dataset is
/// loaded into a [`MemoryStore`] on open; reads are served from memory and
/// every write goes to disk before it becomes visible.
/// Price and rate rows are keyed by a big-endian row number so that reloading
/// preserves insertion order, which decides ties between rows sharing a date.
pub struct DiskStore {
    memory: MemoryStore,
    keyspace: Keyspace,
    partitions: Partitions,
    next_row: AtomicU64,
    write_lock: Mutex<()>,
    // Declared last so the keyspace is closed before the lock is released
    _lock_file: File,
}

fn open_partition(keyspace: &Keyspace, name: &str) -> Result<PartitionHandle> {
    keyspace
        .open_partition(name, PartitionCreateOptions::default())
        .with_context(|| format!("Failed to open partition: {name}"))
}

fn decode<V: DeserializeOwned>(partition: &str, value: &[u8]) -> Result<V> {
    serde_json::from_slice(value)
        .with_context(|| format!("Failed to decode a row of partition: {partition}"))
}

fn lock_data_dir(path: &Path) -> Result<File> {
    let lock_path = path.join("store.lock");
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;
    match file.try_lock() {
        Ok(()) => Ok(file),
        Err(TryLockError::WouldBlock) => Err(StoreLocked {
            path: path.to_path_buf(),
        }
        .into()),
        Err(TryLockError::Error(e)) => {
            Err(e).with_context(|| format!("Failed to lock {}", lock_path.display()))
        }
    }
}

fn holding_key(account_id: &str, instrument_id: &str) -> Vec<u8> {
    format!("{account_id}\u{0}{instrument_id}").into_bytes()
}

fn row_number(key: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| anyhow!("Malformed row key of length {}", key.len()))?;
    Ok(u64::from_be_bytes(bytes))
}

impl DiskStore {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create data directory: {}", path.display()))?;
        let lock_file = lock_data_dir(path)?;

        let keyspace = Config::new(path.join("store"))
            .open()
            .with_context(|| format!("Failed to open store at {}", path.display()))?;
        let partitions = Partitions {
            instruments: open_partition(&keyspace, "instruments")?,
            prices: open_partition(&keyspace, "prices")?,
            rates: open_partition(&keyspace, "rates")?,
            holdings: open_partition(&keyspace, "holdings")?,
            accounts: open_partition(&keyspace, "accounts")?,
            quadrants: open_partition(&keyspace, "quadrants")?,
            settings: open_partition(&keyspace, "settings")?,
        };

        let store = Self {
            memory: MemoryStore::new(),
            keyspace,
            partitions,
            next_row: AtomicU64::new(0),
            write_lock: Mutex::new(()),
            _lock_file: lock_file,
        };
        store.load()?;
        Ok(store)
    }

    fn load(&self) -> Result<()> {
        let p = &self.partitions;

        for kv in p.instruments.iter() {
            let (_, value) = kv?;
            self.memory
                .apply_instrument(decode::<Instrument>("instruments", &value)?);
        }
        for kv in p.accounts.iter() {
            let (_, value) = kv?;
            self.memory
                .apply_account(decode::<BankAccount>("accounts", &value)?);
        }
        for kv in p.quadrants.iter() {
            let (_, value) = kv?;
            self.memory
                .apply_quadrant(decode::<Quadrant>("quadrants", &value)?);
        }
        for kv in p.holdings.iter() {
            let (_, value) = kv?;
            self.memory
                .apply_holding(decode::<Holding>("holdings", &value)?);
        }

        let mut next_row = 0;
        let mut price_rows = 0usize;
        for kv in p.prices.iter() {
            let (key, value) = kv?;
            next_row = next_row.max(row_number(&key)? + 1);
            self.memory.apply_price(decode::<Price>("prices", &value)?);
            price_rows += 1;
        }
        let mut rate_rows = 0usize;
        for kv in p.rates.iter() {
            let (key, value) = kv?;
            next_row = next_row.max(row_number(&key)? + 1);
            self.memory
                .apply_rate(decode::<ExchangeRate>("rates", &value)?);
            rate_rows += 1;
        }
        self.next_row.store(next_row, Ordering::SeqCst);

        for kv in p.settings.iter() {
            let (key, value) = kv?;
            let key = String::from_utf8_lossy(&key).into_owned();
            let value = String::from_utf8_lossy(&value).into_owned();
            self.memory.apply_setting(&key, &value);
        }

        info!(
            "Loaded store: {} instruments, {} holdings, {} prices, {} rates",
            p.instruments.len()?,
            p.holdings.len()?,
            price_rows,
            rate_rows
        );
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn put<V: Serialize>(&self, partition: &PartitionHandle, key: Vec<u8>, value: &V) -> Result<()> {
        partition.insert(key, serde_json::to_vec(value)?)?;
        // Hands the journal to the OS so a crashed process loses nothing
        self.keyspace.persist(PersistMode::Buffer)?;
        Ok(())
    }

    fn put_row<V: Serialize>(&self, partition: &PartitionHandle, value: &V) -> Result<()> {
        let row = self.next_row.fetch_add(1, Ordering::SeqCst);
        debug!("Persisting row {}", row);
        self.put(partition, row.to_be_bytes().to_vec(), value)
    }
}

impl PortfolioStore for DiskStore {
    fn data_version(&self) -> u64 {
        self.memory.data_version()
    }

    fn list_instruments(&self) -> Vec<Instrument> {
        self.memory.list_instruments()
    }

    fn get_instrument(&self, id: &str) -> Option<Instrument> {
        self.memory.get_instrument(id)
    }

    fn latest_price(&self, id: &str) -> Option<Price> {
        self.memory.latest_price(id)
    }

    fn price_history(&self, id: &str) -> Vec<Price> {
        self.memory.price_history(id)
    }

    fn price_at(&self, id: &str, date: NaiveDate) -> Option<Price> {
        self.memory.price_at(id, date)
    }

    fn price_on_or_before(&self, id: &str, date: NaiveDate) -> Option<Price> {
        self.memory.price_on_or_before(id, date)
    }

    fn price_before(&self, id: &str, date: NaiveDate) -> Option<Price> {
        self.memory.price_before(id, date)
    }

    fn latest_rate(&self, from: &str, to: &str) -> Option<ExchangeRate> {
        self.memory.latest_rate(from, to)
    }

    fn rate_on_or_before(&self, from: &str, to: &str, date: NaiveDate) -> Option<ExchangeRate> {
        self.memory.rate_on_or_before(from, to, date)
    }

    fn list_holdings(&self) -> Vec<Holding> {
        self.memory.list_holdings()
    }

    fn list_account_holdings(&self, account_id: &str) -> Vec<Holding> {
        self.memory.list_account_holdings(account_id)
    }

    fn list_accounts(&self) -> Vec<BankAccount> {
        self.memory.list_accounts()
    }

    fn list_quadrants(&self) -> Vec<Quadrant> {
        self.memory.list_quadrants()
    }

    fn append_price(&self, price: Price) -> Result<()> {
        if !price.value.is_finite() {
            return Err(anyhow!("Invalid price {} for {}", price.value, price.instrument_id));
        }
        let _guard = self.lock();
        self.put_row(&self.partitions.prices, &price)?;
        self.memory.apply_price(price);
        Ok(())
    }

    fn append_exchange_rate(&self, rate: ExchangeRate) -> Result<()> {
        if !rate.rate.is_finite() || rate.rate <= 0.0 {
            return Err(anyhow!(
                "Invalid rate {} for {}->{}",
                rate.rate,
                rate.from,
                rate.to
            ));
        }
        let _guard = self.lock();
        self.put_row(&self.partitions.rates, &rate)?;
        self.memory.apply_rate(rate);
        Ok(())
    }

    fn upsert_instrument_metadata(
        &self,
        id: &str,
        name: Option<&str>,
        ticker: Option<&str>,
    ) -> Result<bool> {
        let _guard = self.lock();
        match self.memory.prepare_metadata(id, name, ticker)? {
            Some(updated) => {
                self.put(
                    &self.partitions.instruments,
                    updated.isin.clone().into_bytes(),
                    &updated,
                )?;
                self.memory.apply_instrument(updated);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn insert_instrument(&self, instrument: Instrument) -> Result<()> {
        let _guard = self.lock();
        if let Some(instrument) = self.memory.prepare_instrument(&instrument)? {
            self.put(
                &self.partitions.instruments,
                instrument.isin.clone().into_bytes(),
                &instrument,
            )?;
            self.memory.apply_instrument(instrument);
        }
        Ok(())
    }

    fn upsert_account(&self, account: BankAccount) -> Result<()> {
        let _guard = self.lock();
        let unchanged = self
            .memory
            .list_accounts()
            .iter()
            .any(|existing| existing == &account);
        if !unchanged {
            self.put(&self.partitions.accounts, account.id.clone().into_bytes(), &account)?;
            self.memory.apply_account(account);
        }
        Ok(())
    }

    fn upsert_quadrant(&self, quadrant: Quadrant) -> Result<()> {
        let _guard = self.lock();
        let unchanged = self
            .memory
            .list_quadrants()
            .iter()
            .any(|existing| existing == &quadrant);
        if !unchanged {
            self.put(
                &self.partitions.quadrants,
                quadrant.id.clone().into_bytes(),
                &quadrant,
            )?;
            self.memory.apply_quadrant(quadrant);
        }
        Ok(())
    }

    fn upsert_holding(&self, holding: Holding) -> Result<()> {
        let _guard = self.lock();
        self.memory.validate_holding(&holding)?;
        let unchanged = self
            .memory
            .list_account_holdings(&holding.account_id)
            .iter()
            .any(|existing| existing == &holding);
        if !unchanged {
            self.put(
                &self.partitions.holdings,
                holding_key(&holding.account_id, &holding.instrument_id),
                &holding,
            )?;
            self.memory.apply_holding(holding);
        }
        Ok(())
    }

    fn remove_holding(&self, account_id: &str, instrument_id: &str) -> Result<bool> {
        let _guard = self.lock();
        if !self.memory.holding_exists(account_id, instrument_id) {
            return Ok(false);
        }
        self.partitions
            .holdings
            .remove(holding_key(account_id, instrument_id))?;
        self.keyspace.persist(PersistMode::Buffer)?;
        Ok(self.memory.apply_holding_removal(account_id, instrument_id))
    }

    fn setting(&self, key: &str) -> Option<String> {
        self.memory.setting(key)
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock();
        self.partitions.settings.insert(key.as_bytes(), value.as_bytes())?;
        self.keyspace.persist(PersistMode::Buffer)?;
        self.memory.apply_setting(key, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn seed(store: &DiskStore) {
        store
            .insert_instrument(Instrument {
                isin: "US0000000001".to_string(),
                name: "US Fund".to_string(),
                ticker: Some("USF".to_string()),
                currency: "USD".to_string(),
                quadrant: Some("growth".to_string()),
            })
            .unwrap();
        store
            .upsert_quadrant(Quadrant {
                id: "growth".to_string(),
                name: "Growth".to_string(),
            })
            .unwrap();
        store
            .upsert_account(BankAccount {
                id: "acc".to_string(),
                bank: "Bank".to_string(),
                name: "Broker".to_string(),
            })
            .unwrap();
        store
            .upsert_holding(Holding {
                account_id: "acc".to_string(),
                instrument_id: "US0000000001".to_string(),
                quantity: 269.57,
                purchase_date: Some(d("2025-06-01")),
                purchase_price: Some(40.0),
            })
            .unwrap();
    }

    #[test]
    fn test_disk_store_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = DiskStore::open(dir.path()).unwrap();
            seed(&store);
            for (date, value) in [("2026-01-22", 50.0), ("2026-01-20", 49.0), ("2026-01-22", 50.56)] {
                store
                    .append_price(Price {
                        instrument_id: "US0000000001".to_string(),
                        date: d(date),
                        value,
                        currency: "USD".to_string(),
                    })
                    .unwrap();
            }
            store
                .append_exchange_rate(ExchangeRate {
                    from: "USD".to_string(),
                    to: "EUR".to_string(),
                    date: d("2026-01-22"),
                    rate: 0.85,
                })
                .unwrap();
            store.set_setting("last_refresh", "2026-01-22T10:00:00Z").unwrap();
        }

        let store = DiskStore::open(dir.path()).unwrap();
        assert_eq!(store.list_instruments().len(), 1);
        assert_eq!(store.list_quadrants().len(), 1);
        assert_eq!(store.list_holdings()[0].quantity, 269.57);
        assert_eq!(store.price_history("US0000000001").len(), 3);
        // The later of the two 2026-01-22 rows still wins after reload
        assert_eq!(store.latest_price("US0000000001").unwrap().value, 50.56);
        assert_eq!(store.latest_rate("USD", "EUR").unwrap().rate, 0.85);
        assert_eq!(
            store.setting("last_refresh").as_deref(),
            Some("2026-01-22T10:00:00Z")
        );
    }

    #[test]
    fn test_second_open_is_refused_while_store_is_open() {
        let dir = tempdir().unwrap();
        let first = DiskStore::open(dir.path()).unwrap();
        seed(&first);

        let err = DiskStore::open(dir.path()).err().unwrap();
        let locked = err.downcast_ref::<StoreLocked>().unwrap();
        assert_eq!(locked.path, dir.path());

        // Both writers would otherwise start numbering rows from the same value
        first
            .append_price(Price {
                instrument_id: "US0000000001".to_string(),
                date: d("2026-01-22"),
                value: 50.0,
                currency: "USD".to_string(),
            })
            .unwrap();
        drop(first);

        let second = DiskStore::open(dir.path()).unwrap();
        second
            .append_price(Price {
                instrument_id: "US0000000001".to_string(),
                date: d("2026-01-23"),
                value: 51.0,
                currency: "USD".to_string(),
            })
            .unwrap();
        drop(second);

        let store = DiskStore::open(dir.path()).unwrap();
        let history = store.price_history("US0000000001");
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].value, 51.0);
    }

    #[test]
    fn test_disk_store_removes_holdings() {
        let dir = tempdir().unwrap();
        {
            let store = DiskStore::open(dir.path()).unwrap();
            seed(&store);
            assert!(store.remove_holding("acc", "US0000000001").unwrap());
            assert!(!store.remove_holding("acc", "US0000000001").unwrap());
        }
        let store = DiskStore::open(dir.path()).unwrap();
        assert!(store.list_holdings().is_empty());
    }

    #[test]
    fn test_disk_store_rejects_currency_change() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        seed(&store);
        let result = store.insert_instrument(Instrument {
            isin: "US0000000001".to_string(),
            name: "US Fund".to_string(),
            ticker: None,
            currency: "EUR".to_string(),
            quadrant: None,
        });
        assert!(result.is_err());
    }
}
