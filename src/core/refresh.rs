//! Refresh of prices, exchange rates and benchmark series from a market data
//! source.
//!
//! At most one refresh runs at a time. Per-item failures are recorded in the
//! result and never abort the cycle.

use crate::core::config::{AppConfig, BenchmarksConfig};
use crate::core::events::{EventBus, PortfolioEvent};
use crate::core::market::{Benchmark, MarketDataSource, PricePoint, Quote};
use crate::core::model::{Instrument, Price};
use crate::core::refresh_log::RefreshLog;
use crate::core::store::{LAST_REFRESH_KEY, PortfolioStore};
use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RefreshTier {
    Succeeded,
    Partial,
    Failed,
}

impl RefreshTier {
    pub fn classify(success_count: usize, total_count: usize) -> Self {
        if success_count == total_count {
            RefreshTier::Succeeded
        } else if success_count == 0 {
            RefreshTier::Failed
        } else {
            RefreshTier::Partial
        }
    }
}

impl std::fmt::Display for RefreshTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshTier::Succeeded => write!(f, "succeeded"),
            RefreshTier::Partial => write!(f, "partially succeeded"),
            RefreshTier::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshResult {
    pub success_count: usize,
    pub total_count: usize,
    /// Display names of the instruments whose quote could not be refreshed.
    pub failed_instruments: Vec<String>,
    pub debug_log_lines: Vec<String>,
    pub tier: RefreshTier,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RefreshResult {
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Refresh {}: {}/{} instruments updated",
            self.tier, self.success_count, self.total_count
        );
        if !self.failed_instruments.is_empty() {
            summary.push_str(&format!("; failed: {}", self.failed_instruments.join(", ")));
        }
        summary
    }
}

/// Tunables of a refresh cycle.
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub base_currency: String,
    pub request_delay: Duration,
    pub fx_currencies: Vec<String>,
    pub benchmark_period: String,
    pub benchmark_interval: String,
    pub benchmarks: BenchmarksConfig,
}

impl RefreshSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            base_currency: config.base_currency.clone(),
            request_delay: config.refresh.request_delay(),
            fx_currencies: config.refresh.fx_currencies.clone(),
            benchmark_period: config.refresh.benchmark_period.clone(),
            benchmark_interval: config.refresh.benchmark_interval.clone(),
            benchmarks: config.benchmarks.clone(),
        }
    }
}

/// Clears the in-flight flag when a refresh ends, however it ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct RefreshOrchestrator {
    store: Arc<dyn PortfolioStore>,
    source: Arc<dyn MarketDataSource>,
    settings: RefreshSettings,
    events: EventBus,
    log: Arc<RefreshLog>,
    in_flight: AtomicBool,
    completed: Notify,
}

impl RefreshOrchestrator {
    pub fn new(
        store: Arc<dyn PortfolioStore>,
        source: Arc<dyn MarketDataSource>,
        settings: RefreshSettings,
        events: EventBus,
        log: Arc<RefreshLog>,
    ) -> Self {
        Self {
            store,
            source,
            settings,
            events,
            log,
            in_flight: AtomicBool::new(false),
            completed: Notify::new(),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Signalled after every finished refresh, whoever triggered it.
    pub fn completed(&self) -> &Notify {
        &self.completed
    }

    pub fn log(&self) -> &RefreshLog {
        &self.log
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.store
            .setting(LAST_REFRESH_KEY)
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    fn try_acquire(&self) -> Option<FlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard(&self.in_flight))
    }

    fn record(&self, ok: bool, message: &str) {
        if let Err(e) = self.log.append(ok, message) {
            warn!("Failed to write refresh log: {:#}", e);
        }
    }

    /// Runs one refresh cycle. Returns `None` when another cycle is already
    /// in progress.
    pub async fn perform_refresh(&self) -> Option<RefreshResult> {
        let Some(guard) = self.try_acquire() else {
            info!("Refresh already in progress, skipping");
            self.events.publish(PortfolioEvent::RefreshSkipped);
            return None;
        };

        let started_at = Utc::now();
        let version = self.store.data_version();
        self.events.publish(PortfolioEvent::RefreshStarted);
        info!("Refresh started");

        let benchmark_ids = self.settings.benchmarks.ids();
        let instruments: Vec<Instrument> = self
            .store
            .list_instruments()
            .into_iter()
            .filter(|i| !benchmark_ids.contains(&i.isin))
            .collect();

        let mut lines = Vec::new();
        let result = if instruments.is_empty() {
            info!("No instruments to refresh");
            lines.push("No instruments to refresh".to_string());
            self.finish(0, 0, Vec::new(), lines, started_at)
        } else {
            let (success_count, failed) = self.refresh_quotes(&instruments, &mut lines).await;
            self.refresh_rates(&instruments, &mut lines).await;
            self.refresh_benchmarks(&mut lines).await;

            let result = self.finish(
                success_count,
                instruments.len(),
                failed,
                lines,
                started_at,
            );
            if let Err(e) = self
                .store
                .set_setting(LAST_REFRESH_KEY, &result.finished_at.to_rfc3339())
            {
                warn!("Failed to record last refresh time: {:#}", e);
            }
            result
        };

        self.record(result.tier == RefreshTier::Succeeded, &result.summary());
        info!("{}", result.summary());

        let current = self.store.data_version();
        if current != version {
            self.events
                .publish(PortfolioEvent::DataChanged { version: current });
        }
        self.events
            .publish(PortfolioEvent::RefreshCompleted(result.clone()));

        drop(guard);
        self.completed.notify_waiters();
        Some(result)
    }

    fn finish(
        &self,
        success_count: usize,
        total_count: usize,
        failed_instruments: Vec<String>,
        debug_log_lines: Vec<String>,
        started_at: DateTime<Utc>,
    ) -> RefreshResult {
        RefreshResult {
            success_count,
            total_count,
            failed_instruments,
            debug_log_lines,
            tier: RefreshTier::classify(success_count, total_count),
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn refresh_quotes(
        &self,
        instruments: &[Instrument],
        lines: &mut Vec<String>,
    ) -> (usize, Vec<String>) {
        let mut success_count = 0;
        let mut failed = Vec::new();

        for (index, instrument) in instruments.iter().enumerate() {
            if index > 0 && !self.settings.request_delay.is_zero() {
                tokio::time::sleep(self.settings.request_delay).await;
            }

            let outcome = self
                .source
                .fetch_quote(&instrument.isin, instrument.ticker.as_deref())
                .await
                .and_then(|quote| self.apply_quote(instrument, quote));
            match outcome {
                Ok(value) => {
                    debug!("{}: {}", instrument.isin, value);
                    lines.push(format!("{}: {}", instrument.isin, value));
                    success_count += 1;
                }
                Err(e) => {
                    warn!("Failed to refresh {}: {:#}", instrument.isin, e);
                    lines.push(format!("{}: {:#}", instrument.isin, e));
                    failed.push(instrument.display_name().to_string());
                }
            }
        }

        (success_count, failed)
    }

    fn apply_quote(&self, instrument: &Instrument, quote: Quote) -> Result<f64> {
        let value = quote
            .value
            .ok_or_else(|| anyhow!("no price in quote"))?;
        if let Some(currency) = quote.currency.as_deref() {
            if currency != instrument.currency {
                bail!(
                    "quote is in {} but the instrument is denominated in {}",
                    currency,
                    instrument.currency
                );
            }
        }
        self.store.append_price(Price {
            instrument_id: instrument.isin.clone(),
            date: quote.date,
            value,
            currency: instrument.currency.clone(),
        })?;
        self.store.upsert_instrument_metadata(
            &instrument.isin,
            quote.name.as_deref(),
            quote.ticker.as_deref(),
        )?;
        Ok(value)
    }

    /// Currencies that need a rate into the base currency.
    fn fx_currencies(&self, instruments: &[Instrument]) -> BTreeSet<String> {
        let benchmarks = &self.settings.benchmarks;
        instruments
            .iter()
            .map(|i| i.currency.clone())
            .chain(self.settings.fx_currencies.iter().cloned())
            .chain(Benchmark::ALL.iter().map(|b| benchmarks.get(*b).currency.clone()))
            .filter(|c| c != &self.settings.base_currency)
            .collect()
    }

    async fn refresh_rates(&self, instruments: &[Instrument], lines: &mut Vec<String>) {
        let base = &self.settings.base_currency;
        for currency in self.fx_currencies(instruments) {
            let outcome = self
                .source
                .fetch_exchange_rate(&currency, base)
                .await
                .and_then(|rate| {
                    let value = rate.rate;
                    self.store.append_exchange_rate(rate)?;
                    Ok(value)
                });
            match outcome {
                Ok(rate) => lines.push(format!("{currency}->{base}: {rate}")),
                Err(e) => {
                    warn!("Failed to refresh {}->{} rate: {:#}", currency, base, e);
                    lines.push(format!("{currency}->{base}: {e:#}"));
                    self.record(false, &format!("Exchange rate {currency}->{base}: {e:#}"));
                }
            }
        }
    }

    async fn refresh_benchmarks(&self, lines: &mut Vec<String>) {
        let period = &self.settings.benchmark_period;
        let interval = &self.settings.benchmark_interval;
        let fetch = |benchmark: Benchmark| {
            let ticker = self.settings.benchmarks.get(benchmark).ticker.clone();
            async move {
                let series = self
                    .source
                    .fetch_historical_series(&ticker, period, interval)
                    .await;
                (benchmark, series)
            }
        };

        let (equity, gold, world) = futures::join!(
            fetch(Benchmark::EquityIndex),
            fetch(Benchmark::Gold),
            fetch(Benchmark::WorldIndex)
        );

        for (benchmark, series) in [equity, gold, world] {
            match series.and_then(|points| self.store_benchmark(benchmark, points)) {
                Ok(added) => lines.push(format!("{benchmark} benchmark: {added} new points")),
                Err(e) => {
                    warn!("Failed to refresh {} benchmark: {:#}", benchmark, e);
                    lines.push(format!("{benchmark} benchmark: {e:#}"));
                    self.record(false, &format!("Benchmark {benchmark}: {e:#}"));
                }
            }
        }
    }

    /// Appends the points newer than the latest stored one.
    fn store_benchmark(&self, benchmark: Benchmark, points: Vec<PricePoint>) -> Result<usize> {
        let config = self.settings.benchmarks.get(benchmark);
        if self.store.get_instrument(&config.id).is_none() {
            self.store.insert_instrument(Instrument {
                isin: config.id.clone(),
                name: config.name.clone(),
                ticker: Some(config.ticker.clone()),
                currency: config.currency.clone(),
                quadrant: None,
            })?;
        }

        let latest = self.store.latest_price(&config.id).map(|p| p.date);
        let mut seen = HashSet::new();
        let mut added = 0;
        for point in points {
            if latest.is_some_and(|l| point.date <= l) || !seen.insert(point.date) {
                continue;
            }
            self.store.append_price(Price {
                instrument_id: config.id.clone(),
                date: point.date,
                value: point.value,
                currency: point.currency.unwrap_or_else(|| config.currency.clone()),
            })?;
            added += 1;
        }
        debug!("{} benchmark: appended {} points", benchmark, added);
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::ExchangeRate;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[derive(Default)]
    struct ScriptedSource {
        /// Missing entries fail with an error, `None` returns a quote without value.
        quotes: HashMap<String, Option<f64>>,
        /// Currency reported with every quote.
        quote_currency: Option<&'static str>,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
        quote_calls: AtomicUsize,
    }

    #[async_trait]
    impl MarketDataSource for ScriptedSource {
        async fn fetch_quote(&self, identifier: &str, _ticker: Option<&str>) -> Result<Quote> {
            self.quote_calls.fetch_add(1, Ordering::SeqCst);
            if let Some((entered, release)) = &self.gate {
                entered.notify_one();
                release.notified().await;
            }
            match self.quotes.get(identifier) {
                Some(value) => Ok(Quote {
                    value: *value,
                    date: d("2026-01-29"),
                    currency: self.quote_currency.map(str::to_string),
                    name: Some(format!("Learnt {identifier}")),
                    ticker: Some(format!("{identifier}.T")),
                }),
                None => Err(anyhow!("unknown symbol {identifier}")),
            }
        }

        async fn fetch_exchange_rate(&self, from: &str, to: &str) -> Result<ExchangeRate> {
            Ok(ExchangeRate {
                from: from.to_string(),
                to: to.to_string(),
                date: d("2026-01-29"),
                rate: 0.85,
            })
        }

        async fn fetch_historical_series(
            &self,
            symbol: &str,
            _period: &str,
            _interval: &str,
        ) -> Result<Vec<PricePoint>> {
            if symbol == "URTH" {
                return Err(anyhow!("series unavailable"));
            }
            Ok(vec![
                PricePoint {
                    date: d("2026-01-28"),
                    value: 100.0,
                    currency: None,
                },
                PricePoint {
                    date: d("2026-01-29"),
                    value: 101.0,
                    currency: None,
                },
            ])
        }
    }

    fn store_with(isins: &[&str]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for isin in isins {
            store
                .insert_instrument(Instrument {
                    isin: isin.to_string(),
                    name: format!("Fund {isin}"),
                    ticker: None,
                    currency: "EUR".to_string(),
                    quadrant: None,
                })
                .unwrap();
        }
        store
    }

    fn settings() -> RefreshSettings {
        RefreshSettings {
            base_currency: "EUR".to_string(),
            request_delay: Duration::ZERO,
            fx_currencies: vec!["USD".to_string()],
            benchmark_period: "1y".to_string(),
            benchmark_interval: "1d".to_string(),
            benchmarks: BenchmarksConfig::default(),
        }
    }

    fn orchestrator(
        store: Arc<MemoryStore>,
        source: ScriptedSource,
        dir: &TempDir,
    ) -> RefreshOrchestrator {
        RefreshOrchestrator::new(
            store,
            Arc::new(source),
            settings(),
            EventBus::default(),
            Arc::new(RefreshLog::new(dir.path().join("refresh.log"))),
        )
    }

    #[test]
    fn test_tier_classification() {
        assert_eq!(RefreshTier::classify(3, 3), RefreshTier::Succeeded);
        assert_eq!(RefreshTier::classify(0, 0), RefreshTier::Succeeded);
        assert_eq!(RefreshTier::classify(1, 3), RefreshTier::Partial);
        assert_eq!(RefreshTier::classify(0, 3), RefreshTier::Failed);
    }

    #[tokio::test]
    async fn test_partial_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&["A", "B", "C"]);
        let source = ScriptedSource {
            quotes: HashMap::from([("A".to_string(), Some(10.0)), ("C".to_string(), None)]),
            ..Default::default()
        };
        let orchestrator = orchestrator(Arc::clone(&store), source, &dir);

        let result = orchestrator.perform_refresh().await.unwrap();
        assert_eq!(result.success_count, 1);
        assert_eq!(result.total_count, 3);
        assert_eq!(result.tier, RefreshTier::Partial);
        assert_eq!(result.failed_instruments, vec!["Fund B", "Fund C"]);
        assert!(result.debug_log_lines.iter().any(|l| l.contains("unknown symbol B")));
        assert!(result.finished_at >= result.started_at);

        assert_eq!(store.latest_price("A").unwrap().value, 10.0);
        assert!(store.latest_price("B").is_none());
        assert!(orchestrator.last_refresh().is_some());

        let lines = orchestrator.log().tail(10).unwrap();
        assert!(lines.iter().any(|l| l.contains("[ERROR] Refresh partially succeeded")));
    }

    #[tokio::test]
    async fn test_failed_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(store_with(&["A", "B"]), ScriptedSource::default(), &dir);

        let result = orchestrator.perform_refresh().await.unwrap();
        assert_eq!(result.success_count, 0);
        assert_eq!(result.tier, RefreshTier::Failed);
        assert_eq!(result.failed_instruments.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_portfolio_is_vacuous_success() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(store_with(&[]), ScriptedSource::default(), &dir);

        let result = orchestrator.perform_refresh().await.unwrap();
        assert_eq!(result.total_count, 0);
        assert_eq!(result.tier, RefreshTier::Succeeded);
        assert!(!orchestrator.is_refreshing());
    }

    #[tokio::test]
    async fn test_refresh_updates_metadata_but_not_currency() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&["A"]);
        let source = ScriptedSource {
            quotes: HashMap::from([("A".to_string(), Some(10.0))]),
            ..Default::default()
        };
        let orchestrator = orchestrator(Arc::clone(&store), source, &dir);
        orchestrator.perform_refresh().await.unwrap();

        let instrument = store.get_instrument("A").unwrap();
        assert_eq!(instrument.name, "Learnt A");
        assert_eq!(instrument.ticker.as_deref(), Some("A.T"));
        assert_eq!(instrument.currency, "EUR");
        assert_eq!(store.latest_price("A").unwrap().currency, "EUR");
    }

    #[tokio::test]
    async fn test_quote_in_other_currency_fails_the_instrument() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&["A"]);
        let source = ScriptedSource {
            quotes: HashMap::from([("A".to_string(), Some(100.0))]),
            quote_currency: Some("USD"),
            ..Default::default()
        };
        let orchestrator = orchestrator(Arc::clone(&store), source, &dir);

        let result = orchestrator.perform_refresh().await.unwrap();
        assert_eq!(result.tier, RefreshTier::Failed);
        assert_eq!(result.failed_instruments, vec!["Fund A"]);
        assert!(
            result
                .debug_log_lines
                .iter()
                .any(|l| l.contains("quote is in USD but the instrument is denominated in EUR"))
        );
        assert!(store.latest_price("A").is_none());
        assert_eq!(store.get_instrument("A").unwrap().name, "Fund A");
    }

    #[tokio::test]
    async fn test_rates_and_benchmarks_are_stored() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&["A"]);
        let source = ScriptedSource {
            quotes: HashMap::from([("A".to_string(), Some(10.0))]),
            ..Default::default()
        };
        let orchestrator = orchestrator(Arc::clone(&store), source, &dir);

        let result = orchestrator.perform_refresh().await.unwrap();
        // Benchmarks are not counted as instruments
        assert_eq!(result.total_count, 1);
        assert_eq!(store.latest_rate("USD", "EUR").unwrap().rate, 0.85);

        let benchmarks = BenchmarksConfig::default();
        let gold = &benchmarks.get(Benchmark::Gold).id;
        assert_eq!(store.price_history(gold).len(), 2);
        assert_eq!(store.get_instrument(gold).unwrap().currency, "USD");
        // A failed benchmark does not affect the others or the tier
        assert!(store.price_history(&benchmarks.get(Benchmark::WorldIndex).id).is_empty());
        assert_eq!(result.tier, RefreshTier::Succeeded);

        // Only newer points are appended on the next cycle
        orchestrator.perform_refresh().await.unwrap();
        assert_eq!(store.price_history(gold).len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let source = ScriptedSource {
            quotes: HashMap::from([("A".to_string(), Some(10.0))]),
            gate: Some((Arc::clone(&entered), Arc::clone(&release))),
            ..Default::default()
        };
        let orchestrator = Arc::new(orchestrator(store_with(&["A"]), source, &dir));
        let mut events = orchestrator.events.subscribe();

        let running = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.perform_refresh().await })
        };
        entered.notified().await;
        assert!(orchestrator.is_refreshing());

        assert!(orchestrator.perform_refresh().await.is_none());

        release.notify_one();
        let result = running.await.unwrap().unwrap();
        assert_eq!(result.success_count, 1);
        assert!(!orchestrator.is_refreshing());

        let mut skipped = false;
        while let Ok(event) = events.try_recv() {
            skipped |= matches!(event, PortfolioEvent::RefreshSkipped);
        }
        assert!(skipped);

        // The guard is released, so a new cycle runs (the gate passes again)
        release.notify_one();
        assert!(orchestrator.perform_refresh().await.is_some());
    }
}
