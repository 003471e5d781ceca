use crate::core::market::Benchmark;
use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct QuadrantConfig {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct InstrumentConfig {
    pub isin: String,
    pub name: String,
    #[serde(default)]
    pub ticker: Option<String>,
    pub currency: String,
    #[serde(default)]
    pub quadrant: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct HoldingConfig {
    pub isin: String,
    pub quantity: f64,
    #[serde(default)]
    pub purchase_date: Option<NaiveDate>,
    #[serde(default)]
    pub purchase_price: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AccountConfig {
    pub id: String,
    pub bank: String,
    pub name: String,
    #[serde(default)]
    pub holdings: Vec<HoldingConfig>,
}

/// Entities maintained by the user and seeded into the store on start-up.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct PortfolioConfig {
    #[serde(default)]
    pub quadrants: Vec<QuadrantConfig>,
    #[serde(default)]
    pub instruments: Vec<InstrumentConfig>,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct YahooProviderConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub yahoo: Option<YahooProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            yahoo: Some(YahooProviderConfig {
                base_url: "https://query1.finance.yahoo.com".to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RefreshConfig {
    /// Period of the in-process timer and of installed schedules.
    pub interval_seconds: u64,
    /// Pause between two instrument requests.
    pub request_delay_ms: u64,
    pub timer_enabled: bool,
    /// Currencies whose rate to the base currency is fetched on every cycle,
    /// in addition to the currencies of the instruments.
    pub fx_currencies: Vec<String>,
    pub benchmark_period: String,
    pub benchmark_interval: String,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        RefreshConfig {
            interval_seconds: 3600,
            request_delay_ms: 500,
            timer_enabled: true,
            fx_currencies: vec!["USD".to_string()],
            benchmark_period: "1y".to_string(),
            benchmark_interval: "1d".to_string(),
        }
    }
}

impl RefreshConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BenchmarkConfig {
    /// Instrument identifier the series is stored under.
    pub id: String,
    pub name: String,
    pub ticker: String,
    pub currency: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BenchmarksConfig {
    pub equity_index: BenchmarkConfig,
    pub gold: BenchmarkConfig,
    pub world_index: BenchmarkConfig,
}

impl Default for BenchmarksConfig {
    fn default() -> Self {
        BenchmarksConfig {
            equity_index: BenchmarkConfig {
                id: "BENCHMARK-SP500".to_string(),
                name: "S&P 500".to_string(),
                ticker: "^GSPC".to_string(),
                currency: "USD".to_string(),
            },
            gold: BenchmarkConfig {
                id: "BENCHMARK-GOLD".to_string(),
                name: "Gold (troy ounce)".to_string(),
                ticker: "GC=F".to_string(),
                currency: "USD".to_string(),
            },
            world_index: BenchmarkConfig {
                id: "BENCHMARK-MSCI-WORLD".to_string(),
                name: "MSCI World".to_string(),
                ticker: "URTH".to_string(),
                currency: "USD".to_string(),
            },
        }
    }
}

impl BenchmarksConfig {
    pub fn get(&self, benchmark: Benchmark) -> &BenchmarkConfig {
        match benchmark {
            Benchmark::EquityIndex => &self.equity_index,
            Benchmark::Gold => &self.gold,
            Benchmark::WorldIndex => &self.world_index,
        }
    }

    pub fn ids(&self) -> HashSet<String> {
        Benchmark::ALL
            .iter()
            .map(|b| self.get(*b).id.clone())
            .collect()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ScheduleConfig {
    pub label: String,
    pub run_at_load: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            label: "quadfolio-refresh".to_string(),
            run_at_load: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_base_currency")]
    pub base_currency: String,
    #[serde(default)]
    pub portfolio: PortfolioConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub benchmarks: BenchmarksConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    pub data_path: Option<String>,
    pub log_path: Option<String>,
}

fn default_base_currency() -> String {
    "EUR".to_string()
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("io", "quadfolio", "quadfolio")
            .context("Could not determine project directories")
    }

    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        Ok(Self::project_dirs()?.data_dir().to_path_buf())
    }

    /// Path of the refresh log, next to the data by default.
    pub fn refresh_log_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.log_path {
            return Ok(PathBuf::from(custom_path));
        }
        Ok(self.default_data_path()?.join("refresh.log"))
    }

    pub fn yahoo_base_url(&self) -> &str {
        self.providers
            .yahoo
            .as_ref()
            .map_or("https://query1.finance.yahoo.com", |p| &p.base_url)
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config.validate()?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    /// Rejects configurations whose references cannot be satisfied.
    pub fn validate(&self) -> Result<()> {
        if self.base_currency.trim().is_empty() {
            bail!("base_currency must not be empty");
        }

        let quadrants: HashSet<_> = self.portfolio.quadrants.iter().map(|q| &q.id).collect();
        let mut instruments = HashSet::new();
        for instrument in &self.portfolio.instruments {
            if !instruments.insert(&instrument.isin) {
                bail!("Instrument {} is declared twice", instrument.isin);
            }
            if let Some(quadrant) = &instrument.quadrant {
                if !quadrants.contains(quadrant) {
                    bail!(
                        "Instrument {} references unknown quadrant {}",
                        instrument.isin,
                        quadrant
                    );
                }
            }
        }

        let benchmark_ids = self.benchmarks.ids();
        if let Some(clash) = instruments.iter().find(|id| benchmark_ids.contains(id.as_str())) {
            bail!("Instrument {} clashes with a benchmark identifier", clash);
        }

        for account in &self.portfolio.accounts {
            let mut seen = HashSet::new();
            for holding in &account.holdings {
                if !instruments.contains(&holding.isin) {
                    bail!(
                        "Account {} holds unknown instrument {}",
                        account.id,
                        holding.isin
                    );
                }
                if !seen.insert(&holding.isin) {
                    bail!("Account {} holds {} twice", account.id, holding.isin);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let yaml_str = r#"
base_currency: "EUR"
portfolio:
  quadrants:
    - id: "growth"
      name: "Growth"
  instruments:
    - isin: "IE00B4L5Y983"
      name: "iShares Core MSCI World"
      ticker: "IWDA.AS"
      currency: "EUR"
      quadrant: "growth"
    - isin: "US78462F1030"
      name: "SPDR S&P 500"
      currency: "USD"
  accounts:
    - id: "broker"
      bank: "ING"
      name: "Brokerage"
      holdings:
        - isin: "IE00B4L5Y983"
          quantity: 160.59
          purchase_date: "2024-03-01"
          purchase_price: 80.0
        - isin: "US78462F1030"
          quantity: 269.57
"#;

        let config: AppConfig = serde_yaml::from_str(yaml_str).expect("Failed to deserialize");
        config.validate().unwrap();
        assert_eq!(config.base_currency, "EUR");
        assert_eq!(config.portfolio.instruments.len(), 2);
        assert_eq!(
            config.portfolio.instruments[0].ticker,
            Some("IWDA.AS".to_string())
        );
        assert_eq!(config.portfolio.instruments[1].quadrant, None);
        let holdings = &config.portfolio.accounts[0].holdings;
        assert_eq!(holdings[0].quantity, 160.59);
        assert_eq!(
            holdings[0].purchase_date,
            Some(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        );

        // Defaults
        assert_eq!(
            config.providers.yahoo.unwrap().base_url,
            "https://query1.finance.yahoo.com"
        );
        assert_eq!(config.refresh.request_delay_ms, 500);
        assert_eq!(config.refresh.fx_currencies, vec!["USD".to_string()]);
        assert_eq!(config.benchmarks.gold.ticker, "GC=F");
        assert_eq!(config.schedule.label, "quadfolio-refresh");
    }

    #[test]
    fn test_config_overrides() {
        let yaml_str = r#"
base_currency: "CHF"
providers:
  yahoo:
    base_url: "http://example.com/yahoo"
refresh:
  interval_seconds: 900
  request_delay_ms: 0
data_path: "/tmp/quadfolio"
"#;
        let config: AppConfig = serde_yaml::from_str(yaml_str).unwrap();
        assert_eq!(config.base_currency, "CHF");
        assert_eq!(config.yahoo_base_url(), "http://example.com/yahoo");
        assert_eq!(config.refresh.interval(), Duration::from_secs(900));
        assert_eq!(config.refresh.request_delay(), Duration::ZERO);
        // Unspecified refresh fields keep their defaults
        assert!(config.refresh.timer_enabled);
        assert_eq!(
            config.refresh_log_path().unwrap(),
            PathBuf::from("/tmp/quadfolio/refresh.log")
        );
    }

    #[test]
    fn test_validate_rejects_dangling_references() {
        let yaml_str = r#"
portfolio:
  instruments:
    - isin: "IE1"
      name: "Fund"
      currency: "EUR"
      quadrant: "missing"
"#;
        let config: AppConfig = serde_yaml::from_str(yaml_str).unwrap();
        assert!(config.validate().is_err());

        let yaml_str = r#"
portfolio:
  accounts:
    - id: "broker"
      bank: "ING"
      name: "Brokerage"
      holdings:
        - isin: "IE1"
          quantity: 1.0
"#;
        let config: AppConfig = serde_yaml::from_str(yaml_str).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown instrument"));
    }
}
