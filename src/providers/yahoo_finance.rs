use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::core::market::{MarketDataSource, PricePoint, Quote};
use crate::core::model::ExchangeRate;
use crate::providers::util::with_retry;

const DEFAULT_RETRIES: usize = 2;
const DEFAULT_RETRY_DELAY_MS: u64 = 500;

fn date_of(timestamp: Option<i64>) -> NaiveDate {
    timestamp
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .map_or_else(|| Utc::now().date_naive(), |dt| dt.date_naive())
}

fn extract_series(item: &ChartItem) -> Vec<PricePoint> {
    let (Some(timestamps), Some(closes)) = (
        item.timestamp.as_ref(),
        item.indicators
            .as_ref()
            .and_then(|inds| inds.quote.first())
            .and_then(|q| q.close.as_ref()),
    ) else {
        return Vec::new();
    };

    timestamps
        .iter()
        .zip(closes)
        .filter_map(|(ts, close)| {
            let value = (*close)?;
            let date = DateTime::from_timestamp(*ts, 0)?.date_naive();
            Some(PricePoint {
                date,
                value,
                currency: item.meta.currency.clone(),
            })
        })
        .collect()
}

/// Market data from the Yahoo Finance chart and search endpoints.
pub struct YahooFinanceProvider {
    base_url: String,
    client: reqwest::Client,
    retries: usize,
    retry_delay_ms: u64,
}

impl YahooFinanceProvider {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("quadfolio/1.0")
            .build()?;
        Ok(YahooFinanceProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            retries: DEFAULT_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        })
    }

    pub fn with_retries(mut self, retries: usize, retry_delay_ms: u64) -> Self {
        self.retries = retries;
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
        what: &str,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!("Requesting {} from {} with {:?}", what, url, query);

        let response = with_retry(
            || self.client.get(&url).query(query).send(),
            self.retries,
            self.retry_delay_ms,
        )
        .await
        .map_err(|e| anyhow!("Request error: {} for {} URL: {}", e, what, url))?;

        if !response.status().is_success() {
            return Err(anyhow!("HTTP error: {} for {}", response.status(), what));
        }

        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse JSON response for {}: {}", what, e))
    }

    async fn chart(&self, symbol: &str, query: &[(&str, &str)]) -> Result<ChartItem> {
        let data: ChartResponse = self
            .get_json(&format!("/v8/finance/chart/{symbol}"), query, symbol)
            .await?;
        data.chart
            .result
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No price data found for symbol: {}", symbol))
    }

    /// Looks up the ticker of an instrument by ISIN.
    #[instrument(name = "YahooSymbolSearch", skip(self))]
    pub async fn resolve_symbol(&self, isin: &str) -> Result<SearchQuote> {
        let data: SearchResponse = self
            .get_json(
                "/v1/finance/search",
                &[("q", isin), ("quotesCount", "1"), ("newsCount", "0")],
                isin,
            )
            .await?;
        data.quotes
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No ticker found for: {}", isin))
    }
}

#[derive(Deserialize, Debug)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    result: Vec<ChartItem>,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    quote: Vec<IndicatorQuote>,
}

#[derive(Deserialize, Debug)]
struct IndicatorQuote {
    close: Option<Vec<Option<f64>>>,
}

#[derive(Deserialize, Debug)]
struct ChartItem {
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Option<Indicators>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
    regular_market_time: Option<i64>,
    currency: Option<String>,
    symbol: Option<String>,
    short_name: Option<String>,
    long_name: Option<String>,
}

#[derive(Deserialize, Debug)]
struct SearchResponse {
    #[serde(default)]
    quotes: Vec<SearchQuote>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SearchQuote {
    pub symbol: String,
    pub shortname: Option<String>,
    pub longname: Option<String>,
}

#[async_trait]
impl MarketDataSource for YahooFinanceProvider {
    #[instrument(name = "YahooQuoteFetch", skip(self))]
    async fn fetch_quote(&self, identifier: &str, ticker: Option<&str>) -> Result<Quote> {
        let (symbol, search_name) = match ticker {
            Some(ticker) => (ticker.to_string(), None),
            None => {
                let found = self.resolve_symbol(identifier).await?;
                debug!("Resolved {} to {}", identifier, found.symbol);
                (found.symbol, found.longname.or(found.shortname))
            }
        };

        let item = self
            .chart(&symbol, &[("interval", "1d"), ("range", "5d")])
            .await?;
        let meta = item.meta;
        Ok(Quote {
            value: meta.regular_market_price,
            date: date_of(meta.regular_market_time),
            currency: meta.currency,
            name: meta.long_name.or(meta.short_name).or(search_name),
            ticker: Some(meta.symbol.unwrap_or(symbol)),
        })
    }

    #[instrument(name = "YahooRateFetch", skip(self))]
    async fn fetch_exchange_rate(&self, from: &str, to: &str) -> Result<ExchangeRate> {
        let symbol = format!("{from}{to}=X");
        let data: ChartResponse = self
            .get_json(&format!("/v8/finance/chart/{symbol}"), &[], &symbol)
            .await?;
        let item = data
            .chart
            .result
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No rate data found for currency pair: {}", symbol))?;
        let rate = item
            .meta
            .regular_market_price
            .ok_or_else(|| anyhow!("No rate data found for currency pair: {}", symbol))?;
        Ok(ExchangeRate {
            from: from.to_string(),
            to: to.to_string(),
            date: date_of(item.meta.regular_market_time),
            rate,
        })
    }

    #[instrument(name = "YahooSeriesFetch", skip(self))]
    async fn fetch_historical_series(
        &self,
        symbol: &str,
        period: &str,
        interval: &str,
    ) -> Result<Vec<PricePoint>> {
        let item = self
            .chart(symbol, &[("range", period), ("interval", interval)])
            .await?;
        let points = extract_series(&item);
        debug!("{} points for {}", points.len(), symbol);
        Ok(points)
    }
}
