//! Currency conversion over stored exchange rates

use crate::core::model::ExchangeRate;
use crate::core::store::PortfolioStore;
use chrono::NaiveDate;
use tracing::debug;

/// Source of historical exchange rates.
pub trait RateSource {
    fn lookup_rate(&self, from: &str, to: &str, date: NaiveDate) -> Option<ExchangeRate>;
}

impl<S: PortfolioStore + ?Sized> RateSource for S {
    fn lookup_rate(&self, from: &str, to: &str, date: NaiveDate) -> Option<ExchangeRate> {
        PortfolioStore::rate_on_or_before(self, from, to, date)
    }
}

/// Converts `value` from one currency to another using the rate in effect on
/// `date`. Same-currency conversions never consult `rates`. Returns `None`
/// when no rate is known on or before `date`.
pub fn convert<R: RateSource + ?Sized>(
    rates: &R,
    value: f64,
    from: &str,
    to: &str,
    date: NaiveDate,
) -> Option<f64> {
    if from == to {
        return Some(value);
    }

    match rates.lookup_rate(from, to, date) {
        Some(rate) => Some(value * rate.rate),
        None => {
            debug!("No {}->{} rate on or before {}", from, to, date);
            None
        }
    }
}
