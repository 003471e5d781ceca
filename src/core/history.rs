//! Historical value series over the union of price dates.

use crate::core::model::{Holding, Instrument, Price};
use crate::core::series::{self, DateRange};
use crate::core::valuation::{ValuationEngine, assigned_quadrant};
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};

/// Which holdings a history series sums over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistorySelector {
    All,
    Account(String),
    /// `None` selects instruments without a quadrant.
    Quadrant(Option<String>),
    Instrument(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: f64,
}

struct PricedHolding<'a> {
    quantity: f64,
    instrument_id: &'a str,
}

impl ValuationEngine {
    fn select_holdings(
        &self,
        selector: &HistorySelector,
        instruments: &HashMap<String, Instrument>,
    ) -> Vec<Holding> {
        let quadrants = self.quadrant_names();
        let holdings = match selector {
            HistorySelector::Account(id) => self.store.list_account_holdings(id),
            _ => self.store.list_holdings(),
        };
        holdings
            .into_iter()
            .filter(|h| match selector {
                HistorySelector::All | HistorySelector::Account(_) => true,
                HistorySelector::Instrument(id) => &h.instrument_id == id,
                HistorySelector::Quadrant(quadrant) => instruments
                    .get(&h.instrument_id)
                    .is_some_and(|i| assigned_quadrant(i, &quadrants) == quadrant.as_deref()),
            })
            .collect()
    }

    /// Base-currency value of the selected holdings at every date on which
    /// any of their instruments has a price, within `range`.
    ///
    /// Each holding carries its last known price forward. Holdings without a
    /// price or rate at a date are left out of that date's sum; a date where
    /// none is known is omitted.
    pub fn history_series(&self, selector: &HistorySelector, range: DateRange) -> Vec<SeriesPoint> {
        let instruments: HashMap<String, Instrument> = self
            .store
            .list_instruments()
            .into_iter()
            .map(|i| (i.isin.clone(), i))
            .collect();

        let holdings = self.select_holdings(selector, &instruments);
        let mut histories: HashMap<&str, Vec<Price>> = HashMap::new();
        let mut priced = Vec::new();
        for holding in &holdings {
            let Some(instrument) = instruments.get(&holding.instrument_id) else {
                continue;
            };
            histories
                .entry(instrument.isin.as_str())
                .or_insert_with(|| series::dedup_by_date(&self.store.price_history(&instrument.isin)));
            priced.push(PricedHolding {
                quantity: holding.quantity,
                instrument_id: &instrument.isin,
            });
        }

        let axis: BTreeSet<NaiveDate> = histories
            .values()
            .flat_map(|prices| prices.iter().map(|p| p.date))
            .filter(|date| range.contains(*date))
            .collect();

        axis.into_iter()
            .filter_map(|date| {
                let known: Vec<f64> = priced
                    .iter()
                    .filter_map(|h| {
                        let prices = histories.get(h.instrument_id)?;
                        let price = series::on_or_before(prices, date)?;
                        self.convert(
                            h.quantity * price.value,
                            &price.currency,
                            &self.base_currency,
                            date,
                        )
                    })
                    .collect();
                (!known.is_empty()).then(|| SeriesPoint {
                    date,
                    value: known.iter().sum(),
                })
            })
            .collect()
    }

    /// Portfolio total expressed in troy ounces of gold.
    pub fn gold_equivalent_series(&self, range: DateRange) -> Vec<SeriesPoint> {
        let gold = series::dedup_by_date(&self.store.price_history(&self.gold_id));
        if gold.is_empty() {
            return Vec::new();
        }

        self.history_series(&HistorySelector::All, range)
            .into_iter()
            .filter_map(|point| {
                let price = series::on_or_before(&gold, point.date)?;
                let ounce =
                    self.convert(price.value, &price.currency, &self.base_currency, point.date)?;
                (ounce > 0.0).then(|| SeriesPoint {
                    date: point.date,
                    value: point.value / ounce,
                })
            })
            .collect()
    }
}
