//! Point-in-time valuation of holdings in the base currency.
//!
//! Every figure is computed from the store snapshot at call time. Missing
//! prices or rates never turn into zeros: the affected holding is reported as
//! unknown and left out of every sum it would belong to.

use crate::core::cache::VersionedCache;
use crate::core::currency;
use crate::core::model::{ExchangeRate, Holding, Instrument, Price, UNASSIGNED_QUADRANT};
use crate::core::store::PortfolioStore;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Why a holding has no value at a given date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Missing {
    Instrument,
    Price,
    Rate { from: String, to: String },
}

impl std::fmt::Display for Missing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Missing::Instrument => write!(f, "unknown instrument"),
            Missing::Price => write!(f, "no price"),
            Missing::Rate { from, to } => write!(f, "no {from}->{to} rate"),
        }
    }
}

/// Valuation of a single holding at a date.
#[derive(Debug, Clone)]
pub struct HoldingValue {
    pub account_id: String,
    pub instrument_id: String,
    pub name: String,
    pub quantity: f64,
    pub currency: Option<String>,
    pub price: Option<Price>,
    /// Value in the currency of the price used.
    pub native_value: Option<f64>,
    /// Value in the base currency.
    pub value: Option<f64>,
    pub missing: Option<Missing>,
    pub cost_basis: Option<f64>,
    pub gain: Option<f64>,
    /// Share of the enclosing group, in percent.
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupBy {
    Account,
    Quadrant,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupKey {
    Account(String),
    Quadrant(String),
    Unassigned,
    All,
}

#[derive(Debug, Clone)]
pub struct GroupValue {
    pub key: GroupKey,
    pub name: String,
    /// Sum of the known holding values.
    pub value: f64,
    /// Share of the report total, in percent.
    pub weight: Option<f64>,
    pub holdings: Vec<HoldingValue>,
}

impl GroupValue {
    /// Names of the holdings left out of `value`.
    pub fn unknown(&self) -> Vec<&str> {
        self.holdings
            .iter()
            .filter(|h| h.value.is_none())
            .map(|h| h.name.as_str())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.holdings.iter().all(|h| h.value.is_some())
    }
}

/// Grouped valuation of a set of holdings.
#[derive(Debug, Clone)]
pub struct Report {
    pub as_of: NaiveDate,
    pub base_currency: String,
    pub group_by: GroupBy,
    pub groups: Vec<GroupValue>,
    pub total: f64,
}

impl Report {
    pub fn group(&self, key: &GroupKey) -> Option<&GroupValue> {
        self.groups.iter().find(|g| &g.key == key)
    }

    pub fn is_complete(&self) -> bool {
        self.groups.iter().all(GroupValue::is_complete)
    }

    pub fn unknown(&self) -> Vec<&str> {
        self.groups.iter().flat_map(|g| g.unknown()).collect()
    }
}

/// A base-currency total together with the holdings it had to leave out.
#[derive(Debug, Clone, PartialEq)]
pub struct Valuation {
    pub value: f64,
    pub known: usize,
    pub unknown: Vec<String>,
}

impl Valuation {
    pub fn is_complete(&self) -> bool {
        self.unknown.is_empty()
    }

    fn from_group(group: Option<&GroupValue>) -> Self {
        match group {
            Some(group) => Valuation {
                value: group.value,
                known: group.holdings.iter().filter(|h| h.value.is_some()).count(),
                unknown: group.unknown().into_iter().map(str::to_string).collect(),
            },
            None => Valuation {
                value: 0.0,
                known: 0,
                unknown: Vec::new(),
            },
        }
    }
}

pub struct ValuationEngine {
    pub(crate) store: Arc<dyn PortfolioStore>,
    pub(crate) base_currency: String,
    pub(crate) gold_id: String,
    reports: VersionedCache<(NaiveDate, GroupBy), Arc<Report>>,
}

impl ValuationEngine {
    pub fn new(store: Arc<dyn PortfolioStore>, base_currency: &str, gold_id: &str) -> Self {
        Self {
            store,
            base_currency: base_currency.to_string(),
            gold_id: gold_id.to_string(),
            reports: VersionedCache::new(),
        }
    }

    pub fn base_currency(&self) -> &str {
        &self.base_currency
    }

    pub fn price_on_or_before(&self, instrument_id: &str, date: NaiveDate) -> Option<Price> {
        self.store.price_on_or_before(instrument_id, date)
    }

    pub fn price_at(&self, instrument_id: &str, date: NaiveDate) -> Option<Price> {
        self.store.price_at(instrument_id, date)
    }

    pub fn price_before(&self, instrument_id: &str, date: NaiveDate) -> Option<Price> {
        self.store.price_before(instrument_id, date)
    }

    pub fn rate_on_or_before(&self, from: &str, to: &str, date: NaiveDate) -> Option<ExchangeRate> {
        self.store.rate_on_or_before(from, to, date)
    }

    pub fn convert(&self, value: f64, from: &str, to: &str, date: NaiveDate) -> Option<f64> {
        currency::convert(self.store.as_ref(), value, from, to, date)
    }

    /// Quadrant names by id.
    pub(crate) fn quadrant_names(&self) -> HashMap<String, String> {
        self.store
            .list_quadrants()
            .into_iter()
            .map(|q| (q.id, q.name))
            .collect()
    }

    /// Values `holding` at `as_of`, in the base currency.
    pub fn holding_value(&self, holding: &Holding, as_of: NaiveDate) -> HoldingValue {
        let instrument = self.store.get_instrument(&holding.instrument_id);
        self.value_with(holding, instrument.as_ref(), as_of)
    }

    fn value_with(
        &self,
        holding: &Holding,
        instrument: Option<&Instrument>,
        as_of: NaiveDate,
    ) -> HoldingValue {
        let mut result = HoldingValue {
            account_id: holding.account_id.clone(),
            instrument_id: holding.instrument_id.clone(),
            name: instrument.map_or_else(
                || holding.instrument_id.clone(),
                |i| i.display_name().to_string(),
            ),
            quantity: holding.quantity,
            currency: instrument.map(|i| i.currency.clone()),
            price: None,
            native_value: None,
            value: None,
            missing: None,
            cost_basis: None,
            gain: None,
            weight: None,
        };

        let Some(instrument) = instrument else {
            result.missing = Some(Missing::Instrument);
            return result;
        };

        result.cost_basis = holding.purchase_price.and_then(|price| {
            let date = holding.purchase_date.unwrap_or(as_of);
            self.convert(
                holding.quantity * price,
                &instrument.currency,
                &self.base_currency,
                date,
            )
        });

        let Some(price) = self.store.price_on_or_before(&instrument.isin, as_of) else {
            debug!("No price for {} on or before {}", instrument.isin, as_of);
            result.missing = Some(Missing::Price);
            return result;
        };

        // A price row carries its own currency, which decides the conversion
        let native_value = holding.quantity * price.value;
        result.native_value = Some(native_value);
        result.value = self.convert(native_value, &price.currency, &self.base_currency, as_of);
        match result.value {
            Some(value) => result.gain = result.cost_basis.map(|cost| value - cost),
            None => {
                result.missing = Some(Missing::Rate {
                    from: price.currency.clone(),
                    to: self.base_currency.clone(),
                })
            }
        }
        result.price = Some(price);
        result
    }

    /// Groups and sums the known values of `holdings` at `as_of`.
    pub fn aggregate(&self, holdings: &[Holding], as_of: NaiveDate, group_by: GroupBy) -> Report {
        let instruments: HashMap<String, Instrument> = self
            .store
            .list_instruments()
            .into_iter()
            .map(|i| (i.isin.clone(), i))
            .collect();
        let account_names: HashMap<String, String> = self
            .store
            .list_accounts()
            .into_iter()
            .map(|a| (a.id.clone(), format!("{} - {}", a.bank, a.name)))
            .collect();
        let quadrant_names = self.quadrant_names();

        let mut groups: BTreeMap<GroupKey, Vec<HoldingValue>> = BTreeMap::new();
        for holding in holdings {
            let instrument = instruments.get(&holding.instrument_id);
            let key = match group_by {
                GroupBy::Account => GroupKey::Account(holding.account_id.clone()),
                GroupBy::Quadrant => {
                    match instrument.and_then(|i| assigned_quadrant(i, &quadrant_names)) {
                        Some(q) => GroupKey::Quadrant(q.to_string()),
                        None => GroupKey::Unassigned,
                    }
                }
                GroupBy::None => GroupKey::All,
            };
            groups
                .entry(key)
                .or_default()
                .push(self.value_with(holding, instrument, as_of));
        }

        let mut groups: Vec<GroupValue> = groups
            .into_iter()
            .map(|(key, mut holdings)| {
                let value: f64 = holdings.iter().filter_map(|h| h.value).sum();
                for holding in &mut holdings {
                    holding.weight = holding.value.and_then(|v| percentage(v, value));
                }
                let name = match &key {
                    GroupKey::Account(id) => account_names.get(id).cloned().unwrap_or(id.clone()),
                    GroupKey::Quadrant(id) => quadrant_names.get(id).cloned().unwrap_or(id.clone()),
                    GroupKey::Unassigned => UNASSIGNED_QUADRANT.to_string(),
                    GroupKey::All => "Total".to_string(),
                };
                GroupValue {
                    key,
                    name,
                    value,
                    weight: None,
                    holdings,
                }
            })
            .collect();

        let total: f64 = groups.iter().map(|g| g.value).sum();
        for group in &mut groups {
            group.weight = percentage(group.value, total);
        }

        Report {
            as_of,
            base_currency: self.base_currency.clone(),
            group_by,
            groups,
            total,
        }
    }

    /// Report over every holding, memoized until the store changes.
    pub fn report(&self, as_of: NaiveDate, group_by: GroupBy) -> Arc<Report> {
        let version = self.store.data_version();
        let key = (as_of, group_by);
        if let Some(report) = self.reports.get(&key, version) {
            return report;
        }

        let report = Arc::new(self.aggregate(&self.store.list_holdings(), as_of, group_by));
        // A write that raced the computation leaves the entry at the older version
        self.reports.put(key, version, Arc::clone(&report));
        report
    }

    pub fn quadrant_report(&self, as_of: NaiveDate) -> Arc<Report> {
        self.report(as_of, GroupBy::Quadrant)
    }

    pub fn total_value(&self, as_of: NaiveDate) -> Valuation {
        let report = self.report(as_of, GroupBy::None);
        Valuation::from_group(report.group(&GroupKey::All))
    }

    /// `None` when the account does not exist.
    pub fn account_value(&self, account_id: &str, as_of: NaiveDate) -> Option<Valuation> {
        if !self.store.list_accounts().iter().any(|a| a.id == account_id) {
            return None;
        }
        let report = self.report(as_of, GroupBy::Account);
        Some(Valuation::from_group(
            report.group(&GroupKey::Account(account_id.to_string())),
        ))
    }

    /// Value of a quadrant; `None` selects the unassigned instruments.
    pub fn quadrant_value(&self, quadrant_id: Option<&str>, as_of: NaiveDate) -> Valuation {
        let key = match quadrant_id {
            Some(id) => GroupKey::Quadrant(id.to_string()),
            None => GroupKey::Unassigned,
        };
        let report = self.quadrant_report(as_of);
        Valuation::from_group(report.group(&key))
    }
}

/// Quadrant an instrument belongs to. Ids missing from `quadrants` count
/// as unassigned.
pub(crate) fn assigned_quadrant<'a>(
    instrument: &'a Instrument,
    quadrants: &HashMap<String, String>,
) -> Option<&'a str> {
    instrument
        .quadrant
        .as_deref()
        .filter(|q| quadrants.contains_key(*q))
}

fn percentage(part: f64, whole: f64) -> Option<f64> {
    (whole > 0.0).then(|| part / whole * 100.0)
}
