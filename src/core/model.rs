//! Portfolio entities as they are persisted and exchanged between the store,
//! the valuation engine and the refresh orchestrator.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A priced security, identified by its ISIN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub isin: String,
    pub name: String,
    #[serde(default)]
    pub ticker: Option<String>,
    /// Native currency. Fixed once the instrument exists.
    pub currency: String,
    #[serde(default)]
    pub quadrant: Option<String>,
}

impl Instrument {
    /// Name shown to the user, falling back to the identifier.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.isin
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub instrument_id: String,
    pub date: NaiveDate,
    pub value: f64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub from: String,
    pub to: String,
    pub date: NaiveDate,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub account_id: String,
    pub instrument_id: String,
    pub quantity: f64,
    #[serde(default)]
    pub purchase_date: Option<NaiveDate>,
    #[serde(default)]
    pub purchase_price: Option<f64>,
}

impl Holding {
    /// Identity of a holding: one row per account and instrument.
    pub fn key(&self) -> (&str, &str) {
        (self.account_id.as_str(), self.instrument_id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankAccount {
    pub id: String,
    pub bank: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quadrant {
    pub id: String,
    pub name: String,
}

/// Display name of the implicit group holding instruments without a quadrant.
pub const UNASSIGNED_QUADRANT: &str = "Unassigned";
