pub mod disk;
pub mod memory;

use crate::core::config::PortfolioConfig;
use crate::core::model::{BankAccount, Holding, Instrument, Quadrant};
use crate::core::store::PortfolioStore;
use anyhow::{Context, Result};
use std::collections::HashSet;
use tracing::{debug, info};

pub use disk::{DiskStore, StoreLocked};
pub use memory::MemoryStore;

/// Brings the user-maintained entities of the store in line with `portfolio`.
///
/// Instruments, accounts and quadrants are created or updated; holdings that
/// are no longer listed are removed. An instrument's configured name only
/// applies when it is first created. Unchanged rows are left untouched so the
/// data version only moves when something actually changed.
pub fn sync_portfolio(store: &dyn PortfolioStore, portfolio: &PortfolioConfig) -> Result<()> {
    let version = store.data_version();

    for quadrant in &portfolio.quadrants {
        store.upsert_quadrant(Quadrant {
            id: quadrant.id.clone(),
            name: quadrant.name.clone(),
        })?;
    }

    for instrument in &portfolio.instruments {
        // Names learnt from the market data source take precedence
        let existing = store.get_instrument(&instrument.isin);
        let name = existing
            .as_ref()
            .map_or_else(|| instrument.name.clone(), |e| e.name.clone());
        let ticker = instrument
            .ticker
            .clone()
            .or_else(|| existing.as_ref().and_then(|e| e.ticker.clone()));
        store
            .insert_instrument(Instrument {
                isin: instrument.isin.clone(),
                name,
                ticker,
                currency: instrument.currency.clone(),
                quadrant: instrument.quadrant.clone(),
            })
            .with_context(|| format!("Failed to sync instrument {}", instrument.isin))?;
    }

    let mut wanted = HashSet::new();
    for account in &portfolio.accounts {
        store.upsert_account(BankAccount {
            id: account.id.clone(),
            bank: account.bank.clone(),
            name: account.name.clone(),
        })?;
        for holding in &account.holdings {
            store
                .upsert_holding(Holding {
                    account_id: account.id.clone(),
                    instrument_id: holding.isin.clone(),
                    quantity: holding.quantity,
                    purchase_date: holding.purchase_date,
                    purchase_price: holding.purchase_price,
                })
                .with_context(|| {
                    format!("Failed to sync holding {} in {}", holding.isin, account.id)
                })?;
            wanted.insert((account.id.clone(), holding.isin.clone()));
        }
    }

    for holding in store.list_holdings() {
        let key = (holding.account_id.clone(), holding.instrument_id.clone());
        if !wanted.contains(&key) {
            debug!(
                "Removing holding {} from {} as it is no longer configured",
                holding.instrument_id, holding.account_id
            );
            store.remove_holding(&holding.account_id, &holding.instrument_id)?;
        }
    }

    if store.data_version() != version {
        info!("Portfolio definition synced into the store");
    }
    Ok(())
}
