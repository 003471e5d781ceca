pub mod cli;
pub mod core;
pub mod providers;
pub mod schedulers;
pub mod store;

pub use crate::core::config;

use crate::cli::schedule::ScheduleAction;
use crate::core::config::AppConfig;
use crate::core::events::EventBus;
use crate::core::history::HistorySelector;
use crate::core::market::MarketDataSource;
use crate::core::refresh::{RefreshOrchestrator, RefreshSettings};
use crate::core::refresh_log::RefreshLog;
use crate::core::schedule::{ScheduleController, Scheduler};
use crate::core::series::DateRange;
use crate::core::store::PortfolioStore;
use crate::core::valuation::{GroupBy, ValuationEngine};
use crate::providers::YahooFinanceProvider;
use crate::schedulers::{CronScheduler, InProcessScheduler};
use crate::store::{DiskStore, StoreLocked};
use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub enum AppCommand {
    Refresh {
        verbose: bool,
    },
    Summary {
        group_by: GroupBy,
        as_of: Option<NaiveDate>,
    },
    History {
        selector: HistorySelector,
        range: DateRange,
        gold: bool,
    },
    Schedule(ScheduleAction),
    Log {
        lines: usize,
        clear: bool,
    },
    Daemon,
}

/// Services shared by every command, built once per process.
pub struct App {
    pub config: AppConfig,
    config_path: Option<PathBuf>,
    pub store: Arc<dyn PortfolioStore>,
    pub engine: Arc<ValuationEngine>,
    pub orchestrator: Arc<RefreshOrchestrator>,
    pub events: EventBus,
}

impl App {
    /// Opens the on-disk store and the Yahoo market data source.
    pub fn open(config: AppConfig, config_path: Option<&Path>) -> Result<Self> {
        let data_path = config.default_data_path()?;
        debug!("Opening store at {}", data_path.display());
        let store = Arc::new(DiskStore::open(&data_path)?);
        let source = Arc::new(YahooFinanceProvider::new(config.yahoo_base_url())?);
        Self::build(config, config_path, store, source)
    }

    /// Wires the services around `store` and `source` after syncing the
    /// configured portfolio into the store.
    pub fn build(
        config: AppConfig,
        config_path: Option<&Path>,
        store: Arc<dyn PortfolioStore>,
        source: Arc<dyn MarketDataSource>,
    ) -> Result<Self> {
        store::sync_portfolio(store.as_ref(), &config.portfolio)?;

        let events = EventBus::default();
        let log = Arc::new(RefreshLog::new(config.refresh_log_path()?));
        let engine = Arc::new(ValuationEngine::new(
            Arc::clone(&store),
            &config.base_currency,
            &config.benchmarks.gold.id,
        ));
        let orchestrator = Arc::new(RefreshOrchestrator::new(
            Arc::clone(&store),
            source,
            RefreshSettings::from_config(&config),
            events.clone(),
            log,
        ));

        Ok(App {
            config,
            config_path: config_path.map(Path::to_path_buf),
            store,
            engine,
            orchestrator,
            events,
        })
    }

    /// Command line that an external scheduler runs to refresh.
    fn refresh_program(&self) -> Result<Vec<String>> {
        let exe = std::env::current_exe().context("Failed to locate the running executable")?;
        let mut program = vec![exe.to_string_lossy().into_owned()];
        if let Some(path) = &self.config_path {
            let path = std::path::absolute(path)
                .with_context(|| format!("Failed to resolve {}", path.display()))?;
            program.push("--config-path".to_string());
            program.push(path.to_string_lossy().into_owned());
        }
        program.push("refresh".to_string());
        Ok(program)
    }

    pub fn schedule_controller(&self, scheduler: Arc<dyn Scheduler>) -> Result<ScheduleController> {
        Ok(ScheduleController::new(
            scheduler,
            Arc::clone(&self.orchestrator),
            &self.config.schedule.label,
            self.refresh_program()?,
            self.config.default_data_path()?.join("logs"),
            self.config.schedule.run_at_load,
        ))
    }

    pub async fn run(&self, command: AppCommand) -> Result<()> {
        match command {
            AppCommand::Refresh { verbose } => {
                cli::refresh::run(&self.orchestrator, verbose).await;
            }
            AppCommand::Summary { group_by, as_of } => {
                cli::summary::run(
                    &self.engine,
                    group_by,
                    as_of,
                    self.orchestrator.last_refresh(),
                );
            }
            AppCommand::History {
                selector,
                range,
                gold,
            } => cli::history::run(&self.engine, &selector, range, gold),
            AppCommand::Schedule(action) => {
                let controller = self.schedule_controller(Arc::new(CronScheduler::new()))?;
                cli::schedule::run(
                    &controller,
                    action,
                    &self.config.schedule.label,
                    self.config.refresh.interval_seconds,
                )
                .await?;
            }
            AppCommand::Log { lines, clear } => {
                cli::log::run(self.orchestrator.log(), lines, clear)?;
            }
            AppCommand::Daemon => {
                if !self.config.refresh.timer_enabled {
                    bail!("The in-process refresh timer is disabled (refresh.timer_enabled)");
                }
                let scheduler = Arc::new(InProcessScheduler::new(Arc::clone(&self.orchestrator)));
                let controller = self.schedule_controller(scheduler)?;
                cli::daemon::run(
                    &controller,
                    &self.events,
                    self.config.refresh.interval_seconds,
                )
                .await?;
            }
        }
        Ok(())
    }
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("quadfolio starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let log_path = config.refresh_log_path()?;
    let app = match App::open(config, config_path.map(Path::new)) {
        Ok(app) => app,
        // Overlapping scheduled runs back off
        Err(err) if matches!(command, AppCommand::Refresh { .. }) && err.is::<StoreLocked>() => {
            warn!("Refresh skipped: {err}");
            RefreshLog::new(log_path).append(
                false,
                "Refresh skipped: the store is in use by another quadfolio process",
            )?;
            cli::refresh::report_in_progress();
            return Ok(());
        }
        Err(err) => return Err(err),
    };
    app.run(command).await
}
