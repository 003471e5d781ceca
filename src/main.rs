use anyhow::Result;
use chrono::NaiveDate;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use quadfolio::cli::schedule::ScheduleAction;
use quadfolio::core::history::HistorySelector;
use quadfolio::core::log::init_logging;
use quadfolio::core::refresh_log::DEFAULT_TAIL;
use quadfolio::core::series::DateRange;
use quadfolio::core::valuation::GroupBy;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Grouping {
    Account,
    Quadrant,
    None,
}

impl From<Grouping> for GroupBy {
    fn from(grouping: Grouping) -> GroupBy {
        match grouping {
            Grouping::Account => GroupBy::Account,
            Grouping::Quadrant => GroupBy::Quadrant,
            Grouping::None => GroupBy::None,
        }
    }
}

#[derive(Args)]
#[group(multiple = false)]
struct HistoryFilter {
    /// Only holdings of this account
    #[arg(long)]
    account: Option<String>,

    /// Only instruments of this quadrant ("unassigned" for none)
    #[arg(long)]
    quadrant: Option<String>,

    /// Only this instrument (ISIN)
    #[arg(long)]
    instrument: Option<String>,
}

impl From<HistoryFilter> for HistorySelector {
    fn from(filter: HistoryFilter) -> HistorySelector {
        match (filter.account, filter.quadrant, filter.instrument) {
            (Some(account), _, _) => HistorySelector::Account(account),
            (_, Some(q), _) if q.eq_ignore_ascii_case("unassigned") => {
                HistorySelector::Quadrant(None)
            }
            (_, Some(quadrant), _) => HistorySelector::Quadrant(Some(quadrant)),
            (_, _, Some(instrument)) => HistorySelector::Instrument(instrument),
            _ => HistorySelector::All,
        }
    }
}

#[derive(Subcommand)]
enum ScheduleCommands {
    /// Install the periodic refresh into the user's crontab
    Install {
        /// Seconds between refreshes (defaults to refresh.interval_seconds)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Remove the periodic refresh
    Uninstall,
    /// Show whether the periodic refresh is installed
    Status,
}

impl From<ScheduleCommands> for ScheduleAction {
    fn from(cmd: ScheduleCommands) -> ScheduleAction {
        match cmd {
            ScheduleCommands::Install { interval } => ScheduleAction::Install {
                interval_seconds: interval,
            },
            ScheduleCommands::Uninstall => ScheduleAction::Uninstall,
            ScheduleCommands::Status => ScheduleAction::Status,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Fetch latest prices, exchange rates and benchmarks
    Refresh,
    /// Display portfolio valuation
    Summary {
        /// How to group holdings
        #[arg(long, value_enum, default_value = "quadrant")]
        by: Grouping,

        /// Value the portfolio as of this date (YYYY-MM-DD)
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Display the value of the portfolio over time
    History {
        #[command(flatten)]
        filter: HistoryFilter,

        /// First date to include (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last date to include (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Also express the value in troy ounces of gold
        #[arg(long)]
        gold: bool,
    },
    /// Manage the periodic background refresh
    Schedule {
        #[command(subcommand)]
        action: ScheduleCommands,
    },
    /// Show the refresh log
    Log {
        /// Number of lines to show
        #[arg(short = 'n', long, default_value_t = DEFAULT_TAIL)]
        lines: usize,

        /// Empty the log instead of showing it
        #[arg(long)]
        clear: bool,
    },
    /// Keep running and refresh on a timer
    Daemon,
}

impl Commands {
    fn into_app_command(self, verbose: bool) -> quadfolio::AppCommand {
        match self {
            Commands::Refresh => quadfolio::AppCommand::Refresh { verbose },
            Commands::Summary { by, as_of } => quadfolio::AppCommand::Summary {
                group_by: by.into(),
                as_of,
            },
            Commands::History {
                filter,
                from,
                to,
                gold,
            } => quadfolio::AppCommand::History {
                selector: filter.into(),
                range: DateRange::new(from, to),
                gold,
            },
            Commands::Schedule { action } => quadfolio::AppCommand::Schedule(action.into()),
            Commands::Log { lines, clear } => quadfolio::AppCommand::Log { lines, clear },
            Commands::Daemon => quadfolio::AppCommand::Daemon,
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => match &cli.config_path {
            Some(path) => quadfolio::cli::setup::setup_at_path(path),
            None => quadfolio::cli::setup::setup(),
        },
        Some(cmd) => {
            quadfolio::run_command(
                cmd.into_app_command(cli.verbose),
                cli.config_path.as_deref(),
            )
            .await
        }
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
