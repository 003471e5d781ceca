pub mod cron;
pub mod in_process;

pub use cron::CronScheduler;
pub use in_process::InProcessScheduler;
