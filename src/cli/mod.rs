pub mod daemon;
pub mod history;
pub mod log;
pub mod refresh;
pub mod schedule;
pub mod setup;
pub mod summary;
pub mod ui;
