pub mod chains;
pub mod charts;
pub mod config;
pub mod cron;
pub mod feeds;

pub use self::config::Settings;
pub use chains::ChainManager;
pub use charts::{ChartError, ChartStore, ReorgNotice, UpdateError};
pub use cron::{CronScheduler, CronSettings};
