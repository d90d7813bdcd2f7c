mod config;

pub use self::config::{ChainSettings, Settings};
