//! Logger setup shared by every binary and test harness of the workspace.
//!
//! Filters follow the familiar `RUST_LOG` expression syntax: a bare level sets
//! the root level and `module=level` items refine specific targets.

mod appender;
mod consts;
mod logger;

use appender::AppenderSpec;
use log4rs::{
    Handle,
    config::{Config, Root},
};
use logger::Builder as LoggersBuilder;
use std::sync::OnceLock;

pub use consts::{DEFAULT_LOGGER_ENV, ERR_LOG_FILE_NAME, LOG_FILE_NAME};
pub use logger::LogError;

const CONSOLE_APPENDER: &str = "stdout";
const LOG_FILE_APPENDER: &str = "log_file";
const ERR_LOG_FILE_APPENDER: &str = "err_log_file";

static LOGGER_HANDLE: OnceLock<Handle> = OnceLock::new();

fn build_config(log_dir: Option<&str>, filters: &str) -> Config {
    let mut specs = vec![AppenderSpec::console(CONSOLE_APPENDER, None)];
    if let Some(log_dir) = log_dir {
        specs.push(AppenderSpec::roller(LOG_FILE_APPENDER, None, log_dir, LOG_FILE_NAME));
        specs.push(AppenderSpec::roller(ERR_LOG_FILE_APPENDER, Some(log::LevelFilter::Warn), log_dir, ERR_LOG_FILE_NAME));
    }
    let appenders = specs.iter_mut().filter_map(|x| x.appender()).collect::<Vec<_>>();
    let names = appenders.iter().map(|x| x.name().to_owned()).collect::<Vec<_>>();

    let loggers =
        LoggersBuilder::new().root_level(log::LevelFilter::Info).parse_env(DEFAULT_LOGGER_ENV).parse_expression(filters).build();

    Config::builder()
        .appenders(appenders)
        .loggers(loggers.items())
        .build(Root::builder().appenders(names).build(loggers.root_level()))
        .expect("log4rs configuration is assembled from static appender names")
}

/// Initializes the global logger. Panics if a logger was already installed.
pub fn init_logger(log_dir: Option<&str>, filters: &str) {
    let handle = log4rs::init_config(build_config(log_dir, filters)).expect("the global logger may only be initialized once");
    let _ = LOGGER_HANDLE.set(handle);
}

/// Tries to init the global logger, silently ignoring a logger that is already set.
/// Intended for tests, where several cases share the same process.
pub fn try_init_logger(filters: &str) {
    if LOGGER_HANDLE.get().is_some() {
        return;
    }
    if let Ok(handle) = log4rs::init_config(build_config(None, filters)) {
        let _ = LOGGER_HANDLE.set(handle);
    }
}
