//! Logging configuration for KaleidoSwap Wallet
//!
//! Uses log4rs with appenders:
//! 1. ConsoleAppender - stdout output
//! 2. RollingFileAppender - wallet log with rotation
//! 3. RollingFileAppender - captured rgb-lightning-node output (`rgb_node`
//!    target only, not repeated in the wallet log)

use crate::node::launcher::NODE_LOG_TARGET;
use anyhow::Context;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::Path;

/// Max size of a single log file before it is rolled
const LOG_FILE_SIZE: u64 = 20 * 1024 * 1024; // 20 MB

/// Rolled files kept per log
const LOG_FILE_COUNT: u32 = 10;

/// Rolling appender writing `{log_dir}/{name}.1.log`
fn rolling_appender(log_dir: &Path, name: &str, pattern: &str) -> anyhow::Result<RollingFileAppender> {
    let log_file = log_dir.join(format!("{}.1.log", name));
    let log_pattern = log_dir.join(format!("{}.{{}}.log", name));

    let roller = FixedWindowRoller::builder()
        .base(1)
        .build(&log_pattern.to_string_lossy(), LOG_FILE_COUNT)?;
    let trigger = SizeTrigger::new(LOG_FILE_SIZE);
    let policy = CompoundPolicy::new(Box::new(trigger), Box::new(roller));

    let appender = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(pattern)))
        .build(log_file, Box::new(policy))
        .with_context(|| format!("Failed to open {} log in {}", name, log_dir.display()))?;
    Ok(appender)
}

/// Build the log4rs configuration
///
/// # Log File Configuration
/// - Wallet: `{log_dir}/kaleido.1.log`
/// - Node output: `{log_dir}/rgb-lightning-node.1.log`
/// - Max size: 20 MB per file
/// - Max count: 10 files (rotation)
pub fn build_config(log_dir: &Path) -> anyhow::Result<Config> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let console = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%H:%M:%S)} [{l}] {t} - {m}{n}",
        )))
        .build();

    let logfile = rolling_appender(log_dir, "kaleido", "{d(%Y-%m-%d %H:%M:%S)} [{l}] {t} - {m}{n}")?;

    // Node lines already carry their own timestamp and level
    let node_logfile = rolling_appender(log_dir, "rgb-lightning-node", "{m}{n}")?;

    let config = Config::builder()
        .appender(Appender::builder().build("console", Box::new(console)))
        .appender(Appender::builder().build("logfile", Box::new(logfile)))
        .appender(Appender::builder().build("node_logfile", Box::new(node_logfile)))
        .logger(
            Logger::builder()
                .appender("node_logfile")
                .additive(false)
                .build(NODE_LOG_TARGET, LevelFilter::Info),
        )
        .build(
            Root::builder()
                .appender("console")
                .appender("logfile")
                .build(LevelFilter::Info),
        )?;

    Ok(config)
}

/// Initialize log4rs with console and rolling file appenders
pub fn init_logger(log_dir: &Path) -> anyhow::Result<log4rs::Handle> {
    let config = build_config(log_dir)?;
    Ok(log4rs::init_config(config)?)
}
