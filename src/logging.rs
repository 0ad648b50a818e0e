//! Logging setup
//! Installs an env_logger backend with local timestamps. RUST_LOG, when set,
//! takes precedence over the configured level.

use std::io::Write;

use chrono::Local;
use env_logger::{Builder, Env};
use log::LevelFilter;

/// Parses a level name, defaulting to Info for anything unrecognized
pub fn parse_level(level: &str) -> LevelFilter {
    level.parse().unwrap_or(LevelFilter::Info)
}

/// Initializes the global logger. Safe to call more than once.
pub fn init(level: &str) {
    let default_level = parse_level(level).to_string().to_lowercase();
    let result = Builder::from_env(Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init();

    match result {
        Ok(()) => log::info!("Logging initialized"),
        Err(e) => log::debug!("Logger already installed: {}", e),
    }
}
