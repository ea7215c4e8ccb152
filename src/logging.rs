//! Logging (C10)
//!
//! Thin wrapper around `tracing_subscriber` so every component logs through
//! `tracing` rather than `println!`. `Config.log_level` seeds the filter;
//! operators can still override with `RUST_LOG` per `tracing_subscriber`'s
//! usual convention.

use tracing_subscriber::EnvFilter;

use crate::config::Config;

pub fn init(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
