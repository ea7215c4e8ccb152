//! zerotermd: browser-accessible terminal gateway.
//!
//! Loads configuration, installs logging, binds the listener, and runs the
//! accept loop. Grounded on the teacher's `main.rs`
//! (`TcpListener` + `thread::spawn` per connection), generalized to load
//! `Config` and install `tracing` before running the dispatcher.

mod bridge;
mod config;
mod dispatcher;
mod error;
mod http;
mod lifecycle;
mod logging;
mod pty;
mod registry;
mod static_files;
mod ws;

use std::sync::Arc;

use config::Config;
use registry::Registry;

fn main() -> anyhow::Result<()> {
    let config = Config::load();
    logging::init(&config);

    let registry = Arc::new(Registry::new());
    dispatcher::run(Arc::new(config), registry)?;
    Ok(())
}
