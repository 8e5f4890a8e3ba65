mod cancel;
mod catalog;
mod cli;
mod config;
mod game;
mod group;
mod instance;
mod launcher;
mod logging;
mod net;
mod platform;
mod report;
mod shell;
mod state;
mod stateload;
mod version;
mod watchdog;

use anyhow::Result;

fn main() -> Result<()> {
    cli::run()
}
