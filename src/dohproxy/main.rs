//! The proxy daemon entry point.
use std::sync::Arc;

use env_logger::Env;
use log::{debug, info};

use dohlib::error::DnsResult;
use dohlib::filter::Filter;
use dohlib::frontend;

mod args;
use args::CliOptions;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> DnsResult<()> {
    // manage arguments from command line
    let options = CliOptions::options()?;

    let level = if options.debug { "debug" } else { "info" };
    env_logger::init_from_env(Env::default().default_filter_or(level));
    debug!("options: {:?}", &options);

    // the blocklist is loaded once, before any worker starts
    let filter = if options.config.nofilter {
        Filter::new()
    } else {
        match &options.config.filter_file {
            Some(path) => Filter::from_path(path)?,
            None => Filter::new(),
        }
    };

    info!("dohproxy starting");
    info!(
        "connecting to {} server\n\t{}",
        options.config.server.name, options.config.server.tags
    );

    frontend::run(Arc::clone(&options.config), Arc::new(filter))
}
