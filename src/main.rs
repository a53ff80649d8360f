//! wildfly-provisioner CLI.

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wildfly_provisioner::cli::Cli;

fn init_tracing(verbose: bool) {
    let default_directives = if verbose {
        "wildfly_provisioner=debug"
    } else {
        "wildfly_provisioner=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(e) = wildfly_provisioner::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
