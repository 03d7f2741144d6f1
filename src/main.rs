//! devflow CLI entry point
//!
//! Parses arguments, installs logging and the interrupt handler, runs the command
//! and renders errors with suggestions.

use clap::Parser;
use devflow_cli::cli;
use devflow_cli::core::error::user_friendly_error;
use devflow_cli::interrupt::InterruptRegistry;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let config = cli.build_config();
    config.init_logging();

    // Cleanups registered by running builds (e.g. kaniko pods) run on Ctrl-C.
    let interrupts = InterruptRegistry::new();
    let _listener = interrupts.listen();

    if let Err(e) = cli.execute_with_config(config, interrupts).await {
        let error_ctx = user_friendly_error(e);
        error_ctx.display();
        std::process::exit(1);
    }
}
