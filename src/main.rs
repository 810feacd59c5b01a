//! Binary entry point for `modscan`.

use clap::Parser;

use modscan::cli_app::{self, Cli};

fn main() {
    let cli = Cli::parse();
    if let Err(err) = cli_app::run(&cli) {
        eprintln!("{err}");
        std::process::exit(cli_app::exit_code(&err));
    }
}
