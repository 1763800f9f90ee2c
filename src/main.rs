use clap::Parser;
use filescrub::cli::{Cli, run_cli};
use filescrub::logging::init_logging;
use filescrub::output::OutputFormatter;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run_cli(cli) {
        OutputFormatter::error(&format!("Error: {}", e));
        std::process::exit(1);
    }
}
