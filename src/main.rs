//! woof CLI — parse, lint, plan, and execute WOOFNB notebooks.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "woof",
    version,
    about = "WOOFNB notebooks — deterministic, capability-gated, content-cached execution"
)]
struct Cli {
    #[command(subcommand)]
    command: woofnb::cli::Commands,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = woofnb::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
