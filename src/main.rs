//! Loon script simulator CLI
//!
//! Runs Loon proxy-app scripts against a simulated host environment, either
//! one script given on the command line or the bundled demo set.

use clap::Parser;
use loon_sim::commands::RunArgs;
use loon_sim::common::logging;
use loon_sim::cli;

#[derive(Parser)]
#[command(name = "loon-sim", about = "Run Loon scripts against a simulated environment")]
#[command(version, long_about = None)]
struct Cli {
    #[command(flatten)]
    args: RunArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_cli(cli.args.verbose);

    match cli::dispatch(cli.args).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
