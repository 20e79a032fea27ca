//! Resource agent tester CLI
//!
//! Runs resource agent test suites against a live Pacemaker cluster.

use clap::Parser;
use ratester::cli;
use ratester::commands::Commands;

#[derive(Parser)]
#[command(name = "ra-tester", about = "Resource agent tester for Pacemaker clusters")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    match cli::dispatch(args.command).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
