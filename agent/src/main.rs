mod drop_all;
mod export;

use clap::{Parser, Subcommand};
use std::process;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Parameters {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export the stored fleet as newline-delimited JSON
    Export(export::Parameters),
    /// Drop all the stored data
    Drop(drop_all::Parameters),
}

#[tokio::main]
async fn main() {
    env_logger::init_from_env(
        env_logger::Env::default()
            .filter_or("LOG_LEVEL", "info")
            .write_style_or("LOG_STYLE", "auto"),
    );
    let args = Parameters::parse();
    match &args.command {
        Commands::Export(args) => {
            if let Err(e) = export::run(args).await {
                log::error!("Export failed with: {e:#}");
                process::exit(1)
            }
        }
        Commands::Drop(args) => {
            if let Err(e) = drop_all::run(args).await {
                log::error!("Drop failed with: {e:#}");
                process::exit(1)
            }
        }
    }
}
