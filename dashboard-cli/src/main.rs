mod commands;
mod config;

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "oem-dashboard")]
#[command(about = "Browse, activate and save OEM map dashboard templates")]
struct Cli {
    /// Dashboard configuration file
    #[arg(long, short, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    match commands::run(&cli.config, cli.command).await {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}
