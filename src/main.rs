mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use streambox::observability::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    let mut config = cli.load_config()?;
    init_tracing(&config.telemetry.log_filter);

    match cli.command {
        Commands::Serve(args) => {
            if let Some(address) = args.address {
                config.server.bind_addr = address;
            }
            streambox::api::run(config).await?
        }
        Commands::Finalize(args) => cli::finalize(config, args).await?,
        Commands::Sweep => cli::sweep(config).await?,
    }

    Ok(())
}
