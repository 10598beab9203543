use anyhow::Result;
use clap::Parser;

use fimctx::{
    cli::{handle_command, Cli},
    utils::init_logger,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    handle_command(&cli).await
}
