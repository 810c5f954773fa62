use anyhow::Result;
use clap::Parser;

use cachewarden::{cli::Cli, logging, run, settings::Settings};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli)?;
    logging::init_logger(settings.log)?;
    run(&cli, settings).await
}
