pub mod cache;
pub mod cli;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod service;
pub mod settings;

use anyhow::Result;

use crate::cli::Cli;
use crate::settings::Settings;

pub async fn run(cli: &Cli, settings: Settings) -> Result<()> {
    if cli.clear_all {
        return service::clear_all(&settings).await;
    }
    if let Some(name) = cli.file_info.as_deref() {
        return service::print_file_info(&settings, name).await;
    }
    service::run_daemon(settings).await
}
