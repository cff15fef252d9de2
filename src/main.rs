use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use indrajala::{init_logging, Broker, ModuleRegistry, Settings};
use tracing::{error, info, warn};

/// Брокер событий Indrajala.
#[derive(Parser, Debug)]
#[command(name = "indrajala", version, about)]
struct Cli {
    /// Путь к TOML-файлу конфигурации
    #[arg(short, long, env = "INDRAJALA_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;

    let logging = init_logging(settings.logging.clone())
        .context("failed to initialise logging")?;
    log_startup();

    let mut broker = Broker::new(settings.broker.clone());
    broker
        .start_modules(&settings.modules, &ModuleRegistry::with_builtin())
        .await;

    let handle = broker.handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, shutting down");
                if let Err(e) = handle.request_quit() {
                    error!(error = %e, "Failed to request shutdown");
                }
            }
            Err(e) => error!(error = %e, "Failed to listen for interrupt"),
        }
    });

    let report = broker.run().await;
    info!(
        processed = report.processed,
        drained = report.drained,
        modules = report.modules.len(),
        "Broker stopped"
    );
    for (name, outcome) in &report.modules {
        info!(module = %name, outcome = ?outcome, "Module terminated");
    }

    logging.shutdown_async().await;
    Ok(())
}

/// Строка о сборке и процессе при старте.
fn log_startup() {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".into());
    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("INDRAJALA_GIT_COMMIT"),
        built = env!("INDRAJALA_BUILD_TIME"),
        profile = env!("INDRAJALA_BUILD_PROFILE"),
        host = %host,
        pid = std::process::id(),
        "Indrajala starting"
    );
}
