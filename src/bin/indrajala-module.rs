//! Хост внешнего модуля: `indrajala-module <broker-port> <json-config>`.

use anyhow::Context;
use indrajala::{
    init_logging,
    module::host::{parse_args, run_hosted},
    LoggingConfig, ModuleRegistry,
};
use tracing::error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (port, spec) = parse_args(std::env::args().skip(1))?;

    let logging = init_logging(LoggingConfig::default())
        .context("failed to initialise logging")?;

    let result = run_hosted(port, spec, &ModuleRegistry::with_builtin()).await;
    if let Err(e) = &result {
        error!(error = %e, "Module host failed");
    }
    logging.shutdown_async().await;
    Ok(result?)
}
