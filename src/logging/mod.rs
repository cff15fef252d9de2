pub mod config;
pub mod handle;
pub mod layers;

pub use config::{LogFormat, LoggingConfig, LoggingConfigError};
pub use handle::LoggingHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Registry};

/// Устанавливает глобальный subscriber. Второй вызов в том же процессе
/// вернёт [`LoggingConfigError::Install`].
pub fn init_logging(mut config: LoggingConfig) -> Result<LoggingHandle, LoggingConfigError> {
    config.apply_env_overrides();
    config.validate()?;
    config.ensure_log_dir()?;

    let mut outputs: Vec<layers::BoxedLayer<Registry>> = Vec::new();
    if config.console.enabled {
        outputs.push(layers::styled(layers::Style::console(&config), std::io::stdout));
    }
    let guard = config.file.enabled.then(|| {
        let (writer, guard) = layers::file_writer(&config);
        outputs.push(layers::styled(layers::Style::file(&config), writer));
        guard
    });

    tracing_subscriber::registry()
        .with(outputs)
        .with(layers::env_filter(&config))
        .try_init()?;

    tracing::debug!(
        level = %config.level,
        console = %config.console.format,
        file = config.file.enabled,
        dir = %config.log_dir.display(),
        "Logging ready"
    );
    Ok(LoggingHandle::new(guard))
}
