//! Сборка layer-ов `tracing-subscriber`: фильтр, консоль, файл.

use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    registry::LookupSpan,
    EnvFilter, Layer,
};

use super::config::{LogFormat, LoggingConfig};

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Внешний вид одного вывода.
#[derive(Debug, Clone, Copy)]
pub struct Style {
    pub format: LogFormat,
    pub ansi: bool,
    pub target: bool,
    pub thread_ids: bool,
    pub line_numbers: bool,
}

impl Style {
    pub fn console(config: &LoggingConfig) -> Self {
        let c = &config.console;
        Self {
            format: c.format,
            ansi: c.with_ansi,
            target: c.with_target,
            thread_ids: c.with_thread_ids,
            line_numbers: c.with_line_numbers,
        }
    }

    /// В файл без цветов; `pretty` там превращается в `compact`.
    pub fn file(config: &LoggingConfig) -> Self {
        let format = match config.file.format {
            LogFormat::Json => LogFormat::Json,
            LogFormat::Pretty | LogFormat::Compact => LogFormat::Compact,
        };
        Self {
            format,
            ansi: false,
            target: true,
            thread_ids: false,
            line_numbers: false,
        }
    }
}

/// `RUST_LOG` важнее конфига. Неразборчивая директива из конфига
/// заменяется на `info`.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    if let Ok(from_env) = EnvFilter::try_from_default_env() {
        return from_env;
    }
    let directive = config.build_filter_directive();
    EnvFilter::try_new(&directive).unwrap_or_else(|e| {
        eprintln!("Bad log directive '{directive}' ({e}), using 'info'");
        EnvFilter::new("info")
    })
}

/// Layer заданного стиля поверх произвольного writer-а.
pub fn styled<S, W>(
    style: Style,
    writer: W,
) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = fmt::layer()
        .with_writer(writer)
        .with_target(style.target)
        .with_thread_ids(style.thread_ids)
        .with_line_number(style.line_numbers);

    match style.format {
        LogFormat::Json => Box::new(base.with_ansi(false).json().with_current_span(true)),
        LogFormat::Pretty => Box::new(
            base.with_ansi(style.ansi)
                .pretty()
                .with_span_events(FmtSpan::CLOSE),
        ),
        LogFormat::Compact => Box::new(base.with_ansi(style.ansi).compact()),
    }
}

/// Файл с суточной ротацией в `log_dir`. Guard держит фоновый writer.
pub fn file_writer(config: &LoggingConfig) -> (NonBlocking, WorkerGuard) {
    let appender = tracing_appender::rolling::daily(&config.log_dir, &config.file.file_name);
    tracing_appender::non_blocking(appender)
}
