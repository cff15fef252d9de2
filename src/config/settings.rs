use std::{path::Path, time::Duration};

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::ModuleSpec;
use crate::logging::LoggingConfig;

/// Параметры маршрутизатора: телеметрия, наблюдение за очередями и
/// протокол остановки.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Сколько ещё обслуживать входную очередь после `$cmd/quit`
    pub grace_period_ms: u64,
    /// Таймаут одного опроса очереди в фазе draining
    pub drain_poll_ms: u64,
    /// Сколько ждать завершения задачи встроенного модуля
    pub join_timeout_ms: u64,
    /// Число опросов внешнего процесса перед принудительным kill
    pub terminate_retries: u32,
    pub terminate_poll_ms: u64,
    /// Сколько ждать подключения внешнего модуля
    pub handshake_timeout_ms: u64,
    /// Выше этой частоты (msg/s) только сводки
    pub rate_high_water: f64,
    /// Ниже этой частоты снова подробный лог маршрутизации
    pub rate_low_water: f64,
    /// Коэффициент сглаживания EMA интервала между событиями
    pub ema_alpha: f64,
    pub stat_interval_ms: u64,
    /// Порог глубины очереди для предупреждения
    pub queue_high_water: usize,
    pub queue_sample_ms: u64,
    /// Путь к `indrajala-module`; по умолчанию рядом с текущим бинарником
    pub module_executable: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Settings {
    /// Загружает настройки: значения по умолчанию, затем необязательный
    /// TOML-файл, затем переменные окружения `INDRAJALA__<SECTION>__<KEY>`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("broker.grace_period_ms", 2_000)?
            .set_default("broker.terminate_retries", 10)?
            .set_default("logging.level", "info")?;

        if let Some(path) = path {
            builder = builder.add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(true),
            );
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix("INDRAJALA")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        cfg.try_deserialize()
    }

    /// Разбор настроек из строки TOML (используется в тестах и утилитах).
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

impl BrokerSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms.max(1))
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn terminate_poll(&self) -> Duration {
        Duration::from_millis(self.terminate_poll_ms.max(1))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn stat_interval(&self) -> Duration {
        Duration::from_millis(self.stat_interval_ms.max(1))
    }

    pub fn queue_sample(&self) -> Duration {
        Duration::from_millis(self.queue_sample_ms.max(1))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для BrokerSettings
////////////////////////////////////////////////////////////////////////////////

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            grace_period_ms: 2_000,
            drain_poll_ms: 50,
            join_timeout_ms: 1_000,
            terminate_retries: 10,
            terminate_poll_ms: 100,
            handshake_timeout_ms: 10_000,
            rate_high_water: 20.0,
            rate_low_water: 10.0,
            ema_alpha: 0.1,
            stat_interval_ms: 5_000,
            queue_high_water: 100,
            queue_sample_ms: 1_000,
            module_executable: None,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
