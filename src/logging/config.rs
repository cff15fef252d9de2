use std::{collections::BTreeMap, fmt, io, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Формат вывода событий.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    #[default]
    Compact,
}

#[derive(Debug, Error)]
pub enum LoggingConfigError {
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),
    #[error("Invalid level {level} for target {target}")]
    InvalidTarget { target: String, level: String },
    #[error("Unknown log format: {0}")]
    UnknownFormat(String),
    #[error("Cannot create log directory {path}: {source}")]
    LogDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Cannot install global subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    /// Префикс файла; `tracing-appender` добавляет дату
    pub file_name: String,
    pub format: LogFormat,
}

/// Настройки подсистемы логирования.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень: trace, debug, info, warn, error, off
    pub level: String,
    /// Уровни для отдельных target, например `indrajala::broker = "debug"`
    pub targets: BTreeMap<String, String>,
    pub log_dir: PathBuf,
    pub console: ConsoleConfig,
    pub file: FileConfig,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl LoggingConfig {
    /// Переменные `INDRAJALA_LOG_LEVEL`, `INDRAJALA_LOG_DIR` и
    /// `INDRAJALA_LOG_FORMAT` перекрывают файл конфигурации.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("INDRAJALA_LOG_LEVEL") {
            self.level = level.to_lowercase();
        }
        if let Ok(dir) = std::env::var("INDRAJALA_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
            self.file.enabled = true;
        }
        if let Ok(format) = std::env::var("INDRAJALA_LOG_FORMAT") {
            match format.parse() {
                Ok(f) => self.console.format = f,
                Err(e) => eprintln!("Ignoring INDRAJALA_LOG_FORMAT: {e}"),
            }
        }
    }

    pub fn validate(&self) -> Result<(), LoggingConfigError> {
        if !is_level(&self.level) {
            return Err(LoggingConfigError::InvalidLevel(self.level.clone()));
        }
        for (target, level) in &self.targets {
            if !is_level(level) {
                return Err(LoggingConfigError::InvalidTarget {
                    target: target.clone(),
                    level: level.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn ensure_log_dir(&self) -> Result<(), LoggingConfigError> {
        if !self.file.enabled {
            return Ok(());
        }
        std::fs::create_dir_all(&self.log_dir).map_err(|source| LoggingConfigError::LogDir {
            path: self.log_dir.clone(),
            source,
        })
    }

    /// Директива для `EnvFilter`: `level[,target=level...]`.
    pub fn build_filter_directive(&self) -> String {
        let mut directive = self.level.clone();
        for (target, level) in &self.targets {
            directive.push_str(&format!(",{target}={level}"));
        }
        directive
    }

    pub fn console_format(&self) -> LogFormat {
        self.console.format
    }
}

fn is_level(s: &str) -> bool {
    LEVELS.contains(&s.to_ascii_lowercase().as_str())
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl FromStr for LogFormat {
    type Err = LoggingConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(LoggingConfigError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
            Self::Compact => "compact",
        };
        f.write_str(s)
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: LogFormat::Compact,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            with_line_numbers: false,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file_name: "indrajala.log".into(),
            format: LogFormat::Json,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            targets: BTreeMap::new(),
            log_dir: PathBuf::from("logs"),
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn test_filter_directive_with_targets() {
        let mut cfg = LoggingConfig::default();
        cfg.targets.insert("indrajala::broker".into(), "debug".into());
        cfg.targets.insert("indrajala::storage".into(), "warn".into());
        assert_eq!(
            cfg.build_filter_directive(),
            "info,indrajala::broker=debug,indrajala::storage=warn"
        );
    }

    #[test]
    fn test_validate_rejects_bad_levels() {
        let mut cfg = LoggingConfig {
            level: "verbose".into(),
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(LoggingConfigError::InvalidLevel(_))
        ));

        cfg.level = "WARN".into();
        assert!(cfg.validate().is_ok());

        cfg.targets.insert("x".into(), "loud".into());
        assert!(matches!(
            cfg.validate(),
            Err(LoggingConfigError::InvalidTarget { .. })
        ));
    }

    /// Тест проверяет, что переменные окружения перекрывают конфигурацию, а
    /// некорректный формат игнорируется.
    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("INDRAJALA_LOG_LEVEL", "DEBUG");
        std::env::set_var("INDRAJALA_LOG_FORMAT", "json");
        let mut cfg = LoggingConfig::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.level, "debug");
        assert_eq!(cfg.console.format, LogFormat::Json);

        std::env::set_var("INDRAJALA_LOG_FORMAT", "xml");
        cfg.apply_env_overrides();
        assert_eq!(cfg.console.format, LogFormat::Json);

        std::env::remove_var("INDRAJALA_LOG_LEVEL");
        std::env::remove_var("INDRAJALA_LOG_FORMAT");
    }

    #[test]
    fn test_ensure_log_dir_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = LoggingConfig {
            log_dir: tmp.path().join("nested/logs"),
            ..Default::default()
        };
        cfg.file.enabled = true;
        cfg.ensure_log_dir().unwrap();
        assert!(cfg.log_dir.is_dir());
    }
}
