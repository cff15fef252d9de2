use std::fmt;

use crate::{ErrorExt, StatusCode};

/// Ошибки маршрутизатора.
#[derive(Debug, Clone)]
pub enum BrokerError {
    /// `from_id` не соответствует ни одному зарегистрированному модулю
    UnknownOrigin { from_id: String },
    /// Модуль помечен неактивным
    ModuleInactive { name: String },
    /// Модуль с таким именем уже зарегистрирован
    DuplicateModule { name: String },
    /// Неизвестная команда в пространстве `$cmd`
    UnknownCommand { domain: String },
    /// Входная очередь брокера закрыта
    IngressClosed,
}

/// Ошибки жизненного цикла модулей и транспортов.
#[derive(Debug, Clone)]
pub enum ModuleError {
    /// Инициализация модуля завершилась ошибкой
    InitFailed { name: String, reason: String },
    /// Вид модуля отсутствует в реестре
    UnknownKind { kind: String },
    /// Конфигурация модуля не разбирается
    InvalidConfig { name: String, reason: String },
    /// Не удалось запустить внешний процесс
    Spawn { name: String, reason: String },
    /// Внешний процесс не прошёл рукопожатие
    Handshake { name: String, reason: String },
    /// Канал к модулю закрыт
    ChannelClosed { name: String },
}

/// Ошибки планировщика таймеров.
#[derive(Debug, Clone)]
pub enum TimerError {
    /// Задача отключена после серии неудач
    JobDisabled { job: String, failures: u32 },
    /// Неверное условие запуска
    InvalidCondition { reason: String },
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for BrokerError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::UnknownOrigin { from_id } => write!(f, "Unknown origin module: {from_id}"),
            Self::ModuleInactive { name } => write!(f, "Module {name} is disabled"),
            Self::DuplicateModule { name } => write!(f, "Module {name} already registered"),
            Self::UnknownCommand { domain } => write!(f, "Unknown command: {domain}"),
            Self::IngressClosed => write!(f, "Broker ingress channel closed"),
        }
    }
}

impl fmt::Display for ModuleError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::InitFailed { name, reason } => {
                write!(f, "Module {name} failed to initialize: {reason}")
            }
            Self::UnknownKind { kind } => write!(f, "Unknown module kind: {kind}"),
            Self::InvalidConfig { name, reason } => {
                write!(f, "Invalid configuration for module {name}: {reason}")
            }
            Self::Spawn { name, reason } => {
                write!(f, "Failed to spawn process for module {name}: {reason}")
            }
            Self::Handshake { name, reason } => {
                write!(f, "Handshake with module {name} failed: {reason}")
            }
            Self::ChannelClosed { name } => write!(f, "Channel to module {name} closed"),
        }
    }
}

impl fmt::Display for TimerError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::JobDisabled { job, failures } => {
                write!(f, "Job {job} disabled after {failures} consecutive failures")
            }
            Self::InvalidCondition { reason } => write!(f, "Invalid run condition: {reason}"),
        }
    }
}

impl std::error::Error for BrokerError {}

impl std::error::Error for ModuleError {}

impl std::error::Error for TimerError {}

impl ErrorExt for BrokerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownOrigin { .. } => StatusCode::UnknownModule,
            Self::ModuleInactive { .. } => StatusCode::ModuleInactive,
            Self::DuplicateModule { .. } => StatusCode::DuplicateModule,
            Self::UnknownCommand { .. } => StatusCode::UnknownCommand,
            Self::IngressClosed => StatusCode::ChannelClosed,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl ErrorExt for ModuleError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InitFailed { .. } => StatusCode::ModuleInitFailed,
            Self::UnknownKind { .. } => StatusCode::UnknownModuleKind,
            Self::InvalidConfig { .. } => StatusCode::InvalidArgs,
            Self::Spawn { .. } => StatusCode::SpawnFailed,
            Self::Handshake { .. } => StatusCode::ConnectionFailed,
            Self::ChannelClosed { .. } => StatusCode::ChannelClosed,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl ErrorExt for TimerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::JobDisabled { .. } => StatusCode::JobDisabled,
            Self::InvalidCondition { .. } => StatusCode::InvalidArgs,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_error_codes() {
        let err = ModuleError::InitFailed {
            name: "db".into(),
            reason: "cannot open directory".into(),
        };
        assert_eq!(err.status_code(), StatusCode::ModuleInitFailed);
        assert!(err.to_string().contains("cannot open directory"));

        let err = ModuleError::UnknownKind {
            kind: "weather".into(),
        };
        assert_eq!(err.status_code(), StatusCode::UnknownModuleKind);
    }

    #[test]
    fn test_timer_disabled_display() {
        let err = TimerError::JobDisabled {
            job: "ding".into(),
            failures: 5,
        };
        assert_eq!(
            err.to_string(),
            "Job ding disabled after 5 consecutive failures"
        );
    }

    #[test]
    fn test_broker_error_codes() {
        assert_eq!(
            BrokerError::UnknownOrigin {
                from_id: "ghost".into()
            }
            .status_code(),
            StatusCode::UnknownModule
        );
        assert_eq!(
            BrokerError::IngressClosed.status_code(),
            StatusCode::ChannelClosed
        );
    }
}
