use std::fmt;

use crate::{ErrorExt, StatusCode};

/// Ошибки транзакционного протокола и фреймов сокетного транспорта.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    /// Полезная нагрузка запроса не разбирается
    Malformed { domain: String, reason: String },
    /// Отсутствует обязательное поле
    MissingField { domain: String, field: String },
    /// Режим выборки истории не поддерживается
    UnsupportedMode { mode: String },
    /// Неизвестный вид транзакционного запроса
    UnknownRequest { domain: String },
    /// Опубликованный домен содержит wildcard-символы
    WildcardInDomain { domain: String },
    /// Фрейм превышает допустимый размер
    FrameTooLarge { size: usize, max: usize },
    /// Фрейм не удалось декодировать
    InvalidFrame { reason: String },
}

impl fmt::Display for ProtocolError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Malformed { domain, reason } => {
                write!(f, "Malformed request on {domain}: {reason}")
            }
            Self::MissingField { domain, field } => {
                write!(f, "Request on {domain} is missing field '{field}'")
            }
            Self::UnsupportedMode { mode } => write!(f, "Unsupported history mode: {mode}"),
            Self::UnknownRequest { domain } => write!(f, "Unknown request: {domain}"),
            Self::WildcardInDomain { domain } => {
                write!(f, "Published domain must not contain wildcards: {domain}")
            }
            Self::FrameTooLarge { size, max } => {
                write!(f, "Frame of {size} bytes exceeds limit of {max} bytes")
            }
            Self::InvalidFrame { reason } => write!(f, "Invalid frame: {reason}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl ErrorExt for ProtocolError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Malformed { .. } | Self::MissingField { .. } => StatusCode::InvalidRequest,
            Self::UnsupportedMode { .. } => StatusCode::UnsupportedMode,
            Self::UnknownRequest { .. } => StatusCode::UnknownCommand,
            Self::WildcardInDomain { .. } => StatusCode::InvalidTopic,
            Self::FrameTooLarge { .. } => StatusCode::FrameTooLarge,
            Self::InvalidFrame { .. } => StatusCode::InvalidFrame,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
