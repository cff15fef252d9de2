use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки Storage Engine
#[derive(Debug, Clone)]
pub enum StorageError {
    /// Запись или ключ не найдены
    NotFound { what: String },
    /// Невалидный ключ KV-таблицы
    InvalidKey { key: String, reason: String },
    /// Ошибка встроенной базы данных
    Database { operation: String, reason: String },
    /// Хранилище недоступно (нельзя открыть каталог или файл)
    StorageUnavailable { reason: String },
    /// Повреждённые данные
    CorruptedData { location: String, reason: String },
    /// Ошибка сериализации
    SerializationFailed { type_name: String, reason: String },
    /// Upsert нашёл более одной записи с тем же (domain, time)
    AmbiguousMatch {
        domain: String,
        time_start: f64,
        count: usize,
    },
    /// Не удалось записать или прочитать checkpoint-файл
    Checkpoint { path: String, reason: String },
}

impl std::fmt::Display for StorageError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::NotFound { what } => write!(f, "Not found: {what}"),
            Self::InvalidKey { key, reason } => write!(f, "Invalid key '{key}': {reason}"),
            Self::Database { operation, reason } => {
                write!(f, "Database error during {operation}: {reason}")
            }
            Self::StorageUnavailable { reason } => write!(f, "Storage unavailable: {reason}"),
            Self::CorruptedData { location, reason } => {
                write!(f, "Corrupted data at {location}: {reason}")
            }
            Self::SerializationFailed { type_name, reason } => {
                write!(f, "Failed to serialize {type_name}: {reason}")
            }
            Self::AmbiguousMatch {
                domain,
                time_start,
                count,
            } => write!(
                f,
                "{count} records match domain '{domain}' at time {time_start}, refusing to pick one"
            ),
            Self::Checkpoint { path, reason } => {
                write!(f, "Checkpoint '{path}' failed: {reason}")
            }
        }
    }
}

impl std::error::Error for StorageError {}

impl ErrorExt for StorageError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NotFound,
            Self::InvalidKey { .. } => StatusCode::InvalidKey,
            Self::Database { .. } | Self::StorageUnavailable { .. } => {
                StatusCode::StorageUnavailable
            }
            Self::CorruptedData { .. } => StatusCode::CorruptedData,
            Self::SerializationFailed { .. } => StatusCode::SerializationFailed,
            Self::AmbiguousMatch { .. } => StatusCode::AmbiguousMatch,
            Self::Checkpoint { .. } => StatusCode::CheckpointFailed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            // SQL-детали наружу не отдаём
            Self::Database { operation, .. } => format!("Database error during {operation}"),
            Self::StorageUnavailable { .. } => "Storage unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
