use std::fmt;

use crate::{ErrorExt, StatusCode};

/// Ошибка проверки учётных данных.
#[derive(Debug, Clone)]
pub enum AuthError {
    /// Неверное значение для защищённого ключа
    InvalidCredentials { key: String },
    /// Для ключа нет сохранённого хеша
    MissingSecret { key: String },
    /// Ошибка хеширования пароля
    PasswordHashFailed { reason: String },
    /// Хранимый хеш не удалось разобрать
    PasswordVerifyFailed,
}

/// Ошибка сессий транзакционного протокола.
#[derive(Debug, Clone)]
pub enum SessionError {
    /// Токен не найден в таблице сессий
    NotFound,
    /// Токен выдан другому модулю
    OriginMismatch { expected: String, actual: String },
    /// Запрос без токена при обязательной аутентификации
    MissingToken,
    /// Строка не является корректным идентификатором сессии
    InvalidSessionId,
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для AuthError, SessionError
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for AuthError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::InvalidCredentials { .. } => write!(f, "Invalid credentials"),
            Self::MissingSecret { key } => write!(f, "No stored secret for key: {key}"),
            Self::PasswordHashFailed { reason } => {
                write!(f, "Password hashing failed: {reason}")
            }
            Self::PasswordVerifyFailed => write!(f, "Password verification failed"),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            SessionError::NotFound => write!(f, "Session not found"),
            SessionError::OriginMismatch { expected, actual } => {
                write!(
                    f,
                    "Session belongs to {expected}, presented by {actual}"
                )
            }
            SessionError::MissingToken => write!(f, "Authentication required"),
            SessionError::InvalidSessionId => write!(f, "Invalid session ID"),
        }
    }
}

impl std::error::Error for AuthError {}

impl std::error::Error for SessionError {}

impl ErrorExt for AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials { .. } | Self::MissingSecret { .. } => {
                StatusCode::InvalidCredentials
            }
            Self::PasswordHashFailed { .. } => StatusCode::PasswordHashFailed,
            Self::PasswordVerifyFailed => StatusCode::AuthFailed,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            // Не сообщаем, существует ли ключ
            Self::InvalidCredentials { .. } | Self::MissingSecret { .. } => {
                "Invalid username or password".to_string()
            }
            Self::PasswordHashFailed { .. } => "Internal server error".to_string(),
            Self::PasswordVerifyFailed => "Authentication failed".to_string(),
        }
    }
}

impl ErrorExt for SessionError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::SessionNotFound,
            Self::OriginMismatch { .. } => StatusCode::SessionMismatch,
            Self::MissingToken => StatusCode::Unauthorized,
            Self::InvalidSessionId => StatusCode::InvalidToken,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::OriginMismatch { .. } => "Invalid session".to_string(),
            other => other.to_string(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
