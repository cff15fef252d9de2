use std::fmt;

use num_enum::TryFromPrimitive;

/// Коды статуса для категоризации ошибок брокера.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки
/// - 2xxx: Ошибки данных
/// - 3xxx: Аутентификация / Сессии
/// - 5xxx: Хранилище
/// - 6xxx: Транспорт / IO
/// - 7xxx: Модули, брокер, планировщик
/// - 8xxx: Протокольные ошибки
///
/// Внешний модуль передаёт код числом, обратно его разбирает
/// `TryFromPrimitive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Unsupported = 1001,
    Unexpected = 1002,
    Internal = 1003,
    InvalidArgs = 1004,

    // === 2xxx: Ошибки данных ===
    NotFound = 2000,
    InvalidKey = 2001,
    InvalidValue = 2002,
    InvalidData = 2003,
    InvalidTopic = 2004,

    // === 3xxx: Аутентификация/Сессии ===
    AuthFailed = 3000,
    PermissionDenied = 3001,
    InvalidToken = 3002,
    SessionNotFound = 3003,
    SessionMismatch = 3004,
    InvalidCredentials = 3005,
    PasswordHashFailed = 3006,
    Unauthorized = 3007,

    // === 5xxx: Хранилище ===
    StorageUnavailable = 5000,
    CorruptedData = 5001,
    SerializationFailed = 5002,
    DeserializationFailed = 5003,
    AmbiguousMatch = 5004,
    CheckpointFailed = 5005,

    // === 6xxx: Транспорт/IO ===
    Io = 6000,
    ConnectionClosed = 6001,
    Timeout = 6002,
    ConnectionFailed = 6003,
    UnexpectedEof = 6004,
    SpawnFailed = 6005,
    ChannelClosed = 6006,

    // === 7xxx: Модули/Брокер ===
    ModuleInitFailed = 7000,
    ModuleInactive = 7001,
    UnknownModule = 7002,
    UnknownModuleKind = 7003,
    DuplicateModule = 7004,
    JobDisabled = 7005,

    // === 8xxx: Протокол ===
    InvalidFrame = 8000,
    FrameTooLarge = 8001,
    InvalidRequest = 8002,
    UnsupportedMode = 8003,
    UnknownCommand = 8004,
    ParseError = 8005,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Обратное преобразование для кода, пришедшего от внешнего модуля.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    fn family(self) -> u32 {
        self.code() / 1000
    }

    /// Виноват запрос: данные, учётные данные или формат.
    pub fn is_client_error(&self) -> bool {
        matches!(self.family(), 2 | 3 | 8) || *self == Self::InvalidArgs
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self.family(), 1 | 5 | 6 | 7) && *self != Self::InvalidArgs
    }

    pub fn is_protocol_error(&self) -> bool {
        self.family() == 8
    }

    /// Уровень, на котором брокер пишет неудачный запрос в лог.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::NotFound | Self::SessionNotFound => LogLevel::Debug,
            Self::Internal
            | Self::CorruptedData
            | Self::StorageUnavailable
            | Self::AmbiguousMatch
            | Self::ModuleInitFailed
            | Self::JobDisabled => LogLevel::Error,
            Self::Timeout | Self::ConnectionClosed | Self::ModuleInactive => LogLevel::Warn,
            c if c.is_client_error() => LogLevel::Info,
            _ => LogLevel::Warn,
        }
    }

    /// Тег `data_type` для ответа-ошибки транзакционного протокола.
    ///
    /// Запрашивающая сторона различает "неверные учётные данные"
    /// (`error/access`) и "нет такой записи / сессии" (`error/notfound`).
    pub fn reply_tag(&self) -> &'static str {
        match self {
            Self::AuthFailed
            | Self::PermissionDenied
            | Self::InvalidToken
            | Self::SessionMismatch
            | Self::InvalidCredentials
            | Self::Unauthorized => "error/access",
            Self::NotFound | Self::SessionNotFound => "error/notfound",
            Self::InvalidArgs
            | Self::InvalidKey
            | Self::InvalidValue
            | Self::InvalidData
            | Self::InvalidTopic
            | Self::InvalidRequest
            | Self::UnsupportedMode
            | Self::UnknownCommand
            | Self::ParseError => "error/invalid",
            Self::StorageUnavailable
            | Self::CorruptedData
            | Self::SerializationFailed
            | Self::DeserializationFailed
            | Self::AmbiguousMatch
            | Self::CheckpointFailed => "error/db",
            _ => "error/internal",
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_families() {
        assert!(StatusCode::InvalidArgs.is_client_error());
        assert!(!StatusCode::InvalidArgs.is_server_error());
        assert!(StatusCode::SessionMismatch.is_client_error());
        assert!(StatusCode::FrameTooLarge.is_protocol_error());
        assert!(StatusCode::FrameTooLarge.is_client_error());
        assert!(StatusCode::SpawnFailed.is_server_error());
        assert!(!StatusCode::Success.is_client_error());
        assert!(!StatusCode::Success.is_server_error());
    }

    /// Тест проверяет, какие теги получает запрашивающий модуль.
    #[test]
    fn test_reply_tags() {
        let cases = [
            (StatusCode::InvalidCredentials, "error/access"),
            (StatusCode::SessionMismatch, "error/access"),
            (StatusCode::SessionNotFound, "error/notfound"),
            (StatusCode::NotFound, "error/notfound"),
            (StatusCode::UnsupportedMode, "error/invalid"),
            (StatusCode::AmbiguousMatch, "error/db"),
            (StatusCode::SpawnFailed, "error/internal"),
        ];
        for (code, tag) in cases {
            assert_eq!(code.reply_tag(), tag, "{code}");
        }
    }

    /// Тест проверяет, что код переживает передачу числом.
    #[test]
    fn test_numeric_roundtrip() {
        let wire: u32 = StatusCode::InvalidValue.into();
        assert_eq!(wire, 2002);
        assert_eq!(StatusCode::from_u32(wire), Some(StatusCode::InvalidValue));
        assert_eq!(StatusCode::from_u32(4000), None);
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(StatusCode::NotFound.log_level(), LogLevel::Debug);
        assert_eq!(StatusCode::InvalidToken.log_level(), LogLevel::Info);
        assert_eq!(StatusCode::CorruptedData.log_level(), LogLevel::Error);
        assert_eq!(StatusCode::ChannelClosed.log_level(), LogLevel::Warn);
    }

    #[test]
    fn test_display() {
        assert_eq!(StatusCode::NotFound.to_string(), "NotFound (2000)");
    }
}
