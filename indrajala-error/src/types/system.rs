use std::{fmt, io};

use crate::{ErrorExt, StackError, StatusCode};

/// Ошибка с явным кодом. Её строят макросы `bail!` и `ensure!`.
#[derive(Debug, Clone)]
pub struct Failure {
    code: StatusCode,
    message: String,
}

/// Ошибка операционной системы: файлы базы, сокеты модулей, дочерние
/// процессы. Код выводится из `io::ErrorKind`.
#[derive(Debug)]
pub struct SystemError {
    kind: io::ErrorKind,
    message: String,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Failure {
    pub fn new(
        code: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl SystemError {
    pub fn kind(&self) -> io::ErrorKind {
        self.kind
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for Failure {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Failure {}

impl ErrorExt for Failure {
    fn status_code(&self) -> StatusCode {
        self.code
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl fmt::Display for SystemError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{} ({:?})", self.message, self.kind)
    }
}

impl std::error::Error for SystemError {}

impl ErrorExt for SystemError {
    fn status_code(&self) -> StatusCode {
        use io::ErrorKind::*;
        match self.kind {
            NotFound => StatusCode::NotFound,
            PermissionDenied => StatusCode::PermissionDenied,
            ConnectionRefused | ConnectionReset | ConnectionAborted | AddrInUse
            | AddrNotAvailable => StatusCode::ConnectionFailed,
            BrokenPipe => StatusCode::ConnectionClosed,
            TimedOut => StatusCode::Timeout,
            UnexpectedEof => StatusCode::UnexpectedEof,
            _ => StatusCode::Io,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl From<io::Error> for SystemError {
    fn from(err: io::Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<io::Error> for StackError {
    #[track_caller]
    fn from(err: io::Error) -> Self {
        StackError::new(SystemError::from(err))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_failure_keeps_code() {
        let err = Failure::new(StatusCode::UnsupportedMode, "mode Interval");
        assert_eq!(err.status_code(), StatusCode::UnsupportedMode);
        assert_eq!(err.client_message(), "mode Interval");
    }

    /// Тест проверяет коды для типичных сбоев сокета модуля и файлов базы.
    #[rstest]
    #[case(io::ErrorKind::NotFound, StatusCode::NotFound, "error/notfound")]
    #[case(io::ErrorKind::PermissionDenied, StatusCode::PermissionDenied, "error/access")]
    #[case(io::ErrorKind::ConnectionRefused, StatusCode::ConnectionFailed, "error/internal")]
    #[case(io::ErrorKind::AddrInUse, StatusCode::ConnectionFailed, "error/internal")]
    #[case(io::ErrorKind::BrokenPipe, StatusCode::ConnectionClosed, "error/internal")]
    #[case(io::ErrorKind::TimedOut, StatusCode::Timeout, "error/internal")]
    #[case(io::ErrorKind::UnexpectedEof, StatusCode::UnexpectedEof, "error/internal")]
    #[case(io::ErrorKind::Other, StatusCode::Io, "error/internal")]
    fn test_io_kind_mapping(
        #[case] kind: io::ErrorKind,
        #[case] code: StatusCode,
        #[case] tag: &str,
    ) {
        let stack: StackError = io::Error::new(kind, "db/indrajala.db").into();
        assert_eq!(stack.status_code(), code);
        assert_eq!(stack.reply_tag(), tag);
        assert!(stack.to_string().contains("db/indrajala.db"));
        assert_eq!(stack.downcast_ref::<SystemError>().map(|e| e.kind()), Some(kind));
    }
}
