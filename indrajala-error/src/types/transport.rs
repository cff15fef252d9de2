use std::fmt;

use crate::{ErrorExt, StatusCode};

/// Ошибки транспорта между брокером и модулем.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// Ошибка ввода-вывода на сокете
    Io { operation: String, reason: String },
    /// Противоположная сторона закрыла соединение
    Closed { peer: String },
    /// Операция не уложилась в отведённое время
    Timeout { operation: String },
    /// Модуль ответил на рукопожатие ошибкой
    HandshakeRejected { reason: String },
}

impl fmt::Display for TransportError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Io { operation, reason } => write!(f, "Transport I/O error during {operation}: {reason}"),
            Self::Closed { peer } => write!(f, "Connection to {peer} closed"),
            Self::Timeout { operation } => write!(f, "Timed out during {operation}"),
            Self::HandshakeRejected { reason } => write!(f, "Handshake rejected: {reason}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl ErrorExt for TransportError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Io { .. } => StatusCode::Io,
            Self::Closed { .. } => StatusCode::ConnectionClosed,
            Self::Timeout { .. } => StatusCode::Timeout,
            Self::HandshakeRejected { .. } => StatusCode::ModuleInitFailed,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
