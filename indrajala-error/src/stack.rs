use std::{fmt, panic::Location, sync::Arc};

use crate::{ErrorExt, LogLevel, StatusCode};

/// Ошибка брокера: корневая причина плюс цепочка контекстов, добавленных по
/// пути наверх. Клонируется дёшево, корень разделяется через `Arc`.
#[derive(Clone)]
pub struct StackError {
    root: Arc<dyn ErrorExt>,
    frames: Vec<ErrorContext>,
}

/// Один шаг цепочки: что делали и где.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub message: String,
    pub location: &'static Location<'static>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StackError {
    pub fn new<E: ErrorExt>(err: E) -> Self {
        Self {
            root: Arc::new(err),
            frames: Vec::new(),
        }
    }

    #[track_caller]
    pub fn context(
        mut self,
        msg: impl Into<String>,
    ) -> Self {
        self.frames.push(ErrorContext {
            message: msg.into(),
            location: Location::caller(),
        });
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.root.status_code()
    }

    /// Текст для `data` ответа-ошибки. Контексты туда не попадают.
    pub fn client_message(&self) -> String {
        self.root.client_message()
    }

    pub fn reply_tag(&self) -> &'static str {
        self.root.reply_tag()
    }

    pub fn log_level(&self) -> LogLevel {
        self.status_code().log_level()
    }

    pub fn root(&self) -> &dyn ErrorExt {
        self.root.as_ref()
    }

    /// Контексты в порядке добавления: первый ближе всего к корню.
    pub fn contexts(&self) -> &[ErrorContext] {
        &self.frames
    }

    pub fn downcast_ref<T: ErrorExt>(&self) -> Option<&T> {
        self.root.as_any().downcast_ref::<T>()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for StackError {
    /// Внешний контекст первым: `kv dispatch: verify request: <root>`.
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        for frame in self.frames.iter().rev() {
            write!(f, "{}: ", frame.message)?;
        }
        write!(f, "{}", self.root)
    }
}

impl fmt::Debug for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        writeln!(f, "[{}] {}", self.status_code(), self.root.log_message())?;
        for frame in &self.frames {
            writeln!(
                f,
                "  at {}:{} {}",
                frame.location.file(),
                frame.location.line(),
                frame.message
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for StackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.root.as_ref())
    }
}

impl<E: ErrorExt> From<E> for StackError {
    fn from(e: E) -> Self {
        StackError::new(e)
    }
}

impl From<StackError> for std::io::Error {
    fn from(e: StackError) -> Self {
        std::io::Error::other(e.to_string())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
