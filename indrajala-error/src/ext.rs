use std::{any::Any, error::Error};

use crate::StatusCode;

/// Общий интерфейс ошибок брокера. Трейт object-safe: [`crate::StackError`]
/// хранит корень как `Arc<dyn ErrorExt>`.
pub trait ErrorExt: Error + Send + Sync + 'static {
    fn status_code(&self) -> StatusCode {
        StatusCode::Internal
    }

    fn as_any(&self) -> &dyn Any;

    /// Тег `data_type` ответа-ошибки (`error/access`, `error/notfound`, ...).
    fn reply_tag(&self) -> &'static str {
        self.status_code().reply_tag()
    }

    /// Текст для `data` ответа-ошибки. Внутренние сбои без деталей.
    fn client_message(&self) -> String {
        match self.status_code() {
            StatusCode::Unknown | StatusCode::Internal | StatusCode::Unexpected => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }

    fn log_message(&self) -> String {
        format!("{self:?}")
    }
}
