use std::{fmt, sync::Arc};

use indrajala_error::{BrokerError, IndraResult, StackError};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::queue::CountedSender;
use crate::event::{Event, CMD_QUIT, CMD_SUBS, CMD_UNSUBS, LOG_PREFIX};

/// Порог сообщений, которые модуль отправляет в `$log/...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    None,
    Error,
    Warning,
    #[default]
    Info,
    Debug,
}

impl LogSeverity {
    /// Имя уровня в домене `$log/<level>`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

impl fmt::Display for LogSeverity {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Отправка событий модуля во входную очередь брокера.
#[derive(Debug, Clone)]
pub struct Publisher {
    name: Arc<str>,
    tx: CountedSender<Event>,
}

impl Publisher {
    pub fn new(
        name: impl Into<Arc<str>>,
        tx: CountedSender<Event>,
    ) -> Self {
        Self {
            name: name.into(),
            tx,
        }
    }

    /// Публикует событие. Пустой `from_id` заменяется именем модуля,
    /// домен с wildcard отклоняется.
    pub fn publish(
        &self,
        mut ev: Event,
    ) -> IndraResult<()> {
        if ev.from_id.is_empty() {
            ev.from_id = self.name.to_string();
        }
        ev.validate_published()?;
        self.tx
            .send(ev)
            .map_err(|_| StackError::new(BrokerError::IngressClosed))
    }

    pub fn subscribe(
        &self,
        patterns: &[&str],
    ) -> IndraResult<()> {
        self.control(CMD_SUBS, patterns)
    }

    pub fn unsubscribe(
        &self,
        patterns: &[&str],
    ) -> IndraResult<()> {
        self.control(CMD_UNSUBS, patterns)
    }

    /// Просит брокер начать остановку всей системы.
    pub fn request_quit(&self) -> IndraResult<()> {
        self.publish(Event::new(CMD_QUIT))
    }

    fn control(
        &self,
        domain: &str,
        patterns: &[&str],
    ) -> IndraResult<()> {
        let data = serde_json::to_string(patterns).unwrap_or_else(|_| "[]".into());
        self.publish(Event::new(domain).with_data("vector/string", data))
    }
}

/// Логирование модуля через шину.
#[derive(Debug, Clone)]
pub struct ModuleLog {
    publisher: Publisher,
    threshold: LogSeverity,
}

impl ModuleLog {
    pub fn new(
        publisher: Publisher,
        threshold: LogSeverity,
    ) -> Self {
        Self {
            publisher,
            threshold,
        }
    }

    pub fn enabled(
        &self,
        level: LogSeverity,
    ) -> bool {
        level != LogSeverity::None && level <= self.threshold
    }

    pub fn log(
        &self,
        level: LogSeverity,
        msg: impl Into<String>,
    ) {
        if !self.enabled(level) {
            return;
        }
        let ev =
            Event::new(format!("{LOG_PREFIX}{level}")).with_data("string", msg.into());
        if let Err(e) = self.publisher.publish(ev) {
            tracing::debug!(error = %e, "Module log dropped");
        }
    }

    pub fn error(
        &self,
        msg: impl Into<String>,
    ) {
        self.log(LogSeverity::Error, msg)
    }

    pub fn warn(
        &self,
        msg: impl Into<String>,
    ) {
        self.log(LogSeverity::Warning, msg)
    }

    pub fn info(
        &self,
        msg: impl Into<String>,
    ) {
        self.log(LogSeverity::Info, msg)
    }

    pub fn debug(
        &self,
        msg: impl Into<String>,
    ) {
        self.log(LogSeverity::Debug, msg)
    }
}

/// Всё, что модуль получает от среды выполнения.
///
/// Одинаково устроен для встроенного и внешнего транспорта: модуль не
/// знает, где он запущен.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    name: Arc<str>,
    pub publisher: Publisher,
    pub log: ModuleLog,
    quit: watch::Receiver<bool>,
}

impl ModuleContext {
    pub fn new(
        name: impl Into<Arc<str>>,
        publisher: Publisher,
        threshold: LogSeverity,
        quit: watch::Receiver<bool>,
    ) -> Self {
        Self {
            name: name.into(),
            log: ModuleLog::new(publisher.clone(), threshold),
            publisher,
            quit,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn publish(
        &self,
        ev: Event,
    ) -> IndraResult<()> {
        self.publisher.publish(ev)
    }

    pub fn is_quitting(&self) -> bool {
        *self.quit.borrow()
    }

    /// Отдельный приёмник флага остановки для фоновых задач модуля.
    pub fn quit_receiver(&self) -> watch::Receiver<bool> {
        self.quit.clone()
    }

    /// Ждёт сигнала остановки (или закрытия отправителя).
    pub async fn wait_quit(&self) {
        let mut quit = self.quit.clone();
        while !*quit.borrow_and_update() {
            if quit.changed().await.is_err() {
                return;
            }
        }
    }
}
