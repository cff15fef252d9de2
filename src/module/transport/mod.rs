pub mod frame;
pub mod in_process;
pub mod process;

use async_trait::async_trait;
pub use in_process::InProcessTransport;
use indrajala_error::TransportError;
pub use process::ProcessTransport;
use serde::{Deserialize, Serialize};

use crate::{config::BrokerSettings, event::Event};

/// Способ связи брокера с модулем, выбирается в конфигурации.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Задача tokio внутри процесса брокера
    #[default]
    InProcess,
    /// Отдельный процесс `indrajala-module`, связь через TCP
    Process,
}

/// Чем закончилась остановка модуля.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// Задача встроенного модуля завершилась сама
    Joined,
    /// Задача не завершилась вовремя и была прервана
    Aborted,
    /// Внешний процесс завершился с кодом
    Exited(Option<i32>),
    /// Внешний процесс убит после исчерпания попыток
    Killed,
}

/// Общий контракт обоих транспортов.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Неблокирующая постановка события в очередь модуля.
    fn deliver(
        &self,
        ev: Event,
    ) -> Result<(), TransportError>;

    /// Текущая глубина очереди модуля.
    fn depth(&self) -> usize;

    /// Закрывает канал и дожидается завершения модуля.
    async fn terminate(
        self: Box<Self>,
        settings: &BrokerSettings,
    ) -> TerminateOutcome;
}
