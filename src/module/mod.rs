pub mod context;
pub mod host;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod timer;
pub mod transport;

use std::time::Duration;

use async_trait::async_trait;
pub use context::*;
use indrajala_error::IndraResult;
pub use queue::{counted_channel, CountedReceiver, CountedSender};
pub use registry::{ModuleFactory, ModuleRegistry};
pub use runner::{run_module, ReadyReport, RejectReport};
use serde::{Deserialize, Serialize};
pub use timer::{RunCondition, TimerScheduler};
pub use transport::{TerminateOutcome, Transport, TransportKind};

use crate::event::Event;

/// Режим жизненного цикла, выбирается один раз при регистрации.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleMode {
    /// Только потребляет маршрутизированные события
    Single,
    /// Плюс независимый цикл-производитель
    Dual,
    /// Плюс кооперативный цикл внешнего ввода-вывода
    Async,
}

/// Контракт подключаемого модуля.
#[async_trait]
pub trait Module: Send + 'static {
    fn name(&self) -> &str;

    fn mode(&self) -> LifecycleMode;

    /// Шаблоны сверх подписок по умолчанию (`$cmd/quit`, `<name>`,
    /// `<name>/#`).
    fn subscriptions(&self) -> Vec<String> {
        Vec::new()
    }

    /// Ошибка помечает модуль неактивным.
    async fn outbound_init(
        &mut self,
        _ctx: &ModuleContext,
    ) -> IndraResult<()> {
        Ok(())
    }

    /// Обработка одного маршрутизированного события. Ошибка логируется и
    /// не останавливает модуль.
    async fn outbound(
        &mut self,
        ev: Event,
        ctx: &ModuleContext,
    ) -> IndraResult<()>;

    /// Производитель для режима `dual`. Вызывается один раз.
    fn producer(&mut self) -> Option<Box<dyn Producer>> {
        None
    }

    /// Цикл ввода-вывода для режима `async`. Вызывается один раз.
    fn async_io(&mut self) -> Option<Box<dyn AsyncIo>> {
        None
    }

    async fn shutdown(
        &mut self,
        _ctx: &ModuleContext,
    ) {
    }
}

/// Опрашиваемый источник событий модуля в режиме `dual`.
#[async_trait]
pub trait Producer: Send + 'static {
    async fn inbound_init(
        &mut self,
        _ctx: &ModuleContext,
    ) -> IndraResult<()> {
        Ok(())
    }

    /// Один опрос источника; может вернуть пустой список.
    async fn inbound(
        &mut self,
        ctx: &ModuleContext,
    ) -> IndraResult<Vec<Event>>;

    /// Пауза между опросами.
    fn throttle(&self) -> Duration {
        Duration::from_millis(100)
    }
}

/// Долгоживущий цикл ввода-вывода модуля в режиме `async`.
#[async_trait]
pub trait AsyncIo: Send + 'static {
    async fn async_init(
        &mut self,
        _ctx: &ModuleContext,
    ) -> IndraResult<()> {
        Ok(())
    }

    /// Работает до сигнала остановки или исчерпания источника.
    async fn run(
        self: Box<Self>,
        ctx: ModuleContext,
    ) -> IndraResult<()>;
}
