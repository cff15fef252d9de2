use async_trait::async_trait;
use indrajala_error::{IndraResult, ModuleError, StackError, TransportError};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::warn;

use super::{TerminateOutcome, Transport, TransportKind};
use crate::{
    config::BrokerSettings,
    event::Event,
    module::{counted_channel, run_module, CountedSender, LogSeverity, Module, Publisher, ReadyReport},
};

/// Модуль как задача tokio; связь через пару очередей в памяти.
pub struct InProcessTransport {
    name: String,
    tx: CountedSender<Event>,
    task: JoinHandle<()>,
}

impl InProcessTransport {
    /// Запускает модуль и ждёт завершения его инициализации.
    pub async fn launch(
        module: Box<dyn Module>,
        threshold: LogSeverity,
        ingress: CountedSender<Event>,
    ) -> IndraResult<(Self, ReadyReport)> {
        let name = module.name().to_string();
        let (tx, rx) = counted_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let publisher = Publisher::new(name.as_str(), ingress);

        let task = tokio::spawn(run_module(module, rx, publisher, threshold, ready_tx));

        match ready_rx.await {
            Ok(Ok(report)) => Ok((Self { name, tx, task }, report)),
            Ok(Err(e)) => {
                let _ = task.await;
                Err(e)
            }
            Err(_) => Err(StackError::new(ModuleError::InitFailed {
                name,
                reason: "module task ended before reporting readiness".into(),
            })),
        }
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::InProcess
    }

    fn deliver(
        &self,
        ev: Event,
    ) -> Result<(), TransportError> {
        self.tx.send(ev).map_err(|_| TransportError::Closed {
            peer: self.name.clone(),
        })
    }

    fn depth(&self) -> usize {
        self.tx.depth()
    }

    async fn terminate(
        self: Box<Self>,
        settings: &BrokerSettings,
    ) -> TerminateOutcome {
        let Self { name, tx, mut task } = *self;
        drop(tx);
        match tokio::time::timeout(settings.join_timeout(), &mut task).await {
            Ok(_) => TerminateOutcome::Joined,
            Err(_) => {
                warn!(module = %name, "Module task did not stop in time, aborting");
                task.abort();
                TerminateOutcome::Aborted
            }
        }
    }
}
