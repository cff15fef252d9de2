use std::time::Duration;

use indrajala_error::{IndraResult, ModuleError, StackError};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{oneshot, watch},
    task::JoinSet,
};
use tracing::{debug, error, info, warn};

use super::{
    AsyncIo, CountedReceiver, LifecycleMode, LogSeverity, Module, ModuleContext, Producer,
    Publisher,
};
use crate::event::{Event, CMD_QUIT};

/// Сколько фоновые задачи модуля могут завершаться после остановки.
const TASK_JOIN_GRACE: Duration = Duration::from_millis(500);

/// Отчёт модуля об успешной инициализации.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyReport {
    pub mode: LifecycleMode,
    /// Шаблоны, объявленные самим модулем
    pub subscriptions: Vec<String>,
}

/// Отказ в рукопожатии: код ошибки числом плюс текст.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectReport {
    pub code: u32,
    pub message: String,
}

/// Полный жизненный цикл модуля поверх входной очереди.
///
/// Последовательность: `outbound_init`, инициализация и запуск
/// производителя или цикла ввода-вывода, отчёт в `ready`, затем цикл
/// потребления до `$cmd/quit` или закрытия очереди. Используется обоими
/// транспортами.
pub async fn run_module(
    mut module: Box<dyn Module>,
    mut inbox: CountedReceiver<Event>,
    publisher: Publisher,
    threshold: LogSeverity,
    ready: oneshot::Sender<IndraResult<ReadyReport>>,
) {
    let name = module.name().to_string();
    let mode = module.mode();
    let (quit_tx, quit_rx) = watch::channel(false);
    let ctx = ModuleContext::new(name.as_str(), publisher, threshold, quit_rx);

    let mut tasks = match start(module.as_mut(), mode, &ctx).await {
        Ok(tasks) => tasks,
        Err(e) => {
            error!(module = %name, error = %e, "Module initialization failed");
            let _ = ready.send(Err(e));
            return;
        }
    };

    let report = ReadyReport {
        mode,
        subscriptions: module.subscriptions(),
    };
    if ready.send(Ok(report)).is_err() {
        warn!(module = %name, "Nobody waits for module readiness, stopping");
        tasks.abort_all();
        return;
    }
    info!(module = %name, ?mode, "Module started");

    loop {
        tokio::select! {
            msg = inbox.recv() => match msg {
                Some(ev) if ev.domain == CMD_QUIT => {
                    debug!(module = %name, "Received quit command");
                    break;
                }
                Some(ev) => {
                    let domain = ev.domain.clone();
                    if let Err(e) = module.outbound(ev, &ctx).await {
                        warn!(module = %name, %domain, error = %e, "Outbound handler failed");
                    }
                }
                None => {
                    debug!(module = %name, "Inbox closed");
                    break;
                }
            },
            Some(res) = tasks.join_next(), if !tasks.is_empty() => {
                match res {
                    Ok(Ok(())) => info!(module = %name, "Background loop finished"),
                    Ok(Err(e)) => error!(module = %name, error = %e, "Background loop failed"),
                    Err(e) => error!(module = %name, error = %e, "Background loop panicked"),
                }
                if mode == LifecycleMode::Async {
                    break;
                }
            }
        }
    }

    let _ = quit_tx.send(true);
    module.shutdown(&ctx).await;

    let drained = tokio::time::timeout(TASK_JOIN_GRACE, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(module = %name, "Background loops did not stop in time, aborting");
        tasks.abort_all();
    }
    info!(module = %name, "Module stopped");
}

async fn start(
    module: &mut dyn Module,
    mode: LifecycleMode,
    ctx: &ModuleContext,
) -> IndraResult<JoinSet<IndraResult<()>>> {
    module.outbound_init(ctx).await?;

    let mut tasks = JoinSet::new();
    match mode {
        LifecycleMode::Single => {}
        LifecycleMode::Dual => {
            let mut producer = module.producer().ok_or_else(|| missing(ctx, "producer"))?;
            producer.inbound_init(ctx).await?;
            tasks.spawn(producer_loop(producer, ctx.clone()));
        }
        LifecycleMode::Async => {
            let mut io = module.async_io().ok_or_else(|| missing(ctx, "async I/O loop"))?;
            io.async_init(ctx).await?;
            tasks.spawn(run_io(io, ctx.clone()));
        }
    }
    Ok(tasks)
}

fn missing(
    ctx: &ModuleContext,
    what: &str,
) -> StackError {
    StackError::new(ModuleError::InitFailed {
        name: ctx.name().to_string(),
        reason: format!("mode requires a {what}"),
    })
}

async fn run_io(
    io: Box<dyn AsyncIo>,
    ctx: ModuleContext,
) -> IndraResult<()> {
    io.run(ctx).await
}

/// Цикл производителя: опрос, публикация, пауза `throttle`.
async fn producer_loop(
    mut producer: Box<dyn Producer>,
    ctx: ModuleContext,
) -> IndraResult<()> {
    let mut quit = ctx.quit_receiver();
    loop {
        if *quit.borrow_and_update() {
            return Ok(());
        }
        match producer.inbound(&ctx).await {
            Ok(events) => {
                for ev in events {
                    ctx.publish(ev)?;
                }
            }
            Err(e) => warn!(module = %ctx.name(), error = %e, "Inbound poll failed"),
        }
        tokio::select! {
            _ = tokio::time::sleep(producer.throttle()) => {}
            _ = quit.changed() => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use async_trait::async_trait;
    use indrajala_error::{bail, StatusCode};

    use super::*;
    use crate::module::counted_channel;

    struct Recorder {
        seen: Arc<AtomicUsize>,
        fail_init: bool,
        mode: LifecycleMode,
    }

    struct Ticker;

    #[async_trait]
    impl Producer for Ticker {
        async fn inbound(
            &mut self,
            _ctx: &ModuleContext,
        ) -> IndraResult<Vec<Event>> {
            Ok(vec![Event::new("$event/tick")])
        }

        fn throttle(&self) -> Duration {
            Duration::from_millis(10)
        }
    }

    #[async_trait]
    impl Module for Recorder {
        fn name(&self) -> &str {
            "rec"
        }

        fn mode(&self) -> LifecycleMode {
            self.mode
        }

        fn subscriptions(&self) -> Vec<String> {
            vec!["$event/#".into()]
        }

        async fn outbound_init(
            &mut self,
            _ctx: &ModuleContext,
        ) -> IndraResult<()> {
            if self.fail_init {
                bail!(StatusCode::Io, "cannot open directory");
            }
            Ok(())
        }

        async fn outbound(
            &mut self,
            ev: Event,
            _ctx: &ModuleContext,
        ) -> IndraResult<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if ev.domain == "$event/bad" {
                bail!(StatusCode::InvalidData, "bad");
            }
            Ok(())
        }

        fn producer(&mut self) -> Option<Box<dyn Producer>> {
            Some(Box::new(Ticker))
        }
    }

    fn recorder(
        mode: LifecycleMode,
        fail_init: bool,
    ) -> (Box<dyn Module>, Arc<AtomicUsize>) {
        let seen = Arc::new(AtomicUsize::new(0));
        let m = Recorder {
            seen: seen.clone(),
            fail_init,
            mode,
        };
        (Box::new(m), seen)
    }

    /// Тест проверяет, что ошибка обработчика не останавливает модуль, а
    /// `$cmd/quit` останавливает.
    #[tokio::test]
    async fn test_single_mode_consumes_until_quit() {
        let (module, seen) = recorder(LifecycleMode::Single, false);
        let (in_tx, in_rx) = counted_channel();
        let (out_tx, _out_rx) = counted_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = tokio::spawn(run_module(
            module,
            in_rx,
            Publisher::new("rec", out_tx),
            LogSeverity::Info,
            ready_tx,
        ));
        let report = ready_rx.await.unwrap().unwrap();
        assert_eq!(report.mode, LifecycleMode::Single);
        assert_eq!(report.subscriptions, vec!["$event/#".to_string()]);

        in_tx.send(Event::new("$event/bad")).unwrap();
        in_tx.send(Event::new("$event/ok")).unwrap();
        in_tx.send(Event::new(CMD_QUIT)).unwrap();
        in_tx.send(Event::new("$event/after")).unwrap();
        task.await.unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_init_failure_reported() {
        let (module, _) = recorder(LifecycleMode::Single, true);
        let (_in_tx, in_rx) = counted_channel();
        let (out_tx, _out_rx) = counted_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        run_module(
            module,
            in_rx,
            Publisher::new("rec", out_tx),
            LogSeverity::Info,
            ready_tx,
        )
        .await;
        let err = ready_rx.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("cannot open directory"));
    }

    #[tokio::test]
    async fn test_dual_mode_producer_publishes() {
        let (module, _) = recorder(LifecycleMode::Dual, false);
        let (in_tx, in_rx) = counted_channel();
        let (out_tx, mut out_rx) = counted_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = tokio::spawn(run_module(
            module,
            in_rx,
            Publisher::new("rec", out_tx),
            LogSeverity::Info,
            ready_tx,
        ));
        ready_rx.await.unwrap().unwrap();

        let ev = out_rx.recv().await.unwrap();
        assert_eq!(ev.domain, "$event/tick");
        assert_eq!(ev.from_id, "rec");

        drop(in_tx);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_async_mode_without_loop_fails() {
        let (module, _) = recorder(LifecycleMode::Async, false);
        let (_in_tx, in_rx) = counted_channel();
        let (out_tx, _out_rx) = counted_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        run_module(
            module,
            in_rx,
            Publisher::new("rec", out_tx),
            LogSeverity::Info,
            ready_tx,
        )
        .await;
        assert!(ready_rx.await.unwrap().is_err());
    }
}
