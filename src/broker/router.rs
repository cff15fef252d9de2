use indrajala_error::{BrokerError, IndraResult, ModuleError, StackError};
use tokio::{
    sync::watch,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use super::{
    shutdown::{ShutdownPhase, ShutdownReport},
    subscriptions::SubscriptionTable,
    telemetry::{RateMode, Telemetry},
};
use crate::{
    config::{BrokerSettings, ModuleSpec},
    event::{
        Event, CMD_PREFIX, CMD_QUIT, CMD_SUBS, CMD_UNSUBS, LOG_PREFIX, STAT_MSG_PER_SEC,
    },
    module::{
        counted_channel,
        transport::{process::resolve_executable, InProcessTransport, ProcessTransport},
        CountedReceiver, CountedSender, LifecycleMode, LogSeverity, Module, ModuleRegistry,
        Publisher, ReadyReport, Transport, TransportKind,
    },
};

/// `from_id` событий, созданных самим брокером.
pub const BROKER_ID: &str = "indrajala";

const MODULE_LOG_TARGET: &str = "indrajala::modules";

/// Зарегистрированный модуль.
pub struct ModuleEntry {
    pub name: String,
    pub mode: Option<LifecycleMode>,
    pub transport_kind: TransportKind,
    transport: Option<Box<dyn Transport>>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Состояние маршрутизатора. Принадлежит циклу маршрутизации и передаётся
/// вспомогательным функциям явно.
struct BrokerState {
    settings: BrokerSettings,
    modules: Vec<ModuleEntry>,
    subs: SubscriptionTable,
    ingress_tx: CountedSender<Event>,
    quit_tx: watch::Sender<bool>,
    telemetry: Telemetry,
    phase: ShutdownPhase,
    processed: u64,
}

/// Центральный маршрутизатор событий.
///
/// Одна входная очередь, последовательная обработка: сопоставление с
/// подписками и доставка в транспорты модулей без блокировок.
pub struct Broker {
    state: BrokerState,
    ingress_rx: CountedReceiver<Event>,
}

/// Доступ к брокеру снаружи цикла маршрутизации.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    ingress: CountedSender<Event>,
    quit: watch::Receiver<bool>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Broker {
    pub fn new(settings: BrokerSettings) -> Self {
        let (ingress_tx, ingress_rx) = counted_channel();
        let (quit_tx, _) = watch::channel(false);
        let telemetry = Telemetry::new(&settings);
        Self {
            state: BrokerState {
                settings,
                modules: Vec::new(),
                subs: SubscriptionTable::new(),
                ingress_tx,
                quit_tx,
                telemetry,
                phase: ShutdownPhase::Running,
                processed: 0,
            },
            ingress_rx,
        }
    }

    pub fn handle(&self) -> BrokerHandle {
        BrokerHandle {
            ingress: self.state.ingress_tx.clone(),
            quit: self.state.quit_tx.subscribe(),
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        self.state.phase
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.state.subs
    }

    pub fn modules(&self) -> &[ModuleEntry] {
        &self.state.modules
    }

    /// `None`, если модуль не зарегистрирован.
    pub fn is_active(
        &self,
        name: &str,
    ) -> Option<bool> {
        self.state
            .modules
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.active)
    }

    /// Запускает все модули из конфигурации. Ошибки отдельных модулей
    /// логируются и не мешают остальным.
    pub async fn start_modules(
        &mut self,
        specs: &[ModuleSpec],
        registry: &ModuleRegistry,
    ) {
        for spec in specs {
            if let Err(e) = self.start_module(spec, registry).await {
                debug!(module = %spec.name, error = %e, "Module not started");
            }
        }
    }

    /// Строит и запускает модуль по описанию.
    ///
    /// Неактивные модули пропускаются, неизвестный `kind` не регистрируется.
    /// Модуль, не прошедший инициализацию, регистрируется неактивным.
    pub async fn start_module(
        &mut self,
        spec: &ModuleSpec,
        registry: &ModuleRegistry,
    ) -> IndraResult<()> {
        if !spec.active {
            info!(module = %spec.name, "Module is inactive in configuration, skipping");
            return Ok(());
        }
        self.state.check_new_name(&spec.name)?;
        if !registry.contains(&spec.kind) {
            let err = StackError::new(ModuleError::UnknownKind {
                kind: spec.kind.clone(),
            });
            error!(module = %spec.name, error = %err, "Cannot build module");
            return Err(err);
        }

        let ingress = self.state.ingress_tx.clone();
        let launched: IndraResult<(Box<dyn Transport>, ReadyReport)> = match spec.transport {
            TransportKind::InProcess => match registry.build(spec) {
                Ok(module) => InProcessTransport::launch(module, spec.loglevel, ingress)
                    .await
                    .map(|(t, r)| (Box::new(t) as Box<dyn Transport>, r)),
                Err(e) => Err(e.into()),
            },
            TransportKind::Process => match resolve_executable(&self.state.settings) {
                Ok(exe) => ProcessTransport::launch(spec, &exe, ingress, &self.state.settings)
                    .await
                    .map(|(t, r)| (Box::new(t) as Box<dyn Transport>, r)),
                Err(e) => Err(e),
            },
        };
        self.state.register(&spec.name, spec.transport, launched)
    }

    /// Подключает уже построенный модуль во встроенном транспорте.
    pub async fn attach(
        &mut self,
        module: Box<dyn Module>,
        threshold: LogSeverity,
    ) -> IndraResult<()> {
        let name = module.name().to_string();
        self.state.check_new_name(&name)?;
        let launched = InProcessTransport::launch(module, threshold, self.state.ingress_tx.clone())
            .await
            .map(|(t, r)| (Box::new(t) as Box<dyn Transport>, r));
        self.state.register(&name, TransportKind::InProcess, launched)
    }

    /// Цикл маршрутизации до `$cmd/quit`, затем draining и остановка
    /// модулей.
    pub async fn run(self) -> ShutdownReport {
        let Self {
            mut state,
            mut ingress_rx,
        } = self;
        info!(modules = state.modules.len(), "Broker running");

        let stat_every = state.settings.stat_interval();
        let sample_every = state.settings.queue_sample();
        let mut stat_tick = interval_at(Instant::now() + stat_every, stat_every);
        let mut queue_tick = interval_at(Instant::now() + sample_every, sample_every);
        stat_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        queue_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while state.phase == ShutdownPhase::Running {
            tokio::select! {
                msg = ingress_rx.recv() => match msg {
                    Some(ev) => {
                        state.processed += 1;
                        state.handle_event(ev);
                    }
                    // брокер сам держит отправителя, сюда не попадаем
                    None => break,
                },
                _ = stat_tick.tick() => state.emit_stats(),
                _ = queue_tick.tick() => state.sample_queues(),
            }
        }

        state.phase = ShutdownPhase::Draining;
        let drained = state.drain(&mut ingress_rx).await;

        state.phase = ShutdownPhase::Terminating;
        info!(drained, "Terminating modules");
        let modules = state.terminate_all().await;

        state.phase = ShutdownPhase::Stopped;
        let report = ShutdownReport {
            processed: state.processed,
            drained,
            modules,
        };
        info!(
            processed = report.processed,
            forced = report.forced(),
            "Broker stopped"
        );
        report
    }
}

impl BrokerState {
    fn check_new_name(
        &self,
        name: &str,
    ) -> IndraResult<()> {
        if self.subs.contains(name) {
            let err = StackError::new(BrokerError::DuplicateModule {
                name: name.to_string(),
            });
            error!(error = %err, "Duplicate module name");
            return Err(err);
        }
        Ok(())
    }

    fn register(
        &mut self,
        name: &str,
        transport_kind: TransportKind,
        launched: IndraResult<(Box<dyn Transport>, ReadyReport)>,
    ) -> IndraResult<()> {
        self.subs.register(name);
        match launched {
            Ok((transport, report)) => {
                self.subs.subscribe(name, report.subscriptions.iter().cloned());
                info!(
                    module = %name,
                    mode = ?report.mode,
                    transport = ?transport_kind,
                    subscriptions = ?self.subs.patterns(name),
                    "Module registered"
                );
                self.modules.push(ModuleEntry {
                    name: name.to_string(),
                    mode: Some(report.mode),
                    transport_kind,
                    transport: Some(transport),
                    active: true,
                });
                Ok(())
            }
            Err(e) => {
                error!(module = %name, error = %e, "Module failed to start, marked inactive");
                self.modules.push(ModuleEntry {
                    name: name.to_string(),
                    mode: None,
                    transport_kind,
                    transport: None,
                    active: false,
                });
                Err(e)
            }
        }
    }

    fn handle_event(
        &mut self,
        ev: Event,
    ) -> Flow {
        if let Some(mode) = self.telemetry.record(Instant::now()) {
            self.log_mode_change(mode);
        }

        if let Some(level) = ev.domain.strip_prefix(LOG_PREFIX) {
            log_sink(level, &ev);
            return Flow::Continue;
        }

        if ev.domain.starts_with(CMD_PREFIX) {
            match ev.domain.as_str() {
                CMD_SUBS => {
                    self.change_subscriptions(&ev, true);
                    return Flow::Continue;
                }
                CMD_UNSUBS => {
                    self.change_subscriptions(&ev, false);
                    return Flow::Continue;
                }
                CMD_QUIT => return self.begin_quit(&ev),
                _ => {
                    let err = BrokerError::UnknownCommand {
                        domain: ev.domain.clone(),
                    };
                    warn!(from = %ev.from_id, error = %err, "Routing unknown command as a plain event");
                }
            }
        }

        if let Err(e) = ev.validate_published() {
            warn!(from = %ev.from_id, error = %e, "Dropping event");
            return Flow::Continue;
        }

        self.route(&ev);
        Flow::Continue
    }

    /// Доставка каждому модулю, у которого совпал хотя бы один шаблон.
    /// Проверка шаблонов модуля прекращается на первом совпадении.
    fn route(
        &mut self,
        ev: &Event,
    ) -> usize {
        let verbose = self.telemetry.is_verbose();
        let running = self.phase == ShutdownPhase::Running;
        let mut delivered = 0;

        for entry in self.modules.iter_mut() {
            let Some(pattern) = self.subs.first_match(&entry.name, &ev.domain) else {
                continue;
            };
            if !entry.active {
                let err = BrokerError::ModuleInactive {
                    name: entry.name.clone(),
                };
                warn!(domain = %ev.domain, error = %err, "Dropping event");
                continue;
            }
            let Some(transport) = entry.transport.as_ref() else {
                continue;
            };
            match transport.deliver(ev.clone()) {
                Ok(()) => {
                    delivered += 1;
                    if verbose {
                        debug!(domain = %ev.domain, from = %ev.from_id, module = %entry.name, pattern, "Routed");
                    }
                }
                Err(e) if running => {
                    entry.active = false;
                    error!(module = %entry.name, error = %e, "Module channel closed, marked inactive");
                }
                Err(e) => {
                    entry.active = false;
                    debug!(module = %entry.name, error = %e, "Module already stopped");
                }
            }
        }

        if delivered == 0 && verbose {
            debug!(domain = %ev.domain, from = %ev.from_id, "No subscriber");
        }
        delivered
    }

    fn change_subscriptions(
        &mut self,
        ev: &Event,
        add: bool,
    ) {
        let Some(origin) = self.subs.resolve_origin(&ev.from_id).map(str::to_owned) else {
            let err = BrokerError::UnknownOrigin {
                from_id: ev.from_id.clone(),
            };
            warn!(domain = %ev.domain, error = %err, "Ignoring subscription change");
            return;
        };

        for pattern in parse_patterns(&ev.data) {
            if add {
                self.subs.subscribe(&origin, [pattern.as_str()]);
                debug!(module = %origin, %pattern, "Subscribed");
            } else if self.subs.unsubscribe(&origin, &pattern) {
                debug!(module = %origin, %pattern, "Unsubscribed");
            } else {
                warn!(module = %origin, %pattern, "Unsubscribe of a pattern that is not present");
            }
        }
    }

    fn begin_quit(
        &mut self,
        ev: &Event,
    ) -> Flow {
        if self.phase != ShutdownPhase::Running {
            debug!(from = %ev.from_id, phase = %self.phase, "Quit already in progress");
            return Flow::Continue;
        }
        info!(from = %ev.from_id, "Quit requested, signalling all modules");

        for entry in self.modules.iter().filter(|m| m.active) {
            if let Some(transport) = entry.transport.as_ref() {
                if let Err(e) = transport.deliver(ev.clone()) {
                    debug!(module = %entry.name, error = %e, "Quit not delivered");
                }
            }
        }
        self.quit_tx.send_replace(true);
        self.phase = self.phase.next();
        Flow::Quit
    }

    /// Обслуживает входную очередь до опустошения или конца grace period.
    async fn drain(
        &mut self,
        ingress: &mut CountedReceiver<Event>,
    ) -> u64 {
        let deadline = Instant::now() + self.settings.grace_period();
        let mut drained = 0;
        loop {
            let now = Instant::now();
            if now >= deadline {
                if ingress.depth() > 0 {
                    warn!(pending = ingress.depth(), "Grace period elapsed with events pending");
                }
                break;
            }
            let wait = self.settings.drain_poll().min(deadline - now);
            match tokio::time::timeout(wait, ingress.recv()).await {
                Ok(Some(ev)) => {
                    drained += 1;
                    self.processed += 1;
                    self.handle_event(ev);
                }
                Ok(None) => break,
                Err(_) if ingress.depth() == 0 => break,
                Err(_) => {}
            }
        }
        drained
    }

    async fn terminate_all(&mut self) -> Vec<(String, crate::module::TerminateOutcome)> {
        let mut outcomes = Vec::new();
        for entry in self.modules.iter_mut() {
            let Some(transport) = entry.transport.take() else {
                continue;
            };
            let outcome = transport.terminate(&self.settings).await;
            info!(module = %entry.name, ?outcome, "Module terminated");
            entry.active = false;
            outcomes.push((entry.name.clone(), outcome));
        }
        outcomes
    }

    fn emit_stats(&mut self) {
        let now = Instant::now();
        if let Some(mode) = self.telemetry.refresh(now) {
            self.log_mode_change(mode);
        }
        let rate = self.telemetry.rate_at(now);
        let window = self.telemetry.take_window();
        if !self.telemetry.is_verbose() {
            info!(rate = format!("{rate:.1}"), events = window, "Routing summary");
        }
        if rate.is_finite() && self.subs.has_subscriber(STAT_MSG_PER_SEC) {
            let ev = Event::new(STAT_MSG_PER_SEC)
                .from_id(BROKER_ID)
                .with_data("number/float", rate.to_string());
            self.route(&ev);
        }
    }

    fn sample_queues(&self) {
        let high = self.settings.queue_high_water;
        let ingress = self.ingress_tx.depth();
        if ingress > high {
            warn!(depth = ingress, high_water = high, "Broker ingress queue above high-water mark");
        }
        for entry in self.modules.iter().filter(|m| m.active) {
            if let Some(depth) = entry.transport.as_ref().map(|t| t.depth()) {
                if depth > high {
                    warn!(module = %entry.name, depth, high_water = high, "Module queue above high-water mark");
                }
            }
        }
    }

    fn log_mode_change(
        &self,
        mode: RateMode,
    ) {
        match mode {
            RateMode::Summary => info!(
                high_water = self.settings.rate_high_water,
                "Message rate is high, switching to periodic summaries"
            ),
            RateMode::Verbose => info!(
                low_water = self.settings.rate_low_water,
                "Message rate is low, resuming per-event routing logs"
            ),
        }
    }
}

impl BrokerHandle {
    /// Отправитель от имени `name` во входную очередь.
    pub fn publisher(
        &self,
        name: &str,
    ) -> Publisher {
        Publisher::new(name, self.ingress.clone())
    }

    pub fn request_quit(&self) -> IndraResult<()> {
        self.publisher(BROKER_ID).request_quit()
    }

    pub fn is_quitting(&self) -> bool {
        *self.quit.borrow()
    }

    /// Флаг остановки, общий для фоновых задач.
    pub fn quit_signal(&self) -> watch::Receiver<bool> {
        self.quit.clone()
    }

    pub fn ingress_depth(&self) -> usize {
        self.ingress.depth()
    }
}

/// `$log/<level>` → событие `tracing` того же уровня.
fn log_sink(
    level: &str,
    ev: &Event,
) {
    let module = ev.from_id.as_str();
    let msg = ev.data.as_str();
    match level {
        "error" => error!(target: MODULE_LOG_TARGET, module, msg),
        "warning" | "warn" => warn!(target: MODULE_LOG_TARGET, module, msg),
        "info" => info!(target: MODULE_LOG_TARGET, module, msg),
        "debug" => debug!(target: MODULE_LOG_TARGET, module, msg),
        other => {
            warn!(level = other, module, "Unknown log level");
            info!(target: MODULE_LOG_TARGET, module, msg);
        }
    }
}

/// Данные `$cmd/subs|unsubs`: JSON-список, JSON-строка или голый шаблон.
fn parse_patterns(data: &str) -> Vec<String> {
    if let Ok(list) = serde_json::from_str::<Vec<String>>(data) {
        return list;
    }
    if let Ok(single) = serde_json::from_str::<String>(data) {
        return vec![single];
    }
    let raw = data.trim();
    if raw.is_empty() {
        Vec::new()
    } else {
        vec![raw.to_string()]
    }
}
