use std::time::Duration;

use async_trait::async_trait;
use indrajala_error::{IndraResult, ModuleError};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::{
    config::ModuleSpec,
    event::Event,
    module::{LifecycleMode, Module, ModuleContext, Producer, RunCondition, TimerScheduler},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DingDongConfig {
    /// Домен периодического события; по умолчанию `$event/<name>/ding`
    pub topic: Option<String>,
    pub message: String,
    pub interval_sec: f64,
    /// Пауза между опросами производителя
    pub throttle_ms: u64,
}

impl Default for DingDongConfig {
    fn default() -> Self {
        Self {
            topic: None,
            message: "ding".into(),
            interval_sec: 10.0,
            throttle_ms: 100,
        }
    }
}

/// Демонстрационный модуль в режиме `dual`: периодически публикует
/// сообщение и отвечает `pong` на `<name>/ping`.
pub struct DingDong {
    name: String,
    topic: String,
    config: DingDongConfig,
    condition: RunCondition,
    pings: u64,
}

struct DingProducer {
    name: String,
    topic: String,
    message: String,
    condition: RunCondition,
    throttle: Duration,
    rx: Option<mpsc::UnboundedReceiver<()>>,
}

impl DingDong {
    pub fn from_spec(spec: &ModuleSpec) -> Result<Self, ModuleError> {
        let invalid = |reason: String| ModuleError::InvalidConfig {
            name: spec.name.clone(),
            reason,
        };
        let config: DingDongConfig = if spec.config.is_null() {
            DingDongConfig::default()
        } else {
            serde_json::from_value(spec.config.clone()).map_err(|e| invalid(e.to_string()))?
        };
        let condition =
            RunCondition::every_secs(config.interval_sec).map_err(|e| invalid(e.to_string()))?;
        let topic = config
            .topic
            .clone()
            .unwrap_or_else(|| format!("$event/{}/ding", spec.name));
        Ok(Self {
            name: spec.name.clone(),
            topic,
            config,
            condition,
            pings: 0,
        })
    }

    pub fn ping_domain(&self) -> String {
        format!("{}/ping", self.name)
    }
}

#[async_trait]
impl Module for DingDong {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> LifecycleMode {
        LifecycleMode::Dual
    }

    async fn outbound(
        &mut self,
        ev: Event,
        ctx: &ModuleContext,
    ) -> IndraResult<()> {
        if ev.domain == self.ping_domain() {
            self.pings += 1;
            ctx.log.debug(format!("Ping #{} from {}", self.pings, ev.from_id));
            return ctx.publish(Event::reply_to(&ev, &self.name).with_data("string", "pong"));
        }
        ctx.log.debug(format!("Ignoring {} from {}", ev.domain, ev.from_id));
        Ok(())
    }

    fn producer(&mut self) -> Option<Box<dyn Producer>> {
        Some(Box::new(DingProducer {
            name: self.name.clone(),
            topic: self.topic.clone(),
            message: self.config.message.clone(),
            condition: self.condition,
            throttle: Duration::from_millis(self.config.throttle_ms.max(1)),
            rx: None,
        }))
    }

    async fn shutdown(
        &mut self,
        ctx: &ModuleContext,
    ) {
        ctx.log.info(format!("Answered {} pings", self.pings));
    }
}

#[async_trait]
impl Producer for DingProducer {
    async fn inbound_init(
        &mut self,
        ctx: &ModuleContext,
    ) -> IndraResult<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut scheduler = TimerScheduler::new(self.throttle, 5);
        scheduler.add_job(format!("{}/ding", self.name), self.condition, move || {
            // получатель пропадает только при остановке модуля
            let _ = tx.send(());
            Ok(())
        })?;
        scheduler.spawn(ctx.quit_receiver());
        self.rx = Some(rx);
        Ok(())
    }

    async fn inbound(
        &mut self,
        _ctx: &ModuleContext,
    ) -> IndraResult<Vec<Event>> {
        let mut events = Vec::new();
        if let Some(rx) = self.rx.as_mut() {
            while rx.try_recv().is_ok() {
                events.push(
                    Event::new(self.topic.as_str())
                        .from_id(self.name.as_str())
                        .with_data("string", self.message.as_str()),
                );
            }
        }
        Ok(events)
    }

    fn throttle(&self) -> Duration {
        self.throttle
    }
}
