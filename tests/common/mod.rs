#![allow(dead_code)]

use std::time::Duration;

use async_trait::async_trait;
use indrajala::{
    event::CMD_QUIT,
    module::Publisher,
    BrokerSettings, Event, IndraResult, LifecycleMode, Module, ModuleContext,
};
use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    time::timeout,
};

/// Модуль, который пересылает в тест всё, что ему доставил брокер.
struct Recorder {
    name: String,
    subs: Vec<String>,
    dynamic: Vec<String>,
    tx: UnboundedSender<Event>,
}

#[async_trait]
impl Module for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> LifecycleMode {
        LifecycleMode::Single
    }

    fn subscriptions(&self) -> Vec<String> {
        self.subs.clone()
    }

    async fn outbound_init(
        &mut self,
        ctx: &ModuleContext,
    ) -> IndraResult<()> {
        if !self.dynamic.is_empty() {
            let patterns: Vec<&str> = self.dynamic.iter().map(String::as_str).collect();
            ctx.publisher.subscribe(&patterns)?;
        }
        Ok(())
    }

    async fn outbound(
        &mut self,
        ev: Event,
        _ctx: &ModuleContext,
    ) -> IndraResult<()> {
        let _ = self.tx.send(ev);
        Ok(())
    }
}

pub fn recorder(
    name: &str,
    subs: &[&str],
    dynamic: &[&str],
) -> (Box<dyn Module>, UnboundedReceiver<Event>) {
    let (tx, rx) = unbounded_channel();
    let module = Recorder {
        name: name.to_string(),
        subs: subs.iter().map(|s| s.to_string()).collect(),
        dynamic: dynamic.iter().map(|s| s.to_string()).collect(),
        tx,
    };
    (Box::new(module), rx)
}

pub fn fast_settings() -> BrokerSettings {
    BrokerSettings {
        grace_period_ms: 300,
        drain_poll_ms: 20,
        join_timeout_ms: 500,
        ..Default::default()
    }
}

/// Следующее событие модуля, не считая `$cmd/quit`.
pub async fn next_event(rx: &mut UnboundedReceiver<Event>) -> Option<Event> {
    loop {
        match timeout(Duration::from_millis(500), rx.recv()).await {
            Ok(Some(ev)) if ev.domain == CMD_QUIT => continue,
            Ok(Some(ev)) => return Some(ev),
            _ => return None,
        }
    }
}


/// Отправляет запрос и ждёт ответ с тем же `uuid`.
pub async fn request(
    publisher: &Publisher,
    rx: &mut UnboundedReceiver<Event>,
    req: Event,
) -> Event {
    let uuid = req.uuid.clone();
    publisher.publish(req).unwrap();
    loop {
        let ev = next_event(rx).await.expect("no reply");
        if ev.uuid == uuid {
            return ev;
        }
    }
}
