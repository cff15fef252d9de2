use async_trait::async_trait;
use indrajala_error::{IndraResult, ModuleError, StackError};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use super::{protocol::StorageEngine, store::Store, StorageConfig};
use crate::{
    config::ModuleSpec,
    event::{is_transaction, topic_matches, Event},
    module::{LifecycleMode, Module, ModuleContext, RunCondition, TimerScheduler},
};

/// Модуль хранилища (режим `single`).
///
/// Подписан на `$trx/db/#`, `$trx/kv/#` и `persistent_domains`. Фиксация
/// по таймеру приходит самому себе событием `<name>/commit`.
pub struct StorageModule {
    name: String,
    config: StorageConfig,
    engine: Option<StorageEngine>,
    commit_timer: Option<JoinHandle<()>>,
}

impl StorageModule {
    pub fn new(
        name: impl Into<String>,
        config: StorageConfig,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            engine: None,
            commit_timer: None,
        }
    }

    pub fn from_spec(spec: &ModuleSpec) -> Result<Self, ModuleError> {
        let invalid = |reason: String| ModuleError::InvalidConfig {
            name: spec.name.clone(),
            reason,
        };
        let config: StorageConfig = if spec.config.is_null() {
            StorageConfig::default()
        } else {
            serde_json::from_value(spec.config.clone()).map_err(|e| invalid(e.to_string()))?
        };
        config.validate().map_err(invalid)?;
        Ok(Self::new(spec.name.as_str(), config))
    }

    pub fn commit_domain(&self) -> String {
        format!("{}/commit", self.name)
    }

    fn is_persistent(
        &self,
        domain: &str,
    ) -> bool {
        self.config
            .persistent_domains
            .iter()
            .any(|p| topic_matches(domain, p))
    }

    fn spawn_commit_timer(
        &self,
        ctx: &ModuleContext,
    ) -> IndraResult<JoinHandle<()>> {
        let every = self.config.commit_delay().max(std::time::Duration::from_millis(100));
        let condition = RunCondition::Periodic(every);
        let publisher = ctx.publisher.clone();
        let domain = self.commit_domain();
        let resolution = (every / 4).max(std::time::Duration::from_millis(25));

        let mut scheduler = TimerScheduler::new(resolution, 5);
        scheduler.add_job(domain.clone(), condition, move || {
            publisher.publish(Event::new(domain.as_str()).with_data("string", "commit"))
        })?;
        Ok(scheduler.spawn(ctx.quit_receiver()))
    }
}

#[async_trait]
impl Module for StorageModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> LifecycleMode {
        LifecycleMode::Single
    }

    fn subscriptions(&self) -> Vec<String> {
        let mut subs = vec!["$trx/db/#".to_string(), "$trx/kv/#".to_string()];
        for p in &self.config.persistent_domains {
            if !subs.contains(p) {
                subs.push(p.clone());
            }
        }
        subs
    }

    async fn outbound_init(
        &mut self,
        ctx: &ModuleContext,
    ) -> IndraResult<()> {
        let mut store = Store::open(&self.config).map_err(|e| {
            StackError::new(e).context(format!("open storage for module {}", self.name))
        })?;
        store.seed_admin(&self.config.default_admin_password)?;
        ctx.log.info(format!(
            "Storage ready at {}, last seq_no {}",
            self.config.database_directory.display(),
            store.last_seq_no()
        ));
        self.engine = Some(StorageEngine::new(self.name.as_str(), store, &self.config));
        self.commit_timer = Some(self.spawn_commit_timer(ctx)?);
        Ok(())
    }

    async fn outbound(
        &mut self,
        ev: Event,
        ctx: &ModuleContext,
    ) -> IndraResult<()> {
        let commit_domain = self.commit_domain();
        let persistent = self.is_persistent(&ev.domain);
        let Some(engine) = self.engine.as_mut() else {
            return Ok(());
        };

        if ev.domain == commit_domain {
            return Ok(engine.store_mut().commit()?);
        }
        if is_transaction(&ev.domain) {
            let reply = engine.respond(&ev);
            return ctx.publish(reply);
        }
        if persistent {
            if let Err(e) = engine.persist(&ev) {
                error!(module = %self.name, domain = %ev.domain, error = %e, "Failed to persist event");
                ctx.log.error(format!("Failed to persist {}: {e}", ev.domain));
            }
            return Ok(());
        }
        warn!(module = %self.name, domain = %ev.domain, "Unexpected event");
        Ok(())
    }

    async fn shutdown(
        &mut self,
        ctx: &ModuleContext,
    ) {
        if let Some(timer) = self.commit_timer.take() {
            timer.abort();
        }
        if let Some(engine) = self.engine.as_mut() {
            match engine.store_mut().close() {
                Ok(()) => ctx.log.info("Storage closed"),
                Err(e) => error!(module = %self.name, error = %e, "Failed to close storage cleanly"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;
    use tokio::sync::oneshot;

    use super::*;
    use crate::{
        event::{CMD_QUIT, KV_READ},
        module::{counted_channel, run_module, LogSeverity, Publisher},
        storage::Checkpoint,
    };

    #[test]
    fn test_from_spec_validates() {
        let spec = ModuleSpec::new("db", "storage").with_config(json!({"page_size": 1000}));
        assert!(StorageModule::from_spec(&spec).is_err());

        let m = StorageModule::from_spec(&ModuleSpec::new("db", "storage")).unwrap();
        assert_eq!(m.subscriptions(), vec!["$trx/db/#", "$trx/kv/#", "$event/#"]);
        assert!(m.is_persistent("$event/temp/in"));
        assert!(!m.is_persistent("$sys/stat/msgpersec"));
    }

    /// Тест проверяет, что каталог, который нельзя создать, делает модуль
    /// неготовым.
    #[tokio::test]
    async fn test_init_fails_on_bad_directory() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain-file");
        std::fs::write(&file, "x").unwrap();
        let spec = ModuleSpec::new("db", "storage")
            .with_config(json!({"database_directory": file.join("sub")}));
        let module = StorageModule::from_spec(&spec).unwrap();

        let (ingress_tx, _ingress_rx) = counted_channel();
        let (_tx, rx) = counted_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(run_module(
            Box::new(module),
            rx,
            Publisher::new("db", ingress_tx),
            LogSeverity::Info,
            ready_tx,
        ));
        assert!(ready_rx.await.unwrap().is_err());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_persist_reply_and_checkpoint_on_quit() {
        let dir = tempdir().unwrap();
        let spec = ModuleSpec::new("db", "storage").with_config(json!({
            "database_directory": dir.path(),
            "commit_delay_sec": 0.0
        }));
        let module = StorageModule::from_spec(&spec).unwrap();

        let (ingress_tx, mut ingress_rx) = counted_channel();
        let (tx, rx) = counted_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(run_module(
            Box::new(module),
            rx,
            Publisher::new("db", ingress_tx),
            LogSeverity::None,
            ready_tx,
        ));
        ready_rx.await.unwrap().unwrap();

        tx.send(Event::new("$event/temp").from_id("sensor").with_data("number/float", "21.5"))
            .unwrap();
        let req = Event::new(KV_READ)
            .from_id("ws/1")
            .with_data("json", json!({"key": "entity/indrajala/user/admin/password"}).to_string());
        tx.send(req.clone()).unwrap();

        let reply = loop {
            let ev = ingress_rx.recv().await.unwrap();
            if ev.uuid == req.uuid {
                break ev;
            }
        };
        assert_eq!(reply.domain, "ws/1");
        assert_eq!(reply.data_type, "vector/tuple/kv");

        tx.send(Event::new(CMD_QUIT)).unwrap();
        task.await.unwrap();

        let cp = Checkpoint::load(&Checkpoint::path_in(dir.path()));
        assert_eq!(cp.last_seq_no, 1);
        assert_eq!(cp.last_kv_seq_no, 1);
    }
}
