use std::process::Stdio;

use async_trait::async_trait;
use indrajala_error::{IndraResult, ModuleError, StackError};
use serde::Deserialize;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, Command},
};
use tracing::{debug, info};

use crate::{
    config::ModuleSpec,
    event::Event,
    module::{AsyncIo, LifecycleMode, Module, ModuleContext},
};

#[derive(Debug, Clone, Deserialize)]
pub struct TaskerConfig {
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// По умолчанию `$event/<name>/stdout`
    #[serde(default)]
    pub domain: Option<String>,
}

/// Модуль в режиме `async`: запускает внешнюю команду и публикует каждую
/// строку её stdout как событие.
pub struct Tasker {
    name: String,
    domain: String,
    config: TaskerConfig,
}

struct TaskerIo {
    name: String,
    domain: String,
    config: TaskerConfig,
    child: Option<Child>,
}

impl Tasker {
    pub fn from_spec(spec: &ModuleSpec) -> Result<Self, ModuleError> {
        let config: TaskerConfig =
            serde_json::from_value(spec.config.clone()).map_err(|e| ModuleError::InvalidConfig {
                name: spec.name.clone(),
                reason: e.to_string(),
            })?;
        let domain = config
            .domain
            .clone()
            .unwrap_or_else(|| format!("$event/{}/stdout", spec.name));
        Ok(Self {
            name: spec.name.clone(),
            domain,
            config,
        })
    }
}

#[async_trait]
impl Module for Tasker {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> LifecycleMode {
        LifecycleMode::Async
    }

    async fn outbound(
        &mut self,
        ev: Event,
        ctx: &ModuleContext,
    ) -> IndraResult<()> {
        ctx.log.debug(format!("Tasker ignores {}", ev.domain));
        Ok(())
    }

    fn async_io(&mut self) -> Option<Box<dyn AsyncIo>> {
        Some(Box::new(TaskerIo {
            name: self.name.clone(),
            domain: self.domain.clone(),
            config: self.config.clone(),
            child: None,
        }))
    }
}

#[async_trait]
impl AsyncIo for TaskerIo {
    async fn async_init(
        &mut self,
        ctx: &ModuleContext,
    ) -> IndraResult<()> {
        let child = Command::new(&self.config.cmd)
            .args(&self.config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ModuleError::Spawn {
                name: self.name.clone(),
                reason: format!("{}: {e}", self.config.cmd),
            })?;
        ctx.log.info(format!("Started {} (pid {:?})", self.config.cmd, child.id()));
        self.child = Some(child);
        Ok(())
    }

    async fn run(
        self: Box<Self>,
        ctx: ModuleContext,
    ) -> IndraResult<()> {
        let Self {
            name,
            domain,
            mut child,
            ..
        } = *self;
        let mut child = child.take().ok_or_else(|| {
            StackError::new(ModuleError::InitFailed {
                name: name.clone(),
                reason: "child process not started".into(),
            })
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            StackError::new(ModuleError::InitFailed {
                name: name.clone(),
                reason: "child stdout not captured".into(),
            })
        })?;
        let mut lines = BufReader::new(stdout).lines();

        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => {
                        ctx.publish(Event::new(domain.as_str()).with_data("string", line))?;
                    }
                    None => break,
                },
                _ = ctx.wait_quit() => {
                    debug!(module = %name, "Quit received, killing child");
                    child.kill().await?;
                    return Ok(());
                }
            }
        }

        let status = child.wait().await?;
        info!(module = %name, ?status, "Child process exited");
        ctx.log.info(format!("Child exited with {status}"));
        Ok(())
    }
}
