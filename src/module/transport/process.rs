//! Транспорт для модуля в отдельном процессе.
//!
//! Вместо пары односторонних сокетов используется одно TCP-соединение:
//! каждое направление обслуживает своя задача (`writer` брокер → модуль,
//! `reader` модуль → брокер), поэтому потоки кадров независимы так же,
//! как у двух сокетов.

use std::{
    net::Ipv4Addr,
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use indrajala_error::{
    Failure, IndraResult, ModuleError, ResultExt, StackError, StatusCode, TransportError,
};
use tokio::{
    io::AsyncWriteExt,
    net::TcpListener,
    process::{Child, Command},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::{
    frame::{read_frame, write_frame},
    TerminateOutcome, Transport, TransportKind,
};
use crate::{
    config::{BrokerSettings, ModuleSpec},
    event::{Event, CMD_READY},
    module::{counted_channel, CountedSender, ReadyReport, RejectReport},
};

pub const MODULE_EXECUTABLE: &str = "indrajala-module";

/// Модуль в отдельном процессе.
///
/// Брокер слушает порт на 127.0.0.1, процесс получает его номер и JSON
/// своей конфигурации в аргументах и подключается обратно. Одно
/// TCP-соединение несёт оба направления; первый кадр от модуля:
/// рукопожатие `$cmd/ready`.
pub struct ProcessTransport {
    name: String,
    tx: CountedSender<Event>,
    child: Child,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

/// Путь к `indrajala-module`: из настроек или рядом с текущим бинарником.
pub fn resolve_executable(settings: &BrokerSettings) -> IndraResult<PathBuf> {
    if let Some(path) = &settings.module_executable {
        return Ok(PathBuf::from(path));
    }
    let current = std::env::current_exe().context("locate current executable")?;
    let dir = current.parent().unwrap_or_else(|| Path::new("."));
    Ok(dir.join(format!("{MODULE_EXECUTABLE}{}", std::env::consts::EXE_SUFFIX)))
}

impl ProcessTransport {
    pub async fn launch(
        spec: &ModuleSpec,
        executable: &Path,
        ingress: CountedSender<Event>,
        settings: &BrokerSettings,
    ) -> IndraResult<(Self, ReadyReport)> {
        let name = spec.name.clone();
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .context("bind module listener")?;
        let port = listener.local_addr()?.port();
        let config = serde_json::to_string(spec).map_err(|e| ModuleError::InvalidConfig {
            name: name.clone(),
            reason: e.to_string(),
        })?;

        let mut child = Command::new(executable)
            .arg(port.to_string())
            .arg(&config)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ModuleError::Spawn {
                name: name.clone(),
                reason: format!("{}: {e}", executable.display()),
            })?;
        info!(module = %name, pid = ?child.id(), port, "Module process spawned");

        let connected = tokio::select! {
            res = listener.accept() => res.map(|(stream, _)| stream).map_err(StackError::from),
            status = child.wait() => Err(StackError::new(ModuleError::Handshake {
                name: name.clone(),
                reason: format!("process exited before connecting: {status:?}"),
            })),
            _ = tokio::time::sleep(settings.handshake_timeout()) => {
                Err(StackError::new(TransportError::Timeout {
                    operation: format!("accept connection from {name}"),
                }))
            }
        };
        let stream = match connected {
            Ok(s) => s,
            Err(e) => {
                let _ = child.start_kill();
                return Err(e);
            }
        };
        stream.set_nodelay(true)?;
        let (mut rd, mut wr) = stream.into_split();

        let hello = tokio::time::timeout(settings.handshake_timeout(), read_frame(&mut rd)).await;
        let report = match hello {
            Ok(Ok(Some(ev))) => parse_ready(&name, ev),
            Ok(Ok(None)) => Err(StackError::new(ModuleError::Handshake {
                name: name.clone(),
                reason: "connection closed before ready".into(),
            })),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(StackError::new(TransportError::Timeout {
                operation: format!("handshake with {name}"),
            })),
        };
        let report = match report {
            Ok(r) => r,
            Err(e) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(e);
            }
        };

        let (tx, mut rx) = counted_channel::<Event>();
        let writer_name = name.clone();
        let writer = tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                if let Err(e) = write_frame(&mut wr, &ev).await {
                    warn!(module = %writer_name, error = %e, "Write to module socket failed");
                    break;
                }
            }
            let _ = wr.shutdown().await;
        });

        let reader_name = name.clone();
        let reader = tokio::spawn(async move {
            loop {
                match read_frame(&mut rd).await {
                    Ok(Some(ev)) => {
                        if ingress.send(ev).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!(module = %reader_name, "Module closed its socket");
                        break;
                    }
                    Err(e) => {
                        warn!(module = %reader_name, error = %e, "Read from module socket failed");
                        break;
                    }
                }
            }
        });

        Ok((
            Self {
                name,
                tx,
                child,
                writer,
                reader,
            },
            report,
        ))
    }
}

fn parse_ready(
    name: &str,
    ev: Event,
) -> IndraResult<ReadyReport> {
    if ev.domain != CMD_READY {
        return Err(StackError::new(ModuleError::Handshake {
            name: name.to_string(),
            reason: format!("expected {CMD_READY}, got {}", ev.domain),
        }));
    }
    if ev.is_error() {
        return Err(rejection(ev.data).context(format!("module {name} refused to start")));
    }
    serde_json::from_str(&ev.data).map_err(|e| {
        StackError::new(ModuleError::Handshake {
            name: name.to_string(),
            reason: e.to_string(),
        })
    })
}

/// Код из отчёта сохраняется; старый формат с голым текстом тоже принимается.
fn rejection(data: String) -> StackError {
    match serde_json::from_str::<RejectReport>(&data) {
        Ok(RejectReport { code, message }) => match StatusCode::from_u32(code) {
            Some(code) => StackError::new(Failure::new(code, message)),
            None => StackError::new(TransportError::HandshakeRejected { reason: message }),
        },
        Err(_) => StackError::new(TransportError::HandshakeRejected { reason: data }),
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Process
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

    /// Закрывает сокет, опрашивает процесс `terminate_retries` раз и
    /// убивает его, если он так и не завершился.
    async fn terminate(
        self: Box<Self>,
        settings: &BrokerSettings,
    ) -> TerminateOutcome {
        let Self {
            name,
            tx,
            mut child,
            writer,
            reader,
        } = *self;

        drop(tx);
        if tokio::time::timeout(settings.join_timeout(), writer).await.is_err() {
            warn!(module = %name, "Socket writer did not finish in time");
        }

        for attempt in 0..settings.terminate_retries {
            match child.try_wait() {
                Ok(Some(status)) => {
                    reader.abort();
                    info!(module = %name, ?status, attempt, "Module process exited");
                    return TerminateOutcome::Exited(status.code());
                }
                Ok(None) => tokio::time::sleep(settings.terminate_poll()).await,
                Err(e) => {
                    warn!(module = %name, error = %e, "Cannot poll module process");
                    break;
                }
            }
        }

        warn!(module = %name, "Module process did not exit, killing");
        let _ = child.start_kill();
        let _ = tokio::time::timeout(settings.join_timeout(), child.wait()).await;
        reader.abort();
        TerminateOutcome::Killed
    }
}
