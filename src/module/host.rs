//! Сторона внешнего процесса: подключение к брокеру и запуск модуля поверх
//! сокета.

use std::{net::Ipv4Addr, time::Duration};

use indrajala_error::{IndraResult, ModuleError, StackError};
use tokio::{io::AsyncWriteExt, net::TcpStream, sync::oneshot};
use tracing::{debug, info, warn};

use super::{
    counted_channel, run_module,
    transport::frame::{read_frame, write_frame},
    ModuleRegistry, Publisher, RejectReport,
};
use crate::{
    config::ModuleSpec,
    event::{Event, CMD_READY},
};

const WRITER_FLUSH_GRACE: Duration = Duration::from_secs(2);

/// Разбирает аргументы `<broker-port> <json-config>`.
pub fn parse_args<I>(mut args: I) -> IndraResult<(u16, ModuleSpec)>
where
    I: Iterator<Item = String>,
{
    let usage = |reason: String| {
        StackError::new(ModuleError::InvalidConfig {
            name: "indrajala-module".into(),
            reason,
        })
    };
    let port = args
        .next()
        .ok_or_else(|| usage("missing broker port".into()))?
        .parse::<u16>()
        .map_err(|e| usage(format!("invalid broker port: {e}")))?;
    let json = args
        .next()
        .ok_or_else(|| usage("missing JSON configuration".into()))?;
    let spec = serde_json::from_str(&json).map_err(|e| usage(format!("invalid JSON configuration: {e}")))?;
    Ok((port, spec))
}

/// Подключается к брокеру, строит модуль из реестра и обслуживает его до
/// остановки. Ошибка инициализации уходит брокеру в рукопожатии.
pub async fn run_hosted(
    port: u16,
    spec: ModuleSpec,
    registry: &ModuleRegistry,
) -> IndraResult<()> {
    let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await?;
    stream.set_nodelay(true)?;
    let (mut rd, mut wr) = stream.into_split();

    let module = match registry.build(&spec) {
        Ok(m) => m,
        Err(e) => {
            let err = StackError::new(e);
            reject(&mut wr, &spec.name, &err).await;
            return Err(err);
        }
    };

    let (ingress_tx, mut ingress_rx) = counted_channel::<Event>();
    let (inbox_tx, inbox_rx) = counted_channel::<Event>();
    let (ready_tx, ready_rx) = oneshot::channel();
    let publisher = Publisher::new(spec.name.as_str(), ingress_tx);
    let runner = tokio::spawn(run_module(module, inbox_rx, publisher, spec.loglevel, ready_tx));

    let report = match ready_rx.await {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            reject(&mut wr, &spec.name, &e).await;
            let _ = runner.await;
            return Err(e);
        }
        Err(_) => {
            let err = StackError::new(ModuleError::InitFailed {
                name: spec.name.clone(),
                reason: "module task ended before reporting readiness".into(),
            });
            reject(&mut wr, &spec.name, &err).await;
            return Err(err);
        }
    };

    let ready = Event::new(CMD_READY).from_id(spec.name.as_str()).with_data(
        "json/ready",
        serde_json::to_string(&report).unwrap_or_default(),
    );
    write_frame(&mut wr, &ready).await?;
    info!(module = %spec.name, port, "Connected to broker");

    let writer = tokio::spawn(async move {
        while let Some(ev) = ingress_rx.recv().await {
            if let Err(e) = write_frame(&mut wr, &ev).await {
                warn!(error = %e, "Write to broker failed");
                break;
            }
        }
        let _ = wr.shutdown().await;
    });

    let reader = tokio::spawn(async move {
        loop {
            match read_frame(&mut rd).await {
                Ok(Some(ev)) => {
                    if inbox_tx.send(ev).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Broker closed the connection");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Read from broker failed");
                    break;
                }
            }
        }
    });

    let _ = runner.await;
    reader.abort();
    if tokio::time::timeout(WRITER_FLUSH_GRACE, writer).await.is_err() {
        warn!(module = %spec.name, "Pending events were not flushed to the broker");
    }
    Ok(())
}

async fn reject<W>(
    wr: &mut W,
    name: &str,
    err: &StackError,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    let report = RejectReport {
        code: err.status_code().code(),
        message: err.to_string(),
    };
    let ev = Event::new(CMD_READY).from_id(name).with_data(
        err.reply_tag(),
        serde_json::to_string(&report).unwrap_or_else(|_| report.message.clone()),
    );
    if let Err(e) = write_frame(wr, &ev).await {
        warn!(module = %name, error = %e, "Cannot report initialization failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let args = vec![
            "40123".to_string(),
            r#"{"name":"ding","kind":"ding_dong","transport":"process"}"#.to_string(),
        ];
        let (port, spec) = parse_args(args.into_iter()).unwrap();
        assert_eq!(port, 40123);
        assert_eq!(spec.name, "ding");
        assert!(spec.active);
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse_args(Vec::<String>::new().into_iter()).is_err());
        assert!(parse_args(vec!["port".to_string(), "{}".to_string()].into_iter()).is_err());
        assert!(parse_args(vec!["1".to_string()].into_iter()).is_err());
        assert!(parse_args(vec!["1".to_string(), "{".to_string()].into_iter()).is_err());
    }
}
