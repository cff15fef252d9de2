use std::time::{Duration, Instant};

use tracing_appender::non_blocking::WorkerGuard;

/// Владеет фоновым writer-ом файлового лога. Записи, которые ещё в очереди,
/// сбрасываются при `shutdown`.
pub struct LoggingHandle {
    guard: Option<WorkerGuard>,
    flush_timeout: Duration,
}

impl LoggingHandle {
    pub(crate) fn new(guard: Option<WorkerGuard>) -> Self {
        Self {
            guard,
            flush_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_flush_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn has_file_sink(&self) -> bool {
        self.guard.is_some()
    }

    pub fn shutdown(mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let started = Instant::now();
        drop(guard);
        if started.elapsed() > self.flush_timeout {
            eprintln!(
                "Log flush took {}ms, over the {}ms budget",
                started.elapsed().as_millis(),
                self.flush_timeout.as_millis()
            );
        }
    }

    /// То же из async-контекста: drop guard-а блокирует, поэтому уходит в
    /// `spawn_blocking` и ограничен таймаутом.
    pub async fn shutdown_async(mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let flush = tokio::task::spawn_blocking(move || drop(guard));
        match tokio::time::timeout(self.flush_timeout, flush).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => eprintln!("Log flush task failed: {e}"),
            Err(_) => eprintln!(
                "Log flush did not finish in {}ms",
                self.flush_timeout.as_millis()
            ),
        }
    }
}
