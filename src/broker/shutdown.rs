use std::fmt;

use crate::module::TerminateOutcome;

/// Фазы остановки брокера. Переходы только вперёд.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownPhase {
    Running,
    /// После `$cmd/quit`: входная очередь ещё обслуживается
    Draining,
    /// Модули останавливаются
    Terminating,
    Stopped,
}

impl ShutdownPhase {
    /// Следующая фаза; `Stopped` остаётся `Stopped`.
    pub fn next(self) -> Self {
        match self {
            Self::Running => Self::Draining,
            Self::Draining => Self::Terminating,
            Self::Terminating | Self::Stopped => Self::Stopped,
        }
    }
}

impl fmt::Display for ShutdownPhase {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Terminating => "terminating",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Итог работы брокера.
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    /// Всего обработано событий из входной очереди
    pub processed: u64,
    /// Событий, обработанных в фазе draining
    pub drained: u64,
    /// Как остановился каждый модуль, у которого был транспорт
    pub modules: Vec<(String, TerminateOutcome)>,
}

impl ShutdownReport {
    pub fn outcome(
        &self,
        name: &str,
    ) -> Option<TerminateOutcome> {
        self.modules
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, o)| *o)
    }

    /// Были ли модули, которые пришлось прерывать или убивать.
    pub fn forced(&self) -> usize {
        self.modules
            .iter()
            .filter(|(_, o)| matches!(o, TerminateOutcome::Aborted | TerminateOutcome::Killed))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order() {
        let mut phase = ShutdownPhase::Running;
        let mut seen = vec![phase];
        while phase != ShutdownPhase::Stopped {
            phase = phase.next();
            seen.push(phase);
        }
        assert_eq!(
            seen,
            vec![
                ShutdownPhase::Running,
                ShutdownPhase::Draining,
                ShutdownPhase::Terminating,
                ShutdownPhase::Stopped
            ]
        );
        assert!(ShutdownPhase::Draining < ShutdownPhase::Stopped);
        assert_eq!(ShutdownPhase::Stopped.next(), ShutdownPhase::Stopped);
    }

    #[test]
    fn test_report_queries() {
        let report = ShutdownReport {
            processed: 10,
            drained: 2,
            modules: vec![
                ("db".into(), TerminateOutcome::Joined),
                ("ding".into(), TerminateOutcome::Killed),
            ],
        };
        assert_eq!(report.outcome("db"), Some(TerminateOutcome::Joined));
        assert_eq!(report.outcome("x"), None);
        assert_eq!(report.forced(), 1);
    }
}
