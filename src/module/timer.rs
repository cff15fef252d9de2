//! Планировщик периодических задач модуля.
//!
//! Опрос с грубым разрешением вместо точных таймеров: задача срабатывает на
//! первом тике после наступления условия.

use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use indrajala_error::{IndraResult, TimerError};
use tokio::{sync::watch, task::JoinHandle, time::Instant};
use tracing::{debug, error, warn};

/// Условие запуска задачи.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunCondition {
    /// Фиксированный интервал; первый запуск через один интервал
    Periodic(Duration),
    /// Раз в час, когда минута совпадает
    Hourly { minute: u32 },
    /// Раз в день в указанные час и минуту
    Daily { hour: u32, minute: u32 },
}

pub type JobCallback = Box<dyn FnMut() -> IndraResult<()> + Send>;

struct Job {
    name: String,
    condition: RunCondition,
    callback: JobCallback,
    failures: u32,
    disabled: bool,
    next_due: Option<Instant>,
    last_slot: Option<(NaiveDate, u32)>,
}

/// Набор задач с общим разрешением опроса и порогом неудач.
pub struct TimerScheduler {
    resolution: Duration,
    max_failures: u32,
    jobs: Vec<Job>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl RunCondition {
    pub fn every_secs(secs: f64) -> Result<Self, TimerError> {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(TimerError::InvalidCondition {
                reason: format!("interval must be positive, got {secs}"),
            });
        }
        Ok(Self::Periodic(Duration::from_secs_f64(secs)))
    }

    pub fn every_minutes(minutes: u64) -> Self {
        Self::Periodic(Duration::from_secs(minutes * 60))
    }

    pub fn every_hours(hours: u64) -> Self {
        Self::Periodic(Duration::from_secs(hours * 3600))
    }

    pub fn validate(&self) -> Result<(), TimerError> {
        let invalid = |reason: String| Err(TimerError::InvalidCondition { reason });
        match *self {
            Self::Periodic(d) if d.is_zero() => invalid("zero interval".into()),
            Self::Hourly { minute } if minute > 59 => invalid(format!("minute {minute} out of range")),
            Self::Daily { hour, minute } if hour > 23 || minute > 59 => {
                invalid(format!("time {hour:02}:{minute:02} out of range"))
            }
            _ => Ok(()),
        }
    }
}

impl TimerScheduler {
    pub fn new(
        resolution: Duration,
        max_failures: u32,
    ) -> Self {
        Self {
            resolution,
            max_failures: max_failures.max(1),
            jobs: Vec::new(),
        }
    }

    pub fn add_job<F>(
        &mut self,
        name: impl Into<String>,
        condition: RunCondition,
        callback: F,
    ) -> Result<(), TimerError>
    where
        F: FnMut() -> IndraResult<()> + Send + 'static,
    {
        condition.validate()?;
        self.jobs.push(Job {
            name: name.into(),
            condition,
            callback: Box::new(callback),
            failures: 0,
            disabled: false,
            next_due: None,
            last_slot: None,
        });
        Ok(())
    }

    pub fn is_disabled(
        &self,
        name: &str,
    ) -> bool {
        self.job(name).is_some_and(|j| j.disabled)
    }

    pub fn failures(
        &self,
        name: &str,
    ) -> Option<u32> {
        self.job(name).map(|j| j.failures)
    }

    fn job(
        &self,
        name: &str,
    ) -> Option<&Job> {
        self.jobs.iter().find(|j| j.name == name)
    }

    /// Один тик: запускает все созревшие задачи. Возвращает число запусков.
    ///
    /// `wall` это локальное время для условий hourly/daily, `mono` нужно для
    /// периодических.
    pub fn tick_at(
        &mut self,
        wall: NaiveDateTime,
        mono: Instant,
    ) -> usize {
        let mut fired = 0;
        for job in self.jobs.iter_mut().filter(|j| !j.disabled) {
            if !job.is_due(wall, mono) {
                continue;
            }
            fired += 1;
            match (job.callback)() {
                Ok(()) => job.failures = 0,
                Err(e) => {
                    job.failures += 1;
                    warn!(job = %job.name, failures = job.failures, error = %e, "Timer job failed");
                    if job.failures >= self.max_failures {
                        job.disabled = true;
                        let reason = TimerError::JobDisabled {
                            job: job.name.clone(),
                            failures: job.failures,
                        };
                        error!(job = %job.name, last_error = %e, "{reason}");
                    }
                }
            }
        }
        fired
    }

    /// Запускает опрос в фоне до сигнала остановки.
    pub fn spawn(
        mut self,
        mut quit: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.resolution);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick_at(chrono::Local::now().naive_local(), Instant::now());
                    }
                    res = quit.changed() => {
                        if res.is_err() || *quit.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(jobs = self.jobs.len(), "Timer scheduler stopped");
        })
    }
}

impl Job {
    fn is_due(
        &mut self,
        wall: NaiveDateTime,
        mono: Instant,
    ) -> bool {
        match self.condition {
            RunCondition::Periodic(interval) => match self.next_due {
                None => {
                    self.next_due = Some(mono + interval);
                    false
                }
                Some(due) if mono >= due => {
                    self.next_due = Some(mono + interval);
                    true
                }
                Some(_) => false,
            },
            RunCondition::Hourly { minute } => {
                self.once_per_slot(wall, wall.minute() == minute, wall.hour())
            }
            RunCondition::Daily { hour, minute } => {
                self.once_per_slot(wall, wall.hour() == hour && wall.minute() == minute, 0)
            }
        }
    }

    fn once_per_slot(
        &mut self,
        wall: NaiveDateTime,
        matches: bool,
        hour_slot: u32,
    ) -> bool {
        if !matches {
            return false;
        }
        let slot = (wall.date(), hour_slot);
        if self.last_slot == Some(slot) {
            return false;
        }
        self.last_slot = Some(slot);
        true
    }
}
