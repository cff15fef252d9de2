use tokio::time::Instant;

use crate::config::BrokerSettings;

/// Переход между подробным и сводным логированием маршрутизации.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateMode {
    Verbose,
    Summary,
}

/// Оценка частоты сообщений через EMA интервала между прибытиями.
#[derive(Debug)]
pub struct Telemetry {
    alpha: f64,
    high_water: f64,
    low_water: f64,
    ema_interval: Option<f64>,
    last_arrival: Option<Instant>,
    mode: RateMode,
    window: u64,
    total: u64,
}

impl Telemetry {
    pub fn new(settings: &BrokerSettings) -> Self {
        Self {
            alpha: settings.ema_alpha.clamp(f64::EPSILON, 1.0),
            high_water: settings.rate_high_water,
            low_water: settings.rate_low_water.min(settings.rate_high_water),
            ema_interval: None,
            last_arrival: None,
            mode: RateMode::Verbose,
            window: 0,
            total: 0,
        }
    }

    /// Учитывает прибытие события. Возвращает новый режим, если он сменился.
    pub fn record(
        &mut self,
        now: Instant,
    ) -> Option<RateMode> {
        if let Some(last) = self.last_arrival {
            let dt = now.saturating_duration_since(last).as_secs_f64();
            self.ema_interval = Some(match self.ema_interval {
                Some(ema) => self.alpha * dt + (1.0 - self.alpha) * ema,
                None => dt,
            });
        }
        self.last_arrival = Some(now);
        self.window += 1;
        self.total += 1;
        self.update_mode()
    }

    /// Текущая оценка, сообщений в секунду.
    pub fn rate(&self) -> f64 {
        match self.ema_interval {
            Some(ema) if ema > 0.0 => 1.0 / ema,
            Some(_) => f64::INFINITY,
            None => 0.0,
        }
    }

    /// Частота с учётом тишины с последнего события: пока сообщений нет,
    /// оценка не должна застревать на старом пике.
    pub fn rate_at(
        &self,
        now: Instant,
    ) -> f64 {
        let Some(last) = self.last_arrival else {
            return 0.0;
        };
        let silence = now.saturating_duration_since(last).as_secs_f64();
        match self.ema_interval {
            Some(ema) if silence > ema => 1.0 / silence,
            _ => self.rate(),
        }
    }

    /// Пересчитывает режим по частоте с учётом тишины (на тике статистики).
    pub fn refresh(
        &mut self,
        now: Instant,
    ) -> Option<RateMode> {
        let rate = self.rate_at(now);
        self.switch(rate)
    }

    pub fn mode(&self) -> RateMode {
        self.mode
    }

    pub fn is_verbose(&self) -> bool {
        self.mode == RateMode::Verbose
    }

    /// Число событий с прошлой сводки; счётчик сбрасывается.
    pub fn take_window(&mut self) -> u64 {
        std::mem::take(&mut self.window)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    fn update_mode(&mut self) -> Option<RateMode> {
        let rate = self.rate();
        self.switch(rate)
    }

    fn switch(
        &mut self,
        rate: f64,
    ) -> Option<RateMode> {
        let next = match self.mode {
            RateMode::Verbose if rate > self.high_water => RateMode::Summary,
            RateMode::Summary if rate < self.low_water => RateMode::Verbose,
            current => current,
        };
        if next != self.mode {
            self.mode = next;
            Some(next)
        } else {
            None
        }
    }
}
