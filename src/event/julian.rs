use chrono::{DateTime, TimeZone, Utc};

/// Юлианская дата начала эпохи Unix (1970-01-01T00:00:00Z).
pub const UNIX_EPOCH_JD: f64 = 2_440_587.5;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Переводит момент времени UTC в юлианскую дату.
pub fn datetime_to_julian(dt: DateTime<Utc>) -> f64 {
    let micros = dt.timestamp_micros() as f64;
    UNIX_EPOCH_JD + micros / 1_000_000.0 / SECONDS_PER_DAY
}

/// Обратное преобразование с точностью до микросекунды.
///
/// Возвращает `None`, если дата лежит вне диапазона `chrono`.
pub fn julian_to_datetime(jd: f64) -> Option<DateTime<Utc>> {
    if !jd.is_finite() {
        return None;
    }
    let micros = ((jd - UNIX_EPOCH_JD) * SECONDS_PER_DAY * 1_000_000.0).round() as i64;
    Utc.timestamp_micros(micros).single()
}

/// Текущее время в юлианских днях.
pub fn now_jd() -> f64 {
    datetime_to_julian(Utc::now())
}
