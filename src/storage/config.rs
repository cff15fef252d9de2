use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Режим `PRAGMA synchronous`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbSync {
    /// `NORMAL`
    #[default]
    Sync,
    /// `OFF`: быстрее, но теряет больше при сбое питания
    Async,
}

impl DbSync {
    pub fn pragma_value(self) -> &'static str {
        match self {
            Self::Sync => "NORMAL",
            Self::Async => "OFF",
        }
    }
}

/// Настройки модуля хранилища (поле `config` его `ModuleSpec`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Каталог с `indrajala.db` и `last_state.json`; создаётся при отсутствии
    pub database_directory: PathBuf,
    pub db_sync: DbSync,
    pub page_size: u32,
    /// В страницах
    pub cache_size: i64,
    /// Максимальная задержка фиксации записей
    pub commit_delay_sec: f64,
    /// Шаблоны доменов, события которых сохраняются
    pub persistent_domains: Vec<String>,
    /// Шаблоны KV-ключей, значения которых хранятся только как хеш
    pub secure_keys: Vec<String>,
    /// Требовать токен сессии для всех запросов, кроме `login`
    pub auth_required: bool,
    /// Допуск по времени при upsert, в сутках юлианской даты
    pub time_epsilon: f64,
    /// Пароль, которым засевается учётная запись `admin`
    pub default_admin_password: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_directory: PathBuf::from("db"),
            db_sync: DbSync::Sync,
            page_size: 4096,
            cache_size: 10_000,
            commit_delay_sec: 5.0,
            persistent_domains: vec!["$event/#".into()],
            secure_keys: vec!["entity/indrajala/user/+/password".into()],
            auth_required: false,
            time_epsilon: 0.0,
            default_admin_password: "admin".into(),
        }
    }
}

impl StorageConfig {
    pub fn commit_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.commit_delay_sec.max(0.0)).unwrap_or(Duration::ZERO)
    }

    /// `page_size` должен быть степенью двойки в диапазоне SQLite.
    pub fn validate(&self) -> Result<(), String> {
        if !(512..=65536).contains(&self.page_size) || !self.page_size.is_power_of_two() {
            return Err(format!("page_size {} is not a power of two in 512..=65536", self.page_size));
        }
        if !self.commit_delay_sec.is_finite() {
            return Err("commit_delay_sec must be finite".into());
        }
        if !self.time_epsilon.is_finite() || self.time_epsilon < 0.0 {
            return Err(format!("time_epsilon {} must be a non-negative number", self.time_epsilon));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_defaults_from_empty_object() {
        let cfg: StorageConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(cfg, StorageConfig::default());
        assert_eq!(cfg.commit_delay(), Duration::from_secs(5));
        assert_eq!(cfg.db_sync.pragma_value(), "NORMAL");
    }

    #[test]
    fn test_partial_override() {
        let cfg: StorageConfig = serde_json::from_value(json!({
            "database_directory": "/tmp/x",
            "db_sync": "async",
            "auth_required": true
        }))
        .unwrap();
        assert_eq!(cfg.db_sync, DbSync::Async);
        assert!(cfg.auth_required);
        assert_eq!(cfg.page_size, 4096);
    }

    #[test]
    fn test_validate() {
        assert!(StorageConfig::default().validate().is_ok());
        let bad = StorageConfig {
            page_size: 3000,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = StorageConfig {
            time_epsilon: -1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
