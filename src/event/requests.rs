//! Полезные нагрузки транзакционных запросов `$trx/...`.

use indrajala_error::ProtocolError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::Event;

/// Префикс транзакционного пространства.
pub const TRX_PREFIX: &str = "$trx/";

pub const DB_HISTORY: &str = "$trx/db/req/history";
pub const DB_LAST: &str = "$trx/db/req/last";
pub const DB_UNIQUE_DOMAINS: &str = "$trx/db/req/uniquedomains";
pub const DB_DELETE: &str = "$trx/db/req/del";
pub const DB_UPDATE: &str = "$trx/db/req/update";

pub const KV_WRITE: &str = "$trx/kv/req/write";
pub const KV_READ: &str = "$trx/kv/req/read";
pub const KV_VERIFY: &str = "$trx/kv/req/verify";
pub const KV_LOGIN: &str = "$trx/kv/req/login";
pub const KV_LOGOUT: &str = "$trx/kv/req/logout";
pub const KV_DELETE: &str = "$trx/kv/req/delete";

/// Является ли домен транзакционным запросом.
pub fn is_transaction(domain: &str) -> bool {
    domain.starts_with(TRX_PREFIX)
}

/// Разбирает JSON из поля `data` запроса.
pub fn parse_request<T: DeserializeOwned>(ev: &Event) -> Result<T, ProtocolError> {
    serde_json::from_str(&ev.data).map_err(|e| ProtocolError::Malformed {
        domain: ev.domain.clone(),
        reason: e.to_string(),
    })
}

/// Режим выборки истории.
///
/// `Single` и `Interval` принимаются на проводе, но не обслуживаются.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryMode {
    /// Случайное подмножество, ограниченное `limit`
    Sample,
    /// Первые N записей по возрастанию времени
    Sequential,
    Single,
    Interval,
}

impl HistoryMode {
    pub fn is_supported(self) -> bool {
        matches!(self, Self::Sample | Self::Sequential)
    }
}

fn default_mode() -> HistoryMode {
    HistoryMode::Sample
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRequest {
    /// Точный домен или SQL LIKE-шаблон с `%`
    pub domain: String,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default = "default_mode")]
    pub mode: HistoryMode,
    #[serde(default, rename = "time_jd_start", alias = "time_start")]
    pub time_start: Option<f64>,
    #[serde(default, rename = "time_jd_end", alias = "time_end")]
    pub time_end: Option<f64>,
    #[serde(default)]
    pub limit: Option<u32>,
}

impl HistoryRequest {
    /// Фильтр по типу данных; без фильтра подходит любой.
    pub fn data_type_filter(&self) -> &str {
        self.data_type.as_deref().unwrap_or("%")
    }
}

/// Запрос последнего события домена.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastRequest {
    pub domain: String,
}

impl LastRequest {
    /// Принимает `{"domain": ...}`, JSON-строку или голый домен.
    pub fn parse(ev: &Event) -> Result<Self, ProtocolError> {
        let raw = ev.data.trim();
        if raw.starts_with('{') {
            return parse_request(ev);
        }
        let domain = match serde_json::from_str::<String>(raw) {
            Ok(s) => s,
            Err(_) => raw.to_string(),
        };
        if domain.is_empty() {
            return Err(ProtocolError::MissingField {
                domain: ev.domain.clone(),
                field: "domain".into(),
            });
        }
        Ok(Self { domain })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniqueDomainsRequest {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub data_type: Option<String>,
}

/// Запрос удаления: либо список доменов, либо список uuid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub domains: Option<Vec<String>>,
    #[serde(default, alias = "uuid4s")]
    pub uuids: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteTarget {
    Domains(Vec<String>),
    Uuids(Vec<String>),
}

impl DeleteRequest {
    /// Проверяет взаимоисключающие формы запроса.
    pub fn target(self) -> Result<DeleteTarget, ProtocolError> {
        match (self.domains, self.uuids) {
            (Some(d), None) => Ok(DeleteTarget::Domains(d)),
            (None, Some(u)) => Ok(DeleteTarget::Uuids(u)),
            (Some(_), Some(_)) => Err(ProtocolError::Malformed {
                domain: DB_DELETE.into(),
                reason: "domains and uuids are mutually exclusive".into(),
            }),
            (None, None) => Err(ProtocolError::MissingField {
                domain: DB_DELETE.into(),
                field: "domains|uuids".into(),
            }),
        }
    }
}

/// Записи для upsert: голый список или список с допуском по времени.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpdateRequest {
    Records(Vec<Event>),
    WithTolerance { records: Vec<Event>, epsilon: f64 },
}

impl UpdateRequest {
    /// Разворачивает в (записи, явный допуск).
    pub fn into_parts(self) -> (Vec<Event>, Option<f64>) {
        match self {
            Self::Records(r) => (r, None),
            Self::WithTolerance { records, epsilon } => (records, Some(epsilon)),
        }
    }
}

/// Итог upsert-запроса по элементам.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReport {
    pub updated: usize,
    pub inserted: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Запрос к KV-таблице.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvRequest {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl KvRequest {
    pub fn require_value(
        &self,
        domain: &str,
    ) -> Result<&str, ProtocolError> {
        self.value
            .as_deref()
            .ok_or_else(|| ProtocolError::MissingField {
                domain: domain.into(),
                field: "value".into(),
            })
    }
}
