use indrajala_error::{ProtocolError, StackError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{julian, matcher};

/// Единственный тип сообщения на шине.
///
/// На проводе это JSON-объект, в котором присутствуют все поля (отсутствующие
/// значения сериализуются как `null`). Старые имена полей (`uuid4`,
/// `time_jd_start` и т.д.) принимаются при чтении.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Иерархический топик, сегменты через `/`
    pub domain: String,
    /// Модуль (или путь внутри модуля), создавший событие
    pub from_id: String,
    /// Идентификатор корреляции запроса и ответа
    #[serde(alias = "uuid4")]
    pub uuid: String,
    /// Необязательная причинная ссылка
    #[serde(default, alias = "parent_uuid4")]
    pub parent_uuid: Option<String>,
    /// Присваивается только хранилищем при записи
    #[serde(default)]
    pub seq_no: Option<i64>,
    /// Домен запроса, на который отвечает событие
    #[serde(default)]
    pub to_scope: String,
    /// Юлианская дата начала
    #[serde(alias = "time_jd_start")]
    pub time_start: f64,
    #[serde(default)]
    pub data_type: String,
    #[serde(default)]
    pub data: String,
    /// Токен сессии, либо пароль при входе
    #[serde(default)]
    pub auth_hash: Option<String>,
    /// Юлианская дата окончания
    #[serde(default, alias = "time_jd_end")]
    pub time_end: Option<f64>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Event {
    /// Новое событие со свежим uuid и текущим временем.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            from_id: String::new(),
            uuid: Uuid::new_v4().to_string(),
            parent_uuid: None,
            seq_no: None,
            to_scope: String::new(),
            time_start: julian::now_jd(),
            data_type: String::new(),
            data: String::new(),
            auth_hash: None,
            time_end: None,
        }
    }

    pub fn from_id(
        mut self,
        from_id: impl Into<String>,
    ) -> Self {
        self.from_id = from_id.into();
        self
    }

    pub fn with_data(
        mut self,
        data_type: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        self.data_type = data_type.into();
        self.data = data.into();
        self
    }

    pub fn with_auth(
        mut self,
        auth_hash: impl Into<String>,
    ) -> Self {
        self.auth_hash = Some(auth_hash.into());
        self
    }

    pub fn with_parent(
        mut self,
        parent_uuid: impl Into<String>,
    ) -> Self {
        self.parent_uuid = Some(parent_uuid.into());
        self
    }

    /// Ответ на транзакционный запрос.
    ///
    /// Адресуется отправителю запроса, сохраняет его `uuid`, а в `to_scope`
    /// кладёт домен запроса.
    pub fn reply_to(
        request: &Event,
        responder: &str,
    ) -> Self {
        Self {
            domain: request.from_id.clone(),
            from_id: responder.to_string(),
            uuid: request.uuid.clone(),
            parent_uuid: None,
            seq_no: None,
            to_scope: request.domain.clone(),
            time_start: julian::now_jd(),
            data_type: String::new(),
            data: String::new(),
            auth_hash: None,
            time_end: None,
        }
    }

    /// Ответ-ошибка: `data_type` = тег (`error/...`), `data` = текст.
    pub fn error_reply(
        request: &Event,
        responder: &str,
        err: &StackError,
    ) -> Self {
        Self::reply_to(request, responder).with_data(err.reply_tag(), err.client_message())
    }

    pub fn is_error(&self) -> bool {
        self.data_type.starts_with("error")
    }

    /// Токен сессии, если он не пустой.
    pub fn token(&self) -> Option<&str> {
        self.auth_hash.as_deref().filter(|t| !t.is_empty())
    }

    /// Проверка инварианта публикации: домен без wildcard-символов.
    pub fn validate_published(&self) -> Result<(), ProtocolError> {
        if matcher::has_wildcards(&self.domain) {
            return Err(ProtocolError::WildcardInDomain {
                domain: self.domain.clone(),
            });
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::InvalidFrame {
            reason: e.to_string(),
        })
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidFrame {
            reason: e.to_string(),
        })
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new("")
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
