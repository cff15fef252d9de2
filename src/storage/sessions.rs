use std::{collections::HashMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use indrajala_error::SessionError;
use uuid::Uuid;

/// Токен сессии, выдаётся при успешном `login`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

#[derive(Debug, Clone)]
pub struct SessionData {
    pub username: String,
    /// `from_id` запроса `login`; только он может предъявлять токен
    pub origin: String,
    pub created_at: DateTime<Utc>,
}

/// Сессии живут до явного `logout`, без TTL.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<SessionId, SessionData>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &mut self,
        username: impl Into<String>,
        origin: impl Into<String>,
    ) -> SessionId {
        let id = SessionId::new();
        self.sessions.insert(
            id,
            SessionData {
                username: username.into(),
                origin: origin.into(),
                created_at: Utc::now(),
            },
        );
        id
    }

    /// Проверка токена для запроса от `from_id`.
    ///
    /// Любая непригодность токена (нет, не разбирается, неизвестен, чужой)
    /// является ошибкой доступа.
    pub fn authorize(
        &self,
        token: Option<&str>,
        from_id: &str,
    ) -> Result<&SessionData, SessionError> {
        let token = token.ok_or(SessionError::MissingToken)?;
        let id = SessionId::from_str(token)?;
        let data = self
            .sessions
            .get(&id)
            .ok_or(SessionError::InvalidSessionId)?;
        if data.origin != from_id {
            return Err(SessionError::OriginMismatch {
                expected: data.origin.clone(),
                actual: from_id.to_string(),
            });
        }
        Ok(data)
    }

    /// Удаляет сессию. Неизвестный токен: `SessionError::NotFound`.
    pub fn remove(
        &mut self,
        token: Option<&str>,
    ) -> Result<SessionData, SessionError> {
        let token = token.ok_or(SessionError::MissingToken)?;
        let id = SessionId::from_str(token).map_err(|_| SessionError::NotFound)?;
        self.sessions.remove(&id).ok_or(SessionError::NotFound)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(SessionId)
            .map_err(|_| SessionError::InvalidSessionId)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
