//! Обработка транзакционных запросов `$trx/...`.

use indrajala_error::{IndraResult, LogLevel, ProtocolError, StackError};
use tracing::{debug, error, info, trace, warn};

use super::{
    kv::user_from_key,
    sessions::SessionTable,
    store::Store,
    StorageConfig,
};
use crate::event::{
    self, parse_request, DeleteRequest, Event, HistoryRequest, KvRequest, LastRequest,
    UniqueDomainsRequest, UpdateRequest, DB_DELETE, DB_HISTORY, DB_LAST, DB_UNIQUE_DOMAINS,
    DB_UPDATE, KV_DELETE, KV_LOGIN, KV_LOGOUT, KV_READ, KV_VERIFY, KV_WRITE,
};

/// Хранилище плюс сессии: по запросу строит ответ.
pub struct StorageEngine {
    name: String,
    store: Store,
    sessions: SessionTable,
    auth_required: bool,
    time_epsilon: f64,
}

impl StorageEngine {
    pub fn new(
        name: impl Into<String>,
        store: Store,
        config: &StorageConfig,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            sessions: SessionTable::new(),
            auth_required: config.auth_required,
            time_epsilon: config.time_epsilon,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Ответ на запрос: либо результат, либо `error/...` с тем же `uuid`.
    pub fn respond(
        &mut self,
        req: &Event,
    ) -> Event {
        match self.dispatch(req) {
            Ok(reply) => reply,
            Err(e) => {
                log_failure(req, &e);
                Event::error_reply(req, &self.name, &e)
            }
        }
    }

    fn dispatch(
        &mut self,
        req: &Event,
    ) -> IndraResult<Event> {
        let domain = req.domain.as_str();
        if domain != KV_LOGIN && domain != KV_LOGOUT && self.auth_required {
            self.sessions.authorize(req.token(), &req.from_id)?;
        }

        match domain {
            DB_HISTORY => {
                let q: HistoryRequest = parse_request(req)?;
                let rows = self.store.history(&q)?;
                self.reply(req, "vector/tuple/jd/float", &rows)
            }
            DB_LAST => {
                let q = LastRequest::parse(req)?;
                match self.store.last_event(&q.domain)? {
                    Some(ev) => Ok(self.reply_raw(req, "json/indraevent", ev.to_json()?)),
                    None => Err(StackError::new(indrajala_error::StorageError::NotFound {
                        what: format!("last event for {}", q.domain),
                    })),
                }
            }
            DB_UNIQUE_DOMAINS => {
                let q: UniqueDomainsRequest = if req.data.trim().is_empty() {
                    UniqueDomainsRequest::default()
                } else {
                    parse_request(req)?
                };
                let domains = self.store.unique_domains(&q)?;
                self.reply(req, "vector/string/uniquedomains", &domains)
            }
            DB_DELETE => {
                let q: DeleteRequest = parse_request(req)?;
                let removed = self.store.delete_events(&q.target()?)?;
                self.reply(req, "number/int", &removed)
            }
            DB_UPDATE => {
                let q: UpdateRequest = parse_request(req)?;
                let (records, epsilon) = q.into_parts();
                let report = self
                    .store
                    .upsert_events(&records, epsilon.unwrap_or(self.time_epsilon));
                self.reply(req, "json/updatereport", &report)
            }
            KV_WRITE => {
                let q: KvRequest = parse_request(req)?;
                let n = self.store.kv_write(&q.key, q.require_value(domain)?)?;
                self.reply(req, "number/int", &n)
            }
            KV_READ => {
                let q: KvRequest = parse_request(req)?;
                let rows = self.store.kv_read(&q.key)?;
                if rows.is_empty() && !q.key.contains('%') {
                    return Err(StackError::new(indrajala_error::StorageError::NotFound {
                        what: format!("key {}", q.key),
                    }));
                }
                self.reply(req, "vector/tuple/kv", &rows)
            }
            KV_DELETE => {
                let q: KvRequest = parse_request(req)?;
                let n = self.store.kv_delete(&q.key)?;
                self.reply(req, "number/int", &n)
            }
            KV_VERIFY => {
                let q: KvRequest = parse_request(req)?;
                self.store.kv_verify(&q.key, q.require_value(domain)?)?;
                self.reply(req, "bool", &true)
            }
            KV_LOGIN => {
                let q: KvRequest = parse_request(req)?;
                self.store.kv_verify(&q.key, q.require_value(domain)?)?;
                let user = user_from_key(&q.key).to_string();
                let token = self.sessions.create(user.as_str(), req.from_id.as_str());
                info!(user = %user, origin = %req.from_id, "Login");
                let mut reply = self.reply(req, "bool", &true)?;
                reply.auth_hash = Some(token.to_string());
                Ok(reply)
            }
            KV_LOGOUT => {
                let session = self.sessions.remove(req.token())?;
                info!(user = %session.username, origin = %session.origin, "Logout");
                self.reply(req, "bool", &true)
            }
            other => Err(StackError::new(ProtocolError::UnknownRequest {
                domain: other.to_string(),
            })),
        }
    }

    fn reply<T: serde::Serialize + ?Sized>(
        &self,
        req: &Event,
        data_type: &str,
        payload: &T,
    ) -> IndraResult<Event> {
        let data = serde_json::to_string(payload).map_err(|e| {
            indrajala_error::StorageError::SerializationFailed {
                type_name: data_type.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(self.reply_raw(req, data_type, data))
    }

    fn reply_raw(
        &self,
        req: &Event,
        data_type: &str,
        data: String,
    ) -> Event {
        Event::reply_to(req, &self.name).with_data(data_type, data)
    }

    /// Сохраняет обычное (не транзакционное) событие.
    pub fn persist(
        &mut self,
        ev: &Event,
    ) -> IndraResult<i64> {
        if event::is_transaction(&ev.domain) {
            return Err(StackError::new(ProtocolError::UnknownRequest {
                domain: ev.domain.clone(),
            }));
        }
        Ok(self.store.insert_event(ev)?)
    }
}

/// Отказ в доступе виден на `info`, сбой базы на `error`.
fn log_failure(
    req: &Event,
    e: &StackError,
) {
    let (domain, from) = (req.domain.as_str(), req.from_id.as_str());
    match e.log_level() {
        LogLevel::Trace => trace!(domain, from, error = %e, "Request failed"),
        LogLevel::Debug => debug!(domain, from, error = %e, "Request failed"),
        LogLevel::Info => info!(domain, from, error = %e, "Request failed"),
        LogLevel::Warn => warn!(domain, from, error = %e, "Request failed"),
        LogLevel::Error => error!(domain, from, error = ?e, "Request failed"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::storage::kv::password_key;

    fn engine(auth_required: bool) -> StorageEngine {
        let config = StorageConfig {
            commit_delay_sec: 0.0,
            auth_required,
            ..Default::default()
        };
        let store = Store::open_in_memory(&config).unwrap();
        StorageEngine::new("db", store, &config)
    }

    fn request(
        domain: &str,
        from: &str,
        data: serde_json::Value,
    ) -> Event {
        Event::new(domain)
            .from_id(from)
            .with_data("json", data.to_string())
    }

    /// Тест проверяет адресацию ответа: домен = from_id, тот же uuid,
    /// to_scope = домен запроса.
    #[test]
    fn test_reply_correlation() {
        let mut e = engine(false);
        let req = request(KV_WRITE, "ws/7", json!({"key": "app/x", "value": "1"}));
        let reply = e.respond(&req);
        assert_eq!(reply.domain, "ws/7");
        assert_eq!(reply.uuid, req.uuid);
        assert_eq!(reply.to_scope, KV_WRITE);
        assert_eq!(reply.from_id, "db");
        assert_eq!(reply.data, "1");
    }

    #[test]
    fn test_kv_write_verify_read() {
        let mut e = engine(false);
        let key = password_key("alice");
        e.respond(&request(KV_WRITE, "ws", json!({"key": key, "value": "secret"})));

        let ok = e.respond(&request(KV_VERIFY, "ws", json!({"key": key, "value": "secret"})));
        assert!(!ok.is_error());
        let bad = e.respond(&request(KV_VERIFY, "ws", json!({"key": key, "value": "nope"})));
        assert_eq!(bad.data_type, "error/access");

        let read = e.respond(&request(KV_READ, "ws", json!({"key": key})));
        assert!(!read.data.contains("secret"));
        assert!(read.data.contains("$argon2id$"));

        let missing = e.respond(&request(KV_READ, "ws", json!({"key": "no/such"})));
        assert_eq!(missing.data_type, "error/notfound");
    }

    #[test]
    fn test_malformed_and_unknown_requests() {
        let mut e = engine(false);
        let bad = e.respond(&Event::new(DB_HISTORY).from_id("ws").with_data("json", "{oops"));
        assert_eq!(bad.data_type, "error/invalid");

        let missing = e.respond(&request(KV_WRITE, "ws", json!({"key": "a/b"})));
        assert_eq!(missing.data_type, "error/invalid");

        let unknown = e.respond(&request("$trx/db/req/vacuum", "ws", json!({})));
        assert_eq!(unknown.data_type, "error/invalid");

        let both = e.respond(&request(DB_DELETE, "ws", json!({"domains": ["a"], "uuid4s": ["b"]})));
        assert_eq!(both.data_type, "error/invalid");
    }

    #[test]
    fn test_last_not_found() {
        let mut e = engine(false);
        let reply = e.respond(&request(DB_LAST, "ws", json!({"domain": "$event/none"})));
        assert_eq!(reply.data_type, "error/notfound");

        let mut ev = Event::new("$event/t").from_id("sensor").with_data("number/float", "3.5");
        ev.time_start = 2460000.5;
        e.persist(&ev).unwrap();
        let reply = e.respond(&Event::new(DB_LAST).from_id("ws").with_data("string", "$event/t"));
        assert_eq!(reply.data_type, "json/indraevent");
        let last = Event::from_json(&reply.data).unwrap();
        assert_eq!(last.data, "3.5");
        assert_eq!(last.seq_no, Some(1));
    }

    /// Тест проверяет полный цикл сессии: login, использование, logout и
    /// отказ по старому токену.
    #[test]
    fn test_session_lifecycle() {
        let mut e = engine(true);
        let key = password_key("admin");
        e.store_mut().seed_admin("pw").unwrap();

        let wrong = e.respond(&request(KV_LOGIN, "ws/1", json!({"key": key, "value": "x"})));
        assert_eq!(wrong.data_type, "error/access");
        assert!(wrong.auth_hash.is_none());

        let login = e.respond(&request(KV_LOGIN, "ws/1", json!({"key": key, "value": "pw"})));
        assert!(!login.is_error());
        let token = login.auth_hash.clone().unwrap();
        assert!(!token.is_empty());

        let no_token = e.respond(&request(DB_UNIQUE_DOMAINS, "ws/1", json!({})));
        assert_eq!(no_token.data_type, "error/access");

        let authed = request(DB_UNIQUE_DOMAINS, "ws/1", json!({})).with_auth(token.as_str());
        assert_eq!(e.respond(&authed).data_type, "vector/string/uniquedomains");

        let stolen = request(DB_UNIQUE_DOMAINS, "ws/2", json!({})).with_auth(token.as_str());
        assert_eq!(e.respond(&stolen).data_type, "error/access");

        let logout = Event::new(KV_LOGOUT).from_id("ws/1").with_auth(token.as_str());
        assert!(!e.respond(&logout).is_error());
        assert!(e.sessions().is_empty());

        assert_eq!(e.respond(&authed).data_type, "error/access");
        assert_eq!(e.respond(&logout).data_type, "error/notfound");
    }

    #[test]
    fn test_update_report() {
        let mut e = engine(false);
        let mut rec = Event::new("$event/u").from_id("imp").with_data("number/float", "1");
        rec.time_start = 2460001.0;
        let data = serde_json::to_string(&vec![rec.clone()]).unwrap();
        let req = Event::new(DB_UPDATE).from_id("ws").with_data("json", data);

        let first = e.respond(&req);
        assert_eq!(first.data_type, "json/updatereport");
        assert!(first.data.contains("\"inserted\":1"));
        let second = e.respond(&req);
        assert!(second.data.contains("\"unchanged\":1"));
        assert!(second.data.contains("\"updated\":0"));
    }

    #[test]
    fn test_persist_rejects_transactions() {
        let mut e = engine(false);
        assert!(e.persist(&Event::new(KV_READ)).is_err());
        assert_eq!(e.store().event_count().unwrap(), 0);
    }
}
