//! Запросы к таблице событий.

use indrajala_error::{IndraResult, ProtocolError, StackError, StorageError};
use rusqlite::{params, params_from_iter, types::Value, OptionalExtension, Row};
use tracing::{error, warn};

use super::store::{db_err, Store};
use crate::event::{
    DeleteTarget, Event, HistoryMode, HistoryRequest, UniqueDomainsRequest, UpdateReport,
};

const EVENT_COLUMNS: &str = "seq_no, domain, from_id, uuid4, parent_uuid4, to_scope, \
                             time_jd_start, data_type, data, auth_hash, time_jd_end";

/// Итог upsert одной записи.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        seq_no: row.get(0)?,
        domain: row.get(1)?,
        from_id: row.get(2)?,
        uuid: row.get(3)?,
        parent_uuid: row.get(4)?,
        to_scope: row.get(5)?,
        time_start: row.get::<_, Option<f64>>(6)?.unwrap_or_default(),
        data_type: row.get(7)?,
        data: row.get(8)?,
        auth_hash: row.get(9)?,
        time_end: row.get(10)?,
    })
}

/// `=` для точного значения, `LIKE` для шаблона с `%`.
fn match_op(value: &str) -> &'static str {
    if value.contains('%') {
        "LIKE"
    } else {
        "="
    }
}

impl Store {
    /// Сохраняет событие, присваивая следующий `seq_no`.
    pub fn insert_event(
        &mut self,
        ev: &Event,
    ) -> Result<i64, StorageError> {
        self.begin_write()?;
        let seq_no = self.next_seq_no();
        self.insert_row(ev, seq_no)?;
        self.finish_write()?;
        Ok(seq_no)
    }

    fn insert_row(
        &self,
        ev: &Event,
        seq_no: i64,
    ) -> Result<(), StorageError> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO indra_events ({EVENT_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    seq_no,
                    ev.domain,
                    ev.from_id,
                    ev.uuid,
                    ev.parent_uuid,
                    ev.to_scope,
                    ev.time_start,
                    ev.data_type,
                    ev.data,
                    ev.auth_hash,
                    ev.time_end,
                ],
            )
            .map_err(db_err("insert event"))?;
        Ok(())
    }

    /// Пары (время, значение) по возрастанию времени.
    ///
    /// `Sample` берёт случайное подмножество размером не больше `limit`,
    /// `Sequential`: первые `limit` записей по времени. Строки, где `data`
    /// не число, отбрасываются.
    pub fn history(
        &self,
        req: &HistoryRequest,
    ) -> IndraResult<Vec<(f64, f64)>> {
        if !req.mode.is_supported() {
            return Err(StackError::new(ProtocolError::UnsupportedMode {
                mode: format!("{:?}", req.mode),
            }));
        }

        let data_type = req.data_type_filter();
        let mut sql = format!(
            "SELECT id, time_jd_start, data FROM indra_events WHERE domain {} ?1 AND data_type {} ?2",
            match_op(&req.domain),
            match_op(data_type),
        );
        let mut args = vec![
            Value::Text(req.domain.clone()),
            Value::Text(data_type.to_string()),
        ];
        if let Some(start) = req.time_start {
            args.push(Value::Real(start));
            sql.push_str(&format!(" AND time_jd_start >= ?{}", args.len()));
        }
        if let Some(end) = req.time_end {
            args.push(Value::Real(end));
            sql.push_str(&format!(" AND time_jd_start <= ?{}", args.len()));
        }
        sql.push_str(match req.mode {
            HistoryMode::Sample => " ORDER BY RANDOM()",
            _ => " ORDER BY time_jd_start ASC",
        });
        if let Some(limit) = req.limit {
            args.push(Value::Integer(i64::from(limit)));
            sql.push_str(&format!(" LIMIT ?{}", args.len()));
        }
        let sql = format!("SELECT time_jd_start, data FROM ({sql}) ORDER BY time_jd_start ASC");

        let mut stmt = self.conn.prepare(&sql).map_err(db_err("history"))?;
        let rows = stmt
            .query_map(params_from_iter(args), |row| {
                Ok((row.get::<_, Option<f64>>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(db_err("history"))?;

        let mut out = Vec::new();
        for row in rows {
            let (time, data) = row.map_err(db_err("history"))?;
            match (time, data.trim().parse::<f64>()) {
                (Some(t), Ok(v)) => out.push((t, v)),
                _ => warn!(domain = %req.domain, data = %data, "Skipping non-numeric history row"),
            }
        }
        Ok(out)
    }

    /// Последнее по времени событие точного домена.
    pub fn last_event(
        &self,
        domain: &str,
    ) -> Result<Option<Event>, StorageError> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM indra_events WHERE domain = ?1 \
                     ORDER BY time_jd_start DESC LIMIT 1"
                ),
                [domain],
                row_to_event,
            )
            .optional()
            .map_err(db_err("last event"))
    }

    /// Уникальные домены; результат кешируется до первой записи.
    pub fn unique_domains(
        &mut self,
        req: &UniqueDomainsRequest,
    ) -> Result<Vec<String>, StorageError> {
        if let Some(cached) = self.domain_cache.get(req) {
            return Ok(cached.clone());
        }

        let mut sql = String::from("SELECT DISTINCT domain FROM indra_events");
        let mut clauses = Vec::new();
        let mut args = Vec::new();
        if let Some(domain) = &req.domain {
            let pattern = if domain.contains('%') {
                domain.clone()
            } else {
                format!("{domain}%")
            };
            args.push(Value::Text(pattern));
            clauses.push(format!("domain LIKE ?{}", args.len()));
        }
        if let Some(data_type) = &req.data_type {
            args.push(Value::Text(data_type.clone()));
            clauses.push(format!("data_type LIKE ?{}", args.len()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY domain");

        let mut stmt = self.conn.prepare(&sql).map_err(db_err("unique domains"))?;
        let domains = stmt
            .query_map(params_from_iter(args), |row| row.get::<_, String>(0))
            .map_err(db_err("unique domains"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("unique domains"))?;
        drop(stmt);

        self.domain_cache.insert(req.clone(), domains.clone());
        Ok(domains)
    }

    /// Число удалённых записей.
    pub fn delete_events(
        &mut self,
        target: &DeleteTarget,
    ) -> Result<usize, StorageError> {
        self.begin_write()?;
        let mut removed = 0;
        match target {
            DeleteTarget::Domains(domains) => {
                for domain in domains {
                    removed += self
                        .conn
                        .execute(
                            &format!("DELETE FROM indra_events WHERE domain {} ?1", match_op(domain)),
                            [domain],
                        )
                        .map_err(db_err("delete by domain"))?;
                }
            }
            DeleteTarget::Uuids(uuids) => {
                for uuid in uuids {
                    removed += self
                        .conn
                        .execute("DELETE FROM indra_events WHERE uuid4 = ?1", [uuid])
                        .map_err(db_err("delete by uuid"))?;
                }
            }
        }
        if removed > 0 {
            self.domain_cache.clear();
        }
        self.commit_if_due()?;
        Ok(removed)
    }

    /// Upsert по (domain, time_start) с допуском `epsilon`.
    ///
    /// Ровно одна совпавшая запись обновляется удалением и вставкой с новым
    /// `seq_no`, если отличается хоть одно поле; иначе ничего не меняется.
    /// Несколько совпадений считаются ошибкой, запись не выбирается.
    pub fn upsert_event(
        &mut self,
        ev: &Event,
        epsilon: f64,
    ) -> IndraResult<UpsertOutcome> {
        ev.validate_published()?;
        let matches = self.find_at(&ev.domain, ev.time_start, epsilon)?;

        let outcome = match matches.as_slice() {
            [] => {
                self.begin_write()?;
                let seq_no = self.next_seq_no();
                self.insert_row(ev, seq_no)?;
                UpsertOutcome::Inserted
            }
            [(id, existing)] => {
                if existing.data_type == ev.data_type
                    && existing.data == ev.data
                    && existing.time_end == ev.time_end
                {
                    return Ok(UpsertOutcome::Unchanged);
                }
                let merged = Event {
                    data_type: ev.data_type.clone(),
                    data: ev.data.clone(),
                    time_end: ev.time_end,
                    ..existing.clone()
                };
                self.begin_write()?;
                let seq_no = self.next_seq_no();
                self.replace_row(*id, &merged, seq_no)?;
                UpsertOutcome::Updated
            }
            many => {
                let err = StorageError::AmbiguousMatch {
                    domain: ev.domain.clone(),
                    time_start: ev.time_start,
                    count: many.len(),
                };
                error!(error = %err, "Upsert refused");
                return Err(StackError::new(err));
            }
        };
        self.finish_write()?;
        Ok(outcome)
    }

    /// Upsert списка; ошибки отдельных записей считаются и логируются.
    pub fn upsert_events(
        &mut self,
        records: &[Event],
        epsilon: f64,
    ) -> UpdateReport {
        let mut report = UpdateReport::default();
        for ev in records {
            match self.upsert_event(ev, epsilon) {
                Ok(UpsertOutcome::Inserted) => report.inserted += 1,
                Ok(UpsertOutcome::Updated) => report.updated += 1,
                Ok(UpsertOutcome::Unchanged) => report.unchanged += 1,
                Err(e) => {
                    warn!(domain = %ev.domain, error = %e, "Upsert of record failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Удаление и повторная вставка под точкой сохранения: при ошибке
    /// вставки удалённая строка возвращается, открытая пакетная транзакция
    /// остаётся как была.
    fn replace_row(
        &self,
        id: i64,
        ev: &Event,
        seq_no: i64,
    ) -> Result<(), StorageError> {
        self.conn
            .execute_batch("SAVEPOINT upsert_replace")
            .map_err(db_err("upsert savepoint"))?;
        let replaced = self
            .conn
            .execute("DELETE FROM indra_events WHERE id = ?1", [id])
            .map_err(db_err("upsert delete"))
            .and_then(|_| self.insert_row(ev, seq_no));
        match replaced {
            Ok(()) => self
                .conn
                .execute_batch("RELEASE upsert_replace")
                .map_err(db_err("upsert release")),
            Err(e) => {
                if let Err(rb) = self
                    .conn
                    .execute_batch("ROLLBACK TO upsert_replace; RELEASE upsert_replace")
                {
                    error!(error = %rb, "Cannot roll back failed upsert");
                }
                Err(e)
            }
        }
    }

    fn find_at(
        &self,
        domain: &str,
        time: f64,
        epsilon: f64,
    ) -> Result<Vec<(i64, Event)>, StorageError> {
        let sql = format!(
            "SELECT id, {EVENT_COLUMNS} FROM indra_events \
             WHERE domain = ?1 AND time_jd_start >= ?2 AND time_jd_start <= ?3"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(db_err("upsert lookup"))?;
        let rows = stmt
            .query_map(params![domain, time - epsilon, time + epsilon], |row| {
                let id: i64 = row.get(0)?;
                let ev = Event {
                    seq_no: row.get(1)?,
                    domain: row.get(2)?,
                    from_id: row.get(3)?,
                    uuid: row.get(4)?,
                    parent_uuid: row.get(5)?,
                    to_scope: row.get(6)?,
                    time_start: row.get::<_, Option<f64>>(7)?.unwrap_or_default(),
                    data_type: row.get(8)?,
                    data: row.get(9)?,
                    auth_hash: row.get(10)?,
                    time_end: row.get(11)?,
                };
                Ok((id, ev))
            })
            .map_err(db_err("upsert lookup"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("upsert lookup"))
    }

    pub fn event_count(&self) -> Result<i64, StorageError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM indra_events", [], |row| row.get(0))
            .map_err(db_err("count events"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;

    fn store() -> Store {
        Store::open_in_memory(&StorageConfig {
            commit_delay_sec: 0.0,
            ..Default::default()
        })
        .unwrap()
    }

    fn measurement(
        domain: &str,
        t: f64,
        v: &str,
    ) -> Event {
        let mut ev = Event::new(domain).from_id("test").with_data("number/float", v);
        ev.time_start = t;
        ev
    }

    fn history(
        domain: &str,
        mode: HistoryMode,
        limit: Option<u32>,
    ) -> HistoryRequest {
        HistoryRequest {
            domain: domain.into(),
            data_type: None,
            mode,
            time_start: None,
            time_end: None,
            limit,
        }
    }

    #[test]
    fn test_seq_no_strictly_increasing() {
        let mut s = store();
        let seqs: Vec<i64> = (0..5)
            .map(|i| {
                s.insert_event(&measurement("$event/t", 2460000.0 + f64::from(i), "1"))
                    .unwrap()
            })
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_history_sequential_ascending() {
        let mut s = store();
        for (t, v) in [(3.0, "30"), (1.0, "10"), (2.0, "20"), (4.0, "oops")] {
            s.insert_event(&measurement("$event/temp", 2460000.0 + t, v)).unwrap();
        }
        let rows = s
            .history(&history("$event/temp", HistoryMode::Sequential, Some(3)))
            .unwrap();
        let values: Vec<f64> = rows.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![10.0, 20.0, 30.0]);

        // нечисловая строка отбрасывается
        let all = s
            .history(&history("$event/temp", HistoryMode::Sequential, None))
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_history_sample_sorted_and_limited() {
        let mut s = store();
        for i in 0..20 {
            s.insert_event(&measurement("$event/hum", 2460000.0 + f64::from(i), &i.to_string()))
                .unwrap();
        }
        let rows = s
            .history(&history("$event/%", HistoryMode::Sample, Some(5)))
            .unwrap();
        assert_eq!(rows.len(), 5);
        assert!(rows.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn test_history_time_bounds_and_legacy_mode() {
        let mut s = store();
        for i in 0..10 {
            s.insert_event(&measurement("$event/p", f64::from(i), "1")).unwrap();
        }
        let mut req = history("$event/p", HistoryMode::Sequential, None);
        req.time_start = Some(3.0);
        req.time_end = Some(5.0);
        assert_eq!(s.history(&req).unwrap().len(), 3);

        let err = s
            .history(&history("$event/p", HistoryMode::Interval, None))
            .unwrap_err();
        assert_eq!(err.reply_tag(), "error/invalid");
    }

    #[test]
    fn test_last_event() {
        let mut s = store();
        assert!(s.last_event("$event/x").unwrap().is_none());
        s.insert_event(&measurement("$event/x", 2.0, "late")).unwrap();
        s.insert_event(&measurement("$event/x", 1.0, "early")).unwrap();
        let last = s.last_event("$event/x").unwrap().unwrap();
        assert_eq!(last.data, "late");
        assert_eq!(last.seq_no, Some(1));
    }

    /// Тест проверяет кеш уникальных доменов и его сброс после удаления.
    #[test]
    fn test_unique_domains_cache_invalidation() {
        let mut s = store();
        s.insert_event(&measurement("$event/a", 1.0, "1")).unwrap();
        s.insert_event(&measurement("$event/b", 1.0, "1")).unwrap();
        s.insert_event(&measurement("$event/b", 2.0, "1")).unwrap();

        let req = UniqueDomainsRequest {
            domain: Some("$event/".into()),
            data_type: None,
        };
        assert_eq!(s.unique_domains(&req).unwrap(), vec!["$event/a", "$event/b"]);
        assert!(s.domain_cache.contains_key(&req));

        let removed = s
            .delete_events(&DeleteTarget::Domains(vec!["$event/a".into()]))
            .unwrap();
        assert_eq!(removed, 1);
        assert!(s.domain_cache.is_empty());
        assert_eq!(s.unique_domains(&req).unwrap(), vec!["$event/b"]);
    }

    #[test]
    fn test_delete_by_uuid_and_wildcard() {
        let mut s = store();
        let a = measurement("$event/x/1", 1.0, "1");
        s.insert_event(&a).unwrap();
        s.insert_event(&measurement("$event/x/2", 1.0, "1")).unwrap();
        s.insert_event(&measurement("$event/y", 1.0, "1")).unwrap();

        assert_eq!(
            s.delete_events(&DeleteTarget::Uuids(vec![a.uuid.clone()])).unwrap(),
            1
        );
        assert_eq!(
            s.delete_events(&DeleteTarget::Domains(vec!["$event/x/%".into()])).unwrap(),
            1
        );
        assert_eq!(s.event_count().unwrap(), 1);
    }

    /// Тест проверяет идемпотентность upsert: повтор ничего не меняет.
    #[test]
    fn test_upsert_idempotent() {
        let mut s = store();
        let ev = measurement("$event/u", 2460000.25, "7");
        assert_eq!(s.upsert_event(&ev, 0.0).unwrap(), UpsertOutcome::Inserted);

        let mut again = ev.clone();
        again.uuid = uuid::Uuid::new_v4().to_string();
        assert_eq!(s.upsert_event(&again, 0.0).unwrap(), UpsertOutcome::Unchanged);
        assert_eq!(s.event_count().unwrap(), 1);

        let report = s.upsert_events(&[again.clone(), again], 0.0);
        assert_eq!(report.unchanged, 2);
        assert_eq!(report.updated, 0);
    }

    #[test]
    fn test_upsert_updates_with_new_seq_no() {
        let mut s = store();
        let ev = measurement("$event/u", 10.0, "1");
        s.upsert_event(&ev, 0.0).unwrap();

        let mut changed = measurement("$event/u", 10.0 + 1e-9, "2");
        changed.from_id = "other".into();
        assert_eq!(s.upsert_event(&changed, 1e-6).unwrap(), UpsertOutcome::Updated);

        let last = s.last_event("$event/u").unwrap().unwrap();
        assert_eq!(last.data, "2");
        assert_eq!(last.uuid, ev.uuid);
        assert_eq!(last.seq_no, Some(2));
        assert_eq!(s.event_count().unwrap(), 1);
    }

    /// Тест проверяет, что неудачная вставка при обновлении не теряет
    /// исходную запись, даже когда пакетная транзакция потом фиксируется.
    #[test]
    fn test_upsert_failed_reinsert_keeps_original() {
        let mut s = Store::open_in_memory(&StorageConfig {
            commit_delay_sec: 3600.0,
            ..Default::default()
        })
        .unwrap();
        s.insert_event(&measurement("$event/r", 7.0, "old")).unwrap();
        assert!(s.has_uncommitted());
        s.conn
            .execute_batch(
                "CREATE TEMP TRIGGER reject_insert BEFORE INSERT ON indra_events \
                 BEGIN SELECT RAISE(ABORT, 'insert rejected'); END;",
            )
            .unwrap();

        let err = s
            .upsert_event(&measurement("$event/r", 7.0, "new"), 0.0)
            .unwrap_err();
        assert!(err.to_string().contains("insert rejected"));
        let report = s.upsert_events(&[measurement("$event/r", 7.0, "new")], 0.0);
        assert_eq!(report.failed, 1);

        s.conn.execute_batch("DROP TRIGGER reject_insert").unwrap();
        s.commit().unwrap();
        let kept = s.last_event("$event/r").unwrap().unwrap();
        assert_eq!(kept.data, "old");
        assert_eq!(s.event_count().unwrap(), 1);
    }

    /// Тест проверяет, что удаление без совпадений не сбрасывает кеш доменов.
    #[test]
    fn test_delete_nothing_keeps_domain_cache() {
        let mut s = store();
        s.insert_event(&measurement("$event/a", 1.0, "1")).unwrap();
        let req = UniqueDomainsRequest {
            domain: None,
            data_type: None,
        };
        s.unique_domains(&req).unwrap();

        let removed = s
            .delete_events(&DeleteTarget::Uuids(vec!["no-such-uuid".into()]))
            .unwrap();
        assert_eq!(removed, 0);
        assert!(s.domain_cache.contains_key(&req));
    }

    #[test]
    fn test_upsert_ambiguous_fails() {
        let mut s = store();
        s.insert_event(&measurement("$event/d", 5.0, "1")).unwrap();
        s.insert_event(&measurement("$event/d", 5.0, "2")).unwrap();

        let err = s
            .upsert_event(&measurement("$event/d", 5.0, "3"), 0.0)
            .unwrap_err();
        assert_eq!(err.status_code(), indrajala_error::StatusCode::AmbiguousMatch);

        let report = s.upsert_events(&[measurement("$event/d", 5.0, "3")], 0.0);
        assert_eq!(report.failed, 1);
        assert_eq!(s.event_count().unwrap(), 2);
    }
}
