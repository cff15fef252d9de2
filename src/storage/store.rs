//! Встроенная база событий и KV на SQLite.
//!
//! Один писатель. Записи копятся в открытой транзакции и фиксируются не
//! чаще, чем раз в `commit_delay`; при сбое теряется не больше одного
//! интервала.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use indrajala_error::StorageError;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info, warn};

use super::{checkpoint::Checkpoint, config::StorageConfig};
use crate::event::UniqueDomainsRequest;

pub const DB_FILE: &str = "indrajala.db";

const EVENTS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS indra_events (
        id INTEGER PRIMARY KEY,
        seq_no INTEGER NOT NULL,
        domain TEXT NOT NULL,
        from_id TEXT NOT NULL,
        uuid4 TEXT NOT NULL,
        parent_uuid4 TEXT,
        to_scope TEXT NOT NULL,
        time_jd_start DOUBLE,
        data_type TEXT NOT NULL,
        data TEXT NOT NULL,
        auth_hash TEXT,
        time_jd_end DOUBLE
    );
"#;

const KV_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS indra_kv (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        seq_no INTEGER NOT NULL DEFAULT 0
    );
"#;

const INDICES: &str = r#"
    CREATE INDEX IF NOT EXISTS indra_events_domain ON indra_events (domain);
    CREATE INDEX IF NOT EXISTS indra_events_to_scope ON indra_events (to_scope);
    CREATE INDEX IF NOT EXISTS indra_events_time_start ON indra_events (time_jd_start);
    CREATE INDEX IF NOT EXISTS indra_events_data_type ON indra_events (data_type);
    CREATE INDEX IF NOT EXISTS indra_events_time_end ON indra_events (time_jd_end);
    CREATE INDEX IF NOT EXISTS indra_events_seq_no ON indra_events (seq_no);
    CREATE INDEX IF NOT EXISTS indra_events_uuid4 ON indra_events (uuid4);
    CREATE INDEX IF NOT EXISTS indra_events_parent_uuid4 ON indra_events (parent_uuid4);
"#;

/// Хранилище событий и KV.
pub struct Store {
    pub(super) conn: Connection,
    checkpoint_path: Option<PathBuf>,
    pub(super) last_seq_no: i64,
    pub(super) last_kv_seq_no: i64,
    commit_delay: Duration,
    in_transaction: bool,
    last_commit: Instant,
    pub(super) domain_cache: HashMap<UniqueDomainsRequest, Vec<String>>,
    pub(super) secure_keys: Vec<String>,
}

/// Ошибка SQLite с именем операции.
pub(super) fn db_err(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> StorageError {
    move |e| StorageError::Database {
        operation: operation.to_string(),
        reason: e.to_string(),
    }
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Store {
    /// Открывает (или создаёт) базу в `database_directory`.
    pub fn open(config: &StorageConfig) -> Result<Self, StorageError> {
        let dir = config.database_directory.as_path();
        ensure_directory(dir)?;

        let db_path = dir.join(DB_FILE);
        let conn = Connection::open(&db_path).map_err(|e| StorageError::StorageUnavailable {
            reason: format!("{}: {e}", db_path.display()),
        })?;
        let checkpoint_path = Checkpoint::path_in(dir);
        let checkpoint = Checkpoint::load(&checkpoint_path);

        let store = Self::init(conn, config, Some(checkpoint_path), checkpoint)?;
        info!(
            path = %db_path.display(),
            last_seq_no = store.last_seq_no,
            last_kv_seq_no = store.last_kv_seq_no,
            "Storage opened"
        );
        Ok(store)
    }

    /// База в памяти без checkpoint-файла.
    pub fn open_in_memory(config: &StorageConfig) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(db_err("open"))?;
        Self::init(conn, config, None, Checkpoint::default())
    }

    fn init(
        conn: Connection,
        config: &StorageConfig,
        checkpoint_path: Option<PathBuf>,
        checkpoint: Checkpoint,
    ) -> Result<Self, StorageError> {
        // page_size действует только до включения WAL на новой базе
        conn.execute_batch(&format!(
            "PRAGMA page_size = {};
             PRAGMA journal_mode = WAL;
             PRAGMA cache_size = {};
             PRAGMA synchronous = {};
             PRAGMA temp_store = MEMORY;",
            config.page_size,
            config.cache_size,
            config.db_sync.pragma_value(),
        ))
        .map_err(db_err("pragma"))?;

        conn.execute_batch(EVENTS_TABLE).map_err(db_err("create events table"))?;
        conn.execute_batch(KV_TABLE).map_err(db_err("create kv table"))?;
        migrate(&conn, checkpoint)?;
        conn.execute_batch(INDICES).map_err(db_err("create indices"))?;

        let last_seq_no = Checkpoint::recover(
            checkpoint.last_seq_no,
            table_max(&conn, "SELECT MAX(seq_no) FROM indra_events")?,
        );
        let last_kv_seq_no = Checkpoint::recover(
            checkpoint.last_kv_seq_no,
            table_max(&conn, "SELECT MAX(seq_no) FROM indra_kv")?,
        );

        Ok(Self {
            conn,
            checkpoint_path,
            last_seq_no,
            last_kv_seq_no,
            commit_delay: config.commit_delay(),
            in_transaction: false,
            last_commit: Instant::now(),
            domain_cache: HashMap::new(),
            secure_keys: config.secure_keys.clone(),
        })
    }

    pub fn last_seq_no(&self) -> i64 {
        self.last_seq_no
    }

    pub fn last_kv_seq_no(&self) -> i64 {
        self.last_kv_seq_no
    }

    pub(super) fn next_seq_no(&mut self) -> i64 {
        self.last_seq_no += 1;
        self.last_seq_no
    }

    pub(super) fn next_kv_seq_no(&mut self) -> i64 {
        self.last_kv_seq_no += 1;
        self.last_kv_seq_no
    }

    /// Открывает транзакцию перед записью, если она ещё не открыта.
    pub(super) fn begin_write(&mut self) -> Result<(), StorageError> {
        if !self.in_transaction {
            self.conn.execute_batch("BEGIN").map_err(db_err("begin"))?;
            self.in_transaction = true;
        }
        Ok(())
    }

    /// После записи: фиксирует, если окно фиксации истекло.
    pub(super) fn finish_write(&mut self) -> Result<(), StorageError> {
        self.domain_cache.clear();
        self.commit_if_due()
    }

    pub fn has_uncommitted(&self) -> bool {
        self.in_transaction
    }

    pub fn commit_if_due(&mut self) -> Result<(), StorageError> {
        if self.in_transaction && self.last_commit.elapsed() >= self.commit_delay {
            self.commit()?;
        }
        Ok(())
    }

    pub fn commit(&mut self) -> Result<(), StorageError> {
        if self.in_transaction {
            self.conn.execute_batch("COMMIT").map_err(db_err("commit"))?;
            self.in_transaction = false;
            debug!(last_seq_no = self.last_seq_no, "Committed");
        }
        self.last_commit = Instant::now();
        Ok(())
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            last_seq_no: self.last_seq_no,
            last_kv_seq_no: self.last_kv_seq_no,
        }
    }

    /// Фиксация и запись checkpoint-файла при штатной остановке.
    pub fn close(&mut self) -> Result<(), StorageError> {
        self.commit()?;
        if let Some(path) = &self.checkpoint_path {
            self.checkpoint().save(path)?;
            info!(path = %path.display(), last_seq_no = self.last_seq_no, "Checkpoint written");
        }
        Ok(())
    }
}

fn ensure_directory(dir: &Path) -> Result<(), StorageError> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|e| StorageError::StorageUnavailable {
        reason: format!("cannot create database directory {}: {e}", dir.display()),
    })?;
    info!(path = %dir.display(), "Created database directory");
    Ok(())
}

fn table_max(
    conn: &Connection,
    sql: &str,
) -> Result<Option<i64>, StorageError> {
    conn.query_row(sql, [], |row| row.get::<_, Option<i64>>(0))
        .optional()
        .map(Option::flatten)
        .map_err(db_err("read max seq_no"))
}

fn column_exists(
    conn: &Connection,
    table: &str,
    column: &str,
) -> Result<bool, StorageError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .map_err(db_err("table info"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(db_err("table info"))?;
    for name in names {
        if name.map_err(db_err("table info"))? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Добавляет столбцы, которых нет в базах старого формата.
fn migrate(
    conn: &Connection,
    checkpoint: Checkpoint,
) -> Result<(), StorageError> {
    if !column_exists(conn, "indra_events", "seq_no")? {
        conn.execute(
            "ALTER TABLE indra_events ADD COLUMN seq_no INTEGER NOT NULL DEFAULT 0",
            [],
        )
        .map_err(db_err("add seq_no column"))?;
        let n = conn
            .execute(
                "UPDATE indra_events SET seq_no = ?1 + rowid",
                [checkpoint.last_seq_no],
            )
            .map_err(db_err("backfill seq_no"))?;
        warn!(rows = n, "Added seq_no column to indra_events and back-filled it");
    }
    if !column_exists(conn, "indra_events", "parent_uuid4")? {
        conn.execute("ALTER TABLE indra_events ADD COLUMN parent_uuid4 TEXT", [])
            .map_err(db_err("add parent_uuid4 column"))?;
        warn!("Added parent_uuid4 column to indra_events");
    }
    if !column_exists(conn, "indra_kv", "seq_no")? {
        conn.execute(
            "ALTER TABLE indra_kv ADD COLUMN seq_no INTEGER NOT NULL DEFAULT 0",
            [],
        )
        .map_err(db_err("add kv seq_no column"))?;
        conn.execute(
            "UPDATE indra_kv SET seq_no = ?1 + rowid",
            [checkpoint.last_kv_seq_no],
        )
        .map_err(db_err("backfill kv seq_no"))?;
        warn!("Added seq_no column to indra_kv and back-filled it");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn config_in(dir: &Path) -> StorageConfig {
        StorageConfig {
            database_directory: dir.to_path_buf(),
            commit_delay_sec: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_open_creates_directory_and_schema() {
        let root = tempdir().unwrap();
        let dir = root.path().join("nested/db");
        let store = Store::open(&config_in(&dir)).unwrap();
        assert!(dir.join(DB_FILE).exists());
        assert!(column_exists(&store.conn, "indra_events", "parent_uuid4").unwrap());
        assert!(column_exists(&store.conn, "indra_kv", "seq_no").unwrap());
        assert_eq!(store.last_seq_no(), 0);
    }

    /// Тест проверяет миграцию старой таблицы без seq_no и parent_uuid4.
    #[test]
    fn test_migrates_legacy_table() {
        let dir = tempdir().unwrap();
        {
            let conn = Connection::open(dir.path().join(DB_FILE)).unwrap();
            conn.execute_batch(
                "CREATE TABLE indra_events (
                    id INTEGER PRIMARY KEY, domain TEXT NOT NULL, from_id TEXT NOT NULL,
                    uuid4 TEXT NOT NULL, to_scope TEXT NOT NULL, time_jd_start DOUBLE,
                    data_type TEXT NOT NULL, data TEXT NOT NULL, auth_hash TEXT,
                    time_jd_end DOUBLE);
                 INSERT INTO indra_events (domain, from_id, uuid4, to_scope, time_jd_start, data_type, data)
                    VALUES ('$event/a', 'x', 'u1', '', 2460000.5, 'number/float', '1');
                 INSERT INTO indra_events (domain, from_id, uuid4, to_scope, time_jd_start, data_type, data)
                    VALUES ('$event/a', 'x', 'u2', '', 2460000.6, 'number/float', '2');",
            )
            .unwrap();
        }
        Checkpoint {
            last_seq_no: 100,
            last_kv_seq_no: 0,
        }
        .save(&Checkpoint::path_in(dir.path()))
        .unwrap();

        let store = Store::open(&config_in(dir.path())).unwrap();
        assert!(column_exists(&store.conn, "indra_events", "seq_no").unwrap());
        assert!(column_exists(&store.conn, "indra_events", "parent_uuid4").unwrap());
        assert_eq!(store.last_seq_no(), 102);
    }

    #[test]
    fn test_commit_window() {
        let mut store = Store::open_in_memory(&StorageConfig {
            commit_delay_sec: 3600.0,
            ..Default::default()
        })
        .unwrap();
        store.begin_write().unwrap();
        store.finish_write().unwrap();
        assert!(store.has_uncommitted());
        store.commit().unwrap();
        assert!(!store.has_uncommitted());
    }

    #[test]
    fn test_close_writes_checkpoint() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(&config_in(dir.path())).unwrap();
        store.next_seq_no();
        store.next_seq_no();
        store.next_kv_seq_no();
        store.close().unwrap();
        let cp = Checkpoint::load(&Checkpoint::path_in(dir.path()));
        assert_eq!(cp.last_seq_no, 2);
        assert_eq!(cp.last_kv_seq_no, 1);
    }
}
