//! KV-таблица и защищённые ключи.

use indrajala_error::{AuthError, IndraResult, StackError, StorageError};
use rusqlite::{params, OptionalExtension};
use tracing::{debug, warn};

use super::{
    password::{hash_password, verify_password},
    store::{db_err, Store},
};
use crate::event::topic_matches;

pub const USER_KEY_PREFIX: &str = "entity/indrajala/user/";
pub const ADMIN_PASSWORD_KEY: &str = "entity/indrajala/user/admin/password";

const MAX_KEY_LEN: usize = 512;

/// Пароль пользователя хранится под `entity/indrajala/user/<user>/password`.
pub fn password_key(user: &str) -> String {
    format!("{USER_KEY_PREFIX}{user}/password")
}

/// Имя пользователя из ключа пароля; для прочих ключей сам ключ.
pub fn user_from_key(key: &str) -> &str {
    key.strip_prefix(USER_KEY_PREFIX)
        .and_then(|rest| rest.split('/').next())
        .filter(|user| !user.is_empty())
        .unwrap_or(key)
}

/// Проверка ключа: иерархический, без `+`/`#`, ограниченный алфавит.
/// `%` допускается только при `allow_wildcard`.
pub fn validate_key(
    key: &str,
    allow_wildcard: bool,
) -> Result<(), StorageError> {
    let invalid = |reason: &str| StorageError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    if key.is_empty() {
        return Err(invalid("empty key"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(invalid("key too long"));
    }
    if key.starts_with('/') || key.ends_with('/') || key.contains("//") {
        return Err(invalid("empty path segment"));
    }
    if key.contains('%') && !allow_wildcard {
        return Err(invalid("wildcard not allowed here"));
    }
    if let Some(c) = key
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || "/_-.@:%".contains(*c)))
    {
        return Err(invalid(&format!("character '{c}' not allowed")));
    }
    Ok(())
}

impl Store {
    /// Подпадает ли ключ под шаблоны защищённых ключей.
    pub fn is_secure_key(
        &self,
        key: &str,
    ) -> bool {
        self.secure_keys.iter().any(|p| topic_matches(key, p))
    }

    /// Запись значения. Для шаблона с `%` перезаписываются все совпавшие
    /// существующие ключи. Возвращает число записанных ключей.
    pub fn kv_write(
        &mut self,
        key: &str,
        value: &str,
    ) -> IndraResult<usize> {
        validate_key(key, true)?;
        let keys = if key.contains('%') {
            self.kv_read(key)?.into_iter().map(|(k, _)| k).collect()
        } else {
            vec![key.to_string()]
        };

        self.begin_write()?;
        for k in &keys {
            let stored = if self.is_secure_key(k) {
                hash_password(value)?
            } else {
                value.to_string()
            };
            let seq_no = self.next_kv_seq_no();
            self.conn
                .execute(
                    "INSERT INTO indra_kv (key, value, seq_no) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, seq_no = excluded.seq_no",
                    params![k, stored, seq_no],
                )
                .map_err(db_err("kv write"))?;
        }
        self.finish_write()?;
        debug!(key, count = keys.len(), "KV write");
        Ok(keys.len())
    }

    /// Пары (ключ, значение) по точному ключу или шаблону с `%`.
    /// Для защищённых ключей значение это хеш.
    pub fn kv_read(
        &self,
        key: &str,
    ) -> Result<Vec<(String, String)>, StorageError> {
        validate_key(key, true)?;
        let op = if key.contains('%') { "LIKE" } else { "=" };
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT key, value FROM indra_kv WHERE key {op} ?1 ORDER BY key"))
            .map_err(db_err("kv read"))?;
        let rows = stmt
            .query_map([key], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(db_err("kv read"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("kv read"))
    }

    pub fn kv_delete(
        &mut self,
        key: &str,
    ) -> Result<usize, StorageError> {
        validate_key(key, true)?;
        let op = if key.contains('%') { "LIKE" } else { "=" };
        self.begin_write()?;
        let n = self
            .conn
            .execute(&format!("DELETE FROM indra_kv WHERE key {op} ?1"), [key])
            .map_err(db_err("kv delete"))?;
        self.finish_write()?;
        Ok(n)
    }

    /// Проверка значения без побочных эффектов.
    ///
    /// Защищённые ключи сравниваются по хешу, прочие как строки.
    /// Отсутствующий ключ неотличим для клиента от неверного значения.
    pub fn kv_verify(
        &self,
        key: &str,
        value: &str,
    ) -> IndraResult<()> {
        validate_key(key, false)?;
        let stored: Option<String> = self
            .conn
            .query_row("SELECT value FROM indra_kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()
            .map_err(db_err("kv verify"))?;
        let Some(stored) = stored else {
            return Err(StackError::new(AuthError::MissingSecret {
                key: key.to_string(),
            }));
        };
        let ok = if self.is_secure_key(key) {
            verify_password(&stored, value)?
        } else {
            stored == value
        };
        if ok {
            Ok(())
        } else {
            Err(StackError::new(AuthError::InvalidCredentials {
                key: key.to_string(),
            }))
        }
    }

    /// Засевает учётную запись `admin`, если её нет, и предупреждает, пока
    /// действует пароль по умолчанию.
    pub fn seed_admin(
        &mut self,
        default_password: &str,
    ) -> IndraResult<()> {
        if self.kv_read(ADMIN_PASSWORD_KEY)?.is_empty() {
            self.kv_write(ADMIN_PASSWORD_KEY, default_password)?;
            self.commit()?;
        }
        if self.kv_verify(ADMIN_PASSWORD_KEY, default_password).is_ok() {
            warn!(
                key = ADMIN_PASSWORD_KEY,
                "Admin account uses the default password, change it"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::storage::StorageConfig;

    fn store() -> Store {
        Store::open_in_memory(&StorageConfig {
            commit_delay_sec: 0.0,
            ..Default::default()
        })
        .unwrap()
    }

    #[rstest]
    #[case("entity/indrajala/user/alice/password", false, true)]
    #[case("app/settings/theme", false, true)]
    #[case("app/%", true, true)]
    #[case("app/%", false, false)]
    #[case("", true, false)]
    #[case("/leading", true, false)]
    #[case("a//b", true, false)]
    #[case("a/+/b", true, false)]
    #[case("a b", true, false)]
    fn test_validate_key(
        #[case] key: &str,
        #[case] wildcard: bool,
        #[case] ok: bool,
    ) {
        assert_eq!(validate_key(key, wildcard).is_ok(), ok);
    }

    #[test]
    fn test_user_from_key() {
        assert_eq!(user_from_key(&password_key("alice")), "alice");
        assert_eq!(user_from_key("other/key"), "other/key");
    }

    /// Тест проверяет, что значение защищённого ключа хранится только как
    /// хеш и проверяется verify.
    #[test]
    fn test_secure_key_hashed_at_rest() {
        let mut s = store();
        let key = password_key("alice");
        s.kv_write(&key, "secret").unwrap();

        let rows = s.kv_read(&key).unwrap();
        assert_eq!(rows.len(), 1);
        assert_ne!(rows[0].1, "secret");
        assert!(rows[0].1.starts_with("$argon2id$"));

        assert!(s.kv_verify(&key, "secret").is_ok());
        let err = s.kv_verify(&key, "wrong").unwrap_err();
        assert_eq!(err.reply_tag(), "error/access");
        let err = s.kv_verify(&password_key("nobody"), "x").unwrap_err();
        assert_eq!(err.reply_tag(), "error/access");
    }

    #[test]
    fn test_plain_values_and_wildcards() {
        let mut s = store();
        s.kv_write("app/a", "1").unwrap();
        s.kv_write("app/b", "2").unwrap();
        s.kv_write("other/c", "3").unwrap();
        assert!(s.kv_verify("app/a", "1").is_ok());

        assert_eq!(s.kv_write("app/%", "9").unwrap(), 2);
        let rows = s.kv_read("app/%").unwrap();
        assert_eq!(
            rows,
            vec![("app/a".into(), "9".into()), ("app/b".into(), "9".into())]
        );

        assert_eq!(s.kv_delete("app/%").unwrap(), 2);
        assert_eq!(s.kv_delete("app/a").unwrap(), 0);
        assert_eq!(s.kv_read("%").unwrap().len(), 1);
        assert_eq!(s.last_kv_seq_no(), 5);
    }

    #[test]
    fn test_seed_admin_once() {
        let mut s = store();
        s.seed_admin("admin").unwrap();
        let first = s.kv_read(ADMIN_PASSWORD_KEY).unwrap();
        assert_eq!(first.len(), 1);
        assert!(s.kv_verify(ADMIN_PASSWORD_KEY, "admin").is_ok());

        s.seed_admin("admin").unwrap();
        assert_eq!(s.kv_read(ADMIN_PASSWORD_KEY).unwrap(), first);
    }
}
