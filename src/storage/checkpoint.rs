use std::{
    fs,
    path::{Path, PathBuf},
};

use indrajala_error::StorageError;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const CHECKPOINT_FILE: &str = "last_state.json";

/// Последние выданные номера последовательностей.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default)]
    pub last_seq_no: i64,
    #[serde(default)]
    pub last_kv_seq_no: i64,
}

impl Checkpoint {
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(CHECKPOINT_FILE)
    }

    /// Читает файл. Отсутствующий или повреждённый файл даёт нули: счётчики
    /// всё равно поднимаются до максимума в таблицах.
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => return Self::default(),
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Checkpoint file unreadable, starting from table maxima");
            Self::default()
        })
    }

    /// Записывает через временный файл и rename.
    pub fn save(
        &self,
        path: &Path,
    ) -> Result<(), StorageError> {
        let fail = |reason: String| StorageError::Checkpoint {
            path: path.display().to_string(),
            reason,
        };
        let json = serde_json::to_string_pretty(self).map_err(|e| fail(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| fail(e.to_string()))?;
        fs::rename(&tmp, path).map_err(|e| fail(e.to_string()))
    }

    /// Счётчик после восстановления: никогда не меньше уже выданного.
    pub fn recover(
        checkpoint: i64,
        table_max: Option<i64>,
    ) -> i64 {
        checkpoint.max(table_max.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = Checkpoint::path_in(dir.path());
        assert_eq!(Checkpoint::load(&path), Checkpoint::default());

        let cp = Checkpoint {
            last_seq_no: 42,
            last_kv_seq_no: 7,
        };
        cp.save(&path).unwrap();
        assert_eq!(Checkpoint::load(&path), cp);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_falls_back_to_zero() {
        let dir = tempdir().unwrap();
        let path = Checkpoint::path_in(dir.path());
        fs::write(&path, "{not json").unwrap();
        assert_eq!(Checkpoint::load(&path), Checkpoint::default());
    }

    /// Тест проверяет, что старый формат без `last_kv_seq_no` читается.
    #[test]
    fn test_legacy_format() {
        let dir = tempdir().unwrap();
        let path = Checkpoint::path_in(dir.path());
        fs::write(&path, r#"{"last_seq_no": 10}"#).unwrap();
        assert_eq!(Checkpoint::load(&path).last_seq_no, 10);
        assert_eq!(Checkpoint::load(&path).last_kv_seq_no, 0);
    }

    #[test]
    fn test_recover_takes_maximum() {
        assert_eq!(Checkpoint::recover(10, Some(5)), 10);
        assert_eq!(Checkpoint::recover(10, Some(15)), 15);
        assert_eq!(Checkpoint::recover(3, None), 3);
    }
}
