//! Хранилище событий и KV на SQLite с транзакционным протоколом `$trx`.

pub mod checkpoint;
pub mod config;
pub mod events;
pub mod kv;
pub mod module;
pub mod password;
pub mod protocol;
pub mod sessions;
pub mod store;

pub use checkpoint::{Checkpoint, CHECKPOINT_FILE};
pub use config::{DbSync, StorageConfig};
pub use events::UpsertOutcome;
pub use kv::{password_key, validate_key, ADMIN_PASSWORD_KEY};
pub use module::StorageModule;
pub use password::{hash_password, verify_password};
pub use protocol::StorageEngine;
pub use sessions::{SessionData, SessionId, SessionTable};
pub use store::{Store, DB_FILE};
