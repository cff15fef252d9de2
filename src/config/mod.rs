pub mod settings;

use serde::{Deserialize, Serialize};
pub use settings::*;

use crate::module::{LogSeverity, TransportKind};

fn default_active() -> bool {
    true
}

/// Описание одного модуля в файле конфигурации.
///
/// Передаётся внешнему процессу целиком (JSON, второй аргумент
/// `indrajala-module`), поэтому сериализуемо в обе стороны.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Уникальное имя: адрес модуля на шине
    pub name: String,
    /// Тип из реестра модулей (`storage`, `ding_dong`, `tasker`)
    pub kind: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub loglevel: LogSeverity,
    /// Собственная конфигурация модуля
    #[serde(default)]
    pub config: serde_json::Value,
}

impl ModuleSpec {
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            active: true,
            transport: TransportKind::default(),
            loglevel: LogSeverity::default(),
            config: serde_json::Value::Null,
        }
    }

    pub fn with_config(
        mut self,
        config: serde_json::Value,
    ) -> Self {
        self.config = config;
        self
    }

    pub fn with_transport(
        mut self,
        transport: TransportKind,
    ) -> Self {
        self.transport = transport;
        self
    }
}
