use std::collections::HashMap;

use indrajala_error::ModuleError;

use super::Module;
use crate::{
    builtin::{DingDong, Tasker},
    config::ModuleSpec,
    storage::StorageModule,
};

/// Фабрика модуля: строит экземпляр по описанию из конфигурации.
pub type ModuleFactory = fn(&ModuleSpec) -> Result<Box<dyn Module>, ModuleError>;

/// Статический реестр видов модулей (`kind` → фабрика).
pub struct ModuleRegistry {
    factories: HashMap<String, ModuleFactory>,
}

impl ModuleRegistry {
    /// Пустой реестр.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Реестр со встроенными видами: `storage`, `ding_dong`, `tasker`.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("storage", |spec| Ok(Box::new(StorageModule::from_spec(spec)?)));
        registry.register("ding_dong", |spec| Ok(Box::new(DingDong::from_spec(spec)?)));
        registry.register("tasker", |spec| Ok(Box::new(Tasker::from_spec(spec)?)));
        registry
    }

    /// Регистрирует вид `kind`; повторная регистрация заменяет фабрику.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        factory: ModuleFactory,
    ) {
        self.factories.insert(kind.into(), factory);
    }

    pub fn contains(
        &self,
        kind: &str,
    ) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn build(
        &self,
        spec: &ModuleSpec,
    ) -> Result<Box<dyn Module>, ModuleError> {
        let factory = self
            .factories
            .get(&spec.kind)
            .ok_or_else(|| ModuleError::UnknownKind {
                kind: spec.kind.clone(),
            })?;
        factory(spec)
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::module::LifecycleMode;

    #[test]
    fn test_builtin_kinds() {
        let registry = ModuleRegistry::with_builtin();
        assert_eq!(registry.kinds(), vec!["ding_dong", "storage", "tasker"]);
        assert!(registry.contains("storage"));
        assert!(!ModuleRegistry::new().contains("storage"));
    }

    /// Тест проверяет, что неизвестный вид модуля даёт ошибку, а не панику.
    #[test]
    fn test_unknown_kind() {
        let registry = ModuleRegistry::with_builtin();
        let err = registry
            .build(&ModuleSpec::new("w", "weather_dwd"))
            .err()
            .unwrap();
        assert!(matches!(err, ModuleError::UnknownKind { kind } if kind == "weather_dwd"));
    }

    #[test]
    fn test_build_builtin_module() {
        let registry = ModuleRegistry::with_builtin();
        let spec = ModuleSpec::new("ding", "ding_dong").with_config(json!({
            "topic": "$event/ding",
            "message": "dong",
            "interval_sec": 1.0
        }));
        let module = registry.build(&spec).unwrap();
        assert_eq!(module.name(), "ding");
        assert_eq!(module.mode(), LifecycleMode::Dual);
    }

    #[test]
    fn test_register_replaces_factory() {
        let mut registry = ModuleRegistry::new();
        registry.register("x", |spec| {
            Err(ModuleError::InvalidConfig {
                name: spec.name.clone(),
                reason: "first".into(),
            })
        });
        registry.register("x", |spec| {
            Err(ModuleError::InvalidConfig {
                name: spec.name.clone(),
                reason: "second".into(),
            })
        });
        let err = registry.build(&ModuleSpec::new("m", "x")).err().unwrap();
        assert!(err.to_string().contains("second"));
    }
}
