/// Routing loop, subscription table, telemetry and shutdown protocol.
pub mod broker;
/// Built-in demo modules (ding_dong, tasker).
pub mod builtin;
/// Settings loading and module descriptions.
pub mod config;
/// Event envelope, topic matcher and transaction request formats.
pub mod event;
/// Flexible logging (formatting, filters, sinks).
pub mod logging;
/// Module contract, lifecycle runner, transports and timer scheduler.
pub mod module;
/// SQLite storage engine and the `$trx` request protocol.
pub mod storage;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Broker API.
pub use broker::{Broker, BrokerHandle, ShutdownPhase, ShutdownReport, BROKER_ID};
/// config
pub use config::{BrokerSettings, ModuleSpec, Settings};
/// Event envelope and topic matching.
pub use event::{topic_matches, Event};
/// Operation errors and result types.
pub use indrajala_error::{IndraResult, StackError};
/// Logging bootstrap.
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
/// Module contract and registry.
pub use module::{LifecycleMode, Module, ModuleContext, ModuleRegistry, TransportKind};
/// Storage module and engine.
pub use storage::{StorageConfig, StorageEngine, StorageModule, Store};
