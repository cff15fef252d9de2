//! Маршрутизатор событий: таблица подписок, зарезервированные домены,
//! телеметрия частоты и остановка.

pub mod router;
pub mod shutdown;
pub mod subscriptions;
pub mod telemetry;

pub use router::{Broker, BrokerHandle, ModuleEntry, BROKER_ID};
pub use shutdown::{ShutdownPhase, ShutdownReport};
pub use subscriptions::{default_subscriptions, SubscriptionTable};
pub use telemetry::{RateMode, Telemetry};
