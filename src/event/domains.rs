//! Зарезервированные пространства доменов.

pub const LOG_PREFIX: &str = "$log/";
pub const CMD_PREFIX: &str = "$cmd/";

pub const CMD_QUIT: &str = "$cmd/quit";
pub const CMD_SUBS: &str = "$cmd/subs";
pub const CMD_UNSUBS: &str = "$cmd/unsubs";
/// Рукопожатие внешнего модуля; только первый кадр соединения.
pub const CMD_READY: &str = "$cmd/ready";

/// Оценка текущей частоты сообщений брокера.
pub const STAT_MSG_PER_SEC: &str = "$sys/stat/msgpersec";

pub const EVENT_PREFIX: &str = "$event/";
