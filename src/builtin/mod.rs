//! Встроенные модули, доступные через реестр.

pub mod ding_dong;
pub mod tasker;

pub use ding_dong::{DingDong, DingDongConfig};
pub use tasker::{Tasker, TaskerConfig};
