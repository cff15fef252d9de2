pub mod auth;
pub mod broker;
pub mod protocol;
pub mod storage;
pub mod system;
pub mod transport;

pub use auth::*;
pub use broker::*;
pub use protocol::*;
pub use storage::*;
pub use system::*;
pub use transport::*;
