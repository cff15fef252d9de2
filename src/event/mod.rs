pub mod domains;
pub mod envelope;
pub mod julian;
pub mod matcher;
pub mod requests;

pub use domains::*;
pub use envelope::*;
pub use julian::{datetime_to_julian, julian_to_datetime, now_jd};
pub use matcher::{has_wildcards, topic_matches};
pub use requests::*;
