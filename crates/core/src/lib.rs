//! Domain types, error taxonomy, and concurrency primitives shared by every
//! crate in the ease worker runtime.

pub mod concurrency;
pub mod error;
pub mod retry;
pub mod task;
pub mod time;

pub use concurrency::{Concurrency, ConcurrencyModifier};
pub use error::{ConfigError, ParseError};
pub use task::{
    build_status, is_hop_by_hop, Mode, MsgHeader, ProxyRequestData, RequestStatus, Status, Task,
    TaskEnvelope, HOP_BY_HOP_HEADERS,
};
pub use time::current_unix_milli;
