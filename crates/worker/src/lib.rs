//! The poll loop, heartbeat, and per-task execution units that make up the
//! worker runtime (§4.6, §4.9).

mod config;
mod error;
mod heartbeat;
mod loop_;

pub use config::{HandlersConfig, WorkerConfig};
pub use error::WorkerError;
pub use loop_::run;
