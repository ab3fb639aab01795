//! # Session Server
//!
//! Authoritative state for a set of remote game clients, exchanged over a
//! small request/response protocol on plain TCP.
//!
//! ## Protocol
//!
//! Every connection carries exactly one request:
//!
//! * `GET /cmd?steamID=<id>` drains the client's outbound command queue and
//!   answers `{"commands":[...]}`
//! * `POST` with a body carries one flat event object (`pos`, `objects`,
//!   `input`, `axis`, `ack`, `pause`, `disconnect`) and is answered `OK`
//! * anything else gets a greeting
//!
//! Event bodies are read with a lenient field scanner (see [`codec`]) that
//! degrades malformed input to "absent" instead of rejecting the request.
//!
//! ## State
//!
//! A [`ServerContext`] owns the [`SessionStore`], the [`QueueMultiplexer`]
//! and the on-disk [`PlayerDataStore`]. Sessions are keyed by the full
//! client identity; gameplay state by steam ID alone. The timeout sweeper
//! evicts sessions that stop talking and logs a single disconnect for them.
//!
//! ## Extensions
//!
//! [`CoreServerApi`] implements the extension capability facade on top of the
//! context. The dispatcher itself never calls into extensions.

pub use api::CoreServerApi;
pub use config::ServerConfig;
pub use context::{EventOutcome, ServerContext};
pub use error::ServerError;
pub use persistence::{PlayerDataStore, PlayerRecord};
pub use queues::QueueMultiplexer;
pub use server::{Response, SessionServer};
pub use session::{PlayerState, SessionStore, Vec3};
pub use sweeper::spawn_timeout_sweeper;

pub mod api;
pub mod codec;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod persistence;
pub mod queues;
pub mod server;
pub mod session;
pub mod sweeper;

/// Local wall-clock time as `YYYY-MM-DD HH:MM:SS`.
pub fn current_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
