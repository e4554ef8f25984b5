//! 📦 cvx: push documents into a cloud search index, and search them back out.
//!
//! Two halves:
//! - indexing: [`documents`] normalizes generic items, [`pipeline`] pushes them with the
//!   open/upload/commit handshake
//! - searching: [`query`] models and compiles structured queries, [`search`] runs them
//!
//! [`Backend`] wires both halves to one [`remote::RemoteClient`]. 🦆

pub mod app_config;
pub mod backend;
pub mod documents;
pub mod error;
pub mod pipeline;
pub mod query;
pub mod remote;
pub mod schema;
pub mod search;

pub use app_config::{AppConfig, load_config};
pub use backend::{Backend, DocumentAlter};
pub use error::RemoteError;
