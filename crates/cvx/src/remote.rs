//! 🔌 Remote: where the real I/O happens.
//!
//! 🚰 Everything that leaves this process for the cloud goes through here:
//! the immutable [`ClientContext`] (who we are, where they live) and the
//! [`RemoteClient`] (how we ask). Pipelines, schema managers and search engines
//! all borrow a `RemoteClient`; none of them get to outlive it.
//!
//! 🦆 The duck is here because every file must have one. This is law.

pub mod client;
pub mod context;

pub use client::{RemoteBody, RemoteClient, RemoteRequest};
pub use context::ClientContext;
