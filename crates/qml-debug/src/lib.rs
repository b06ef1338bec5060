//! Query/watch client for a remote QML engine debug service.
//!
//! The client speaks to the engine over an externally owned duplex message
//! channel (the Debug Connection). Outbound operations are fire-and-forget:
//! each returns a locally assigned query id, and the matching reply arrives
//! later as a [`DebugEvent::Result`] on the session's event stream.
//!
//! Decoded replies are plain value snapshots ([`ObjectReference`],
//! [`ContextReference`], ...). The session keeps no cache of them; callers
//! that want an up-to-date tree merge incremental results themselves with
//! [`ObjectReference::insert_object_in_tree`].

mod client;
pub mod config;
mod poison;
mod reference;

/// Wire-level message encoding and decoding.
pub mod wire;

use thiserror::Error;

pub use client::{
    pump, ClientStatus, ConnectionEvent, DebugEvent, EngineDebugClient, QueryResult, ResultKind,
    Transport,
};
pub use config::{ClientConfig, LoggingConfig};
pub use reference::{
    ContextReference, DebugId, EngineReference, FileReference, ObjectReference,
    PropertyReference, Value, UNSET_DEBUG_ID,
};

/// Locally assigned identifier correlating a request with its reply.
pub type QueryId = u32;

pub type Result<T, E = DebugError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DebugError {
    #[error("engine debug client is not connected")]
    NotConnected,
    #[error("engine debug protocol error: {0}")]
    Protocol(String),
    #[error("debug connection failed: {0}")]
    Connection(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid client configuration: {0}")]
    Config(String),
}
