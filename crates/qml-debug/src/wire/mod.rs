//! Wire-level engine debug messages.
//!
//! Framing belongs to the Debug Connection; this module only deals with the
//! payload of one message at a time.

pub mod codec;
pub mod decode;
pub mod request;

pub use codec::{DebugReader, DebugWriter};
pub use decode::{decode_context, decode_message, decode_object, InboundMessage, QueryResult, ResultKind};
pub use request::{decode_request, QueryIds, Request, WatchTarget};

// The mock engine is only needed for tests and downstream integration suites.
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
