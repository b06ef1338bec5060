use std::sync::atomic::{AtomicU32, Ordering};

use super::codec::*;
use crate::reference::{DebugId, FileReference, Value};
use crate::{DebugError, QueryId, Result};

/// What a watch subscribes to.
#[derive(Clone, Debug, PartialEq)]
pub enum WatchTarget {
    /// Live value of one property.
    Property { object_debug_id: DebugId, name: String },
    /// Object looked up by its QML id within a context.
    ContextObject { context_debug_id: DebugId, id: String },
    /// Expression re-evaluated against an object.
    Expression { object_debug_id: DebugId, expression: String },
    /// Any change to an object.
    Object { object_debug_id: DebugId },
    /// Reload events for a source file.
    File(FileReference),
}

/// One outbound operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    AddWatch(WatchTarget),
    RemoveWatch {
        watch_id: QueryId,
    },
    QueryEngines,
    QueryRootContexts {
        engine_debug_id: DebugId,
    },
    QueryObject {
        object_debug_id: DebugId,
        recursive: bool,
    },
    QueryExpression {
        object_debug_id: DebugId,
        expression: String,
        engine_id: DebugId,
    },
    SetBinding {
        object_debug_id: DebugId,
        property: String,
        binding: Value,
        is_literal: bool,
        source_file: String,
        source_line: i32,
    },
    ResetBinding {
        object_debug_id: DebugId,
        property: String,
    },
    SetMethodBody {
        object_debug_id: DebugId,
        method: String,
        body: String,
    },
}

impl Request {
    pub fn opcode(&self) -> u8 {
        match self {
            Request::AddWatch(_) => OP_ADD_WATCH,
            Request::RemoveWatch { .. } => OP_REMOVE_WATCH,
            Request::QueryEngines => OP_QUERY_ENGINES,
            Request::QueryRootContexts { .. } => OP_QUERY_ROOT_CONTEXTS,
            Request::QueryObject {
                recursive: false, ..
            } => OP_QUERY_OBJECT,
            Request::QueryObject {
                recursive: true, ..
            } => OP_QUERY_OBJECT_RECURSIVE,
            Request::QueryExpression { .. } => OP_QUERY_EXPRESSION,
            Request::SetBinding { .. } => OP_SET_BINDING,
            Request::ResetBinding { .. } => OP_RESET_BINDING,
            Request::SetMethodBody { .. } => OP_SET_METHOD_BODY,
        }
    }

    /// Whether the remote answers this request with a result message.
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Request::RemoveWatch { .. })
    }

    /// Serializes the request as `opcode, query_id, fields`.
    pub fn encode(&self, query_id: QueryId) -> Vec<u8> {
        let mut w = DebugWriter::new();
        w.write_u8(self.opcode());
        w.write_u32(query_id);
        match self {
            Request::AddWatch(target) => encode_watch(&mut w, target),
            Request::RemoveWatch { watch_id } => w.write_u32(*watch_id),
            Request::QueryEngines => {}
            Request::QueryRootContexts { engine_debug_id } => w.write_i32(*engine_debug_id),
            Request::QueryObject {
                object_debug_id, ..
            } => w.write_i32(*object_debug_id),
            Request::QueryExpression {
                object_debug_id,
                expression,
                engine_id,
            } => {
                w.write_i32(*object_debug_id);
                w.write_string(expression);
                w.write_i32(*engine_id);
            }
            Request::SetBinding {
                object_debug_id,
                property,
                binding,
                is_literal,
                source_file,
                source_line,
            } => {
                w.write_i32(*object_debug_id);
                w.write_string(property);
                w.write_value(binding);
                w.write_bool(*is_literal);
                w.write_string(source_file);
                w.write_i32(*source_line);
            }
            Request::ResetBinding {
                object_debug_id,
                property,
            } => {
                w.write_i32(*object_debug_id);
                w.write_string(property);
            }
            Request::SetMethodBody {
                object_debug_id,
                method,
                body,
            } => {
                w.write_i32(*object_debug_id);
                w.write_string(method);
                w.write_string(body);
            }
        }
        w.into_vec()
    }
}

/// Parses a request produced by [`Request::encode`].
pub fn decode_request(bytes: &[u8]) -> Result<(QueryId, Request)> {
    let mut r = DebugReader::new(bytes);
    let opcode = r.read_u8()?;
    let query_id = r.read_u32()?;
    let request = match opcode {
        OP_ADD_WATCH => Request::AddWatch(decode_watch(&mut r)?),
        OP_REMOVE_WATCH => Request::RemoveWatch {
            watch_id: r.read_u32()?,
        },
        OP_QUERY_ENGINES => Request::QueryEngines,
        OP_QUERY_ROOT_CONTEXTS => Request::QueryRootContexts {
            engine_debug_id: r.read_i32()?,
        },
        OP_QUERY_OBJECT | OP_QUERY_OBJECT_RECURSIVE => Request::QueryObject {
            object_debug_id: r.read_i32()?,
            recursive: opcode == OP_QUERY_OBJECT_RECURSIVE,
        },
        OP_QUERY_EXPRESSION => Request::QueryExpression {
            object_debug_id: r.read_i32()?,
            expression: r.read_string()?,
            engine_id: r.read_i32()?,
        },
        OP_SET_BINDING => Request::SetBinding {
            object_debug_id: r.read_i32()?,
            property: r.read_string()?,
            binding: r.read_value()?,
            is_literal: r.read_bool()?,
            source_file: r.read_string()?,
            source_line: r.read_i32()?,
        },
        OP_RESET_BINDING => Request::ResetBinding {
            object_debug_id: r.read_i32()?,
            property: r.read_string()?,
        },
        OP_SET_METHOD_BODY => Request::SetMethodBody {
            object_debug_id: r.read_i32()?,
            method: r.read_string()?,
            body: r.read_string()?,
        },
        other => {
            return Err(DebugError::Protocol(format!("unknown request opcode {other}")));
        }
    };
    r.finish()?;
    Ok((query_id, request))
}

fn decode_watch(r: &mut DebugReader<'_>) -> Result<WatchTarget> {
    let target = match r.read_u8()? {
        WATCH_PROPERTY => WatchTarget::Property {
            object_debug_id: r.read_i32()?,
            name: r.read_string()?,
        },
        WATCH_CONTEXT_OBJECT => WatchTarget::ContextObject {
            context_debug_id: r.read_i32()?,
            id: r.read_string()?,
        },
        WATCH_EXPRESSION => WatchTarget::Expression {
            object_debug_id: r.read_i32()?,
            expression: r.read_string()?,
        },
        WATCH_OBJECT => WatchTarget::Object {
            object_debug_id: r.read_i32()?,
        },
        WATCH_FILE => WatchTarget::File(r.read_file()?),
        other => {
            return Err(DebugError::Protocol(format!("unknown watch kind {other}")));
        }
    };
    Ok(target)
}

fn encode_watch(w: &mut DebugWriter, target: &WatchTarget) {
    match target {
        WatchTarget::Property {
            object_debug_id,
            name,
        } => {
            w.write_u8(WATCH_PROPERTY);
            w.write_i32(*object_debug_id);
            w.write_string(name);
        }
        WatchTarget::ContextObject {
            context_debug_id,
            id,
        } => {
            w.write_u8(WATCH_CONTEXT_OBJECT);
            w.write_i32(*context_debug_id);
            w.write_string(id);
        }
        WatchTarget::Expression {
            object_debug_id,
            expression,
        } => {
            w.write_u8(WATCH_EXPRESSION);
            w.write_i32(*object_debug_id);
            w.write_string(expression);
        }
        WatchTarget::Object { object_debug_id } => {
            w.write_u8(WATCH_OBJECT);
            w.write_i32(*object_debug_id);
        }
        WatchTarget::File(file) => {
            w.write_u8(WATCH_FILE);
            w.write_file(file);
        }
    }
}

/// Monotonic query id source.
///
/// Ids advance by one per call and wrap on overflow. Zero marks unsolicited
/// inbound messages, so it is never handed out.
#[derive(Debug)]
pub struct QueryIds {
    next: AtomicU32,
}

impl QueryIds {
    pub fn starting_at(first: QueryId) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    pub fn next_id(&self) -> QueryId {
        loop {
            // `fetch_add` wraps on overflow.
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

impl Default for QueryIds {
    fn default() -> Self {
        Self::starting_at(1)
    }
}
