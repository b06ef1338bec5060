//! Inbound message decoding.
//!
//! Every function here either produces a complete value or fails with
//! [`DebugError::Protocol`]; a malformed message never yields a partially
//! filled reference.

use serde::Serialize;

use super::codec::*;
use crate::reference::{
    ContextReference, DebugId, EngineReference, ObjectReference, PropertyReference, Value,
};
use crate::{DebugError, QueryId, Result};

/// Maximum object/context nesting accepted from the wire.
pub const MAX_TREE_DEPTH: usize = 256;

// Encoded sizes of the smallest possible elements (empty strings, simple
// objects), used to reject impossible counts up front.
const MIN_OBJECT_LEN: usize = 37;
const MIN_PROPERTY_LEN: usize = 14;
const MIN_CONTEXT_LEN: usize = 16;

/// Which request a result answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ResultKind {
    Engines,
    RootContext,
    Object,
    Expression,
    Watch,
    SetBinding,
    ResetBinding,
    SetMethodBody,
}

impl ResultKind {
    pub fn from_wire(tag: u8) -> Option<Self> {
        Some(match tag {
            RESULT_ENGINES => ResultKind::Engines,
            RESULT_ROOT_CONTEXT => ResultKind::RootContext,
            RESULT_OBJECT => ResultKind::Object,
            RESULT_EXPRESSION => ResultKind::Expression,
            RESULT_WATCH => ResultKind::Watch,
            RESULT_SET_BINDING => ResultKind::SetBinding,
            RESULT_RESET_BINDING => ResultKind::ResetBinding,
            RESULT_SET_METHOD_BODY => ResultKind::SetMethodBody,
            _ => return None,
        })
    }

    pub fn to_wire(self) -> u8 {
        match self {
            ResultKind::Engines => RESULT_ENGINES,
            ResultKind::RootContext => RESULT_ROOT_CONTEXT,
            ResultKind::Object => RESULT_OBJECT,
            ResultKind::Expression => RESULT_EXPRESSION,
            ResultKind::Watch => RESULT_WATCH,
            ResultKind::SetBinding => RESULT_SET_BINDING,
            ResultKind::ResetBinding => RESULT_RESET_BINDING,
            ResultKind::SetMethodBody => RESULT_SET_METHOD_BODY,
        }
    }

    /// Stable type tag reported alongside results.
    pub fn type_tag(self) -> &'static str {
        match self {
            ResultKind::Engines => "LIST_ENGINES_R",
            ResultKind::RootContext => "LIST_OBJECTS_R",
            ResultKind::Object => "FETCH_OBJECT_R",
            ResultKind::Expression => "EVAL_EXPRESSION_R",
            ResultKind::Watch => "WATCH_R",
            ResultKind::SetBinding => "SET_BINDING_R",
            ResultKind::ResetBinding => "RESET_BINDING_R",
            ResultKind::SetMethodBody => "SET_METHOD_BODY_R",
        }
    }
}

/// Decoded payload of a result message.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum QueryResult {
    Engines(Vec<EngineReference>),
    /// `None` when the engine had no root context to report.
    RootContext(Option<ContextReference>),
    /// `None` when the object no longer exists.
    Object(Option<ObjectReference>),
    Expression(Value),
    /// Whether the remote accepted a watch or edit request.
    Accepted(bool),
}

#[derive(Clone, Debug, PartialEq)]
pub enum InboundMessage {
    Result {
        query_id: QueryId,
        kind: ResultKind,
        result: QueryResult,
    },
    ValueChanged {
        query_id: QueryId,
        debug_id: DebugId,
        name: String,
        value: Value,
    },
    NewObjects,
    /// The remote debug service became available (`true`) or unavailable.
    Status { enabled: bool },
}

pub fn decode_message(bytes: &[u8]) -> Result<InboundMessage> {
    let mut r = DebugReader::new(bytes);
    let kind = r.read_u8()?;
    let query_id = r.read_u32()?;
    let message = match kind {
        MSG_RESULT => {
            let tag = r.read_u8()?;
            let kind = ResultKind::from_wire(tag)
                .ok_or_else(|| DebugError::Protocol(format!("unknown result kind {tag}")))?;
            let result = decode_result(&mut r, kind)?;
            InboundMessage::Result {
                query_id,
                kind,
                result,
            }
        }
        MSG_VALUE_CHANGED => InboundMessage::ValueChanged {
            query_id,
            debug_id: r.read_i32()?,
            name: r.read_string()?,
            value: r.read_value()?,
        },
        MSG_NEW_OBJECTS => InboundMessage::NewObjects,
        MSG_STATUS => InboundMessage::Status {
            enabled: r.read_bool()?,
        },
        other => {
            return Err(DebugError::Protocol(format!("unknown message kind {other}")));
        }
    };
    r.finish()?;
    Ok(message)
}

fn decode_result(r: &mut DebugReader<'_>, kind: ResultKind) -> Result<QueryResult> {
    Ok(match kind {
        ResultKind::Engines => {
            // Each engine is at least an empty name plus its id.
            let count = r.read_count(8)?;
            let mut engines = Vec::with_capacity(count);
            for _ in 0..count {
                let name = r.read_string()?;
                let debug_id = r.read_i32()?;
                engines.push(EngineReference { debug_id, name });
            }
            QueryResult::Engines(engines)
        }
        ResultKind::RootContext => {
            let context = if r.read_bool()? {
                Some(decode_context(r)?)
            } else {
                None
            };
            QueryResult::RootContext(context)
        }
        ResultKind::Object => {
            let object = if r.read_bool()? {
                Some(decode_object(r)?)
            } else {
                None
            };
            QueryResult::Object(object)
        }
        ResultKind::Expression => QueryResult::Expression(r.read_value()?),
        ResultKind::Watch
        | ResultKind::SetBinding
        | ResultKind::ResetBinding
        | ResultKind::SetMethodBody => QueryResult::Accepted(r.read_bool()?),
    })
}

/// Decodes an object and, unless the remote marked it simple, its properties
/// and children.
pub fn decode_object(r: &mut DebugReader<'_>) -> Result<ObjectReference> {
    decode_object_at(r, 0)
}

fn decode_object_at(r: &mut DebugReader<'_>, depth: usize) -> Result<ObjectReference> {
    check_depth(depth)?;

    let mut object = ObjectReference {
        debug_id: r.read_i32()?,
        class_name: r.read_string()?,
        id_string: r.read_string()?,
        name: r.read_string()?,
        parent_id: r.read_i32()?,
        source: r.read_file()?,
        context_debug_id: r.read_i32()?,
        ..ObjectReference::default()
    };
    let simple = r.read_bool()?;
    object.needs_more_data = simple;
    if simple {
        return Ok(object);
    }

    let child_count = r.read_count(MIN_OBJECT_LEN)?;
    let recursive = r.read_bool()?;
    object.children.reserve(child_count);
    for _ in 0..child_count {
        let child = decode_object_at(r, depth + 1)?;
        if !recursive && !child.needs_more_data {
            return Err(DebugError::Protocol(format!(
                "object {} sent a full child in a non-recursive reply",
                object.debug_id
            )));
        }
        object.children.push(child);
    }

    let property_count = r.read_count(MIN_PROPERTY_LEN)?;
    object.properties.reserve(property_count);
    for _ in 0..property_count {
        object.properties.push(decode_property(r, object.debug_id)?);
    }

    Ok(object)
}

fn decode_property(r: &mut DebugReader<'_>, object_debug_id: DebugId) -> Result<PropertyReference> {
    let name = r.read_string()?;
    let value = r.read_value()?;
    let value_type_name = r.read_string()?;
    let binding = r.read_string()?;
    let has_notify_signal = r.read_bool()?;
    Ok(PropertyReference {
        object_debug_id,
        name,
        value,
        value_type_name,
        binding,
        has_notify_signal,
    })
}

/// Decodes a context with its nested contexts and (simple) objects.
pub fn decode_context(r: &mut DebugReader<'_>) -> Result<ContextReference> {
    decode_context_at(r, 0)
}

fn decode_context_at(r: &mut DebugReader<'_>, depth: usize) -> Result<ContextReference> {
    check_depth(depth)?;

    let name = r.read_string()?;
    let debug_id = r.read_i32()?;

    let context_count = r.read_count(MIN_CONTEXT_LEN)?;
    let mut contexts = Vec::with_capacity(context_count);
    for _ in 0..context_count {
        contexts.push(decode_context_at(r, depth + 1)?);
    }

    let object_count = r.read_count(MIN_OBJECT_LEN)?;
    let mut objects = Vec::with_capacity(object_count);
    for _ in 0..object_count {
        let mut object = decode_object_at(r, depth + 1)?;
        if !object.needs_more_data {
            return Err(DebugError::Protocol(format!(
                "context {debug_id} sent full object {}; context objects are simple",
                object.debug_id
            )));
        }
        object.context_debug_id = debug_id;
        objects.push(object);
    }

    Ok(ContextReference {
        debug_id,
        name,
        objects,
        contexts,
    })
}

fn check_depth(depth: usize) -> Result<()> {
    if depth >= MAX_TREE_DEPTH {
        return Err(DebugError::Protocol(format!(
            "reference tree nesting exceeds {MAX_TREE_DEPTH} levels"
        )));
    }
    Ok(())
}
