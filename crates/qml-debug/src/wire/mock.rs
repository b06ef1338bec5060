use std::collections::HashMap;

use tokio::sync::mpsc;

use super::codec::*;
use super::decode::{QueryResult, ResultKind};
use super::request::{decode_request, Request, WatchTarget};
use crate::reference::{
    ContextReference, DebugId, EngineReference, FileReference, ObjectReference,
    PropertyReference, Value, UNSET_DEBUG_ID,
};
use crate::{QueryId, Result};

/// Object living inside a [`MockEngine`].
#[derive(Clone, Debug)]
pub struct MockObject {
    debug_id: DebugId,
    class_name: String,
    id_string: String,
    name: String,
    source: FileReference,
    properties: Vec<MockProperty>,
    children: Vec<MockObject>,
}

#[derive(Clone, Debug)]
struct MockProperty {
    name: String,
    value: Value,
    binding: String,
}

impl MockObject {
    pub fn new(debug_id: DebugId, class_name: impl Into<String>) -> Self {
        Self {
            debug_id,
            class_name: class_name.into(),
            id_string: String::new(),
            name: String::new(),
            source: FileReference::default(),
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id_string = id.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_source(mut self, url: impl Into<String>, line: i32, column: i32) -> Self {
        self.source = FileReference::new(url, line, column);
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.push(MockProperty {
            name: name.into(),
            value: value.into(),
            binding: String::new(),
        });
        self
    }

    pub fn with_binding(
        mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
        binding: impl Into<String>,
    ) -> Self {
        self.properties.push(MockProperty {
            name: name.into(),
            value: value.into(),
            binding: binding.into(),
        });
        self
    }

    pub fn with_child(mut self, child: MockObject) -> Self {
        self.children.push(child);
        self
    }

    fn find(&self, debug_id: DebugId) -> Option<(&MockObject, DebugId)> {
        for child in &self.children {
            if child.debug_id == debug_id {
                return Some((child, self.debug_id));
            }
            if let Some(found) = child.find(debug_id) {
                return Some(found);
            }
        }
        None
    }

    fn find_mut(&mut self, debug_id: DebugId) -> Option<&mut MockObject> {
        if self.debug_id == debug_id {
            return Some(self);
        }
        self.children
            .iter_mut()
            .find_map(|child| child.find_mut(debug_id))
    }

    fn find_by_id_string(&self, id: &str) -> bool {
        self.id_string == id || self.children.iter().any(|c| c.find_by_id_string(id))
    }
}

/// In-process stand-in for a remote engine debug service.
///
/// It hosts a single engine with one root context holding the configured
/// object trees, answers every request kind and emits value-changed
/// notifications for property and object watches.
pub struct MockEngine {
    engine: EngineReference,
    context_debug_id: DebugId,
    objects: Vec<MockObject>,
    watches: HashMap<QueryId, WatchTarget>,
    max_depth: Option<usize>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            engine: EngineReference {
                debug_id: 1,
                name: "main".to_string(),
            },
            context_debug_id: 2,
            objects: Vec::new(),
            watches: HashMap::new(),
            max_depth: None,
        }
    }

    pub fn with_object(mut self, object: MockObject) -> Self {
        self.objects.push(object);
        self
    }

    /// Limits recursive replies to `levels` fully populated levels; deeper
    /// objects are sent simple.
    pub fn with_max_depth(mut self, levels: usize) -> Self {
        self.max_depth = Some(levels);
        self
    }

    /// Answers requests from `requests` on `replies` until either side closes.
    pub async fn serve(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Vec<u8>>,
        replies: mpsc::UnboundedSender<Vec<u8>>,
    ) {
        while let Some(bytes) = requests.recv().await {
            match self.handle(&bytes) {
                Ok(messages) => {
                    for message in messages {
                        if replies.send(message).is_err() {
                            return;
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(target: "qml_debug::mock", error = %err, "dropping request");
                }
            }
        }
    }

    /// Handles one encoded request, returning the encoded inbound messages it
    /// produces.
    pub fn handle(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
        let (query_id, request) = decode_request(bytes)?;
        let mut out = Vec::new();
        match request {
            Request::AddWatch(target) => {
                let accepted = self.watch_target_exists(&target);
                if accepted {
                    self.watches.insert(query_id, target);
                }
                out.push(encode_result(query_id, ResultKind::Watch, &QueryResult::Accepted(accepted)));
            }
            Request::RemoveWatch { watch_id } => {
                self.watches.remove(&watch_id);
            }
            Request::QueryEngines => {
                out.push(encode_result(
                    query_id,
                    ResultKind::Engines,
                    &QueryResult::Engines(vec![self.engine.clone()]),
                ));
            }
            Request::QueryRootContexts { engine_debug_id } => {
                let context = (engine_debug_id == self.engine.debug_id).then(|| self.root_context());
                out.push(encode_result(
                    query_id,
                    ResultKind::RootContext,
                    &QueryResult::RootContext(context),
                ));
            }
            Request::QueryObject {
                object_debug_id,
                recursive,
            } => {
                let levels = if recursive {
                    self.max_depth.unwrap_or(usize::MAX)
                } else {
                    1
                };
                let object = self.snapshot(object_debug_id, levels);
                out.push(encode_result(query_id, ResultKind::Object, &QueryResult::Object(object)));
            }
            Request::QueryExpression {
                object_debug_id,
                expression,
                ..
            } => {
                let value = self
                    .find(object_debug_id)
                    .and_then(|(obj, _)| obj.properties.iter().find(|p| p.name == expression))
                    .map(|p| p.value.clone())
                    .unwrap_or_default();
                out.push(encode_result(
                    query_id,
                    ResultKind::Expression,
                    &QueryResult::Expression(value),
                ));
            }
            Request::SetBinding {
                object_debug_id,
                property,
                binding,
                is_literal,
                ..
            } => {
                let accepted = self.assign(object_debug_id, &property, binding.clone(), is_literal);
                out.push(encode_result(
                    query_id,
                    ResultKind::SetBinding,
                    &QueryResult::Accepted(accepted),
                ));
                if accepted {
                    out.extend(self.notify(object_debug_id, &property, &binding));
                }
            }
            Request::ResetBinding {
                object_debug_id,
                property,
            } => {
                let accepted = self.reset(object_debug_id, &property);
                out.push(encode_result(
                    query_id,
                    ResultKind::ResetBinding,
                    &QueryResult::Accepted(accepted),
                ));
            }
            Request::SetMethodBody {
                object_debug_id, ..
            } => {
                let accepted = self.find(object_debug_id).is_some();
                out.push(encode_result(
                    query_id,
                    ResultKind::SetMethodBody,
                    &QueryResult::Accepted(accepted),
                ));
            }
        }
        Ok(out)
    }

    fn find(&self, debug_id: DebugId) -> Option<(&MockObject, DebugId)> {
        for root in &self.objects {
            if root.debug_id == debug_id {
                return Some((root, UNSET_DEBUG_ID));
            }
            if let Some(found) = root.find(debug_id) {
                return Some(found);
            }
        }
        None
    }

    fn find_mut(&mut self, debug_id: DebugId) -> Option<&mut MockObject> {
        self.objects
            .iter_mut()
            .find_map(|root| root.find_mut(debug_id))
    }

    fn watch_target_exists(&self, target: &WatchTarget) -> bool {
        match target {
            WatchTarget::Property {
                object_debug_id,
                name,
            } => self
                .find(*object_debug_id)
                .is_some_and(|(obj, _)| obj.properties.iter().any(|p| &p.name == name)),
            WatchTarget::ContextObject {
                context_debug_id,
                id,
            } => {
                *context_debug_id == self.context_debug_id
                    && self.objects.iter().any(|o| o.find_by_id_string(id))
            }
            WatchTarget::Expression {
                object_debug_id, ..
            }
            | WatchTarget::Object { object_debug_id } => self.find(*object_debug_id).is_some(),
            WatchTarget::File(file) => !file.url.is_empty(),
        }
    }

    fn assign(&mut self, debug_id: DebugId, property: &str, value: Value, is_literal: bool) -> bool {
        let Some(obj) = self.find_mut(debug_id) else {
            return false;
        };
        let binding = if is_literal {
            String::new()
        } else {
            value.as_str().unwrap_or_default().to_string()
        };
        match obj.properties.iter_mut().find(|p| p.name == property) {
            Some(p) => {
                p.value = value;
                p.binding = binding;
            }
            None => obj.properties.push(MockProperty {
                name: property.to_string(),
                value,
                binding,
            }),
        }
        true
    }

    fn reset(&mut self, debug_id: DebugId, property: &str) -> bool {
        let Some(obj) = self.find_mut(debug_id) else {
            return false;
        };
        match obj.properties.iter_mut().find(|p| p.name == property) {
            Some(p) => {
                p.binding.clear();
                p.value = Value::Invalid;
                true
            }
            None => false,
        }
    }

    fn notify(&self, debug_id: DebugId, property: &str, value: &Value) -> Vec<Vec<u8>> {
        let mut ids: Vec<_> = self
            .watches
            .iter()
            .filter(|(_, target)| match target {
                WatchTarget::Property {
                    object_debug_id,
                    name,
                } => *object_debug_id == debug_id && name == property,
                WatchTarget::Object { object_debug_id } => *object_debug_id == debug_id,
                _ => false,
            })
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids.into_iter()
            .map(|watch_id| encode_value_changed(watch_id, debug_id, property, value))
            .collect()
    }

    fn root_context(&self) -> ContextReference {
        ContextReference {
            debug_id: self.context_debug_id,
            name: String::new(),
            objects: self
                .objects
                .iter()
                .map(|obj| self.to_reference(obj, UNSET_DEBUG_ID, 0))
                .collect(),
            contexts: Vec::new(),
        }
    }

    fn snapshot(&self, debug_id: DebugId, levels: usize) -> Option<ObjectReference> {
        self.find(debug_id)
            .map(|(obj, parent)| self.to_reference(obj, parent, levels))
    }

    fn to_reference(&self, obj: &MockObject, parent_id: DebugId, levels: usize) -> ObjectReference {
        let mut reference = ObjectReference {
            parent_id,
            class_name: obj.class_name.clone(),
            id_string: obj.id_string.clone(),
            name: obj.name.clone(),
            source: obj.source.clone(),
            context_debug_id: self.context_debug_id,
            needs_more_data: levels == 0,
            ..ObjectReference::new(obj.debug_id)
        };
        if levels == 0 {
            return reference;
        }
        reference.children = obj
            .children
            .iter()
            .map(|child| self.to_reference(child, obj.debug_id, levels - 1))
            .collect();
        reference.properties = obj
            .properties
            .iter()
            .map(|p| PropertyReference {
                object_debug_id: obj.debug_id,
                name: p.name.clone(),
                value: p.value.clone(),
                value_type_name: type_name(&p.value),
                binding: p.binding.clone(),
                has_notify_signal: true,
            })
            .collect();
        reference
    }
}

fn type_name(value: &Value) -> String {
    match value {
        Value::Invalid => "",
        Value::Bool(_) => "bool",
        Value::Int(_) => "int",
        Value::Double(_) => "double",
        Value::String(_) => "QString",
        Value::List(_) => "QVariantList",
        Value::Object(obj) => obj.class_name(),
    }
    .to_string()
}

pub fn encode_result(query_id: QueryId, kind: ResultKind, result: &QueryResult) -> Vec<u8> {
    let mut w = DebugWriter::new();
    w.write_u8(MSG_RESULT);
    w.write_u32(query_id);
    w.write_u8(kind.to_wire());
    match result {
        QueryResult::Engines(engines) => {
            w.write_u32(engines.len() as u32);
            for engine in engines {
                w.write_string(&engine.name);
                w.write_i32(engine.debug_id);
            }
        }
        QueryResult::RootContext(context) => {
            w.write_bool(context.is_some());
            if let Some(context) = context {
                write_context(&mut w, context);
            }
        }
        QueryResult::Object(object) => {
            w.write_bool(object.is_some());
            if let Some(object) = object {
                write_object(&mut w, object);
            }
        }
        QueryResult::Expression(value) => w.write_value(value),
        QueryResult::Accepted(accepted) => w.write_bool(*accepted),
    }
    w.into_vec()
}

pub fn encode_value_changed(
    query_id: QueryId,
    debug_id: DebugId,
    name: &str,
    value: &Value,
) -> Vec<u8> {
    let mut w = DebugWriter::new();
    w.write_u8(MSG_VALUE_CHANGED);
    w.write_u32(query_id);
    w.write_i32(debug_id);
    w.write_string(name);
    w.write_value(value);
    w.into_vec()
}

pub fn encode_new_objects() -> Vec<u8> {
    let mut w = DebugWriter::new();
    w.write_u8(MSG_NEW_OBJECTS);
    w.write_u32(0);
    w.into_vec()
}

pub fn encode_status(enabled: bool) -> Vec<u8> {
    let mut w = DebugWriter::new();
    w.write_u8(MSG_STATUS);
    w.write_u32(0);
    w.write_bool(enabled);
    w.into_vec()
}

/// Writes `object` the way the remote does: objects flagged
/// `needs_more_data` go out simple.
pub fn write_object(w: &mut DebugWriter, object: &ObjectReference) {
    w.write_i32(object.debug_id);
    w.write_string(&object.class_name);
    w.write_string(&object.id_string);
    w.write_string(&object.name);
    w.write_i32(object.parent_id);
    w.write_file(&object.source);
    w.write_i32(object.context_debug_id);
    w.write_bool(object.needs_more_data);
    if object.needs_more_data {
        return;
    }

    w.write_u32(object.children.len() as u32);
    w.write_bool(object.children.iter().any(|c| !c.needs_more_data));
    for child in &object.children {
        write_object(w, child);
    }

    w.write_u32(object.properties.len() as u32);
    for p in &object.properties {
        w.write_string(&p.name);
        w.write_value(&p.value);
        w.write_string(&p.value_type_name);
        w.write_string(&p.binding);
        w.write_bool(p.has_notify_signal);
    }
}

pub fn write_context(w: &mut DebugWriter, context: &ContextReference) {
    w.write_string(&context.name);
    w.write_i32(context.debug_id);
    w.write_u32(context.contexts.len() as u32);
    for child in &context.contexts {
        write_context(w, child);
    }
    w.write_u32(context.objects.len() as u32);
    for object in &context.objects {
        write_object(w, object);
    }
}
