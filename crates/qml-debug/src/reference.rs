use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;

/// Remote-assigned identifier of an engine, context or object.
pub type DebugId = i32;

/// Marker for a debug id, line or column the remote did not provide.
pub const UNSET_DEBUG_ID: DebugId = -1;

/// Dynamically typed value carried by properties, expression results and
/// bindings.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    #[default]
    Invalid,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    List(Vec<Value>),
    /// Reference to another object; only its debug id and class name are known.
    Object(ObjectReference),
}

impl Value {
    pub fn is_valid(&self) -> bool {
        !matches!(self, Value::Invalid)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectReference> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

/// A source location. Line and column are `-1` when unknown.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileReference {
    pub(crate) url: String,
    pub(crate) line: i32,
    pub(crate) column: i32,
}

impl Default for FileReference {
    fn default() -> Self {
        Self {
            url: String::new(),
            line: -1,
            column: -1,
        }
    }
}

impl FileReference {
    /// Location used to register a file watch.
    pub fn new(url: impl Into<String>, line: i32, column: i32) -> Self {
        Self {
            url: url.into(),
            line,
            column,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn line(&self) -> i32 {
        self.line
    }

    pub fn column(&self) -> i32 {
        self.column
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EngineReference {
    pub(crate) debug_id: DebugId,
    pub(crate) name: String,
}

impl Default for EngineReference {
    fn default() -> Self {
        Self::new(UNSET_DEBUG_ID)
    }
}

impl EngineReference {
    pub fn new(debug_id: DebugId) -> Self {
        Self {
            debug_id,
            name: String::new(),
        }
    }

    pub fn debug_id(&self) -> DebugId {
        self.debug_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for EngineReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(Engine {}/{})", self.debug_id, self.name)
    }
}

/// One property of a remote object.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PropertyReference {
    pub(crate) object_debug_id: DebugId,
    pub(crate) name: String,
    pub(crate) value: Value,
    pub(crate) value_type_name: String,
    pub(crate) binding: String,
    pub(crate) has_notify_signal: bool,
}

impl Default for PropertyReference {
    fn default() -> Self {
        Self {
            object_debug_id: UNSET_DEBUG_ID,
            name: String::new(),
            value: Value::Invalid,
            value_type_name: String::new(),
            binding: String::new(),
            has_notify_signal: false,
        }
    }
}

impl PropertyReference {
    /// Debug id of the object owning this property.
    pub fn object_debug_id(&self) -> DebugId {
        self.object_debug_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn value_type_name(&self) -> &str {
        &self.value_type_name
    }

    /// Binding expression text; empty when the property holds a plain value.
    pub fn binding(&self) -> &str {
        &self.binding
    }

    pub fn has_notify_signal(&self) -> bool {
        self.has_notify_signal
    }
}

/// Snapshot of a live object on the remote side.
///
/// Equality (and hashing) only look at the debug id, so two snapshots of the
/// same object taken at different times compare equal. Compare fields
/// explicitly when the contents matter.
#[derive(Clone, Debug, Serialize)]
pub struct ObjectReference {
    pub(crate) debug_id: DebugId,
    pub(crate) parent_id: DebugId,
    pub(crate) class_name: String,
    pub(crate) id_string: String,
    pub(crate) name: String,
    pub(crate) source: FileReference,
    pub(crate) context_debug_id: DebugId,
    pub(crate) needs_more_data: bool,
    pub(crate) properties: Vec<PropertyReference>,
    pub(crate) children: Vec<ObjectReference>,
}

impl Default for ObjectReference {
    fn default() -> Self {
        Self::new(UNSET_DEBUG_ID)
    }
}

impl ObjectReference {
    /// Reference to an object known only by id, e.g. to issue a query for it.
    pub fn new(debug_id: DebugId) -> Self {
        Self {
            debug_id,
            parent_id: UNSET_DEBUG_ID,
            class_name: String::new(),
            id_string: String::new(),
            name: String::new(),
            source: FileReference::default(),
            context_debug_id: UNSET_DEBUG_ID,
            needs_more_data: false,
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn debug_id(&self) -> DebugId {
        self.debug_id
    }

    pub fn parent_id(&self) -> DebugId {
        self.parent_id
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// The object's QML `id`, empty if it has none.
    pub fn id_string(&self) -> &str {
        &self.id_string
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &FileReference {
        &self.source
    }

    pub fn context_debug_id(&self) -> DebugId {
        self.context_debug_id
    }

    /// Whether the remote sent identity only; re-query with
    /// `query_object_recursive` to get properties and children.
    pub fn needs_more_data(&self) -> bool {
        self.needs_more_data
    }

    pub fn properties(&self) -> &[PropertyReference] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertyReference> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn children(&self) -> &[ObjectReference] {
        &self.children
    }

    /// Replaces the node in this subtree that shares `object`'s debug id.
    ///
    /// The search is depth-first over the children; the first match is
    /// replaced in place, keeping its position among its siblings. Returns
    /// this object's debug id on success and `None` when no node in the
    /// subtree matched, in which case the tree is left untouched.
    pub fn insert_object_in_tree(&mut self, object: &ObjectReference) -> Option<DebugId> {
        for child in &mut self.children {
            if child.debug_id == object.debug_id {
                *child = object.clone();
                return Some(self.debug_id);
            }
            if child.insert_object_in_tree(object).is_some() {
                return Some(self.debug_id);
            }
        }
        None
    }
}

impl PartialEq for ObjectReference {
    fn eq(&self, other: &Self) -> bool {
        self.debug_id == other.debug_id
    }
}

impl Eq for ObjectReference {}

impl Hash for ObjectReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.debug_id.hash(state);
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = if self.id_string.is_empty() {
            &self.class_name
        } else {
            &self.id_string
        };
        write!(f, "(Object {}/{})", self.debug_id, label)
    }
}

/// A naming scope within an engine, holding objects and nested contexts.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ContextReference {
    pub(crate) debug_id: DebugId,
    pub(crate) name: String,
    pub(crate) objects: Vec<ObjectReference>,
    pub(crate) contexts: Vec<ContextReference>,
}

impl Default for ContextReference {
    fn default() -> Self {
        Self {
            debug_id: UNSET_DEBUG_ID,
            name: String::new(),
            objects: Vec::new(),
            contexts: Vec::new(),
        }
    }
}

impl ContextReference {
    pub fn debug_id(&self) -> DebugId {
        self.debug_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn objects(&self) -> &[ObjectReference] {
        &self.objects
    }

    pub fn contexts(&self) -> &[ContextReference] {
        &self.contexts
    }
}

impl fmt::Display for ContextReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(Context {}/{})", self.debug_id, self.name)
    }
}
