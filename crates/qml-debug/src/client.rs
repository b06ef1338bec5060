use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::poison::lock;
use crate::reference::{
    ContextReference, DebugId, EngineReference, FileReference, ObjectReference,
    PropertyReference, Value, UNSET_DEBUG_ID,
};
use crate::wire::{decode_message, InboundMessage, QueryIds, Request, WatchTarget};
use crate::{DebugError, QueryId, Result};

pub use crate::wire::{QueryResult, ResultKind};

/// Outbound half of the Debug Connection.
pub trait Transport: Send + Sync {
    /// Queues one message payload for transmission.
    fn send(&self, payload: Vec<u8>) -> Result<()>;
}

impl Transport for mpsc::UnboundedSender<Vec<u8>> {
    fn send(&self, payload: Vec<u8>) -> Result<()> {
        mpsc::UnboundedSender::send(self, payload)
            .map_err(|_| DebugError::Connection("outbound channel closed".to_string()))
    }
}

impl Transport for mpsc::Sender<Vec<u8>> {
    fn send(&self, payload: Vec<u8>) -> Result<()> {
        self.try_send(payload).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                DebugError::Connection("outbound channel full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                DebugError::Connection("outbound channel closed".to_string())
            }
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ClientStatus {
    Unconnected,
    Connecting,
    Connected,
    Closing,
    Error,
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconnected => write!(f, "unconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Closing => write!(f, "closing"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Lifecycle notifications from the Debug Connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opening,
    Opened,
    Closing,
    Closed,
    Failed(String),
}

impl ClientStatus {
    /// Statuses passed through, in order, when `event` arrives in `self`.
    ///
    /// Intermediate states are filled in so subscribers never see a skipped
    /// step; events that make no sense in the current state yield nothing.
    pub fn transitions(self, event: &ConnectionEvent) -> Vec<ClientStatus> {
        use ClientStatus::*;
        match (self, event) {
            (Unconnected | Error, ConnectionEvent::Opening) => vec![Connecting],
            (Unconnected | Error, ConnectionEvent::Opened) => vec![Connecting, Connected],
            (Connecting, ConnectionEvent::Opened) => vec![Connected],
            (Connecting | Connected, ConnectionEvent::Closing) => vec![Closing],
            (Connected, ConnectionEvent::Closed) => vec![Closing, Unconnected],
            (Connecting | Closing | Error, ConnectionEvent::Closed) => vec![Unconnected],
            (Error, ConnectionEvent::Failed(_)) => Vec::new(),
            (_, ConnectionEvent::Failed(_)) => vec![Error],
            _ => Vec::new(),
        }
    }
}

/// Notification published to session subscribers.
#[derive(Clone, Debug, PartialEq)]
pub enum DebugEvent {
    Status(ClientStatus),
    /// Reply to the request that returned `query_id`.
    Result {
        query_id: QueryId,
        kind: ResultKind,
        result: QueryResult,
    },
    /// A watched value changed; `query_id` is the watch id.
    ValueChanged {
        query_id: QueryId,
        debug_id: DebugId,
        name: String,
        value: Value,
    },
    /// The remote created objects; re-query to see them.
    NewObjects,
}

struct Inner<T> {
    transport: T,
    ids: QueryIds,
    status: Mutex<ClientStatus>,
    events: broadcast::Sender<DebugEvent>,
    service_name: String,
}

/// Client session for the engine debug service.
///
/// Requests are fire-and-forget: every query method returns the id that the
/// matching [`DebugEvent::Result`] will carry. The session does not remember
/// in-flight ids; callers keep their own id-to-continuation map.
pub struct EngineDebugClient<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for EngineDebugClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> EngineDebugClient<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, &ClientConfig::default())
    }

    pub fn with_config(transport: T, config: &ClientConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_size.max(1));
        Self {
            inner: Arc::new(Inner {
                transport,
                ids: QueryIds::starting_at(config.first_query_id),
                status: Mutex::new(ClientStatus::Unconnected),
                events,
                service_name: config.service_name.clone(),
            }),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.inner.service_name
    }

    pub fn status(&self) -> ClientStatus {
        *lock(&self.inner.status, "EngineDebugClient::status")
    }

    /// Subscribes to events published from now on; earlier events, including
    /// status changes, are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<DebugEvent> {
        self.inner.events.subscribe()
    }

    pub fn on_connection_event(&self, event: ConnectionEvent) {
        let mut status = lock(&self.inner.status, "EngineDebugClient::on_connection_event");
        let current = *status;
        let path = current.transitions(&event);
        if path.is_empty() {
            tracing::debug!(
                target: "qml_debug",
                service = %self.inner.service_name,
                status = %current,
                ?event,
                "ignoring connection event"
            );
            return;
        }
        if let ConnectionEvent::Failed(reason) = &event {
            tracing::warn!(target: "qml_debug", service = %self.inner.service_name, %reason, "debug connection failed");
        }
        // Published under the lock so concurrent events cannot interleave.
        let mut from = current;
        for next in path {
            tracing::info!(
                target: "qml_debug",
                service = %self.inner.service_name,
                %from,
                to = %next,
                "status changed"
            );
            *status = next;
            from = next;
            let _ = self.inner.events.send(DebugEvent::Status(next));
        }
    }

    /// Handles one inbound payload from the Debug Connection.
    ///
    /// A malformed payload is dropped and reported as
    /// [`DebugError::Protocol`]; the session stays usable.
    pub fn on_message(&self, payload: &[u8]) -> Result<()> {
        let message = match decode_message(payload) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(
                    target: "qml_debug",
                    len = payload.len(),
                    error = %err,
                    "dropping malformed message"
                );
                return Err(err);
            }
        };

        match message {
            InboundMessage::Result {
                query_id,
                kind,
                result,
            } => {
                tracing::debug!(target: "qml_debug", query_id, kind = kind.type_tag(), "result");
                self.publish(DebugEvent::Result {
                    query_id,
                    kind,
                    result,
                });
            }
            InboundMessage::ValueChanged {
                query_id,
                debug_id,
                name,
                value,
            } => {
                tracing::trace!(target: "qml_debug", query_id, debug_id, %name, "value changed");
                self.publish(DebugEvent::ValueChanged {
                    query_id,
                    debug_id,
                    name,
                    value,
                });
            }
            InboundMessage::NewObjects => self.publish(DebugEvent::NewObjects),
            InboundMessage::Status { enabled } => {
                let current = self.status();
                if enabled && current == ClientStatus::Error {
                    self.on_connection_event(ConnectionEvent::Opened);
                } else if !enabled && current == ClientStatus::Connected {
                    self.on_connection_event(ConnectionEvent::Failed(
                        "remote debug service unavailable".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn publish(&self, event: DebugEvent) {
        // No subscribers is fine; nothing is queued for late ones.
        let _ = self.inner.events.send(event);
    }

    fn send(&self, request: Request) -> Result<QueryId> {
        // Held until the payload is queued so a concurrent close cannot slip
        // in between the check and the send.
        let status = lock(&self.inner.status, "EngineDebugClient::send");
        if *status != ClientStatus::Connected {
            let current = *status;
            tracing::debug!(target: "qml_debug", status = %current, opcode = request.opcode(), "not connected; request dropped");
            return Err(DebugError::NotConnected);
        }

        let query_id = if request.expects_reply() {
            self.inner.ids.next_id()
        } else {
            0
        };
        self.inner.transport.send(request.encode(query_id))?;
        drop(status);
        tracing::debug!(target: "qml_debug", query_id, opcode = request.opcode(), "sent request");
        Ok(query_id)
    }

    pub fn add_property_watch(&self, property: &PropertyReference) -> Result<QueryId> {
        self.send(Request::AddWatch(WatchTarget::Property {
            object_debug_id: property.object_debug_id(),
            name: property.name().to_string(),
        }))
    }

    /// Watches the object with QML id `id` inside `context`.
    pub fn add_context_watch(&self, context: &ContextReference, id: &str) -> Result<QueryId> {
        self.send(Request::AddWatch(WatchTarget::ContextObject {
            context_debug_id: context.debug_id(),
            id: id.to_string(),
        }))
    }

    pub fn add_expression_watch(
        &self,
        object: &ObjectReference,
        expression: &str,
    ) -> Result<QueryId> {
        self.send(Request::AddWatch(WatchTarget::Expression {
            object_debug_id: object.debug_id(),
            expression: expression.to_string(),
        }))
    }

    pub fn add_object_watch(&self, object: &ObjectReference) -> Result<QueryId> {
        self.send(Request::AddWatch(WatchTarget::Object {
            object_debug_id: object.debug_id(),
        }))
    }

    pub fn add_file_watch(&self, file: &FileReference) -> Result<QueryId> {
        self.send(Request::AddWatch(WatchTarget::File(file.clone())))
    }

    /// Cancels a watch. Unknown ids are ignored by the remote.
    pub fn remove_watch(&self, watch_id: QueryId) -> Result<()> {
        self.send(Request::RemoveWatch { watch_id }).map(|_| ())
    }

    pub fn query_available_engines(&self) -> Result<QueryId> {
        self.send(Request::QueryEngines)
    }

    pub fn query_root_contexts(&self, engine: &EngineReference) -> Result<QueryId> {
        self.send(Request::QueryRootContexts {
            engine_debug_id: engine.debug_id(),
        })
    }

    /// Fetches the object with its properties; children come back simple.
    pub fn query_object(&self, object: &ObjectReference) -> Result<QueryId> {
        self.send(Request::QueryObject {
            object_debug_id: object.debug_id(),
            recursive: false,
        })
    }

    pub fn query_object_recursive(&self, object: &ObjectReference) -> Result<QueryId> {
        self.send(Request::QueryObject {
            object_debug_id: object.debug_id(),
            recursive: true,
        })
    }

    /// Evaluates `expression` in the scope of an object, or of `engine_id`
    /// when given.
    pub fn query_expression_result(
        &self,
        object_debug_id: DebugId,
        expression: &str,
        engine_id: Option<DebugId>,
    ) -> Result<QueryId> {
        self.send(Request::QueryExpression {
            object_debug_id,
            expression: expression.to_string(),
            engine_id: engine_id.unwrap_or(UNSET_DEBUG_ID),
        })
    }

    pub fn set_binding_for_object(
        &self,
        object_debug_id: DebugId,
        property_name: &str,
        binding: impl Into<Value>,
        is_literal: bool,
        source_file: &str,
        source_line: i32,
    ) -> Result<QueryId> {
        self.send(Request::SetBinding {
            object_debug_id,
            property: property_name.to_string(),
            binding: binding.into(),
            is_literal,
            source_file: source_file.to_string(),
            source_line,
        })
    }

    pub fn reset_binding_for_object(
        &self,
        object_debug_id: DebugId,
        property_name: &str,
    ) -> Result<QueryId> {
        self.send(Request::ResetBinding {
            object_debug_id,
            property: property_name.to_string(),
        })
    }

    pub fn set_method_body(
        &self,
        object_debug_id: DebugId,
        method_name: &str,
        body: &str,
    ) -> Result<QueryId> {
        self.send(Request::SetMethodBody {
            object_debug_id,
            method: method_name.to_string(),
            body: body.to_string(),
        })
    }
}

/// Feeds inbound payloads into `client` until the channel closes or
/// `shutdown` fires, then reports the connection as closed.
pub async fn pump<T: Transport>(
    client: EngineDebugClient<T>,
    mut inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    shutdown: CancellationToken,
) {
    loop {
        let payload = tokio::select! {
            _ = shutdown.cancelled() => break,
            payload = inbound.recv() => payload,
        };
        let Some(payload) = payload else {
            break;
        };
        // Malformed messages are logged by `on_message` and skipped.
        let _ = client.on_message(&payload);
    }
    client.on_connection_event(ConnectionEvent::Closed);
}
