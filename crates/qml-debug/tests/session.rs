use std::time::Duration;

use qml_debug::wire::mock::{encode_new_objects, MockEngine, MockObject};
use qml_debug::{
    pump, ClientStatus, ConnectionEvent, DebugError, DebugEvent, EngineDebugClient,
    EngineReference, FileReference, ObjectReference, QueryId, QueryResult, ResultKind, Value,
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type Client = EngineDebugClient<mpsc::UnboundedSender<Vec<u8>>>;

struct Harness {
    client: Client,
    events: broadcast::Receiver<DebugEvent>,
    inject: mpsc::UnboundedSender<Vec<u8>>,
    shutdown: CancellationToken,
    pump: JoinHandle<()>,
}

fn start(engine: MockEngine) -> Harness {
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    let (replies_tx, replies_rx) = mpsc::unbounded_channel();

    let client = EngineDebugClient::new(requests_tx);
    client.on_connection_event(ConnectionEvent::Opened);
    let events = client.subscribe();

    tokio::spawn(engine.serve(requests_rx, replies_tx.clone()));
    let shutdown = CancellationToken::new();
    let pump = tokio::spawn(pump(client.clone(), replies_rx, shutdown.clone()));

    Harness {
        client,
        events,
        inject: replies_tx,
        shutdown,
        pump,
    }
}

fn scene() -> MockEngine {
    MockEngine::new().with_object(
        MockObject::new(3, "Item")
            .with_id("root")
            .with_source("file:///main.qml", 1, 1)
            .with_property("width", 640)
            .with_binding("height", 480, "parent.height")
            .with_child(
                MockObject::new(4, "Rectangle")
                    .with_id("box")
                    .with_name("panel")
                    .with_property("color", "red")
                    .with_child(MockObject::new(5, "Text").with_property("text", "hello")),
            ),
    )
}

async fn next_event(events: &mut broadcast::Receiver<DebugEvent>) -> DebugEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn result_for(
    events: &mut broadcast::Receiver<DebugEvent>,
    wanted: QueryId,
) -> (ResultKind, QueryResult) {
    loop {
        if let DebugEvent::Result {
            query_id,
            kind,
            result,
        } = next_event(events).await
        {
            if query_id == wanted {
                return (kind, result);
            }
        }
    }
}

async fn object_for(
    events: &mut broadcast::Receiver<DebugEvent>,
    wanted: QueryId,
) -> ObjectReference {
    match result_for(events, wanted).await {
        (ResultKind::Object, QueryResult::Object(Some(object))) => object,
        other => panic!("expected object result, got {other:?}"),
    }
}

#[tokio::test]
async fn engines_contexts_and_objects() {
    let mut h = start(scene());
    assert_eq!(h.client.status(), ClientStatus::Connected);

    let id = h.client.query_available_engines().unwrap();
    let engines = match result_for(&mut h.events, id).await {
        (ResultKind::Engines, QueryResult::Engines(engines)) => engines,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(engines.len(), 1);
    assert_eq!(engines[0].to_string(), "(Engine 1/main)");

    let id = h.client.query_root_contexts(&engines[0]).unwrap();
    let context = match result_for(&mut h.events, id).await {
        (ResultKind::RootContext, QueryResult::RootContext(Some(context))) => context,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(context.objects().len(), 1);
    let root = &context.objects()[0];
    assert_eq!(root.debug_id(), 3);
    assert_eq!(root.context_debug_id(), context.debug_id());
    assert!(root.needs_more_data());

    let id = h.client.query_object(root).unwrap();
    let object = object_for(&mut h.events, id).await;
    assert_eq!(object.debug_id(), 3);
    assert_eq!(object.class_name(), "Item");
    assert_eq!(object.id_string(), "root");
    assert_eq!(object.properties().len(), 2);
    assert_eq!(object.property("height").unwrap().binding(), "parent.height");
    assert_eq!(object.children().len(), 1);
    assert_eq!(object.children()[0].debug_id(), 4);
    assert_eq!(object.children()[0].name(), "panel");
    assert!(object.children()[0].needs_more_data());
}

#[tokio::test]
async fn unknown_engine_has_no_root_context() {
    let mut h = start(scene());
    let id = h.client.query_root_contexts(&EngineReference::new(42)).unwrap();
    assert_eq!(
        result_for(&mut h.events, id).await,
        (ResultKind::RootContext, QueryResult::RootContext(None))
    );
}

#[tokio::test]
async fn truncated_reply_is_completed_by_requery_and_merge() {
    let mut h = start(scene().with_max_depth(2));

    let id = h.client.query_object_recursive(&ObjectReference::new(3)).unwrap();
    let mut tree = object_for(&mut h.events, id).await;
    let branch = &tree.children()[0];
    assert!(!branch.needs_more_data());
    let leaf = &branch.children()[0];
    assert_eq!(leaf.debug_id(), 5);
    assert!(leaf.needs_more_data());
    assert!(leaf.properties().is_empty());

    let id = h.client.query_object_recursive(leaf).unwrap();
    let full_leaf = object_for(&mut h.events, id).await;
    assert!(!full_leaf.needs_more_data());

    assert_eq!(tree.insert_object_in_tree(&full_leaf), Some(3));
    let merged = &tree.children()[0].children()[0];
    assert_eq!(merged.property("text").unwrap().value(), &Value::from("hello"));
}

#[tokio::test]
async fn property_watch_reports_changes_until_removed() {
    let mut h = start(scene());

    let id = h.client.query_object(&ObjectReference::new(4)).unwrap();
    let rect = object_for(&mut h.events, id).await;
    let color = rect.property("color").unwrap();

    let watch = h.client.add_property_watch(color).unwrap();
    assert_eq!(
        result_for(&mut h.events, watch).await,
        (ResultKind::Watch, QueryResult::Accepted(true))
    );

    let id = h
        .client
        .set_binding_for_object(4, "color", "blue", true, "main.qml", 7)
        .unwrap();
    assert_eq!(
        next_event(&mut h.events).await,
        DebugEvent::Result {
            query_id: id,
            kind: ResultKind::SetBinding,
            result: QueryResult::Accepted(true),
        }
    );
    assert_eq!(
        next_event(&mut h.events).await,
        DebugEvent::ValueChanged {
            query_id: watch,
            debug_id: 4,
            name: "color".to_string(),
            value: Value::from("blue"),
        }
    );

    h.client.remove_watch(watch).unwrap();
    let id = h
        .client
        .set_binding_for_object(4, "color", "green", true, "main.qml", 7)
        .unwrap();
    assert_eq!(
        result_for(&mut h.events, id).await,
        (ResultKind::SetBinding, QueryResult::Accepted(true))
    );
    let probe = h.client.query_available_engines().unwrap();
    match next_event(&mut h.events).await {
        DebugEvent::Result { query_id, .. } => assert_eq!(query_id, probe),
        other => panic!("watch still active: {other:?}"),
    }
}

#[tokio::test]
async fn watch_kinds_are_acknowledged() {
    let mut h = start(scene());
    let root = ObjectReference::new(3);

    let id = h.client.query_root_contexts(&EngineReference::new(1)).unwrap();
    let context = match result_for(&mut h.events, id).await {
        (_, QueryResult::RootContext(Some(context))) => context,
        other => panic!("unexpected {other:?}"),
    };

    let cases = [
        (h.client.add_object_watch(&root).unwrap(), true),
        (h.client.add_expression_watch(&root, "width * 2").unwrap(), true),
        (h.client.add_context_watch(&context, "box").unwrap(), true),
        (h.client.add_context_watch(&context, "missing").unwrap(), false),
        (
            h.client
                .add_file_watch(&FileReference::new("file:///main.qml", -1, -1))
                .unwrap(),
            true,
        ),
        (h.client.add_object_watch(&ObjectReference::new(99)).unwrap(), false),
    ];
    for (id, accepted) in cases {
        assert_eq!(
            result_for(&mut h.events, id).await,
            (ResultKind::Watch, QueryResult::Accepted(accepted)),
            "watch {id}"
        );
    }
}

#[tokio::test]
async fn edits_and_expressions() {
    let mut h = start(scene());

    let id = h.client.query_expression_result(3, "width", None).unwrap();
    assert_eq!(
        result_for(&mut h.events, id).await,
        (ResultKind::Expression, QueryResult::Expression(Value::Int(640)))
    );

    let id = h.client.reset_binding_for_object(3, "height").unwrap();
    assert_eq!(
        result_for(&mut h.events, id).await,
        (ResultKind::ResetBinding, QueryResult::Accepted(true))
    );
    let id = h.client.query_object(&ObjectReference::new(3)).unwrap();
    let object = object_for(&mut h.events, id).await;
    assert_eq!(object.property("height").unwrap().binding(), "");

    let id = h
        .client
        .set_method_body(3, "onClicked", "console.log('hi')")
        .unwrap();
    assert_eq!(
        result_for(&mut h.events, id).await,
        (ResultKind::SetMethodBody, QueryResult::Accepted(true))
    );

    let id = h.client.set_method_body(77, "f", "").unwrap();
    assert_eq!(
        result_for(&mut h.events, id).await,
        (ResultKind::SetMethodBody, QueryResult::Accepted(false))
    );
}

#[tokio::test]
async fn removing_unknown_watch_is_silent() {
    let mut h = start(scene());
    h.client.remove_watch(4242).unwrap();

    let probe = h.client.query_available_engines().unwrap();
    match next_event(&mut h.events).await {
        DebugEvent::Result { query_id, .. } => assert_eq!(query_id, probe),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(h.client.status(), ClientStatus::Connected);
}

#[tokio::test]
async fn bad_message_does_not_tear_down_the_session() {
    let mut h = start(scene());
    h.inject.send(vec![9, 0, 0, 0, 0]).unwrap();
    h.inject.send(encode_new_objects()).unwrap();

    assert_eq!(next_event(&mut h.events).await, DebugEvent::NewObjects);
    assert_eq!(h.client.status(), ClientStatus::Connected);
}

#[tokio::test]
async fn shutdown_closes_the_session() {
    let mut h = start(scene());

    h.shutdown.cancel();
    h.pump.await.unwrap();

    assert_eq!(next_event(&mut h.events).await, DebugEvent::Status(ClientStatus::Closing));
    assert_eq!(next_event(&mut h.events).await, DebugEvent::Status(ClientStatus::Unconnected));
    assert!(matches!(
        h.client.query_available_engines(),
        Err(DebugError::NotConnected)
    ));
}

#[tokio::test]
async fn decoded_trees_serialize_for_tooling() {
    let mut h = start(scene());
    let id = h.client.query_object(&ObjectReference::new(3)).unwrap();
    let object = object_for(&mut h.events, id).await;

    let json = serde_json::to_value(&object).unwrap();
    assert_eq!(json["class_name"], "Item");
    assert_eq!(json["properties"][0]["name"], "width");
    assert_eq!(json["properties"][0]["value"]["type"], "int");
    assert_eq!(json["properties"][0]["value"]["value"], 640);
    assert_eq!(json["children"][0]["debug_id"], 4);
}
