/// Client communication against a scripted manager on the in-memory bus.
use collab_common::{
    CollabFail, CollabReply, CollabRequest, CollabResponse, GetDocumentRequest,
    GetDocumentResponse, PullEventsRequest, PushEventsRequest, PushEventsResponse,
};
use collab_comms::{
    ClientCommunication, ClientCommunicationOptions, InMemoryBus, Message, MessageBus,
    MessageKind, NetworkingError, ResponseBody, Subscription,
};
use collab_document::{TextDocument, TextStep};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Answers requests with `reply` built from the decoded request
fn scripted_manager(
    bus: &InMemoryBus,
    reply: impl Fn(CollabRequest<TextStep>) -> ResponseBody + Send + Sync + 'static,
) -> Subscription {
    let reply_bus = bus.clone();
    bus.receive_messages(
        "manager",
        Arc::new(move |message: Message| {
            if message.kind != MessageKind::Request {
                return;
            }
            let request: CollabRequest<TextStep> =
                serde_json::from_value(message.payload.clone()).unwrap();
            let response = Message::response_to(&message, reply(request)).unwrap();
            reply_bus.publish(response);
        }),
    )
}

fn ok(reply: CollabReply<TextStep>) -> ResponseBody {
    ResponseBody::Ok(serde_json::to_value(reply).unwrap())
}

fn client(bus: &InMemoryBus, signal: CancellationToken, timeout_ms: u64) -> ClientCommunication<TextStep> {
    ClientCommunication::new(ClientCommunicationOptions {
        client_id: "client-1".to_string(),
        manager_id: "manager".to_string(),
        bus: Arc::new(bus.clone()),
        signal,
        request_timeout: Some(Duration::from_millis(timeout_ms)),
    })
}

#[tokio::test]
async fn test_get_document() {
    let bus = InMemoryBus::new();
    let _manager = scripted_manager(&bus, |request| match request {
        CollabRequest::GetDocument(body) => {
            assert_eq!(body.doc_id, "doc1");
            ok(Ok(CollabResponse::GetDocument(GetDocumentResponse {
                doc: TextDocument::from("hello"),
                version: 4,
            })))
        }
        other => panic!("unexpected {:?}", other),
    });

    let comms = client(&bus, CancellationToken::new(), 1000);
    let response = comms
        .get_document(GetDocumentRequest {
            doc_id: "doc1".to_string(),
            user_id: "u1".to_string(),
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(response.doc.as_str(), "hello");
    assert_eq!(response.version, 4);
}

#[tokio::test]
async fn test_typed_failure_passes_through() {
    let bus = InMemoryBus::new();
    let _manager = scripted_manager(&bus, |_| ok(Err(CollabFail::Conflict)));

    let comms = client(&bus, CancellationToken::new(), 1000);
    let result = comms
        .push_events(PushEventsRequest {
            doc_id: "doc1".to_string(),
            user_id: "u1".to_string(),
            client_id: "client-1".to_string(),
            version: 0,
            steps: vec![TextStep::insert(0, "x")],
        })
        .await
        .unwrap();

    assert_eq!(result, Err(CollabFail::Conflict));
}

#[tokio::test]
async fn test_timeout_becomes_manager_unresponsive() {
    let bus = InMemoryBus::new();
    let comms = client(&bus, CancellationToken::new(), 20);

    let result = comms
        .pull_events(PullEventsRequest {
            doc_id: "doc1".to_string(),
            user_id: "u1".to_string(),
            version: 0,
            wait_timeout_ms: None,
        })
        .await
        .unwrap();

    assert!(matches!(result, Err(CollabFail::ManagerUnresponsive)));
}

#[tokio::test]
async fn test_other_errors_are_returned() {
    let bus = InMemoryBus::new();
    let _manager = scripted_manager(&bus, |_| ResponseBody::Error("Must have user id".to_string()));

    let comms = client(&bus, CancellationToken::new(), 1000);
    let result = comms
        .get_document(GetDocumentRequest {
            doc_id: "doc1".to_string(),
            user_id: String::new(),
        })
        .await;

    assert!(matches!(result, Err(NetworkingError::Remote(_))));
}

#[tokio::test]
async fn test_mismatched_response_type_is_an_error() {
    let bus = InMemoryBus::new();
    let _manager = scripted_manager(&bus, |_| {
        ok(Ok(CollabResponse::PushEvents(PushEventsResponse { version: 1 })))
    });

    let comms = client(&bus, CancellationToken::new(), 1000);
    let result = comms
        .get_document(GetDocumentRequest {
            doc_id: "doc1".to_string(),
            user_id: "u1".to_string(),
        })
        .await;

    assert!(matches!(result, Err(NetworkingError::UnexpectedResponse { .. })));
}

#[tokio::test]
async fn test_abort_removes_listener() {
    let bus = InMemoryBus::new();
    let signal = CancellationToken::new();
    let comms = client(&bus, signal.clone(), 5_000);

    assert!(comms.is_listening());
    assert_eq!(bus.handler_count("client-1"), 1);

    signal.cancel();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(!comms.is_listening());
    assert_eq!(bus.handler_count("client-1"), 0);

    let result = comms
        .get_document(GetDocumentRequest {
            doc_id: "doc1".to_string(),
            user_id: "u1".to_string(),
        })
        .await;
    assert!(matches!(result, Err(NetworkingError::Aborted)));
}
