/// Clients editing one document through a live manager on the in-memory bus.
use collab_client::{ClientError, CollabClient, CollabClientOptions, CollabState};
use collab_common::{CollabFail, CollabRequest};
use collab_comms::InMemoryBus;
use collab_document::{TextDocument, TextStep};
use collab_server::{Manager, ManagerConfig, ManagerEndpoint, ManagerOptions, MemoryDisk};
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Server {
    bus: InMemoryBus,
    manager: Arc<Manager<TextStep>>,
    _endpoint: ManagerEndpoint,
}

fn options_for(text: &str, config: ManagerConfig) -> ManagerOptions<TextStep> {
    let disk = Arc::new(MemoryDisk::<TextDocument>::new().with_doc("doc1", text.into()));
    ManagerOptions::new(config, disk)
}

fn serve_with(opts: ManagerOptions<TextStep>) -> Server {
    let bus = InMemoryBus::new();
    let manager = Arc::new(Manager::new(opts));
    let endpoint = ManagerEndpoint::attach(manager.clone(), Arc::new(bus.clone()), "manager");
    Server {
        bus,
        manager,
        _endpoint: endpoint,
    }
}

fn serve(text: &str, config: ManagerConfig) -> Server {
    serve_with(options_for(text, config))
}

fn config() -> ManagerConfig {
    ManagerConfig {
        instance_cleanup_interval_ms: 0,
        user_wait_timeout_ms: 2_000,
        ..ManagerConfig::default()
    }
}

fn options(bus: &InMemoryBus, name: &str, manager_id: &str) -> CollabClientOptions {
    CollabClientOptions {
        doc_id: "doc1".to_string(),
        user_id: name.to_string(),
        client_id: format!("{}-session", name),
        manager_id: manager_id.to_string(),
        bus: Arc::new(bus.clone()),
        signal: CancellationToken::new(),
        request_timeout: Some(Duration::from_secs(3)),
        pull_wait: Some(Duration::from_secs(1)),
    }
}

async fn connect(server: &Server, name: &str) -> CollabClient<TextStep> {
    CollabClient::connect(options(&server.bus, name, "manager"))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_concurrent_edits_converge() {
    let server = serve("hello", config());
    let mut alice = connect(&server, "alice").await;
    let mut bob = connect(&server, "bob").await;

    alice.apply_local(vec![TextStep::insert(5, " world")]).unwrap();
    bob.apply_local(vec![TextStep::insert(0, ">> ")]).unwrap();

    alice.sync().await.unwrap();
    bob.sync().await.unwrap();
    assert_eq!(bob.version(), 2);
    assert_eq!(bob.state(), &CollabState::Ready);

    assert!(alice.poll_upstream().await.unwrap());

    assert_eq!(alice.doc().as_str(), ">> hello world");
    assert_eq!(bob.doc().as_str(), ">> hello world");
    assert_eq!(alice.version(), bob.version());
}

#[tokio::test]
async fn test_conflicting_edit_is_dropped() {
    let server = serve("abcdef", config());
    let mut alice = connect(&server, "alice").await;
    let mut bob = connect(&server, "bob").await;

    alice.apply_local(vec![TextStep::delete(1, "bcd")]).unwrap();
    alice.sync().await.unwrap();

    bob.apply_local(vec![TextStep::insert(2, "Z")]).unwrap();
    bob.sync().await.unwrap();

    assert_eq!(bob.doc().as_str(), "aef");
    assert!(bob.monitor().unconfirmed().is_empty());
    assert_eq!(bob.version(), 1);
    assert!(!bob.is_fatal_state());
}

#[tokio::test]
async fn test_long_poll_wakes_on_remote_edit() {
    let server = serve("", config());
    let mut alice = connect(&server, "alice").await;
    let mut bob = connect(&server, "bob").await;

    let polling = tokio::spawn(async move {
        let moved = bob.poll_upstream().await.unwrap();
        (moved, bob)
    });
    tokio::time::sleep(Duration::from_millis(30)).await;

    alice.apply_local(vec![TextStep::insert(0, "hi")]).unwrap();
    alice.sync().await.unwrap();

    let (moved, bob) = polling.await.unwrap();
    assert!(moved);
    assert_eq!(bob.doc().as_str(), "hi");
}

#[tokio::test]
async fn test_falling_behind_history_is_fatal() {
    let server = serve(
        "",
        ManagerConfig {
            max_step_history: 1,
            ..config()
        },
    );
    let mut alice = connect(&server, "alice").await;
    let mut bob = connect(&server, "bob").await;

    for text in ["a", "b"] {
        alice.apply_local(vec![TextStep::insert(0, text)]).unwrap();
        alice.sync().await.unwrap();
    }

    let result = bob.poll_upstream().await;
    assert!(matches!(result, Err(ClientError::Fatal(_))));
    assert!(bob.is_fatal_state());
    assert_eq!(
        bob.fatal_error(),
        Some(CollabFail::HistoryNotAvailable.to_string().as_str())
    );
    assert!(matches!(
        bob.apply_local(vec![TextStep::insert(0, "x")]),
        Err(ClientError::Fatal(_))
    ));
}

#[tokio::test]
async fn test_missing_manager_is_unresponsive() {
    let server = serve("", config());
    let mut opts = options(&server.bus, "alice", "nobody");
    opts.request_timeout = Some(Duration::from_millis(30));

    let result = CollabClient::<TextStep>::connect(opts).await;

    assert!(matches!(
        result,
        Err(ClientError::Collab(CollabFail::ManagerUnresponsive))
    ));
}

#[tokio::test]
async fn test_timed_out_push_is_not_applied_twice() {
    let first_push = Arc::new(AtomicBool::new(true));
    let mut opts = options_for("", config());
    opts.intercept_requests = Some(Arc::new(move |request: &CollabRequest<TextStep>| {
        let stall = matches!(request, CollabRequest::PushEvents(_))
            && first_push.swap(false, Ordering::SeqCst);
        async move {
            if stall {
                tokio::time::sleep(Duration::from_millis(150)).await;
            }
        }
        .boxed()
    }));
    let server = serve_with(opts);

    let mut opts = options(&server.bus, "alice", "manager");
    opts.request_timeout = Some(Duration::from_millis(50));
    let mut alice = CollabClient::<TextStep>::connect(opts).await.unwrap();

    alice.apply_local(vec![TextStep::insert(0, "x")]).unwrap();
    let result = alice.sync().await;
    assert!(matches!(
        result,
        Err(ClientError::Collab(CollabFail::ManagerUnresponsive))
    ));
    assert_eq!(alice.state(), &CollabState::Outdated);

    // Let the stalled push land on the server
    tokio::time::sleep(Duration::from_millis(250)).await;
    alice.sync().await.unwrap();

    let server_doc = server.manager.instance("doc1").unwrap().snapshot().unwrap();
    assert_eq!(server_doc.doc.as_str(), "x");
    assert_eq!(server_doc.version, 1);
    assert_eq!(alice.doc().as_str(), "x");
    assert_eq!(alice.version(), 1);
    assert!(alice.monitor().unconfirmed().is_empty());
}

#[tokio::test]
async fn test_huge_pull_wait_is_capped_by_server() {
    let server = serve("", config());
    let mut alice = connect(&server, "alice").await;
    let mut opts = options(&server.bus, "bob", "manager");
    opts.pull_wait = Some(Duration::MAX);
    let mut bob = CollabClient::<TextStep>::connect(opts).await.unwrap();

    // Nothing new: the server's own wait bound answers before the request times out
    assert!(!bob.poll_upstream().await.unwrap());

    alice.apply_local(vec![TextStep::insert(0, "hi")]).unwrap();
    alice.sync().await.unwrap();
    assert!(bob.poll_upstream().await.unwrap());
    assert_eq!(bob.doc().as_str(), "hi");
}
