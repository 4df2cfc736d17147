use resource_framework::mock::MockLoader;
use resource_framework::signal::{self, all_of, race_with_timer, Race};
use resource_framework::{CachedResource, FrameworkError, ResourceState, UpdateBroker};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// --- Scenario: a document that loads late gates readiness together with a user ---

#[tokio::test]
async fn test_resource_and_user_gate_readiness() {
    resource_framework::tracing::try_setup_tracing();

    let (loader, handle) = MockLoader::<String>::new();
    let document = CachedResource::new(Box::new(loader));

    let (document_ready, document_signal) = signal::signal("document");
    let (user_ready, user_signal) = signal::signal("user");

    // Bridge the resource into its readiness signal
    let bridge = {
        let document = document.clone();
        tokio::spawn(async move {
            match document.wait().await {
                Ok(_) => document_ready.set(),
                Err(e) => document_ready.fail(e.to_string()),
            }
        })
    };

    user_ready.set();
    let early = race_with_timer(
        all_of(&[document_signal.clone(), user_signal.clone()]),
        Duration::from_millis(10),
    )
    .await;
    assert_eq!(early, Race::TimedOut);

    handle.complete(Ok("rev-1".to_string()));
    assert!(bridge.await.unwrap());

    let ready = race_with_timer(
        all_of(&[document_signal, user_signal]),
        Duration::from_millis(10),
    )
    .await;
    assert_eq!(ready, Race::Completed(Ok(())));
    assert_eq!(document.peek(), Some("rev-1".to_string()));
}

#[tokio::test]
async fn test_failed_resource_fails_the_barrier() {
    let (loader, handle) = MockLoader::<String>::new();
    let document = CachedResource::new(Box::new(loader));
    let (document_ready, document_signal) = signal::signal("document");

    handle.complete(Err(FrameworkError::load_failed("404 Not Found")));
    if let Err(e) = document.wait().await {
        document_ready.fail(e.to_string());
    }

    assert!(matches!(document.state(), ResourceState::Failed(_)));
    assert_eq!(
        all_of(&[document_signal]).await,
        Err(FrameworkError::SignalFailed(
            "Load failed: 404 Not Found".to_string()
        ))
    );
}

#[tokio::test]
async fn test_ready_loader_runs_once_across_clones() {
    let (loader, handle) = MockLoader::ready(3u8);
    let resource = CachedResource::new(Box::new(loader));
    let copies: Vec<_> = (0..4).map(|_| resource.clone()).collect();

    for copy in &copies {
        assert_eq!(copy.wait().await, Ok(3));
    }
    assert_eq!(handle.load_count(), 1);
}

// --- Scenario: listeners follow a value through updates ---

#[tokio::test]
async fn test_broker_fans_out_resource_updates() {
    let broker = UpdateBroker::<String>::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    let first = broker.register(move |rev| sink.lock().unwrap().push(format!("a:{}", rev)));
    let sink = seen.clone();
    let _second = broker.register(move |rev| sink.lock().unwrap().push(format!("b:{}", rev)));

    let (loader, handle) = MockLoader::<String>::new();
    let resource = CachedResource::new(Box::new(loader));
    handle.complete(Ok("rev-1".to_string()));
    broker.notify(&resource.wait().await.unwrap());

    first.dispose();
    broker.notify(&"rev-2".to_string());

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["a:rev-1", "b:rev-1", "b:rev-2"]
    );
}
