use decision_client::datafile::{DatafileCache, FetchDatafileLoader, FileStore, KeyValueStore, MemoryStore};
use decision_client::mock::{ManualClock, MockEngine, MockFetcher};
use decision_client::{CacheEntry, ClientConfig, Datafile, DecisionClient, StaleCachePolicy};
use resource_framework::{CachedResource, ResourceState};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const KEY: &str = "optly_fs_datafile";
const URL: &str = "https://cdn.optimizely.com/datafiles/k.json";
const WEEK_MS: i64 = 7 * 24 * 60 * 60 * 1000;

fn datafile(revision: &str) -> Datafile {
    Datafile::new(json!({ "revision": revision }))
}

fn seed(store: &dyn KeyValueStore, revision: &str, cached_at: i64) {
    let entry = CacheEntry::new(datafile(revision), cached_at);
    store.set(KEY, &serde_json::to_string(&entry).unwrap()).unwrap();
}

fn stored_entry(store: &dyn KeyValueStore) -> CacheEntry {
    serde_json::from_str(&store.get(KEY).unwrap().unwrap()).unwrap()
}

#[tokio::test]
async fn test_stale_entry_is_served_while_refresh_is_written_back() {
    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(10 * WEEK_MS);
    seed(&*store, "old", 10 * WEEK_MS - WEEK_MS - 1);

    let fetcher = MockFetcher::new();
    fetcher.expect_fetch().return_ok(200, r#"{"revision": "new"}"#);
    let (sink, mut refreshes) = mpsc::unbounded_channel();

    let cache = DatafileCache::new(store.clone(), Arc::new(clock.clone()), KEY);
    let loader = FetchDatafileLoader::new(URL, Arc::new(fetcher.clone()), cache).with_refresh_sink(sink);
    let resource = CachedResource::new(Box::new(loader));

    // stale, but still the synchronous value
    assert!(resource.has_loaded());
    assert_eq!(resource.peek().unwrap().revision(), Some("old"));

    let fresh = refreshes.recv().await.unwrap();
    assert_eq!(fresh.revision(), Some("new"));
    assert_eq!(fetcher.urls(), vec![URL]);

    let entry = stored_entry(&*store);
    assert_eq!(entry.datafile.revision(), Some("new"));
    assert_eq!(entry.metadata.timestamp_cached, 10 * WEEK_MS);

    // the resource itself never sees a second value
    assert_eq!(resource.wait().await.unwrap().revision(), Some("old"));
}

#[tokio::test]
async fn test_fresh_cache_needs_no_network_to_be_usable() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(1_000);

    // first run: nothing cached, the fetch fills the cache
    {
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(dir.path()).unwrap());
        let fetcher = MockFetcher::new();
        fetcher.expect_fetch().return_ok(200, r#"{"revision": "7"}"#);
        let cache = DatafileCache::new(store, Arc::new(clock.clone()), KEY);

        let resource = CachedResource::new(Box::new(FetchDatafileLoader::new(URL, Arc::new(fetcher), cache)));
        assert!(!resource.has_loaded());
        assert_eq!(resource.wait().await.unwrap().revision(), Some("7"));
    }

    // second run, a day later, with the network unavailable
    clock.advance(24 * 60 * 60 * 1000);
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(dir.path()).unwrap());
    let (offline, _gate) = MockFetcher::gated();
    let cache = DatafileCache::new(store, Arc::new(clock.clone()), KEY);

    let resource = CachedResource::new(Box::new(FetchDatafileLoader::new(URL, Arc::new(offline.clone()), cache)));

    assert!(resource.has_loaded());
    assert_eq!(resource.peek().unwrap().revision(), Some("7"));
}

#[tokio::test]
async fn test_await_refresh_ignores_stale_entry() {
    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(3 * WEEK_MS);
    seed(&*store, "old", 0);

    let (fetcher, gate) = MockFetcher::gated();
    fetcher.expect_fetch().return_ok(200, r#"{"revision": "new"}"#);
    let cache = DatafileCache::new(store, Arc::new(clock), KEY);
    let loader = FetchDatafileLoader::new(URL, Arc::new(fetcher), cache).with_stale_policy(StaleCachePolicy::AwaitRefresh);

    let resource = CachedResource::new(Box::new(loader));
    assert!(!resource.has_loaded());

    gate.release();
    assert_eq!(resource.wait().await.unwrap().revision(), Some("new"));
}

#[tokio::test]
async fn test_max_cache_age_is_configurable() {
    let store = Arc::new(MemoryStore::new());
    seed(&*store, "cached", 0);

    let (fetcher, _gate) = MockFetcher::gated();
    let cache = DatafileCache::new(store, Arc::new(ManualClock::new(61_000)), KEY);
    let loader = FetchDatafileLoader::new(URL, Arc::new(fetcher), cache)
        .with_max_cache_age(60_000)
        .with_stale_policy(StaleCachePolicy::AwaitRefresh);

    let resource = CachedResource::new(Box::new(loader));
    assert!(!resource.has_loaded());
}

#[tokio::test]
async fn test_corrupt_cache_entry_is_a_miss() {
    let store = Arc::new(MemoryStore::new());
    store.set(KEY, "{ truncated").unwrap();

    let fetcher = MockFetcher::new();
    fetcher.expect_fetch().return_ok(200, r#"{"revision": "1"}"#);
    let cache = DatafileCache::new(store.clone(), Arc::new(ManualClock::new(5)), KEY);

    let resource = CachedResource::new(Box::new(FetchDatafileLoader::new(URL, Arc::new(fetcher), cache)));
    assert!(!resource.has_loaded());
    assert_eq!(resource.wait().await.unwrap().revision(), Some("1"));
    assert_eq!(stored_entry(&*store).datafile.revision(), Some("1"));
}

#[tokio::test]
async fn test_fetch_errors_reach_every_waiter() {
    let fetcher = MockFetcher::new();
    fetcher.expect_fetch().return_ok(200, "<html>oops</html>");
    let cache = DatafileCache::new(Arc::new(MemoryStore::new()), Arc::new(ManualClock::new(0)), KEY);

    let resource = CachedResource::new(Box::new(FetchDatafileLoader::new(URL, Arc::new(fetcher), cache)));
    let error = resource.wait().await.unwrap_err().to_string();

    assert!(error.contains("<html>oops</html>"), "{}", error);
    assert!(matches!(resource.state(), ResourceState::Failed(_)));
    assert_eq!(resource.clone().wait().await.unwrap_err().to_string(), error);
}

#[tokio::test]
async fn test_failed_refresh_keeps_cached_copy() {
    let store = Arc::new(MemoryStore::new());
    seed(&*store, "cached", 0);

    let fetcher = MockFetcher::new();
    fetcher.expect_fetch().return_err("connection reset");
    let (sink, mut refreshes) = mpsc::unbounded_channel();
    let cache = DatafileCache::new(store.clone(), Arc::new(ManualClock::new(10)), KEY);
    let loader = FetchDatafileLoader::new(URL, Arc::new(fetcher), cache).with_refresh_sink(sink);

    let resource = CachedResource::new(Box::new(loader));

    // the sink closes without a value once the refresh gives up
    assert_eq!(refreshes.recv().await, None);
    assert_eq!(resource.peek().unwrap().revision(), Some("cached"));
    assert_eq!(stored_entry(&*store).datafile.revision(), Some("cached"));
}

#[tokio::test]
async fn test_client_uses_durable_store_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(50_000);
    let config = ClientConfig::with_sdk_key("k");

    let fetcher = MockFetcher::new();
    fetcher.expect_fetch().return_ok(200, r#"{"revision": "first"}"#);
    let first = DecisionClient::builder(config.clone(), MockEngine::new().factory())
        .store(FileStore::open(dir.path()).unwrap())
        .clock(clock.clone())
        .fetcher(fetcher)
        .build()
        .unwrap();
    first.set_user("u1", None);
    assert!(first.on_ready(Some(Duration::from_secs(5))).await.success);
    first.close();

    let (offline, _gate) = MockFetcher::gated();
    let second = DecisionClient::builder(config, MockEngine::new().factory())
        .store(FileStore::open(dir.path()).unwrap())
        .clock(clock)
        .fetcher(offline)
        .build()
        .unwrap();
    second.set_user("u1", None);

    assert!(second.on_ready(Some(Duration::ZERO)).await.success);
    assert_eq!(second.datafile().unwrap().revision(), Some("first"));
}
