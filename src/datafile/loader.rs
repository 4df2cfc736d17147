//! Datafile loaders.
//!
//! [`FetchDatafileLoader`] combines the durable cache with a network refresh:
//!
//! | Cache at construction | `load` returns | Fetched datafile goes to |
//! |-----------------------|----------------|--------------------------|
//! | fresh entry | `Ready(cached)` | the cache and the refresh sink |
//! | stale entry, [`ServeStale`](StaleCachePolicy::ServeStale) | `Ready(cached)` | the cache and the refresh sink |
//! | stale entry, [`AwaitRefresh`](StaleCachePolicy::AwaitRefresh) | `Pending(fetch)` | the cache and the resource |
//! | none or unreadable | `Pending(fetch)` | the cache and the resource |
//!
//! The fetch always runs. Whoever consumes a `Ready` result should treat it as
//! the first datafile, not the only one.

use super::fetch::{parse_response, DatafileFetcher};
use super::store::DatafileCache;
use crate::config::{StaleCachePolicy, DEFAULT_MAX_CACHE_AGE_MS};
use crate::error::DatafileError;
use crate::model::{CacheEntry, Datafile};
use resource_framework::{FrameworkError, LoadOutcome, ResourceLoader};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Receives datafiles fetched after a cached one was already served.
pub type RefreshSink = mpsc::UnboundedSender<Arc<Datafile>>;

/// Loads a datafile from the cache, refreshing it from the network.
pub struct FetchDatafileLoader {
    url: String,
    fetcher: Arc<dyn DatafileFetcher>,
    cache: DatafileCache,
    cached: Option<CacheEntry>,
    max_cache_age_ms: u64,
    stale_policy: StaleCachePolicy,
    refresh: Option<RefreshSink>,
}

impl FetchDatafileLoader {
    /// Creates the loader and reads the cache entry, once.
    ///
    /// An unreadable entry is logged and treated as absent.
    pub fn new(url: impl Into<String>, fetcher: Arc<dyn DatafileFetcher>, cache: DatafileCache) -> Self {
        let cached = match cache.read() {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = cache.key(), error = %e, "Ignoring unreadable cached datafile");
                None
            }
        };

        Self {
            url: url.into(),
            fetcher,
            cache,
            cached,
            max_cache_age_ms: DEFAULT_MAX_CACHE_AGE_MS,
            stale_policy: StaleCachePolicy::default(),
            refresh: None,
        }
    }

    pub fn with_max_cache_age(mut self, max_cache_age_ms: u64) -> Self {
        self.max_cache_age_ms = max_cache_age_ms;
        self
    }

    pub fn with_stale_policy(mut self, policy: StaleCachePolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    pub fn with_refresh_sink(mut self, sink: RefreshSink) -> Self {
        self.refresh = Some(sink);
        self
    }

    /// The cached datafile, if the policy allows serving it synchronously.
    fn initial(&mut self) -> Option<Datafile> {
        let entry = self.cached.take()?;
        let now = self.cache.now_ms();
        if entry.is_fresh(now, self.max_cache_age_ms) {
            debug!(key = self.cache.key(), "Serving cached datafile");
            return Some(entry.datafile);
        }

        let age_ms = now.saturating_sub(entry.metadata.timestamp_cached);
        match self.stale_policy {
            StaleCachePolicy::ServeStale => {
                info!(key = self.cache.key(), age_ms, "Serving stale cached datafile while refreshing");
                Some(entry.datafile)
            }
            StaleCachePolicy::AwaitRefresh => {
                info!(key = self.cache.key(), age_ms, "Cached datafile is stale, waiting for refresh");
                None
            }
        }
    }
}

impl ResourceLoader<Arc<Datafile>> for FetchDatafileLoader {
    fn load(mut self: Box<Self>) -> LoadOutcome<Arc<Datafile>> {
        let initial = self.initial();
        let this = *self;
        let refresh = fetch_and_cache(this.url, this.fetcher, this.cache);

        match initial {
            Some(datafile) => {
                let sink = this.refresh;
                tokio::spawn(async move {
                    match refresh.await {
                        Ok(fresh) => {
                            if let Some(sink) = sink {
                                let _ = sink.send(Arc::new(fresh));
                            }
                        }
                        Err(e) => warn!(error = %e, "Datafile refresh failed, keeping cached copy"),
                    }
                });
                LoadOutcome::Ready(Arc::new(datafile))
            }
            None => LoadOutcome::pending(async move {
                refresh.await.map(Arc::new).map_err(FrameworkError::from)
            }),
        }
    }
}

/// GETs `url`, parses the body and writes it to the cache.
///
/// A failed cache write is logged; the fetched datafile is still returned.
#[instrument(skip(fetcher, cache))]
pub async fn fetch_and_cache(
    url: String,
    fetcher: Arc<dyn DatafileFetcher>,
    cache: DatafileCache,
) -> Result<Datafile, DatafileError> {
    let response = fetcher.fetch(&url).await?;
    let datafile = parse_response(response)?;
    info!(revision = ?datafile.revision(), "Datafile fetched");

    if let Err(e) = cache.write(&datafile) {
        warn!(key = cache.key(), error = %e, "Failed to cache datafile");
    }
    Ok(datafile)
}
