//! # Decision Client
//!
//! [`DecisionClient`] sits between application code and a [`DecisionEngine`]. It
//! waits for two things that arrive independently, the datafile and the
//! identity of the current user, and keeps decisions coherent while either is
//! missing.
//!
//! ## Lifecycle
//!
//! ```text
//! build() ──► Uninitialized ──► Waiting ──► (replay queue) ──► Ready
//!                  │  datafile or      the other one
//!                  │  identity arrives arrives
//!                  └────────────────────────────────────────► Closed (close())
//! ```
//!
//! - `activate` and `track` made before `Ready` are queued and replayed in
//!   order, exactly once, when the client becomes ready. `close()` drops them.
//! - Read-only queries made before `Ready` return `None` / `false` / empty and
//!   are not retried.
//! - [`on_ready`](DecisionClient::on_ready) races readiness against a timer. A
//!   caller that times out does not affect the client or other callers.
//!
//! ## Choosing the user
//!
//! Every query takes an optional [`UserOverride`]. With an override the engine
//! sees exactly the override's id and attributes (empty if none were given);
//! without one it sees the default identity. When neither yields an id the
//! engine is not called at all.

mod state;
mod watcher;

pub use state::{OnReadyResult, PendingCall, ReadinessState};

use crate::config::{ClientConfig, ConfiguredSource};
use crate::datafile::{
    Clock, DatafileCache, DatafileFetcher, FetchDatafileLoader, HttpFetcher, KeyValueStore, MemoryStore,
    SystemClock,
};
use crate::engine::{DecisionEngine, EngineFactory, EventTags};
use crate::error::ClientError;
use crate::model::{
    resolve_user, Datafile, Identity, IdentityUpdate, ResolvedUser, UserAttributes, UserOverride, VariableSpec,
    VariableType, VariableValue,
};
use resource_framework::signal::{self, all_of, race_with_timer, Race, Trigger};
use resource_framework::{CachedResource, ProvidedLoader, ResourceLoader, Subscription, UpdateBroker};
use state::ClientState;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

const TIMEOUT_REASON: &str = "failed to initialize onReady before timeout";

/// Feature-flag client with deferred configuration and identity.
///
/// Cheap to clone; clones share one state.
#[derive(Clone)]
pub struct DecisionClient {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    config: ClientConfig,
    factory: Arc<dyn EngineFactory>,
    configuration: Trigger,
    identity: Trigger,
    state: Mutex<ClientState>,
    user_updates: UpdateBroker<Identity>,
    datafile_updates: UpdateBroker<Arc<Datafile>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ClientInner {
    fn state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swaps in a datafile and an engine built from it.
    ///
    /// An identical datafile is ignored. Replacing an earlier one notifies the
    /// datafile listeners.
    fn install(&self, datafile: Arc<Datafile>) {
        let unchanged = self.state().datafile.as_deref() == Some(datafile.as_ref());
        if unchanged {
            debug!(revision = ?datafile.revision(), "Datafile unchanged");
            return;
        }

        let engine = self.factory.create(&datafile);
        let replaced = {
            let mut state = self.state();
            if state.closed {
                return;
            }
            state.datafile = Some(datafile.clone());
            state.engine.replace(engine)
        };

        if let Some(old) = replaced {
            info!(revision = ?datafile.revision(), "Datafile updated");
            old.close();
            self.datafile_updates.notify(&datafile);
        } else {
            info!(revision = ?datafile.revision(), "Datafile loaded");
        }

        self.become_ready();
        self.configuration.set();
    }

    /// Replays queued calls and marks the client ready once both dependencies
    /// are in. Only one caller drains; calls queued meanwhile are replayed too.
    fn become_ready(&self) {
        {
            let mut state = self.state();
            if !state.can_become_ready() {
                return;
            }
            state.draining = true;
        }

        let mut replayed = 0usize;
        loop {
            let next = {
                let mut state = self.state();
                let Some(engine) = state.engine.clone().filter(|_| !state.closed) else {
                    state.draining = false;
                    return;
                };
                match state.pending.pop_front() {
                    Some(call) => Some((call, engine, state.identity.clone())),
                    None => {
                        state.draining = false;
                        state.ready = true;
                        None
                    }
                }
            };

            let Some((call, engine, identity)) = next else {
                break;
            };
            replay(engine.as_ref(), &identity, call);
            replayed += 1;
        }
        info!(replayed, "Client ready");
    }

    /// The engine and default identity, if the client is ready.
    fn ready_engine(&self, operation: &'static str, key: &str) -> Option<(Arc<dyn DecisionEngine>, Identity)> {
        let state = self.state();
        if state.ready && !state.closed {
            if let Some(engine) = &state.engine {
                return Some((engine.clone(), state.identity.clone()));
            }
        }
        let readiness = if state.closed { "closed" } else { "not ready" };
        drop(state);
        info!(operation, key, readiness, "Skipped decision");
        None
    }

    /// Like [`ready_engine`](Self::ready_engine), but queues the call instead
    /// of skipping it.
    fn ready_or_queue(&self, call: impl FnOnce() -> PendingCall) -> Option<(Arc<dyn DecisionEngine>, Identity)> {
        let mut state = self.state();
        if state.closed {
            let call = call();
            drop(state);
            info!(operation = call.operation(), key = call.key(), "Skipped call on closed client");
            return None;
        }
        if state.ready {
            if let Some(engine) = state.engine.clone() {
                return Some((engine, state.identity.clone()));
            }
        }

        let call = call();
        if state.pending.len() >= self.config.max_pending_calls {
            let limit = self.config.max_pending_calls;
            drop(state);
            warn!(
                operation = call.operation(),
                key = call.key(),
                limit,
                "Pending queue full, dropping call"
            );
            return None;
        }
        debug!(
            operation = call.operation(),
            key = call.key(),
            queued = state.pending.len() + 1,
            "Queued until ready"
        );
        state.pending.push_back(call);
        None
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(handle) = self.watcher.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }
}

fn replay(engine: &dyn DecisionEngine, identity: &Identity, call: PendingCall) {
    let operation = call.operation();
    match call {
        PendingCall::Activate { experiment_key, user } => {
            if let Some(user) = resolve_or_skip(operation, &experiment_key, identity, user.as_ref()) {
                let variation = engine.activate(&experiment_key, &user.id, &user.attributes);
                debug!(experiment_key, ?variation, "Replayed queued activate");
            }
        }
        PendingCall::Track { event_key, user, tags } => {
            if let Some(user) = resolve_or_skip(operation, &event_key, identity, user.as_ref()) {
                engine.track(&event_key, &user.id, &user.attributes, tags.as_ref());
                debug!(event_key, "Replayed queued track");
            }
        }
    }
}

/// [`resolve_user`], logging the skipped operation when there is no user id.
fn resolve_or_skip(
    operation: &'static str,
    key: &str,
    identity: &Identity,
    user: Option<&UserOverride>,
) -> Option<ResolvedUser> {
    let resolved = resolve_user(identity, user);
    if resolved.is_none() {
        info!(operation, key, "Skipped decision because no user id is set");
    }
    resolved
}

fn typed_variable(
    engine: &dyn DecisionEngine,
    feature_key: &str,
    spec: &VariableSpec,
    user: &ResolvedUser,
) -> Option<VariableValue> {
    let (variable, id, attributes) = (spec.key.as_str(), user.id.as_str(), &user.attributes);
    match spec.kind {
        VariableType::String => engine
            .get_feature_variable_string(feature_key, variable, id, attributes)
            .map(VariableValue::String),
        VariableType::Boolean => engine
            .get_feature_variable_boolean(feature_key, variable, id, attributes)
            .map(VariableValue::Boolean),
        VariableType::Integer => engine
            .get_feature_variable_integer(feature_key, variable, id, attributes)
            .map(VariableValue::Integer),
        VariableType::Double => engine
            .get_feature_variable_double(feature_key, variable, id, attributes)
            .map(VariableValue::Double),
    }
}

impl DecisionClient {
    /// Starts configuring a client. The engine factory is the only required capability.
    pub fn builder(config: ClientConfig, factory: impl EngineFactory + 'static) -> DecisionClientBuilder {
        DecisionClientBuilder {
            config,
            factory: Arc::new(factory),
            store: None,
            fetcher: None,
            clock: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // =========================================================================
    // Readiness
    // =========================================================================

    /// Waits until the client is ready, or until `timeout` elapses.
    ///
    /// `None` uses [`ClientConfig::on_ready_timeout_ms`]. Each call runs its own
    /// race; timing out neither cancels loading nor affects other callers.
    #[instrument(skip(self))]
    pub async fn on_ready(&self, timeout: Option<Duration>) -> OnReadyResult {
        let timeout = timeout.unwrap_or_else(|| self.inner.config.on_ready_timeout());
        let signals = [self.inner.configuration.signal(), self.inner.identity.signal()];

        match race_with_timer(all_of(&signals), timeout).await {
            Race::Completed(Ok(())) => OnReadyResult::ready(),
            Race::Completed(Err(e)) => {
                warn!(error = %e, "Client cannot become ready");
                OnReadyResult::failed(e.to_string())
            }
            Race::TimedOut => {
                let missing: Vec<&str> = [(&self.inner.configuration, "datafile"), (&self.inner.identity, "user info")]
                    .into_iter()
                    .filter(|(trigger, _)| !trigger.is_set())
                    .map(|(_, name)| name)
                    .collect();
                let reason = if missing.is_empty() {
                    format!("{}, the datafile and user info were not both set in time", TIMEOUT_REASON)
                } else {
                    format!("{}, {} not set before the timeout", TIMEOUT_REASON, missing.join(" and "))
                };
                info!(?timeout, ?missing, "on_ready timed out");
                OnReadyResult::failed(reason)
            }
        }
    }

    pub fn readiness(&self) -> ReadinessState {
        self.inner.state().readiness()
    }

    pub fn is_ready(&self) -> bool {
        let state = self.inner.state();
        state.ready && !state.closed
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Updates the default identity.
    ///
    /// Fields the update omits keep their previous values. The first call
    /// satisfies the identity half of readiness; every call notifies
    /// [`on_user_update`](Self::on_user_update) listeners with a snapshot.
    #[instrument(skip(self, update))]
    pub fn set_identity(&self, update: impl Into<IdentityUpdate>) {
        let snapshot = {
            let mut state = self.inner.state();
            if state.closed {
                drop(state);
                warn!("Ignoring identity update on closed client");
                return;
            }
            state.identity = state.identity.apply(update.into());
            state.identity_set = true;
            state.identity.clone()
        };
        info!(user_id = ?snapshot.id, attributes = snapshot.attributes.len(), "User set");

        self.inner.become_ready();
        self.inner.identity.set();
        self.inner.user_updates.notify(&snapshot);
    }

    /// Sets the default user id; attributes are replaced only if given.
    pub fn set_user(&self, id: impl Into<String>, attributes: Option<UserAttributes>) {
        self.set_identity(IdentityUpdate {
            id: Some(id.into()),
            attributes,
        });
    }

    /// Snapshot of the default identity.
    pub fn user(&self) -> Identity {
        self.inner.state().identity.clone()
    }

    pub fn on_user_update<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Identity) + Send + Sync + 'static,
    {
        self.inner.user_updates.register(handler)
    }

    // =========================================================================
    // Datafile
    // =========================================================================

    /// The datafile currently in use.
    pub fn datafile(&self) -> Option<Arc<Datafile>> {
        self.inner.state().datafile.clone()
    }

    /// The engine built from the current datafile.
    pub fn engine(&self) -> Option<Arc<dyn DecisionEngine>> {
        self.inner.state().engine.clone()
    }

    /// Called whenever a refreshed datafile replaces the current one.
    pub fn on_datafile_update<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Arc<Datafile>) + Send + Sync + 'static,
    {
        self.inner.datafile_updates.register(handler)
    }

    // =========================================================================
    // Side-effecting calls (queued before readiness)
    // =========================================================================

    /// Activates an experiment for the user and returns the variation.
    ///
    /// Before readiness the call is queued and `None` is returned.
    pub fn activate(&self, experiment_key: &str, user: Option<UserOverride>) -> Option<String> {
        let (engine, identity) = self.inner.ready_or_queue(|| PendingCall::Activate {
            experiment_key: experiment_key.to_string(),
            user: user.clone(),
        })?;
        let user = resolve_or_skip("activate", experiment_key, &identity, user.as_ref())?;
        engine.activate(experiment_key, &user.id, &user.attributes)
    }

    /// Tracks a conversion event. Before readiness the call is queued.
    pub fn track(&self, event_key: &str, user: Option<UserOverride>, tags: Option<EventTags>) {
        let Some((engine, identity)) = self.inner.ready_or_queue(|| PendingCall::Track {
            event_key: event_key.to_string(),
            user: user.clone(),
            tags: tags.clone(),
        }) else {
            return;
        };
        if let Some(user) = resolve_or_skip("track", event_key, &identity, user.as_ref()) {
            engine.track(event_key, &user.id, &user.attributes, tags.as_ref());
        }
    }

    // =========================================================================
    // Read-only queries (safe defaults before readiness)
    // =========================================================================

    fn query<R>(
        &self,
        operation: &'static str,
        key: &str,
        user: Option<&UserOverride>,
        f: impl FnOnce(&dyn DecisionEngine, &ResolvedUser) -> R,
    ) -> Option<R> {
        let (engine, identity) = self.inner.ready_engine(operation, key)?;
        let user = resolve_or_skip(operation, key, &identity, user)?;
        Some(f(engine.as_ref(), &user))
    }

    pub fn get_variation(&self, experiment_key: &str, user: Option<UserOverride>) -> Option<String> {
        self.query("get_variation", experiment_key, user.as_ref(), |engine, user| {
            engine.get_variation(experiment_key, &user.id, &user.attributes)
        })
        .flatten()
    }

    pub fn is_feature_enabled(&self, feature_key: &str, user: Option<UserOverride>) -> bool {
        self.query("is_feature_enabled", feature_key, user.as_ref(), |engine, user| {
            engine.is_feature_enabled(feature_key, &user.id, &user.attributes)
        })
        .unwrap_or(false)
    }

    pub fn get_enabled_features(&self, user: Option<UserOverride>) -> Vec<String> {
        self.query("get_enabled_features", "", user.as_ref(), |engine, user| {
            engine.get_enabled_features(&user.id, &user.attributes)
        })
        .unwrap_or_default()
    }

    pub fn get_feature_variable_string(
        &self,
        feature_key: &str,
        variable_key: &str,
        user: Option<UserOverride>,
    ) -> Option<String> {
        self.query("get_feature_variable_string", feature_key, user.as_ref(), |engine, user| {
            engine.get_feature_variable_string(feature_key, variable_key, &user.id, &user.attributes)
        })
        .flatten()
    }

    pub fn get_feature_variable_boolean(
        &self,
        feature_key: &str,
        variable_key: &str,
        user: Option<UserOverride>,
    ) -> Option<bool> {
        self.query("get_feature_variable_boolean", feature_key, user.as_ref(), |engine, user| {
            engine.get_feature_variable_boolean(feature_key, variable_key, &user.id, &user.attributes)
        })
        .flatten()
    }

    pub fn get_feature_variable_integer(
        &self,
        feature_key: &str,
        variable_key: &str,
        user: Option<UserOverride>,
    ) -> Option<i64> {
        self.query("get_feature_variable_integer", feature_key, user.as_ref(), |engine, user| {
            engine.get_feature_variable_integer(feature_key, variable_key, &user.id, &user.attributes)
        })
        .flatten()
    }

    pub fn get_feature_variable_double(
        &self,
        feature_key: &str,
        variable_key: &str,
        user: Option<UserOverride>,
    ) -> Option<f64> {
        self.query("get_feature_variable_double", feature_key, user.as_ref(), |engine, user| {
            engine.get_feature_variable_double(feature_key, variable_key, &user.id, &user.attributes)
        })
        .flatten()
    }

    /// Reads several variables of a feature at once, one typed engine call per spec.
    ///
    /// A variable the engine has no value for maps to `None`. Without a user id
    /// the result is empty and the engine is not called.
    pub fn get_feature_variables_for(
        &self,
        feature_key: &str,
        specs: &[VariableSpec],
        user: Option<UserOverride>,
    ) -> BTreeMap<String, Option<VariableValue>> {
        self.query("get_feature_variables", feature_key, user.as_ref(), |engine, user| {
            specs
                .iter()
                .map(|spec| (spec.key.clone(), typed_variable(engine, feature_key, spec, user)))
                .collect()
        })
        .unwrap_or_default()
    }

    /// Reads every variable the current datafile declares for `feature_key`.
    pub fn get_feature_variables(
        &self,
        feature_key: &str,
        user: Option<UserOverride>,
    ) -> BTreeMap<String, Option<VariableValue>> {
        let specs = self
            .inner
            .state()
            .datafile
            .as_ref()
            .and_then(|datafile| datafile.feature_variables(feature_key))
            .unwrap_or_default();
        self.get_feature_variables_for(feature_key, &specs, user)
    }

    // =========================================================================
    // Forced variations (ids only, never attributes)
    // =========================================================================

    /// The variation forced for `user_id`, or for the default user when `None`.
    pub fn get_forced_variation(&self, experiment_key: &str, user_id: Option<&str>) -> Option<String> {
        let (engine, identity) = self.inner.ready_engine("get_forced_variation", experiment_key)?;
        let user_id = forced_user_id("get_forced_variation", experiment_key, &identity, user_id)?;
        engine.get_forced_variation(experiment_key, &user_id)
    }

    /// Forces a variation for the default user. `None` clears it.
    ///
    /// Returns `false` if no default user id has been set.
    pub fn set_forced_variation(&self, experiment_key: &str, variation_key: Option<&str>) -> bool {
        self.force_variation(experiment_key, None, variation_key)
    }

    /// Forces a variation for `user_id`. `None` clears it.
    pub fn set_forced_variation_for(&self, experiment_key: &str, user_id: &str, variation_key: Option<&str>) -> bool {
        self.force_variation(experiment_key, Some(user_id), variation_key)
    }

    fn force_variation(&self, experiment_key: &str, user_id: Option<&str>, variation_key: Option<&str>) -> bool {
        let Some((engine, identity)) = self.inner.ready_engine("set_forced_variation", experiment_key) else {
            return false;
        };
        let Some(user_id) = forced_user_id("set_forced_variation", experiment_key, &identity, user_id) else {
            return false;
        };
        engine.set_forced_variation(experiment_key, &user_id, variation_key)
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Shuts the client down.
    ///
    /// Queued calls are dropped, the datafile watcher stops and the engine is
    /// closed. Afterwards every query behaves as if the client were not ready.
    #[instrument(skip(self))]
    pub fn close(&self) {
        let (dropped, engine) = {
            let mut state = self.inner.state();
            if state.closed {
                return;
            }
            state.closed = true;
            let dropped = state.pending.len();
            state.pending.clear();
            (dropped, state.engine.clone())
        };
        if dropped > 0 {
            info!(dropped, "Dropped queued calls");
        }

        if let Some(handle) = self.inner.watcher.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
        self.inner.configuration.fail("client closed");
        self.inner.identity.fail("client closed");

        if let Some(engine) = engine {
            engine.close();
        }
        info!("Client closed");
    }
}

fn forced_user_id(
    operation: &'static str,
    experiment_key: &str,
    identity: &Identity,
    user_id: Option<&str>,
) -> Option<String> {
    let user_id = user_id.map(str::to_string).or_else(|| identity.id.clone());
    if user_id.is_none() {
        info!(operation, key = experiment_key, "Skipped decision because no user id is set");
    }
    user_id
}

impl fmt::Debug for DecisionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionClient")
            .field("state", &*self.inner.state())
            .finish()
    }
}

/// Builder for [`DecisionClient`].
pub struct DecisionClientBuilder {
    config: ClientConfig,
    factory: Arc<dyn EngineFactory>,
    store: Option<Arc<dyn KeyValueStore>>,
    fetcher: Option<Arc<dyn DatafileFetcher>>,
    clock: Option<Arc<dyn Clock>>,
}

impl DecisionClientBuilder {
    /// Durable store for the datafile cache. Defaults to [`MemoryStore`].
    pub fn store(mut self, store: impl KeyValueStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// HTTP seam. Defaults to [`HttpFetcher`].
    pub fn fetcher(mut self, fetcher: impl DatafileFetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    /// Time source for cache ages. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Validates the configuration and starts loading the datafile.
    ///
    /// A missing datafile source fails here, synchronously. A provided or
    /// cached datafile is installed before this returns. Remote sources need a
    /// Tokio runtime.
    pub fn build(self) -> Result<DecisionClient, ClientError> {
        let source = self.config.source()?;
        let remote = matches!(source, ConfiguredSource::Remote { .. });
        let (refresh_sink, refreshes) = mpsc::unbounded_channel();

        let loader: Box<dyn ResourceLoader<Arc<Datafile>>> = match source {
            ConfiguredSource::Provided(datafile) => {
                debug!(revision = ?datafile.revision(), "Using provided datafile");
                Box::new(ProvidedLoader::new(Arc::new(datafile)))
            }
            ConfiguredSource::Remote { source, url } => {
                let fetcher: Arc<dyn DatafileFetcher> = match self.fetcher {
                    Some(fetcher) => fetcher,
                    None => Arc::new(HttpFetcher::new(self.config.request_timeout())?),
                };
                let store: Arc<dyn KeyValueStore> = match self.store {
                    Some(store) => store,
                    None => Arc::new(MemoryStore::new()),
                };
                let clock: Arc<dyn Clock> = match self.clock {
                    Some(clock) => clock,
                    None => Arc::new(SystemClock),
                };

                info!(?source, %url, "Loading datafile");
                let cache = DatafileCache::new(store, clock, self.config.cache_key.clone());
                Box::new(
                    FetchDatafileLoader::new(url, fetcher, cache)
                        .with_max_cache_age(self.config.max_cache_age_ms)
                        .with_stale_policy(self.config.stale_cache_policy)
                        .with_refresh_sink(refresh_sink),
                )
            }
        };
        let resource = CachedResource::new(loader);

        let (configuration, _) = signal::signal("configuration");
        let (identity, _) = signal::signal("identity");
        let inner = Arc::new(ClientInner {
            config: self.config,
            factory: self.factory,
            configuration,
            identity,
            state: Mutex::new(ClientState::default()),
            user_updates: UpdateBroker::new(),
            datafile_updates: UpdateBroker::new(),
            watcher: Mutex::new(None),
        });

        if let Some(datafile) = resource.peek() {
            inner.install(datafile);
        }
        if remote {
            let handle = tokio::spawn(watcher::run(Arc::downgrade(&inner), resource, refreshes));
            *inner.watcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }

        Ok(DecisionClient { inner })
    }
}
