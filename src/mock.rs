//! # Mock Collaborators
//!
//! Test doubles for everything the client talks to:
//!
//! - [`MockEngine`] records every engine call and answers from scripted values.
//! - [`MockFetcher`] serves scripted HTTP responses, optionally held back until
//!   the test releases them.
//! - [`ManualClock`] is a clock the test moves by hand.
//!
//! All three are cheap to clone; clones share state, so a test can keep one
//! handle for assertions after handing another to the client.
//!
//! ```rust
//! use decision_client::mock::MockEngine;
//! use decision_client::{ClientConfig, DecisionClient};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = MockEngine::new().with_variation("exp", "treatment");
//!     let client = DecisionClient::builder(ClientConfig::with_datafile(json!({})), engine.factory())
//!         .build()
//!         .unwrap();
//!
//!     client.set_user("u1", None);
//!     assert!(client.on_ready(None).await.success);
//!     assert_eq!(client.get_variation("exp", None), Some("treatment".to_string()));
//!     assert_eq!(engine.calls().len(), 1);
//! }
//! ```

use crate::datafile::{Clock, DatafileFetcher, FetchResponse};
use crate::engine::{DecisionEngine, EventTags};
use crate::error::DatafileError;
use crate::model::{Datafile, UserAttributes, VariableType, VariableValue};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

// =============================================================================
// ENGINE
// =============================================================================

/// One recorded call into a [`MockEngine`].
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Activate {
        experiment: String,
        user_id: String,
        attributes: UserAttributes,
    },
    GetVariation {
        experiment: String,
        user_id: String,
        attributes: UserAttributes,
    },
    Track {
        event: String,
        user_id: String,
        attributes: UserAttributes,
        tags: Option<EventTags>,
    },
    IsFeatureEnabled {
        feature: String,
        user_id: String,
        attributes: UserAttributes,
    },
    GetEnabledFeatures {
        user_id: String,
        attributes: UserAttributes,
    },
    GetFeatureVariable {
        feature: String,
        variable: String,
        kind: VariableType,
        user_id: String,
        attributes: UserAttributes,
    },
    GetForcedVariation {
        experiment: String,
        user_id: String,
    },
    SetForcedVariation {
        experiment: String,
        user_id: String,
        variation: Option<String>,
    },
    Close,
}

#[derive(Default)]
struct EngineState {
    calls: Vec<EngineCall>,
    datafiles: Vec<Datafile>,
    variations: HashMap<String, String>,
    enabled: Vec<String>,
    variables: HashMap<(String, String), VariableValue>,
    forced: HashMap<(String, String), String>,
}

/// A [`DecisionEngine`] that records calls and returns scripted answers.
///
/// Unscripted queries return `None` / `false` / `[]`.
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<EngineState>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `activate` and `get_variation` for `experiment`.
    pub fn with_variation(self, experiment: &str, variation: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .variations
            .insert(experiment.to_string(), variation.to_string());
        self
    }

    pub fn with_enabled_feature(self, feature: &str) -> Self {
        self.state.lock().unwrap().enabled.push(feature.to_string());
        self
    }

    /// Answers the typed variable query matching the value's type.
    pub fn with_variable(self, feature: &str, variable: &str, value: VariableValue) -> Self {
        self.state
            .lock()
            .unwrap()
            .variables
            .insert((feature.to_string(), variable.to_string()), value);
        self
    }

    /// Factory that hands out this engine and records each datafile it is built from.
    pub fn factory(&self) -> impl Fn(&Datafile) -> Arc<dyn DecisionEngine> + Send + Sync + 'static {
        let engine = self.clone();
        move |datafile: &Datafile| {
            engine.state.lock().unwrap().datafiles.push(datafile.clone());
            Arc::new(engine.clone()) as Arc<dyn DecisionEngine>
        }
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Event keys of recorded `track` calls, in order.
    pub fn tracked_events(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::Track { event, .. } => Some(event),
                _ => None,
            })
            .collect()
    }

    /// Datafiles the factory was invoked with, in order.
    pub fn datafiles(&self) -> Vec<Datafile> {
        self.state.lock().unwrap().datafiles.clone()
    }

    fn record(&self, call: EngineCall) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn variable(&self, feature: &str, variable: &str, kind: VariableType, user_id: &str, attributes: &UserAttributes) -> Option<VariableValue> {
        self.record(EngineCall::GetFeatureVariable {
            feature: feature.to_string(),
            variable: variable.to_string(),
            kind,
            user_id: user_id.to_string(),
            attributes: attributes.clone(),
        });
        self.state
            .lock()
            .unwrap()
            .variables
            .get(&(feature.to_string(), variable.to_string()))
            .cloned()
    }
}

impl DecisionEngine for MockEngine {
    fn activate(&self, experiment_key: &str, user_id: &str, attributes: &UserAttributes) -> Option<String> {
        self.record(EngineCall::Activate {
            experiment: experiment_key.to_string(),
            user_id: user_id.to_string(),
            attributes: attributes.clone(),
        });
        self.state.lock().unwrap().variations.get(experiment_key).cloned()
    }

    fn get_variation(&self, experiment_key: &str, user_id: &str, attributes: &UserAttributes) -> Option<String> {
        self.record(EngineCall::GetVariation {
            experiment: experiment_key.to_string(),
            user_id: user_id.to_string(),
            attributes: attributes.clone(),
        });
        self.state.lock().unwrap().variations.get(experiment_key).cloned()
    }

    fn track(&self, event_key: &str, user_id: &str, attributes: &UserAttributes, tags: Option<&EventTags>) {
        self.record(EngineCall::Track {
            event: event_key.to_string(),
            user_id: user_id.to_string(),
            attributes: attributes.clone(),
            tags: tags.cloned(),
        });
    }

    fn is_feature_enabled(&self, feature_key: &str, user_id: &str, attributes: &UserAttributes) -> bool {
        self.record(EngineCall::IsFeatureEnabled {
            feature: feature_key.to_string(),
            user_id: user_id.to_string(),
            attributes: attributes.clone(),
        });
        self.state.lock().unwrap().enabled.iter().any(|f| f == feature_key)
    }

    fn get_enabled_features(&self, user_id: &str, attributes: &UserAttributes) -> Vec<String> {
        self.record(EngineCall::GetEnabledFeatures {
            user_id: user_id.to_string(),
            attributes: attributes.clone(),
        });
        self.state.lock().unwrap().enabled.clone()
    }

    fn get_feature_variable_string(&self, feature_key: &str, variable_key: &str, user_id: &str, attributes: &UserAttributes) -> Option<String> {
        match self.variable(feature_key, variable_key, VariableType::String, user_id, attributes)? {
            VariableValue::String(s) => Some(s),
            _ => None,
        }
    }

    fn get_feature_variable_boolean(&self, feature_key: &str, variable_key: &str, user_id: &str, attributes: &UserAttributes) -> Option<bool> {
        match self.variable(feature_key, variable_key, VariableType::Boolean, user_id, attributes)? {
            VariableValue::Boolean(b) => Some(b),
            _ => None,
        }
    }

    fn get_feature_variable_integer(&self, feature_key: &str, variable_key: &str, user_id: &str, attributes: &UserAttributes) -> Option<i64> {
        match self.variable(feature_key, variable_key, VariableType::Integer, user_id, attributes)? {
            VariableValue::Integer(i) => Some(i),
            _ => None,
        }
    }

    fn get_feature_variable_double(&self, feature_key: &str, variable_key: &str, user_id: &str, attributes: &UserAttributes) -> Option<f64> {
        match self.variable(feature_key, variable_key, VariableType::Double, user_id, attributes)? {
            VariableValue::Double(d) => Some(d),
            _ => None,
        }
    }

    fn get_forced_variation(&self, experiment_key: &str, user_id: &str) -> Option<String> {
        self.record(EngineCall::GetForcedVariation {
            experiment: experiment_key.to_string(),
            user_id: user_id.to_string(),
        });
        self.state
            .lock()
            .unwrap()
            .forced
            .get(&(experiment_key.to_string(), user_id.to_string()))
            .cloned()
    }

    fn set_forced_variation(&self, experiment_key: &str, user_id: &str, variation_key: Option<&str>) -> bool {
        self.record(EngineCall::SetForcedVariation {
            experiment: experiment_key.to_string(),
            user_id: user_id.to_string(),
            variation: variation_key.map(str::to_string),
        });
        let key = (experiment_key.to_string(), user_id.to_string());
        let mut state = self.state.lock().unwrap();
        match variation_key {
            Some(variation) => state.forced.insert(key, variation.to_string()),
            None => state.forced.remove(&key),
        };
        true
    }

    fn close(&self) {
        self.record(EngineCall::Close);
    }
}

// =============================================================================
// FETCHER
// =============================================================================

struct FetcherState {
    responses: VecDeque<Result<FetchResponse, DatafileError>>,
    urls: Vec<String>,
}

/// A [`DatafileFetcher`] with scripted responses, served in order.
///
/// ```ignore
/// let fetcher = MockFetcher::new();
/// fetcher.expect_fetch().return_ok(200, r#"{"revision": "2"}"#);
/// fetcher.expect_fetch().return_err("connection reset");
/// ```
#[derive(Clone)]
pub struct MockFetcher {
    state: Arc<Mutex<FetcherState>>,
    gate: Option<Arc<Semaphore>>,
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFetcher {
    /// Creates a fetcher that answers immediately.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FetcherState {
                responses: VecDeque::new(),
                urls: Vec::new(),
            })),
            gate: None,
        }
    }

    /// Creates a fetcher whose responses wait for [`FetchGate::release`].
    pub fn gated() -> (Self, FetchGate) {
        let semaphore = Arc::new(Semaphore::new(0));
        let fetcher = Self {
            gate: Some(semaphore.clone()),
            ..Self::new()
        };
        (fetcher, FetchGate { semaphore })
    }

    pub fn expect_fetch(&self) -> FetchExpectationBuilder {
        FetchExpectationBuilder {
            state: self.state.clone(),
        }
    }

    /// URLs requested so far.
    pub fn urls(&self) -> Vec<String> {
        self.state.lock().unwrap().urls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().urls.len()
    }
}

#[async_trait]
impl DatafileFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, DatafileError> {
        self.state.lock().unwrap().urls.push(url.to_string());

        if let Some(gate) = &self.gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(DatafileError::Fetch("gate closed".into())),
            }
        }

        self.state
            .lock()
            .unwrap()
            .responses
            .pop_front()
            .unwrap_or_else(|| Err(DatafileError::Fetch("no scripted response".into())))
    }
}

/// Builder for one scripted fetch.
pub struct FetchExpectationBuilder {
    state: Arc<Mutex<FetcherState>>,
}

impl FetchExpectationBuilder {
    pub fn return_ok(self, status: u16, body: &str) {
        self.state.lock().unwrap().responses.push_back(Ok(FetchResponse {
            status,
            body: body.to_string(),
        }));
    }

    /// Simulates a transport failure.
    pub fn return_err(self, message: &str) {
        self.state
            .lock()
            .unwrap()
            .responses
            .push_back(Err(DatafileError::Fetch(message.to_string())));
    }
}

/// Releases held responses of a gated [`MockFetcher`].
#[derive(Clone)]
pub struct FetchGate {
    semaphore: Arc<Semaphore>,
}

impl FetchGate {
    /// Lets one pending (or future) fetch complete.
    pub fn release(&self) {
        self.semaphore.add_permits(1);
    }
}

// =============================================================================
// CLOCK
// =============================================================================

/// A [`Clock`] that only moves when told to.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: Arc::new(AtomicI64::new(now_ms)),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by_ms: i64) {
        self.now_ms.fetch_add(by_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
