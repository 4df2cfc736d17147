//! # Decision Engine Seam
//!
//! The client never computes decisions itself. Everything it asks is answered by
//! a [`DecisionEngine`] built from the current datafile by an [`EngineFactory`].
//! Engine calls are synchronous and always receive a fully resolved user.

use crate::model::{Datafile, UserAttributes};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Tags attached to a tracked conversion event.
pub type EventTags = BTreeMap<String, serde_json::Value>;

/// The evaluation library the client delegates to.
pub trait DecisionEngine: Send + Sync {
    /// Buckets the user and records an impression.
    fn activate(&self, experiment_key: &str, user_id: &str, attributes: &UserAttributes) -> Option<String>;

    /// Buckets the user without recording an impression.
    fn get_variation(&self, experiment_key: &str, user_id: &str, attributes: &UserAttributes) -> Option<String>;

    /// `tags` is `None` when the caller gave none.
    fn track(&self, event_key: &str, user_id: &str, attributes: &UserAttributes, tags: Option<&EventTags>);

    fn is_feature_enabled(&self, feature_key: &str, user_id: &str, attributes: &UserAttributes) -> bool;

    fn get_enabled_features(&self, user_id: &str, attributes: &UserAttributes) -> Vec<String>;

    fn get_feature_variable_string(
        &self,
        feature_key: &str,
        variable_key: &str,
        user_id: &str,
        attributes: &UserAttributes,
    ) -> Option<String>;

    fn get_feature_variable_boolean(
        &self,
        feature_key: &str,
        variable_key: &str,
        user_id: &str,
        attributes: &UserAttributes,
    ) -> Option<bool>;

    fn get_feature_variable_integer(
        &self,
        feature_key: &str,
        variable_key: &str,
        user_id: &str,
        attributes: &UserAttributes,
    ) -> Option<i64>;

    fn get_feature_variable_double(
        &self,
        feature_key: &str,
        variable_key: &str,
        user_id: &str,
        attributes: &UserAttributes,
    ) -> Option<f64>;

    fn get_forced_variation(&self, experiment_key: &str, user_id: &str) -> Option<String>;

    /// Forces `variation_key` for the user, or clears the forced variation when `None`.
    fn set_forced_variation(&self, experiment_key: &str, user_id: &str, variation_key: Option<&str>) -> bool;

    /// Flushes anything buffered. Called once, when the engine is replaced by a
    /// refreshed datafile or the client closes.
    fn close(&self) {}
}

/// Builds an engine for a datafile.
///
/// Invoked once for the initial datafile and again for each refreshed one.
pub trait EngineFactory: Send + Sync {
    fn create(&self, datafile: &Datafile) -> Arc<dyn DecisionEngine>;
}

impl<F> EngineFactory for F
where
    F: Fn(&Datafile) -> Arc<dyn DecisionEngine> + Send + Sync,
{
    fn create(&self, datafile: &Datafile) -> Arc<dyn DecisionEngine> {
        self(datafile)
    }
}
