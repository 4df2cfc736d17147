//! User identity and the two rules that decide which user a decision is made for.
//!
//! Both rules are pure functions over plain data:
//!
//! - [`Identity::apply`] folds a partial [`IdentityUpdate`] into the stored default.
//!   Omitted fields keep their previous value.
//! - [`resolve_user`] picks the effective user for a single call. A per-call
//!   override replaces the default wholesale; its attributes are never merged with
//!   the default's.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute bag used for audience evaluation.
pub type UserAttributes = BTreeMap<String, serde_json::Value>;

/// The default user of a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Option<String>,
    #[serde(default)]
    pub attributes: UserAttributes,
}

/// A partial identity change passed to `set_identity`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityUpdate {
    pub id: Option<String>,
    pub attributes: Option<UserAttributes>,
}

impl IdentityUpdate {
    /// Update that sets the id and leaves the attributes alone.
    pub fn id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            attributes: None,
        }
    }

    /// Update that replaces the attributes and leaves the id alone.
    pub fn attributes(attributes: UserAttributes) -> Self {
        Self {
            id: None,
            attributes: Some(attributes),
        }
    }

    pub fn with_attributes(mut self, attributes: UserAttributes) -> Self {
        self.attributes = Some(attributes);
        self
    }
}

impl From<&str> for IdentityUpdate {
    fn from(id: &str) -> Self {
        IdentityUpdate::id(id)
    }
}

impl From<String> for IdentityUpdate {
    fn from(id: String) -> Self {
        IdentityUpdate::id(id)
    }
}

impl Identity {
    pub fn new(id: impl Into<String>, attributes: UserAttributes) -> Self {
        Self {
            id: Some(id.into()),
            attributes,
        }
    }

    /// Returns the identity after `update`.
    ///
    /// The id is replaced if the update carries one, and so are the attributes.
    /// A field the update omits keeps its current value; it is never reset.
    pub fn apply(&self, update: IdentityUpdate) -> Identity {
        Identity {
            id: update.id.or_else(|| self.id.clone()),
            attributes: update
                .attributes
                .unwrap_or_else(|| self.attributes.clone()),
        }
    }
}

/// Per-call user that takes precedence over the client's default identity.
///
/// Attributes can only be overridden together with an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserOverride {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<UserAttributes>,
}

impl UserOverride {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: None,
        }
    }

    pub fn with_attributes(mut self, attributes: UserAttributes) -> Self {
        self.attributes = Some(attributes);
        self
    }
}

impl From<&str> for UserOverride {
    fn from(id: &str) -> Self {
        UserOverride::new(id)
    }
}

/// The user a decision is actually made for.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedUser {
    pub id: String,
    pub attributes: UserAttributes,
}

/// Resolves the effective user of one call.
///
/// | Override | Default id | Result |
/// |----------|------------|--------|
/// | id, no attributes | any | `(override.id, {})` |
/// | id with attributes | any | `(override.id, override.attributes)` |
/// | none | set | `(default.id, default.attributes)` |
/// | none | never set | `None` |
pub fn resolve_user(default: &Identity, user: Option<&UserOverride>) -> Option<ResolvedUser> {
    match user {
        Some(user) => Some(ResolvedUser {
            id: user.id.clone(),
            attributes: user.attributes.clone().unwrap_or_default(),
        }),
        None => default.id.as_ref().map(|id| ResolvedUser {
            id: id.clone(),
            attributes: default.attributes.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(pairs: &[(&str, serde_json::Value)]) -> UserAttributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_apply_replaces_supplied_fields() {
        let current = Identity::new("u1", attrs(&[("a", json!(1))]));
        let next = current.apply(IdentityUpdate::id("u2").with_attributes(attrs(&[("b", json!(2))])));

        assert_eq!(next, Identity::new("u2", attrs(&[("b", json!(2))])));
    }

    #[test]
    fn test_apply_id_only_keeps_attributes() {
        let current = Identity::new("u1", attrs(&[("a", json!(1))]));
        let next = current.apply(IdentityUpdate::id("u2"));

        assert_eq!(next.id.as_deref(), Some("u2"));
        assert_eq!(next.attributes, attrs(&[("a", json!(1))]));
    }

    #[test]
    fn test_apply_attributes_only_keeps_id() {
        let current = Identity::new("u1", attrs(&[("a", json!(1))]));
        let next = current.apply(IdentityUpdate::attributes(UserAttributes::new()));

        assert_eq!(next.id.as_deref(), Some("u1"));
        assert!(next.attributes.is_empty());
    }

    #[test]
    fn test_apply_on_empty_identity() {
        let next = Identity::default().apply("u1".into());
        assert_eq!(next, Identity::new("u1", UserAttributes::new()));
    }

    #[test]
    fn test_override_precedence_table() {
        let default = Identity::new("u1", attrs(&[("a", json!(1))]));
        let unset = Identity::default();
        let with_attrs = UserOverride::new("u2").with_attributes(attrs(&[("b", json!(2))]));
        let id_only = UserOverride::new("u2");

        let cases: Vec<(&Identity, Option<&UserOverride>, Option<ResolvedUser>)> = vec![
            // override id without attributes never inherits the default's
            (
                &default,
                Some(&id_only),
                Some(ResolvedUser {
                    id: "u2".into(),
                    attributes: UserAttributes::new(),
                }),
            ),
            // override attributes are used as given, not merged
            (
                &default,
                Some(&with_attrs),
                Some(ResolvedUser {
                    id: "u2".into(),
                    attributes: attrs(&[("b", json!(2))]),
                }),
            ),
            (
                &default,
                None,
                Some(ResolvedUser {
                    id: "u1".into(),
                    attributes: attrs(&[("a", json!(1))]),
                }),
            ),
            (&unset, None, None),
            (
                &unset,
                Some(&id_only),
                Some(ResolvedUser {
                    id: "u2".into(),
                    attributes: UserAttributes::new(),
                }),
            ),
        ];

        for (default, user, expected) in cases {
            assert_eq!(resolve_user(default, user), expected, "override: {:?}", user);
        }
    }

    #[test]
    fn test_override_deserializes_without_attributes() {
        let user: UserOverride = serde_json::from_value(json!({"id": "u9"})).unwrap();
        assert_eq!(user, UserOverride::new("u9"));
    }
}
