//! Access scopes and lease keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Namespace partition for registered names.
///
/// The directory never interprets a scope. Clients fold it into the wire
/// name with [`AccessScope::qualify`]; distinct (scope, name) pairs always
/// give distinct wire names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessScope {
    /// Visible to every node.
    #[default]
    Global,
    /// Visible only to callers using the same tag.
    Named(String),
}

impl AccessScope {
    pub fn named(tag: impl Into<String>) -> Self {
        Self::Named(tag.into())
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }

    /// The name as it travels on the wire: `g:<name>` for global names,
    /// `s<tag length>:<tag>:<name>` for scoped ones.
    pub fn qualify(&self, name: &str) -> String {
        match self {
            Self::Global => format!("g:{name}"),
            Self::Named(tag) => format!("s{}:{tag}:{name}", tag.len()),
        }
    }
}

impl fmt::Display for AccessScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Named(tag) => f.write_str(tag),
        }
    }
}

/// Proof of ownership of a name across a move of its endpoint.
///
/// Minted by the directory on every successful lease; presenting the current
/// key is what allows a name to be rebound from another node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseKey(String);

impl LeaseKey {
    /// Mint a fresh, unguessable key.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap a key received from the wire.
    pub fn from_wire(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_scope_prefix() {
        assert_eq!(AccessScope::Global.qualify("svc"), "g:svc");
        assert!(AccessScope::default().is_global());
    }

    #[test]
    fn test_named_scope_prefixes_name() {
        let scope = AccessScope::named("team-a");
        assert_eq!(scope.qualify("svc"), "s6:team-a:svc");
        assert_ne!(scope.qualify("svc"), AccessScope::named("team-b").qualify("svc"));
    }

    #[test]
    fn test_scoped_and_global_names_never_collide() {
        let team = AccessScope::named("team");
        assert_ne!(AccessScope::Global.qualify("team::svc"), team.qualify("svc"));
        assert_ne!(AccessScope::Global.qualify("s4:team:svc"), team.qualify("svc"));
        // Tags containing the separator stay unambiguous.
        assert_ne!(
            AccessScope::named("a:b").qualify("c"),
            AccessScope::named("a").qualify("b:c")
        );
    }

    #[test]
    fn test_lease_keys_are_unique() {
        assert_ne!(LeaseKey::generate(), LeaseKey::generate());
        let key = LeaseKey::from_wire("abc");
        assert_eq!(key.as_str(), "abc");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"abc\"");
    }
}
