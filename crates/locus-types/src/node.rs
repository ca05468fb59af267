//! Node identity.

use crate::error::LocusError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifies one participant process on the network.
///
/// An identity pairs a random UUID, fixed for the lifetime of the transport
/// that minted it, with the address other nodes use to reach that transport.
/// Two identities are equal only when both parts match, so a node restarted
/// on the same address is a different node.
///
/// The textual form is `<uuid>@<address>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId {
    id: Uuid,
    address: String,
}

impl NodeId {
    /// Mint a fresh identity for a node reachable at `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            address: address.into(),
        }
    }

    /// Rebuild an identity from its parts.
    pub fn from_parts(id: Uuid, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }

    /// The unique part of the identity.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The transport address of the node.
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}

impl FromStr for NodeId {
    type Err = LocusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, address) = s
            .split_once('@')
            .ok_or_else(|| LocusError::InvalidNodeId(format!("missing '@' in {s:?}")))?;
        let id = Uuid::parse_str(id)
            .map_err(|e| LocusError::InvalidNodeId(format!("{s:?}: {e}")))?;
        if address.is_empty() {
            return Err(LocusError::InvalidNodeId(format!("empty address in {s:?}")));
        }
        Ok(Self::from_parts(id, address))
    }
}

impl TryFrom<String> for NodeId {
    type Error = LocusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeId> for String {
    fn from(node: NodeId) -> Self {
        node.to_string()
    }
}
