//! Channel locations: routable addresses of single channel endpoints.

use crate::error::LocusError;
use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Endpoint index the directory listens on, on the directory's own node.
pub const DIRECTORY_INDEX: u64 = 1;

/// First index handed out to endpoints opened without an explicit number.
/// Lower indexes are reserved for well-known, numbered endpoints.
pub const FIRST_DYNAMIC_INDEX: u64 = 64;

const SCHEME: &str = "ncl://";

/// Address of one channel endpoint: the node hosting it plus the endpoint's
/// index on that node.
///
/// Text form: `ncl://<uuid>@<address>/<index>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelLocation {
    node: NodeId,
    index: u64,
}

impl ChannelLocation {
    pub fn new(node: NodeId, index: u64) -> Self {
        Self { node, index }
    }

    /// The well-known directory endpoint on `node`.
    pub fn directory(node: NodeId) -> Self {
        Self::new(node, DIRECTORY_INDEX)
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn index(&self) -> u64 {
        self.index
    }
}

impl fmt::Display for ChannelLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}/{}", self.node, self.index)
    }
}

impl FromStr for ChannelLocation {
    type Err = LocusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(SCHEME)
            .ok_or_else(|| LocusError::InvalidLocation(format!("missing {SCHEME} in {s:?}")))?;
        let (node, index) = rest
            .rsplit_once('/')
            .ok_or_else(|| LocusError::InvalidLocation(format!("missing index in {s:?}")))?;
        let index = index
            .parse::<u64>()
            .map_err(|e| LocusError::InvalidLocation(format!("{s:?}: {e}")))?;
        let node = node
            .parse::<NodeId>()
            .map_err(|e| LocusError::InvalidLocation(format!("{s:?}: {e}")))?;
        Ok(Self::new(node, index))
    }
}

impl TryFrom<String> for ChannelLocation {
    type Error = LocusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChannelLocation> for String {
    fn from(location: ChannelLocation) -> Self {
        location.to_string()
    }
}
