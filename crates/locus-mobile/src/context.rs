//! Per-node services shared by every migratable channel end on the node.

use locus_directory::{DirectoryClient, DirectoryResult};
use locus_types::{ChannelLocation, NodeId};
use locus_wire::Transport;
use std::sync::Arc;

/// Prefix of names given to channel ends that were never named.
pub const ANONYMOUS_PREFIX: &str = "locus.anon:";

/// The name an unnamed endpoint at `location` is published under.
pub fn anonymous_name(location: &ChannelLocation) -> String {
    format!("{ANONYMOUS_PREFIX}{location}")
}

/// The node a channel end currently lives on.
#[derive(Clone)]
pub struct NodeContext {
    directory: Arc<DirectoryClient>,
}

impl NodeContext {
    pub fn new(directory: Arc<DirectoryClient>) -> Self {
        Self { directory }
    }

    /// Log `transport`'s node on to the directory on `directory_node`.
    pub async fn logon(
        transport: Arc<dyn Transport>,
        directory_node: NodeId,
    ) -> DirectoryResult<Self> {
        let client = DirectoryClient::logon(transport, directory_node).await?;
        Ok(Self::new(Arc::new(client)))
    }

    pub fn directory(&self) -> &Arc<DirectoryClient> {
        &self.directory
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        self.directory.transport()
    }

    pub fn node(&self) -> &NodeId {
        self.directory.node()
    }
}
