//! Client stub for the directory.
//!
//! A node creates one [`DirectoryClient`] per directory. Creating it logs the
//! node on; afterwards every call is a request/reply exchange with the
//! registry. Register, lease and deregister share one reply endpoint and run
//! one at a time. Each resolve uses its own endpoint, so any number may wait
//! concurrently.

use crate::error::{DirectoryError, DirectoryResult};
use locus_types::{AccessScope, ChannelLocation, LeaseKey, NodeId};
use locus_wire::{decode_message, encode_message, DirectoryMessage, Endpoint, MessageKind, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct DirectoryClient {
    transport: Arc<dyn Transport>,
    directory: ChannelLocation,
    reply: Mutex<Endpoint>,
    resolve_timeout: Option<Duration>,
}

impl DirectoryClient {
    /// Log on to the directory hosted on `directory_node`.
    pub async fn logon(
        transport: Arc<dyn Transport>,
        directory_node: NodeId,
    ) -> DirectoryResult<Self> {
        let directory = ChannelLocation::directory(directory_node);
        let mut reply = transport.open_endpoint();
        let request = DirectoryMessage::logon(reply.location().clone());
        let rejected = || DirectoryError::LogonRejected(directory.to_string());

        let answer = call(
            transport.as_ref(),
            &directory,
            &mut reply,
            &request,
            MessageKind::LogonReply,
        )
        .await
        .map_err(|e| {
            warn!(directory = %directory, error = %e, "Logon failed");
            rejected()
        })?;
        if !answer.success {
            return Err(rejected());
        }
        info!(node = %transport.local_node(), directory = %directory, "Logged on to directory");

        Ok(Self {
            transport,
            directory,
            reply: Mutex::new(reply),
            resolve_timeout: None,
        })
    }

    /// Like [`DirectoryClient::logon`], but give up if no reply arrives
    /// within `after`. A directory that cannot dial back to this node never
    /// answers.
    pub async fn logon_timeout(
        transport: Arc<dyn Transport>,
        directory_node: NodeId,
        after: Duration,
    ) -> DirectoryResult<Self> {
        let directory = ChannelLocation::directory(directory_node.clone());
        tokio::time::timeout(after, Self::logon(transport, directory_node))
            .await
            .map_err(|_| {
                warn!(directory = %directory, ?after, "Logon timed out");
                DirectoryError::LogonTimeout {
                    directory: directory.to_string(),
                    after,
                }
            })?
    }

    /// Bound every plain `resolve` by `timeout`. `None` waits forever.
    pub fn with_resolve_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub fn directory(&self) -> &ChannelLocation {
        &self.directory
    }

    pub fn node(&self) -> &NodeId {
        self.transport.local_node()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Bind `name` to `location`. Returns false if the name is taken.
    pub async fn register(&self, name: &str, location: &ChannelLocation) -> DirectoryResult<bool> {
        self.register_scoped(&AccessScope::Global, name, location)
            .await
    }

    pub async fn register_scoped(
        &self,
        scope: &AccessScope,
        name: &str,
        location: &ChannelLocation,
    ) -> DirectoryResult<bool> {
        let wire_name = scope.qualify(name);
        let mut reply = self.reply.lock().await;
        let request =
            DirectoryMessage::register(reply.location().clone(), &wire_name, location.clone());
        let answer = call(
            self.transport.as_ref(),
            &self.directory,
            &mut reply,
            &request,
            MessageKind::RegisterReply,
        )
        .await?;
        debug!(name = %name, scope = %scope, success = answer.success, "Register answered");
        Ok(answer.success)
    }

    /// Look up `name`, waiting until it is registered.
    pub async fn resolve(&self, name: &str) -> DirectoryResult<ChannelLocation> {
        self.resolve_in(&AccessScope::Global, name, self.resolve_timeout)
            .await
    }

    /// Look up `name`, giving up after `after`.
    pub async fn resolve_timeout(
        &self,
        name: &str,
        after: Duration,
    ) -> DirectoryResult<ChannelLocation> {
        self.resolve_in(&AccessScope::Global, name, Some(after))
            .await
    }

    pub async fn resolve_scoped(
        &self,
        scope: &AccessScope,
        name: &str,
    ) -> DirectoryResult<ChannelLocation> {
        self.resolve_in(scope, name, self.resolve_timeout).await
    }

    async fn resolve_in(
        &self,
        scope: &AccessScope,
        name: &str,
        timeout: Option<Duration>,
    ) -> DirectoryResult<ChannelLocation> {
        let mut reply = self.transport.open_endpoint();
        let request = DirectoryMessage::resolve(reply.location().clone(), &scope.qualify(name));
        let exchange = call(
            self.transport.as_ref(),
            &self.directory,
            &mut reply,
            &request,
            MessageKind::ResolveReply,
        );
        let answer = match timeout {
            Some(after) => tokio::time::timeout(after, exchange)
                .await
                .map_err(|_| DirectoryError::Timeout {
                    name: name.to_string(),
                    after,
                })??,
            None => exchange.await?,
        };
        match answer.location1 {
            Some(location) if answer.success => Ok(location),
            _ => Err(DirectoryError::NotFound(name.to_string())),
        }
    }

    /// Lease `name`, returning the fresh key.
    ///
    /// With a location the name is bound to it. Without one the name is
    /// reserved and resolves wait until a later keyed lease binds it again.
    pub async fn lease(
        &self,
        name: &str,
        location: Option<&ChannelLocation>,
        key: Option<&LeaseKey>,
    ) -> DirectoryResult<LeaseKey> {
        self.lease_scoped(&AccessScope::Global, name, location, key)
            .await
    }

    pub async fn lease_scoped(
        &self,
        scope: &AccessScope,
        name: &str,
        location: Option<&ChannelLocation>,
        key: Option<&LeaseKey>,
    ) -> DirectoryResult<LeaseKey> {
        let mut reply = self.reply.lock().await;
        let request = DirectoryMessage::lease(
            reply.location().clone(),
            &scope.qualify(name),
            location.cloned(),
            key.cloned(),
        );
        let answer = call(
            self.transport.as_ref(),
            &self.directory,
            &mut reply,
            &request,
            MessageKind::LeaseReply,
        )
        .await?;
        match answer.key {
            Some(key) if answer.success => {
                debug!(name = %name, scope = %scope, "Lease granted");
                Ok(key)
            }
            _ => Err(DirectoryError::LeaseRefused(name.to_string())),
        }
    }

    /// Remove `name`. Only its owner, or a holder of its lease key, may.
    pub async fn deregister(&self, name: &str, key: Option<&LeaseKey>) -> DirectoryResult<bool> {
        self.deregister_scoped(&AccessScope::Global, name, key)
            .await
    }

    pub async fn deregister_scoped(
        &self,
        scope: &AccessScope,
        name: &str,
        key: Option<&LeaseKey>,
    ) -> DirectoryResult<bool> {
        let mut reply = self.reply.lock().await;
        let request =
            DirectoryMessage::deregister(reply.location().clone(), &scope.qualify(name), key.cloned());
        let answer = call(
            self.transport.as_ref(),
            &self.directory,
            &mut reply,
            &request,
            MessageKind::DeregisterReply,
        )
        .await?;
        Ok(answer.success)
    }
}

/// Send `request` to the directory and wait on `reply` for the answer of
/// kind `expect` that names the same entry.
///
/// Frames left on `reply` by an earlier call that was abandoned mid-flight
/// are drained first; any that arrive later are skipped by the name check.
async fn call(
    transport: &dyn Transport,
    directory: &ChannelLocation,
    reply: &mut Endpoint,
    request: &DirectoryMessage,
    expect: MessageKind,
) -> DirectoryResult<DirectoryMessage> {
    while reply.try_recv().is_some() {
        debug!(expected = ?expect, "Discarding stale directory reply");
    }
    transport.send(directory, encode_message(request)?).await?;
    await_reply(reply, expect, &request.name).await
}

async fn await_reply(
    reply: &mut Endpoint,
    expect: MessageKind,
    name: &str,
) -> DirectoryResult<DirectoryMessage> {
    loop {
        let frame = reply.recv().await.ok_or(DirectoryError::ReplyChannelClosed)?;
        match decode_message(&frame) {
            Ok(msg) if msg.kind == expect && msg.name == name => return Ok(msg),
            Ok(msg) => warn!(
                kind = ?msg.kind,
                name = %msg.name,
                expected = ?expect,
                "Discarding unexpected directory reply"
            ),
            Err(e) => warn!(error = %e, "Discarding undecodable directory reply"),
        }
    }
}
