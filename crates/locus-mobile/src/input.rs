//! The receiving side of a migratable channel.
//!
//! An [`InputReconnectionManager`] owns at most one local endpoint. Between
//! moves it is `Connected`; after [`prepare_to_move`] (or on arrival at a
//! new node) it is `Disconnected`, and the next call to [`endpoint`] opens a
//! fresh endpoint and publishes it under the manager's name.
//!
//! Preparing leases the name: the directory withdraws the old location and
//! holds resolves until the manager, now on its destination node, presents
//! the lease key together with its new location.
//!
//! [`prepare_to_move`]: InputReconnectionManager::prepare_to_move
//! [`endpoint`]: InputReconnectionManager::endpoint

use crate::context::{anonymous_name, NodeContext};
use crate::error::{MobilityError, MobilityResult};
use locus_types::{AccessScope, ChannelLocation, LeaseKey};
use locus_wire::Endpoint;
use serde::{Deserialize, Serialize, Serializer};
use std::sync::Arc;
use tracing::{debug, info, warn};

enum Link {
    Disconnected,
    Connected(Endpoint),
}

/// The plain-data form of a prepared input manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputHandoff {
    pub name: String,
    #[serde(default)]
    pub scope: AccessScope,
    pub key: LeaseKey,
}

pub struct InputReconnectionManager {
    ctx: NodeContext,
    link: Link,
    name: Option<String>,
    scope: AccessScope,
    key: Option<LeaseKey>,
    serializable: bool,
}

impl InputReconnectionManager {
    /// A manager with no name. One is generated from the endpoint location
    /// when the endpoint is first published.
    pub fn anonymous(ctx: NodeContext) -> Self {
        Self::build(ctx, None, AccessScope::Global, None)
    }

    pub fn named(ctx: NodeContext, name: impl Into<String>) -> Self {
        Self::build(ctx, Some(name.into()), AccessScope::Global, None)
    }

    pub fn named_scoped(ctx: NodeContext, name: impl Into<String>, scope: AccessScope) -> Self {
        Self::build(ctx, Some(name.into()), scope, None)
    }

    /// Rebuild a moved manager on the node behind `ctx`. Nothing touches the
    /// network until the endpoint is first used.
    pub fn arrive(handoff: InputHandoff, ctx: NodeContext) -> Self {
        debug!(name = %handoff.name, node = %ctx.node(), "Input end arrived");
        Self::build(ctx, Some(handoff.name), handoff.scope, Some(handoff.key))
    }

    fn build(
        ctx: NodeContext,
        name: Option<String>,
        scope: AccessScope,
        key: Option<LeaseKey>,
    ) -> Self {
        Self {
            ctx,
            link: Link::Disconnected,
            name,
            scope,
            key,
            serializable: false,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn scope(&self) -> &AccessScope {
        &self.scope
    }

    pub fn lease_key(&self) -> Option<&LeaseKey> {
        self.key.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.link, Link::Connected(_))
    }

    pub fn is_serializable(&self) -> bool {
        self.serializable
    }

    /// The live local endpoint, opening and publishing one if needed.
    ///
    /// Using the endpoint cancels any earlier preparation to move.
    pub async fn endpoint(&mut self) -> MobilityResult<&mut Endpoint> {
        self.ensure_connected().await?;
        self.serializable = false;
        match &mut self.link {
            Link::Connected(endpoint) => Ok(endpoint),
            Link::Disconnected => Err(MobilityError::Closed),
        }
    }

    /// Where writers currently reach this input.
    pub async fn current_location(&mut self) -> MobilityResult<ChannelLocation> {
        Ok(self.endpoint().await?.location().clone())
    }

    async fn ensure_connected(&mut self) -> MobilityResult<()> {
        if let Link::Disconnected = self.link {
            let endpoint = self.connect().await?;
            self.link = Link::Connected(endpoint);
        }
        Ok(())
    }

    async fn connect(&mut self) -> MobilityResult<Endpoint> {
        let endpoint = self.ctx.transport().open_endpoint();
        let location = endpoint.location().clone();
        let assigned = self.name.is_none();
        let name = self
            .name
            .get_or_insert_with(|| anonymous_name(&location))
            .clone();

        match self.publish(&name, &location).await {
            Ok(()) => {
                info!(name = %name, location = %location, "Input end published");
                Ok(endpoint)
            }
            Err(e) => {
                if assigned {
                    self.name = None;
                }
                warn!(name = %name, error = %e, "Failed to publish input end");
                Err(match e {
                    e @ MobilityError::Construction(_) => e,
                    other => MobilityError::Construction(format!(
                        "unable to publish {name}: {other}"
                    )),
                })
            }
        }
    }

    /// Bind `name` to `location`: by keyed lease after a move, else by plain
    /// registration.
    async fn publish(&mut self, name: &str, location: &ChannelLocation) -> MobilityResult<()> {
        let directory = Arc::clone(self.ctx.directory());
        match self.key.clone() {
            Some(key) => {
                let renewed = directory
                    .lease_scoped(&self.scope, name, Some(location), Some(&key))
                    .await?;
                self.key = Some(renewed);
            }
            None => {
                if !directory.register_scoped(&self.scope, name, location).await? {
                    return Err(MobilityError::Construction(format!(
                        "name {name} already registered"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Lease the name and release the local endpoint so the manager can be
    /// serialized. Payloads still queued on the endpoint are discarded.
    ///
    /// On failure the manager is left as it was.
    pub async fn prepare_to_move(&mut self) -> MobilityResult<()> {
        if self.serializable {
            return Ok(());
        }
        if self.name.is_none() {
            // An unnamed end gets its name from the endpoint it publishes.
            self.ensure_connected().await?;
        }
        let Some(name) = self.name.clone() else {
            return Err(MobilityError::Construction("input end has no name".into()));
        };

        let directory = Arc::clone(self.ctx.directory());
        let key = directory
            .lease_scoped(&self.scope, &name, None, self.key.as_ref())
            .await?;
        self.key = Some(key);
        self.link = Link::Disconnected;
        self.serializable = true;
        info!(name = %name, "Input end prepared to move");
        Ok(())
    }

    /// The hand-off for a prepared manager.
    pub fn handoff(&self) -> MobilityResult<InputHandoff> {
        match (self.serializable, &self.name, &self.key) {
            (true, Some(name), Some(key)) => Ok(InputHandoff {
                name: name.clone(),
                scope: self.scope.clone(),
                key: key.clone(),
            }),
            _ => Err(MobilityError::NotPrepared),
        }
    }
}

impl Serialize for InputReconnectionManager {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let handoff = self.handoff().map_err(serde::ser::Error::custom)?;
        handoff.serialize(serializer)
    }
}

impl std::fmt::Debug for InputReconnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputReconnectionManager")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("connected", &self.is_connected())
            .field("serializable", &self.serializable)
            .finish()
    }
}
