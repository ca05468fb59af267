//! The sending side of a migratable channel.
//!
//! An [`OutputReconnectionManager`] writes to a channel location. When a
//! write fails because the destination moved or vanished, the manager asks
//! the directory where the name now lives and tries again. Outputs created
//! from a bare location fall back to the anonymous name derived from that
//! location, which is what an unnamed input publishes itself under.

use crate::context::{anonymous_name, NodeContext};
use crate::error::{MobilityError, MobilityResult};
use bytes::Bytes;
use locus_types::{AccessScope, ChannelLocation};
use locus_wire::WireError;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, warn};

/// Writes made per payload before giving up, the first included.
pub const MAX_WRITE_ATTEMPTS: u32 = 10;

/// The plain-data form of a prepared output manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputHandoff {
    pub location: ChannelLocation,
    pub name: Option<String>,
    #[serde(default)]
    pub scope: AccessScope,
}

pub struct OutputReconnectionManager {
    ctx: NodeContext,
    target: Option<ChannelLocation>,
    name: Option<String>,
    scope: AccessScope,
    serializable: bool,
}

impl OutputReconnectionManager {
    /// Write to a known location.
    pub fn to_location(ctx: NodeContext, location: ChannelLocation) -> Self {
        Self {
            ctx,
            target: Some(location),
            name: None,
            scope: AccessScope::Global,
            serializable: false,
        }
    }

    /// Write to whatever `name` resolves to. Resolution waits for the first
    /// write.
    pub fn named(ctx: NodeContext, name: impl Into<String>) -> Self {
        Self::named_scoped(ctx, name, AccessScope::Global)
    }

    pub fn named_scoped(ctx: NodeContext, name: impl Into<String>, scope: AccessScope) -> Self {
        Self {
            ctx,
            target: None,
            name: Some(name.into()),
            scope,
            serializable: false,
        }
    }

    /// Rebuild a moved manager on the node behind `ctx`.
    pub fn arrive(handoff: OutputHandoff, ctx: NodeContext) -> Self {
        Self {
            ctx,
            target: Some(handoff.location),
            name: handoff.name,
            scope: handoff.scope,
            serializable: false,
        }
    }

    pub fn target(&self) -> Option<&ChannelLocation> {
        self.target.as_ref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_serializable(&self) -> bool {
        self.serializable
    }

    /// Deliver `payload`, following the destination if it has moved.
    ///
    /// Routing failures trigger a fresh resolve and another attempt, up to
    /// [`MAX_WRITE_ATTEMPTS`] writes in total; after that the first failure
    /// is returned. Any other failure is returned at once.
    pub async fn write(&mut self, payload: Bytes) -> MobilityResult<()> {
        self.serializable = false;
        let mut first_failure: Option<WireError> = None;
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let target = self.ensure_target().await?;
            match self.ctx.transport().send(&target, payload.clone()).await {
                Ok(()) => {
                    if attempt > 1 {
                        debug!(target = %target, attempt, "Write delivered after relocation");
                    }
                    return Ok(());
                }
                Err(e) if e.is_routing_failure() => {
                    debug!(target = %target, attempt, error = %e, "Write failed, relocating");
                    first_failure.get_or_insert(e);
                    if attempt < MAX_WRITE_ATTEMPTS {
                        self.relocate(&target).await?;
                    }
                }
                Err(e) => return Err(MobilityError::Wire(e)),
            }
        }
        let source = first_failure.unwrap_or(WireError::ConnectionClosed);
        warn!(
            name = ?self.name,
            attempts = MAX_WRITE_ATTEMPTS,
            error = %source,
            "Giving up on write"
        );
        Err(MobilityError::Write {
            attempts: MAX_WRITE_ATTEMPTS,
            source,
        })
    }

    /// Resolve the destination now rather than on the first write.
    pub async fn connect(&mut self) -> MobilityResult<ChannelLocation> {
        self.ensure_target().await
    }

    /// Make sure a target is known, then mark the manager serializable.
    pub async fn prepare_to_move(&mut self) -> MobilityResult<()> {
        if self.serializable {
            return Ok(());
        }
        self.ensure_target().await?;
        self.serializable = true;
        Ok(())
    }

    pub fn handoff(&self) -> MobilityResult<OutputHandoff> {
        match (&self.target, self.serializable) {
            (Some(location), true) => Ok(OutputHandoff {
                location: location.clone(),
                name: self.name.clone(),
                scope: self.scope.clone(),
            }),
            _ => Err(MobilityError::NotPrepared),
        }
    }

    async fn ensure_target(&mut self) -> MobilityResult<ChannelLocation> {
        if let Some(target) = &self.target {
            return Ok(target.clone());
        }
        let name = self
            .name
            .clone()
            .ok_or_else(|| MobilityError::Construction("output has no target".into()))?;
        let location = self
            .ctx
            .directory()
            .resolve_scoped(&self.scope, &name)
            .await?;
        self.target = Some(location.clone());
        Ok(location)
    }

    /// Look the destination up again after `failed` stopped answering.
    async fn relocate(&mut self, failed: &ChannelLocation) -> MobilityResult<()> {
        if self.name.is_none() {
            self.name = Some(anonymous_name(failed));
        }
        self.target = None;
        self.ensure_target().await?;
        Ok(())
    }
}

impl Serialize for OutputReconnectionManager {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let handoff = self.handoff().map_err(serde::ser::Error::custom)?;
        handoff.serialize(serializer)
    }
}

impl std::fmt::Debug for OutputReconnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputReconnectionManager")
            .field("target", &self.target)
            .field("name", &self.name)
            .field("serializable", &self.serializable)
            .finish()
    }
}
