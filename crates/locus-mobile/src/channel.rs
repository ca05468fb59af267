//! Typed migratable channel ends.
//!
//! Values travel as JSON. [`NamedChannels`] builds ends bound to the node
//! behind a [`NodeContext`].

use crate::context::NodeContext;
use crate::error::{MobilityError, MobilityResult};
use crate::input::{InputHandoff, InputReconnectionManager};
use crate::output::{OutputHandoff, OutputReconnectionManager};
use bytes::Bytes;
use locus_types::{AccessScope, ChannelLocation};
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use std::marker::PhantomData;

/// The reading end of a migratable channel carrying `T`.
pub struct MigratableInput<T> {
    manager: InputReconnectionManager,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> MigratableInput<T> {
    pub fn new(manager: InputReconnectionManager) -> Self {
        Self {
            manager,
            _marker: PhantomData,
        }
    }

    pub fn arrive(handoff: InputHandoff, ctx: NodeContext) -> Self {
        Self::new(InputReconnectionManager::arrive(handoff, ctx))
    }

    /// Wait for the next value.
    pub async fn read(&mut self) -> MobilityResult<T> {
        let frame = self
            .manager
            .endpoint()
            .await?
            .recv()
            .await
            .ok_or(MobilityError::Closed)?;
        Ok(serde_json::from_slice(&frame)?)
    }

    pub async fn location(&mut self) -> MobilityResult<ChannelLocation> {
        self.manager.current_location().await
    }

    pub async fn prepare_to_move(&mut self) -> MobilityResult<()> {
        self.manager.prepare_to_move().await
    }

    pub fn handoff(&self) -> MobilityResult<InputHandoff> {
        self.manager.handoff()
    }

    pub fn manager(&self) -> &InputReconnectionManager {
        &self.manager
    }
}

impl<T> Serialize for MigratableInput<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.manager.serialize(serializer)
    }
}

/// The writing end of a migratable channel carrying `T`.
pub struct MigratableOutput<T> {
    manager: OutputReconnectionManager,
    _marker: PhantomData<fn(T)>,
}

impl<T: Serialize> MigratableOutput<T> {
    pub fn new(manager: OutputReconnectionManager) -> Self {
        Self {
            manager,
            _marker: PhantomData,
        }
    }

    pub fn arrive(handoff: OutputHandoff, ctx: NodeContext) -> Self {
        Self::new(OutputReconnectionManager::arrive(handoff, ctx))
    }

    pub async fn write(&mut self, value: &T) -> MobilityResult<()> {
        let payload = serde_json::to_vec(value)?;
        self.manager.write(Bytes::from(payload)).await
    }

    pub async fn prepare_to_move(&mut self) -> MobilityResult<()> {
        self.manager.prepare_to_move().await
    }

    pub fn handoff(&self) -> MobilityResult<OutputHandoff> {
        self.manager.handoff()
    }

    pub fn manager(&self) -> &OutputReconnectionManager {
        &self.manager
    }
}

impl<T> Serialize for MigratableOutput<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.manager.serialize(serializer)
    }
}

/// Builds channel ends on one node.
#[derive(Clone)]
pub struct NamedChannels {
    ctx: NodeContext,
}

impl NamedChannels {
    pub fn new(ctx: NodeContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &NodeContext {
        &self.ctx
    }

    /// An input published under `name` before this returns.
    pub async fn named_input<T: DeserializeOwned>(
        &self,
        name: &str,
    ) -> MobilityResult<MigratableInput<T>> {
        self.named_input_scoped(name, AccessScope::Global).await
    }

    pub async fn named_input_scoped<T: DeserializeOwned>(
        &self,
        name: &str,
        scope: AccessScope,
    ) -> MobilityResult<MigratableInput<T>> {
        let manager = InputReconnectionManager::named_scoped(self.ctx.clone(), name, scope);
        Self::published(manager).await
    }

    /// An input with a generated name, published before this returns.
    pub async fn anonymous_input<T: DeserializeOwned>(&self) -> MobilityResult<MigratableInput<T>> {
        Self::published(InputReconnectionManager::anonymous(self.ctx.clone())).await
    }

    /// An output to whatever `name` resolves to. Waits until the name is
    /// registered.
    pub async fn named_output<T: Serialize>(&self, name: &str) -> MobilityResult<MigratableOutput<T>> {
        self.named_output_scoped(name, AccessScope::Global).await
    }

    pub async fn named_output_scoped<T: Serialize>(
        &self,
        name: &str,
        scope: AccessScope,
    ) -> MobilityResult<MigratableOutput<T>> {
        let mut manager = OutputReconnectionManager::named_scoped(self.ctx.clone(), name, scope);
        manager.connect().await?;
        Ok(MigratableOutput::new(manager))
    }

    pub fn output_to<T: Serialize>(&self, location: ChannelLocation) -> MigratableOutput<T> {
        MigratableOutput::new(OutputReconnectionManager::to_location(
            self.ctx.clone(),
            location,
        ))
    }

    async fn published<T: DeserializeOwned>(
        mut manager: InputReconnectionManager,
    ) -> MobilityResult<MigratableInput<T>> {
        manager.endpoint().await?;
        Ok(MigratableInput::new(manager))
    }
}
