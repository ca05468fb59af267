//! Migratable channel ends.
//!
//! An input end can be prepared, serialized, shipped to another node and
//! rebuilt there while keeping the name writers know it by. Output ends
//! that lose their destination re-resolve the name and carry on.

pub mod channel;
pub mod context;
pub mod error;
pub mod input;
pub mod output;

pub use channel::{MigratableInput, MigratableOutput, NamedChannels};
pub use context::NodeContext;
pub use error::{MobilityError, MobilityResult};
pub use input::{InputHandoff, InputReconnectionManager};
pub use output::{OutputHandoff, OutputReconnectionManager, MAX_WRITE_ATTEMPTS};
