//! Core types for Locus, the naming and mobility layer for networked channels.
//!
//! This crate defines the identities and addresses shared by the wire codec,
//! the directory service and the reconnection managers. It contains no
//! business logic.

pub mod config;
pub mod error;
pub mod location;
pub mod naming;
pub mod node;

pub use location::ChannelLocation;
pub use naming::{AccessScope, LeaseKey};
pub use node::NodeId;
