//! Locus directory service.
//!
//! The registry process maps names to channel locations for every node on a
//! network. Nodes talk to it through a [`DirectoryClient`], which logs on
//! once and then registers, resolves, leases and deregisters names.

pub mod client;
pub mod config;
pub mod error;
pub mod registry;
pub mod server;

pub use client::DirectoryClient;
pub use error::{DirectoryError, DirectoryResult};
pub use registry::{Registry, RegistryStats};
pub use server::{DirectoryHandle, DirectoryServer};
