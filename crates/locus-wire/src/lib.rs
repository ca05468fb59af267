//! Locus wire layer: the directory protocol codec and the transports that
//! carry frames between channel endpoints.
//!
//! ## Architecture
//!
//! - **DirectoryMessage**: binary-framed directory protocol messages
//! - **Endpoint**: a local receiving end, addressed by a `ChannelLocation`
//! - **Transport**: trait for sending frames and observing lost nodes
//! - **MemoryNetwork**: in-process transport with simulated node loss
//! - **TcpTransport**: acknowledged TCP delivery between processes

pub mod endpoint;
pub mod error;
pub mod memory;
pub mod message;
pub mod tcp;
pub mod transport;

pub use endpoint::{Endpoint, EndpointTable};
pub use error::{WireError, WireResult};
pub use memory::{MemoryNetwork, MemoryTransport};
pub use message::{decode_message, encode_message, DirectoryMessage, MessageKind};
pub use tcp::TcpTransport;
pub use transport::Transport;
