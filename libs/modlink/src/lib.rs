//! # ModLink - Managed Modbus TCP Client Sessions
//!
//! Connection management core for interactive Modbus tooling: an embedding
//! UI creates connections through the [`ConnectionRegistry`] and drives
//! register I/O and background polling through [`ManagedConnection`].
//!
//! The implementation provides:
//! - Connection lifecycle with bounded retries and linear backoff
//! - Lock-serialized register read/write with explicit fault classification
//! - Automatic chunking of oversized reads against per-device limits
//! - Opt-in address-fallback probing on illegal-address faults
//! - One background poller per connection with bounded FIFO history
//!
//! # Architecture
//!
//! ```text
//! modlink
//!     ├── ConnectionRegistry (create/list/get/remove, shutdown)
//!     ├── ManagedConnection (connect/close, read/write, poll control)
//!     ├── RegisterClient / ClientFactory (seam over the wire codec)
//!     └── types (register spaces, configs, snapshots, history entries)
//! ```
//!
//! Wire-level frame encoding/decoding is delegated to `tokio-modbus`; only
//! the [`client`] module touches it. Everything else operates on the
//! [`RegisterClient`] trait, which is also how tests substitute mock
//! devices.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use modlink::{ConnectionRegistry, ConnectionSpec, RegisterSpace};
//!
//! #[tokio::main]
//! async fn main() -> errors::Result<()> {
//!     let registry = ConnectionRegistry::new();
//!     let id = registry.create(ConnectionSpec::new("192.168.1.50")).await;
//!
//!     let conn = registry.get(id).await.expect("just created");
//!     if conn.connect().await {
//!         let values = conn.read(RegisterSpace::Holding, 0, 4, false).await?;
//!         println!("Read registers: {:?}", values);
//!     }
//!
//!     registry.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod client;
mod connection;
mod poller;
mod reader;
pub mod registry;
pub mod types;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Core API ===
pub use connection::ManagedConnection;
pub use registry::ConnectionRegistry;

// === Codec seam ===
pub use client::{ClientFactory, RegisterClient, TcpClientFactory};

// === Error handling ===
pub use errors::{ErrorInfo, LinkError, Result};

// === Core types ===
pub use types::{
    ConnectionConfig, ConnectionSnapshot, ConnectionSpec, DeviceLimits, PollEntry, PollSpec,
    ReadOutcome, ReadRequest, RegisterSpace, WriteValue, DEFAULT_TCP_PORT,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
