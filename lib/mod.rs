// lib: user-facing library for building socket daemons and clients

// Re-export logging and config
pub use sock_core::*;

// Re-export transport abstractions
pub use sock_transport::*;

// Re-export the threaded engine
pub use sock_engine::*;

pub mod handler;

pub use handler::*;

use std::io::Result;
use std::sync::Arc;

/// Bind `target`, start the control loop, and hand back the running
/// registry. The registry stops and frees its workers when dropped.
pub fn serve(
    kind: SocketKind,
    target: &str,
    handler: Arc<dyn ConnectionHandler>,
    config: RegistryConfig,
) -> Result<ConnectionRegistry> {
    let mut registry = ConnectionRegistry::open(kind, target, handler, config)?;
    registry.start()?;
    Ok(registry)
}

/// Connect to a listening endpoint.
pub fn dial(kind: SocketKind, target: &str) -> Result<Connection> {
    Connection::open(kind, target)
}
