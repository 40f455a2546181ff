// Transport abstraction - allows pluggable stream-socket backends
use std::fmt;
use std::io::Result;
use std::sync::Arc;
use std::time::Duration;

use sock_core::Logger;

/// Backend selector, fixed at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Tcp,
    Unix,
}

impl SocketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SocketKind::Tcp => "TCP",
            SocketKind::Unix => "UNIX",
        }
    }
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a handle currently is. Client handles never accept, server handles
/// never send or receive; violating either is a caller-contract error that
/// the handle rejects without touching its descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleRole {
    Undefined,
    Client,
    Server,
}

/// One stream-socket handle: at most one OS descriptor, an immutable target
/// used to (re)connect or (re)bind, and a reference string resolved at first
/// successful open.
pub trait Transport: Send {
    /// Open as a client toward the stored target. No-op success when the
    /// handle is already connected.
    fn connect(&mut self) -> Result<()>;

    /// Open as a listener on the stored target (bind + listen). No-op
    /// success when the handle is already listening.
    fn bind(&mut self) -> Result<()>;

    /// Release the descriptor and reset the role. No-op when not open.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Readiness poll. False on timeout or error; an error-readiness event
    /// closes the handle before returning false. A readable event means
    /// data or a pending accept is present.
    fn poll_input(&mut self, timeout: Duration) -> bool;

    /// Accept one pending peer as a fresh client-tagged handle of the same
    /// backend. Server handles only; None when nothing is pending or the OS
    /// call fails.
    fn accept(&mut self) -> Option<Box<dyn Transport>>;

    /// Read up to `buf.len()` bytes. Ok(0) is peer EOF and closes the
    /// handle. Bytes beyond `buf.len()` that already arrived are discarded:
    /// this is a trim-to-fit policy, not a resumable read.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write up to `buf.len()` bytes, SIGPIPE suppressed. Broken pipe or
    /// peer reset closes the handle. May write fewer bytes than requested;
    /// callers that need all of them must loop.
    fn send(&mut self, buf: &[u8]) -> Result<usize>;

    /// Human-readable endpoint, e.g. "TCP:127.0.0.1:8080", or "TCP:-" /
    /// "UNIX:-" while unresolved. Stable once resolved.
    fn reference(&self) -> &str;

    fn kind(&self) -> SocketKind;

    fn role(&self) -> HandleRole;
}

/// Construct the backend for `kind`. The target is "host:port" for TCP and
/// a filesystem path for Unix.
pub fn make_transport(
    kind: SocketKind,
    target: &str,
    logger: Option<Arc<dyn Logger>>,
) -> Box<dyn Transport> {
    match kind {
        SocketKind::Tcp => Box::new(crate::tcp::TcpTransport::with_logger(target, logger)),
        SocketKind::Unix => Box::new(crate::unix::UnixTransport::with_logger(target, logger)),
    }
}
