// Application-facing capability over one transport handle
use std::io::Result;
use std::sync::Arc;
use std::time::Duration;

use sock_core::Logger;

use crate::traits::{make_transport, SocketKind, Transport};

/// One live byte-stream conversation. Owns its transport exclusively; the
/// transport dies with the connection.
pub struct Connection {
    transport: Box<dyn Transport>,
}

impl Connection {
    /// Connect to `target` over the given backend.
    pub fn open(kind: SocketKind, target: &str) -> Result<Self> {
        Connection::open_with_logger(kind, target, None)
    }

    pub fn open_with_logger(
        kind: SocketKind,
        target: &str,
        logger: Option<Arc<dyn Logger>>,
    ) -> Result<Self> {
        let mut transport = make_transport(kind, target, logger);
        transport.connect()?;
        Ok(Connection { transport })
    }

    /// Wrap an already-open transport, typically one produced by accept.
    pub fn from_transport(transport: Box<dyn Transport>) -> Self {
        Connection { transport }
    }

    /// Close and connect again toward the original target.
    pub fn reset(&mut self) -> Result<()> {
        self.transport.close();
        self.transport.connect()
    }

    pub fn close(&mut self) {
        self.transport.close();
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    /// True when bytes are already waiting; does not block.
    pub fn new_data(&mut self) -> bool {
        self.transport.poll_input(Duration::ZERO)
    }

    /// Block up to `timeout` for bytes to arrive.
    pub fn wait_data(&mut self, timeout: Duration) -> bool {
        self.transport.poll_input(timeout)
    }

    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.transport.recv(buf)
    }

    pub fn send(&mut self, buf: &[u8]) -> Result<usize> {
        self.transport.send(buf)
    }

    pub fn reference(&self) -> &str {
        self.transport.reference()
    }

    pub fn kind(&self) -> SocketKind {
        self.transport.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Server;

    #[test]
    fn dial_send_receive_close() {
        let mut server = Server::open(SocketKind::Tcp, "127.0.0.1:0").unwrap();
        let target = server.reference().strip_prefix("TCP:").unwrap().to_string();

        let mut client = Connection::open(SocketKind::Tcp, &target).unwrap();
        assert!(client.is_connected());
        assert_eq!(client.kind(), SocketKind::Tcp);

        assert!(server.new_connection(Duration::from_secs(2)));
        let mut peer = server.accept_connection().unwrap();

        client.send(b"0123456789").unwrap();
        assert!(peer.wait_data(Duration::from_secs(2)));
        assert!(peer.new_data());
        let mut buf = [0u8; 32];
        assert_eq!(peer.recv(&mut buf).unwrap(), 10);
        assert_eq!(&buf[..10], b"0123456789");

        client.close();
        assert!(!client.is_connected());
        // Close is idempotent through the capability as well
        client.close();
        assert!(!client.is_connected());
    }

    #[test]
    fn reset_reconnects_to_original_target() {
        let mut server = Server::open(SocketKind::Tcp, "127.0.0.1:0").unwrap();
        let target = server.reference().strip_prefix("TCP:").unwrap().to_string();

        let mut client = Connection::open(SocketKind::Tcp, &target).unwrap();
        assert!(server.new_connection(Duration::from_secs(2)));
        let _first = server.accept_connection().unwrap();

        client.reset().unwrap();
        assert!(client.is_connected());
        assert!(server.new_connection(Duration::from_secs(2)));
        assert!(server.accept_connection().is_some());
    }

    #[test]
    fn open_against_dead_target_fails_construction() {
        // Port 1 on loopback is essentially never listening
        assert!(Connection::open(SocketKind::Tcp, "127.0.0.1:1").is_err());
    }
}
