// Accept-side counterpart of Connection
use std::io::Result;
use std::sync::Arc;
use std::time::Duration;

use sock_core::{log_error, LogHandle, Logger};

use crate::connection::Connection;
use crate::traits::{make_transport, SocketKind, Transport};

/// A listening endpoint that turns pending peers into Connections. Binding
/// happens at construction; a target that cannot be bound fails the
/// constructor outright.
pub struct Server {
    transport: Box<dyn Transport>,
    log: LogHandle,
}

impl Server {
    pub fn open(kind: SocketKind, target: &str) -> Result<Self> {
        Server::open_with_logger(kind, target, None)
    }

    pub fn open_with_logger(
        kind: SocketKind,
        target: &str,
        logger: Option<Arc<dyn Logger>>,
    ) -> Result<Self> {
        let mut transport = make_transport(kind, target, logger.clone());
        transport.bind()?;
        Ok(Server {
            transport,
            log: LogHandle::from_option(logger),
        })
    }

    /// Close and bind again on the stored target. Idempotent.
    pub fn reset(&mut self) -> Result<()> {
        self.transport.close();
        self.transport.bind()
    }

    pub fn close(&mut self) {
        self.transport.close();
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// True when a connection request is pending on the listener.
    pub fn new_connection(&mut self, timeout: Duration) -> bool {
        self.transport.poll_input(timeout)
    }

    /// Accept one pending peer and wrap it. Logs and returns None when the
    /// accept fails; the accepted descriptor is owned by the returned
    /// Connection, so there is no leak path on the success side.
    pub fn accept_connection(&mut self) -> Option<Connection> {
        match self.transport.accept() {
            Some(peer) => Some(Connection::from_transport(peer)),
            None => {
                log_error!(self.log, "accept on {} yielded no peer", self.reference());
                None
            }
        }
    }

    pub fn reference(&self) -> &str {
        self.transport.reference()
    }

    pub fn kind(&self) -> SocketKind {
        self.transport.kind()
    }
}
