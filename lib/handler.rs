// Channel-backed connection handler for applications that would rather
// consume events than be called back on worker threads
use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};
use sock_engine::{CloseReason, ConnectionHandler, ConnectionOrigin};
use sock_transport::Connection;

const DEFAULT_RECV_BUFFER: usize = 4096;

/// What happened on a connection, delivered in per-connection order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Created {
        reference: String,
        origin: ConnectionOrigin,
    },
    Data {
        reference: String,
        bytes: Vec<u8>,
    },
    Closed {
        reference: String,
        reason: CloseReason,
    },
}

/// Forwards worker callbacks into a crossbeam channel. Data events carry at
/// most one receive-buffer's worth of bytes; anything past that follows the
/// transport's trim policy.
pub struct ChannelHandler {
    sender: Sender<ConnectionEvent>,
    recv_buffer: usize,
}

impl ChannelHandler {
    pub fn new() -> (Arc<Self>, Receiver<ConnectionEvent>) {
        ChannelHandler::with_buffer(DEFAULT_RECV_BUFFER)
    }

    pub fn with_buffer(recv_buffer: usize) -> (Arc<Self>, Receiver<ConnectionEvent>) {
        let (sender, receiver) = unbounded();
        (
            Arc::new(ChannelHandler {
                sender,
                recv_buffer,
            }),
            receiver,
        )
    }
}

impl ConnectionHandler for ChannelHandler {
    fn on_create(&self, origin: ConnectionOrigin, reference: &str) {
        let _ = self.sender.send(ConnectionEvent::Created {
            reference: reference.to_string(),
            origin,
        });
    }

    fn on_data(&self, connection: &mut Connection) {
        let mut buf = vec![0u8; self.recv_buffer];
        match connection.recv(&mut buf) {
            Ok(0) | Err(_) => {}
            Ok(n) => {
                buf.truncate(n);
                let _ = self.sender.send(ConnectionEvent::Data {
                    reference: connection.reference().to_string(),
                    bytes: buf,
                });
            }
        }
    }

    fn on_close(&self, reason: CloseReason, reference: &str) {
        let _ = self.sender.send(ConnectionEvent::Closed {
            reference: reference.to_string(),
            reason,
        });
    }
}
