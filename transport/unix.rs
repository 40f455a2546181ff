// Unix domain socket transport implementation
use std::fs;
use std::io::{self, Result};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::socket::{setsockopt, sockopt};
use sock_core::{log_debug, log_error, log_warn, LogHandle, Logger};

use crate::sys::{self, Readiness};
use crate::traits::{HandleRole, SocketKind, Transport};

const SOCKET_SEND_BUFFER: usize = 65536;

enum UnixSocket {
    Stream(UnixStream),
    Listener(UnixListener),
}

pub struct UnixTransport {
    socket_path: String,
    socket: Option<UnixSocket>,
    role: HandleRole,
    reference: Option<String>,
    log: LogHandle,
}

impl UnixTransport {
    pub fn new(socket_path: &str) -> Self {
        UnixTransport::with_logger(socket_path, None)
    }

    pub fn with_logger(socket_path: &str, logger: Option<Arc<dyn Logger>>) -> Self {
        UnixTransport {
            socket_path: socket_path.to_string(),
            socket: None,
            role: HandleRole::Undefined,
            reference: None,
            log: LogHandle::from_option(logger),
        }
    }

    fn fd(&self) -> Option<RawFd> {
        match self.socket {
            Some(UnixSocket::Stream(ref s)) => Some(s.as_raw_fd()),
            Some(UnixSocket::Listener(ref l)) => Some(l.as_raw_fd()),
            None => None,
        }
    }

    fn misuse(&self, op: &str) -> io::Error {
        log_error!(
            self.log,
            "{} not valid on {:?} handle {}",
            op,
            self.role,
            self.reference()
        );
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} not valid on {:?} handle", op, self.role),
        )
    }

    fn peer(stream: UnixStream, log: LogHandle) -> Self {
        let _ = setsockopt(&stream, sockopt::SndBuf, &SOCKET_SEND_BUFFER);
        // Accepted unix peers are anonymous unless the client bound a name
        let reference = stream
            .peer_addr()
            .ok()
            .and_then(|a| a.as_pathname().map(|p| format!("UNIX:{}", p.display())))
            .unwrap_or_else(|| "UNIX:-".to_string());
        UnixTransport {
            socket_path: String::new(),
            socket: Some(UnixSocket::Stream(stream)),
            role: HandleRole::Client,
            reference: Some(reference),
            log,
        }
    }
}

impl Transport for UnixTransport {
    fn connect(&mut self) -> Result<()> {
        if self.socket.is_some() {
            if self.role == HandleRole::Client {
                return Ok(());
            }
            return Err(self.misuse("connect"));
        }
        let stream = match UnixStream::connect(&self.socket_path) {
            Ok(s) => s,
            Err(e) => {
                log_warn!(self.log, "connect to {} failed: {}", self.socket_path, e);
                return Err(e);
            }
        };
        let _ = setsockopt(&stream, sockopt::SndBuf, &SOCKET_SEND_BUFFER);
        if self.reference.is_none() {
            self.reference = Some(format!("UNIX:{}", self.socket_path));
        }
        self.socket = Some(UnixSocket::Stream(stream));
        self.role = HandleRole::Client;
        Ok(())
    }

    fn bind(&mut self) -> Result<()> {
        if self.socket.is_some() {
            if self.role == HandleRole::Server {
                return Ok(());
            }
            return Err(self.misuse("bind"));
        }
        // A stale socket file from a previous run would make bind fail
        let _ = fs::remove_file(&self.socket_path);
        let listener = match UnixListener::bind(&self.socket_path) {
            Ok(l) => l,
            Err(e) => {
                log_error!(self.log, "bind to {} failed: {}", self.socket_path, e);
                return Err(e);
            }
        };
        if self.reference.is_none() {
            self.reference = Some(format!("UNIX:{}", self.socket_path));
        }
        self.socket = Some(UnixSocket::Listener(listener));
        self.role = HandleRole::Server;
        Ok(())
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            self.role = HandleRole::Undefined;
        }
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn poll_input(&mut self, timeout: Duration) -> bool {
        let fd = match self.fd() {
            Some(fd) => fd,
            None => return false,
        };
        match sys::poll_readable(fd, timeout) {
            Readiness::Readable => true,
            Readiness::TimedOut => false,
            Readiness::Gone => {
                log_debug!(self.log, "poll reports {} gone", self.reference());
                self.close();
                false
            }
        }
    }

    fn accept(&mut self) -> Option<Box<dyn Transport>> {
        if self.role != HandleRole::Server {
            let _ = self.misuse("accept");
            return None;
        }
        let listener = match self.socket {
            Some(UnixSocket::Listener(ref l)) => l,
            _ => return None,
        };
        match listener.accept() {
            Ok((stream, _peer_addr)) => {
                Some(Box::new(UnixTransport::peer(stream, self.log.clone())))
            }
            Err(e) => {
                log_error!(self.log, "accept on {} failed: {}", self.reference(), e);
                None
            }
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.role == HandleRole::Server {
            return Err(self.misuse("recv"));
        }
        let fd = match self.fd() {
            Some(fd) => fd,
            None => return Err(io::Error::new(io::ErrorKind::NotConnected, "not connected")),
        };
        if buf.is_empty() {
            return Ok(0);
        }
        match sys::recv_into(fd, buf) {
            Ok(0) => {
                self.close();
                Ok(0)
            }
            Ok(n) => {
                if n == buf.len() {
                    let discarded = sys::drain_pending(fd);
                    if discarded > 0 {
                        log_debug!(
                            self.log,
                            "{}: trimmed {} bytes past the receive buffer",
                            self.reference(),
                            discarded
                        );
                    }
                }
                Ok(n)
            }
            Err(e) => {
                if e.kind() == io::ErrorKind::ConnectionReset {
                    log_debug!(self.log, "{}: reset by peer", self.reference());
                    self.close();
                } else {
                    log_warn!(self.log, "recv on {} failed: {}", self.reference(), e);
                }
                Err(e)
            }
        }
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize> {
        if self.role == HandleRole::Server {
            return Err(self.misuse("send"));
        }
        let fd = match self.fd() {
            Some(fd) => fd,
            None => return Err(io::Error::new(io::ErrorKind::NotConnected, "not connected")),
        };
        match sys::send_nosignal(fd, buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                match e.kind() {
                    io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => {
                        log_debug!(self.log, "{}: peer terminated during send", self.reference());
                        self.close();
                    }
                    _ => {
                        log_warn!(self.log, "send on {} failed: {}", self.reference(), e);
                    }
                }
                Err(e)
            }
        }
    }

    fn reference(&self) -> &str {
        self.reference.as_deref().unwrap_or("UNIX:-")
    }

    fn kind(&self) -> SocketKind {
        SocketKind::Unix
    }

    fn role(&self) -> HandleRole {
        self.role
    }
}
