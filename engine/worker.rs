// One dedicated thread servicing one connection
use std::io::Result;
use std::sync::Arc;
use std::time::Duration;

use sock_core::{log_debug, LogHandle};
use sock_transport::Connection;

use crate::runloop::{ThreadLoop, Tick};

/// How a worker's connection came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOrigin {
    /// Locally initiated via connect.
    Local,
    /// Produced by a listener's accept.
    Accepted,
}

/// Why a worker's connection stopped being serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer went away; detected by the worker loop.
    Disconnect,
    /// The worker was torn down while its connection was still live.
    Shutdown,
}

/// Application callbacks driven by a worker's loop thread.
///
/// `on_data` owns draining: the engine only reports that bytes are pending
/// and hands over the connection; how much to read per call is the
/// application's business. Close and data callbacks run on the worker
/// thread while the worker's lock is held; a callback that calls back into
/// the registry owning this worker can deadlock against retirement.
pub trait ConnectionHandler: Send + Sync {
    fn on_create(&self, _origin: ConnectionOrigin, _reference: &str) {}

    fn on_data(&self, connection: &mut Connection);

    fn on_close(&self, _reason: CloseReason, _reference: &str) {}
}

pub(crate) struct WorkerContext {
    pub(crate) connection: Connection,
    pub(crate) handler: Arc<dyn ConnectionHandler>,
    pub(crate) reference: String,
    pub(crate) close_sent: bool,
}

impl WorkerContext {
    fn fire_close(&mut self, reason: CloseReason) {
        if !self.close_sent {
            self.close_sent = true;
            self.handler.on_close(reason, &self.reference);
        }
    }
}

/// One worker tick: either notice the disconnect and stop, or report
/// pending data. A disconnect the data callback runs into (EOF during its
/// recv) is surfaced in the same tick, not the next one.
pub(crate) fn worker_tick(ctx: &mut WorkerContext) -> Tick {
    if !ctx.connection.is_connected() {
        ctx.fire_close(CloseReason::Disconnect);
        return Tick::Stop;
    }
    if ctx.connection.new_data() {
        let handler = ctx.handler.clone();
        handler.on_data(&mut ctx.connection);
        if !ctx.connection.is_connected() {
            ctx.fire_close(CloseReason::Disconnect);
            return Tick::Stop;
        }
    }
    Tick::Continue
}

/// Pairs one Connection with one ThreadLoop. Owns the connection
/// exclusively; dropping the worker stops the loop and frees it.
pub struct ConnectionWorker {
    runloop: ThreadLoop<WorkerContext>,
    reference: String,
}

impl ConnectionWorker {
    pub fn new(connection: Connection, handler: Arc<dyn ConnectionHandler>, interval: Duration) -> Self {
        ConnectionWorker::with_logger(connection, handler, interval, LogHandle::global())
    }

    pub fn with_logger(
        connection: Connection,
        handler: Arc<dyn ConnectionHandler>,
        interval: Duration,
        log: LogHandle,
    ) -> Self {
        let reference = connection.reference().to_string();
        let context = WorkerContext {
            connection,
            handler,
            reference: reference.clone(),
            close_sent: false,
        };
        ConnectionWorker {
            runloop: ThreadLoop::with_logger("sock-worker", context, interval, log),
            reference,
        }
    }

    /// Start servicing the connection. The create callback fires here,
    /// before the first tick, so the application sees every peer before any
    /// data or close for it.
    pub fn start(&mut self, origin: ConnectionOrigin) -> Result<()> {
        let handler = self.runloop.lock().handler.clone();
        handler.on_create(origin, &self.reference);
        self.runloop.start(worker_tick)
    }

    /// Stop the loop; a connection torn down while still live gets its
    /// close callback with Shutdown so on_close fires exactly once on
    /// every path.
    pub fn stop(&mut self) {
        self.runloop.stop();
        self.runloop.lock().fire_close(CloseReason::Shutdown);
    }

    /// Reclaim the thread of a loop that ended on its own.
    pub fn manage(&mut self) -> bool {
        self.runloop.manage()
    }

    pub fn is_running(&self) -> bool {
        self.runloop.is_running()
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }
}

impl Drop for ConnectionWorker {
    fn drop(&mut self) {
        self.stop();
        log_debug!(LogHandle::global(), "worker for {} retired", self.reference);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sock_transport::{Server, SocketKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingHandler {
        created: AtomicUsize,
        closed: AtomicUsize,
        last_close: Mutex<Option<CloseReason>>,
        data: Mutex<Vec<u8>>,
    }

    impl ConnectionHandler for RecordingHandler {
        fn on_create(&self, _origin: ConnectionOrigin, _reference: &str) {
            self.created.fetch_add(1, Ordering::SeqCst);
        }

        fn on_data(&self, connection: &mut Connection) {
            let mut buf = [0u8; 256];
            if let Ok(n) = connection.recv(&mut buf) {
                self.data.lock().unwrap().extend_from_slice(&buf[..n]);
            }
        }

        fn on_close(&self, reason: CloseReason, _reference: &str) {
            self.closed.fetch_add(1, Ordering::SeqCst);
            *self.last_close.lock().unwrap() = Some(reason);
        }
    }

    fn accepted_pair() -> (Server, Connection, Connection) {
        let mut server = Server::open(SocketKind::Tcp, "127.0.0.1:0").unwrap();
        let target = server.reference().strip_prefix("TCP:").unwrap().to_string();
        let client = Connection::open(SocketKind::Tcp, &target).unwrap();
        assert!(server.new_connection(Duration::from_secs(2)));
        let peer = server.accept_connection().unwrap();
        (server, client, peer)
    }

    fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn tick_reports_data_then_disconnect() {
        let (_server, mut client, peer) = accepted_pair();
        let handler = Arc::new(RecordingHandler::default());
        let mut ctx = WorkerContext {
            reference: peer.reference().to_string(),
            connection: peer,
            handler: handler.clone(),
            close_sent: false,
        };

        // Quiet tick: connected, nothing pending, nothing fires
        assert_eq!(worker_tick(&mut ctx), Tick::Continue);
        assert_eq!(handler.closed.load(Ordering::SeqCst), 0);

        client.send(b"ten--bytes").unwrap();
        assert!(ctx.connection.wait_data(Duration::from_secs(2)));
        assert_eq!(worker_tick(&mut ctx), Tick::Continue);
        assert_eq!(handler.data.lock().unwrap().as_slice(), b"ten--bytes");

        // Peer goes away; the EOF lands inside on_data and the close runs
        // in the same tick
        client.close();
        assert!(ctx.connection.wait_data(Duration::from_secs(2)));
        assert_eq!(worker_tick(&mut ctx), Tick::Stop);
        assert_eq!(handler.closed.load(Ordering::SeqCst), 1);
        assert_eq!(
            *handler.last_close.lock().unwrap(),
            Some(CloseReason::Disconnect)
        );

        // A further tick must not re-fire the close
        assert_eq!(worker_tick(&mut ctx), Tick::Stop);
        assert_eq!(handler.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disconnect_stops_worker_within_an_interval() {
        let (_server, client, peer) = accepted_pair();
        let handler = Arc::new(RecordingHandler::default());
        let interval = Duration::from_millis(20);

        let mut worker = ConnectionWorker::new(peer, handler.clone(), interval);
        worker.start(ConnectionOrigin::Accepted).unwrap();
        assert!(worker.is_running());
        assert!(wait_until(Duration::from_secs(2), || {
            handler.created.load(Ordering::SeqCst) == 1
        }));

        drop(client);
        assert!(wait_until(Duration::from_secs(2), || !worker.is_running()));
        assert_eq!(handler.closed.load(Ordering::SeqCst), 1);
        assert_eq!(
            *handler.last_close.lock().unwrap(),
            Some(CloseReason::Disconnect)
        );

        // Reclaim the self-terminated loop, then drop: still exactly one close
        assert!(worker.manage());
        drop(worker);
        assert_eq!(handler.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stopping_a_live_worker_reports_shutdown() {
        let (_server, _client, peer) = accepted_pair();
        let handler = Arc::new(RecordingHandler::default());

        let mut worker = ConnectionWorker::new(peer, handler.clone(), Duration::from_millis(10));
        worker.start(ConnectionOrigin::Accepted).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            handler.created.load(Ordering::SeqCst) == 1
        }));

        worker.stop();
        assert!(!worker.is_running());
        assert_eq!(handler.closed.load(Ordering::SeqCst), 1);
        assert_eq!(
            *handler.last_close.lock().unwrap(),
            Some(CloseReason::Shutdown)
        );
    }

    #[test]
    fn worker_echoes_through_handler() {
        struct EchoHandler;
        impl ConnectionHandler for EchoHandler {
            fn on_data(&self, connection: &mut Connection) {
                let mut buf = [0u8; 512];
                if let Ok(n) = connection.recv(&mut buf) {
                    if n > 0 {
                        let _ = connection.send(&buf[..n]);
                    }
                }
            }
        }

        let (_server, mut client, peer) = accepted_pair();
        let mut worker =
            ConnectionWorker::new(peer, Arc::new(EchoHandler), Duration::from_millis(10));
        worker.start(ConnectionOrigin::Accepted).unwrap();

        client.send(b"marco").unwrap();
        assert!(client.wait_data(Duration::from_secs(2)));
        let mut buf = [0u8; 16];
        assert_eq!(client.recv(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"marco");
    }
}
