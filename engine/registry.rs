// Accept/retire control loop supervising one worker per connection
use std::io::Result;
use std::sync::Arc;
use std::time::Duration;

use sock_core::{log_debug, log_error, log_info, LogHandle, Logger};
use sock_transport::{Server, SocketKind};

use crate::runloop::{ThreadLoop, Tick, DEFAULT_TICK_INTERVAL};
use crate::worker::{ConnectionHandler, ConnectionOrigin, ConnectionWorker};

/// Pacing knobs for the control loop and the workers it spawns.
#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    /// Sleep between control-loop ticks; bounds accept/retirement latency.
    pub control_interval: Duration,
    /// Sleep between each worker's ticks; bounds data/disconnect latency.
    pub worker_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            control_interval: DEFAULT_TICK_INTERVAL,
            worker_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

pub(crate) struct RegistryContext {
    pub(crate) server: Server,
    pub(crate) workers: Vec<ConnectionWorker>,
    pub(crate) handler: Arc<dyn ConnectionHandler>,
    pub(crate) worker_interval: Duration,
    pub(crate) log: LogHandle,
}

/// One control tick: retire every worker whose loop has ended, then accept
/// at most one pending connection and give it a worker. The whole tick runs
/// under the control loop's lock.
pub(crate) fn registry_tick(ctx: &mut RegistryContext) -> Tick {
    let log = &ctx.log;
    ctx.workers.retain_mut(|worker| {
        if worker.is_running() {
            true
        } else {
            log_debug!(log, "retiring worker for {}", worker.reference());
            worker.stop();
            false
        }
    });

    if ctx.server.new_connection(Duration::ZERO) {
        if let Some(connection) = ctx.server.accept_connection() {
            let mut worker = ConnectionWorker::with_logger(
                connection,
                ctx.handler.clone(),
                ctx.worker_interval,
                ctx.log.clone(),
            );
            match worker.start(ConnectionOrigin::Accepted) {
                Ok(()) => {
                    log_debug!(ctx.log, "accepted {}", worker.reference());
                    ctx.workers.push(worker);
                }
                Err(e) => {
                    log_error!(ctx.log, "worker for {} failed to start: {}", worker.reference(), e);
                }
            }
        }
    }
    Tick::Continue
}

/// Owns the server and every live worker. The worker collection is only
/// touched under the control loop's lock; count queries take the same lock.
pub struct ConnectionRegistry {
    runloop: ThreadLoop<RegistryContext>,
    reference: String,
}

impl ConnectionRegistry {
    pub fn new(server: Server, handler: Arc<dyn ConnectionHandler>, config: RegistryConfig) -> Self {
        ConnectionRegistry::with_logger(server, handler, config, None)
    }

    pub fn with_logger(
        server: Server,
        handler: Arc<dyn ConnectionHandler>,
        config: RegistryConfig,
        logger: Option<Arc<dyn Logger>>,
    ) -> Self {
        let log = LogHandle::from_option(logger);
        let reference = server.reference().to_string();
        let context = RegistryContext {
            server,
            workers: Vec::new(),
            handler,
            worker_interval: config.worker_interval,
            log: log.clone(),
        };
        ConnectionRegistry {
            runloop: ThreadLoop::with_logger(
                "sock-control",
                context,
                config.control_interval,
                log,
            ),
            reference,
        }
    }

    /// Bind `target` and build a registry around the resulting server. A
    /// target that cannot be bound fails construction here.
    pub fn open(
        kind: SocketKind,
        target: &str,
        handler: Arc<dyn ConnectionHandler>,
        config: RegistryConfig,
    ) -> Result<Self> {
        let server = Server::open(kind, target)?;
        Ok(ConnectionRegistry::new(server, handler, config))
    }

    /// Start the control loop.
    pub fn start(&mut self) -> Result<()> {
        self.runloop.start(registry_tick)
    }

    pub fn is_running(&self) -> bool {
        self.runloop.is_running()
    }

    /// Number of live workers. Takes the control lock, so the value is one
    /// the collection really held.
    pub fn connection_count(&self) -> usize {
        self.runloop.lock().workers.len()
    }

    /// Listening endpoint, e.g. "TCP:127.0.0.1:41213".
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Stop the control loop, then stop and drop every remaining worker
    /// unconditionally and close the server.
    pub fn free(&mut self) {
        self.runloop.stop();
        let mut ctx = self.runloop.lock();
        let retired = ctx.workers.len();
        for mut worker in ctx.workers.drain(..) {
            worker.stop();
        }
        ctx.server.close();
        if retired > 0 {
            log_info!(ctx.log, "registry {} freed {} workers", self.reference, retired);
        }
    }
}

impl Drop for ConnectionRegistry {
    fn drop(&mut self) {
        self.free();
    }
}
