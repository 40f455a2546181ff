// sockd: echo daemon built on the connection registry
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use sock_core::{install_logger, ConfigStore, ConsoleLogger, LogHandle, LogLevel};
use sock_engine::{
    CloseReason, ConnectionHandler, ConnectionOrigin, ConnectionRegistry, RegistryConfig,
};
use sock_transport::{Connection, SocketKind};

const DEFAULT_TCP_ADDRESS: &str = "127.0.0.1:3495";
const RECV_BUFFER: usize = 4096;

#[derive(Parser)]
#[command(name = "sockd", about = "Echo daemon over TCP or Unix stream sockets")]
struct Args {
    /// TCP listen address, e.g. 127.0.0.1:3495
    #[arg(long, conflicts_with = "unix")]
    tcp: Option<String>,

    /// Unix socket path to listen on instead of TCP
    #[arg(long)]
    unix: Option<String>,

    /// Configuration file with key=value lines; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tick interval for the control and worker loops, in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Log at debug verbosity
    #[arg(short, long)]
    verbose: bool,
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

struct EchoHandler {
    log: LogHandle,
}

impl ConnectionHandler for EchoHandler {
    fn on_create(&self, _origin: ConnectionOrigin, reference: &str) {
        self.log.info(&format!("peer {} registered", reference));
    }

    fn on_data(&self, connection: &mut Connection) {
        let mut buf = [0u8; RECV_BUFFER];
        match connection.recv(&mut buf) {
            Ok(0) | Err(_) => {}
            Ok(n) => {
                let _ = connection.send(&buf[..n]);
            }
        }
    }

    fn on_close(&self, reason: CloseReason, reference: &str) {
        self.log
            .info(&format!("peer {} gone ({:?})", reference, reason));
    }
}

fn run(args: Args) -> io::Result<()> {
    let config = match args.config {
        Some(ref path) => ConfigStore::load(path)?,
        None => ConfigStore::new(),
    };

    let level = if args.verbose {
        LogLevel::Debug
    } else {
        LogLevel::from_name(config.get_or("log.level", "info")).unwrap_or(LogLevel::Info)
    };
    install_logger(Arc::new(ConsoleLogger::new(level)));
    let log = LogHandle::global();

    let (kind, target) = if let Some(path) = args.unix {
        (SocketKind::Unix, path)
    } else if let Some(address) = args.tcp {
        (SocketKind::Tcp, address)
    } else if let Some(path) = config.get("daemon.listen.unix") {
        (SocketKind::Unix, path.to_string())
    } else {
        (
            SocketKind::Tcp,
            config
                .get_or("daemon.listen.tcp", DEFAULT_TCP_ADDRESS)
                .to_string(),
        )
    };

    let interval_ms = args
        .interval_ms
        .or_else(|| config.get("daemon.tick.interval_ms").and_then(|v| v.parse().ok()))
        .unwrap_or(100);
    let interval = Duration::from_millis(interval_ms);
    let registry_config = RegistryConfig {
        control_interval: interval,
        worker_interval: interval,
    };

    let handler_fn = request_shutdown as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGINT, handler_fn as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler_fn as libc::sighandler_t);
    }

    let handler = Arc::new(EchoHandler { log: log.clone() });
    let mut registry = ConnectionRegistry::open(kind, &target, handler, registry_config)?;
    registry.start()?;
    log.info(&format!("listening on {}", registry.reference()));

    while !SHUTDOWN.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }

    log.info("shutting down");
    registry.free();
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("sockd: {}", e);
            ExitCode::FAILURE
        }
    }
}
