// End-to-end lifecycle coverage against real sockets
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use sock_ng::{
    dial, serve, ChannelHandler, CloseReason, Connection, ConnectionEvent, ConnectionHandler,
    ConnectionOrigin, RegistryConfig, SocketKind,
};

fn fast_config() -> RegistryConfig {
    RegistryConfig {
        control_interval: Duration::from_millis(10),
        worker_interval: Duration::from_millis(10),
    }
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

#[derive(Default)]
struct ScenarioHandler {
    payloads: Mutex<Vec<Vec<u8>>>,
    closed: AtomicUsize,
}

impl ConnectionHandler for ScenarioHandler {
    fn on_data(&self, connection: &mut Connection) {
        let mut buf = [0u8; 1024];
        if let Ok(n) = connection.recv(&mut buf) {
            if n > 0 {
                self.payloads.lock().unwrap().push(buf[..n].to_vec());
            }
        }
    }

    fn on_close(&self, _reason: CloseReason, _reference: &str) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn three_clients_connect_one_leaves_survivor_talks() {
    let handler = Arc::new(ScenarioHandler::default());
    let registry = serve(SocketKind::Tcp, "127.0.0.1:0", handler.clone(), fast_config()).unwrap();
    let target = registry
        .reference()
        .strip_prefix("TCP:")
        .unwrap()
        .to_string();

    let mut clients: Vec<Connection> = (0..3)
        .map(|_| dial(SocketKind::Tcp, &target).unwrap())
        .collect();
    assert!(wait_until(Duration::from_secs(3), || {
        registry.connection_count() == 3
    }));

    // One client goes away; the registry notices within a couple of
    // control intervals
    clients.pop();
    assert!(wait_until(Duration::from_secs(3), || {
        registry.connection_count() == 2
    }));
    assert_eq!(handler.closed.load(Ordering::SeqCst), 1);

    // A surviving client sends exactly ten bytes
    clients[0].send(b"0123456789").unwrap();
    assert!(wait_until(Duration::from_secs(3), || {
        !handler.payloads.lock().unwrap().is_empty()
    }));
    let payloads = handler.payloads.lock().unwrap();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0], b"0123456789");
}

#[test]
fn unix_registry_delivers_events_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reg.sock").to_string_lossy().into_owned();

    let (handler, events) = ChannelHandler::new();
    let registry = serve(SocketKind::Unix, &path, handler, fast_config()).unwrap();
    assert_eq!(registry.reference(), format!("UNIX:{}", path));

    let mut client = dial(SocketKind::Unix, &path).unwrap();
    client.send(b"over unix").unwrap();

    match events.recv_timeout(Duration::from_secs(3)).unwrap() {
        ConnectionEvent::Created { origin, .. } => {
            assert_eq!(origin, ConnectionOrigin::Accepted)
        }
        other => panic!("expected Created, got {:?}", other),
    }
    match events.recv_timeout(Duration::from_secs(3)).unwrap() {
        ConnectionEvent::Data { bytes, .. } => assert_eq!(bytes, b"over unix"),
        other => panic!("expected Data, got {:?}", other),
    }

    client.close();
    match events.recv_timeout(Duration::from_secs(3)).unwrap() {
        ConnectionEvent::Closed { reason, .. } => {
            assert_eq!(reason, CloseReason::Disconnect)
        }
        other => panic!("expected Closed, got {:?}", other),
    }
}

#[test]
fn freeing_registry_closes_remaining_workers() {
    let (handler, events) = ChannelHandler::new();
    let mut registry = serve(SocketKind::Tcp, "127.0.0.1:0", handler, fast_config()).unwrap();
    let target = registry
        .reference()
        .strip_prefix("TCP:")
        .unwrap()
        .to_string();

    let _alive: Vec<Connection> = (0..2)
        .map(|_| dial(SocketKind::Tcp, &target).unwrap())
        .collect();
    assert!(wait_until(Duration::from_secs(3), || {
        registry.connection_count() == 2
    }));

    registry.free();
    assert_eq!(registry.connection_count(), 0);
    assert!(!registry.is_running());

    let mut shutdowns = 0;
    while let Ok(event) = events.try_recv() {
        if let ConnectionEvent::Closed { reason, .. } = event {
            assert_eq!(reason, CloseReason::Shutdown);
            shutdowns += 1;
        }
    }
    assert_eq!(shutdowns, 2);
}

#[test]
fn echo_round_trip_through_served_registry() {
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

    let registry = serve(
        SocketKind::Tcp,
        "127.0.0.1:0",
        Arc::new(EchoHandler),
        fast_config(),
    )
    .unwrap();
    let target = registry
        .reference()
        .strip_prefix("TCP:")
        .unwrap()
        .to_string();

    let mut client = dial(SocketKind::Tcp, &target).unwrap();
    for round in 0..5u8 {
        let message = format!("round {}", round);
        client.send(message.as_bytes()).unwrap();
        assert!(client.wait_data(Duration::from_secs(3)));
        let mut buf = [0u8; 64];
        let n = client.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], message.as_bytes());
    }
}
