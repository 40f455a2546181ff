// sock-send: send payloads to a sockd instance and print the echoes
use std::io;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use clap::Parser;
use sock_transport::{Connection, SocketKind};

const DEFAULT_TCP_ADDRESS: &str = "127.0.0.1:3495";

#[derive(Parser)]
#[command(name = "sock-send", about = "Send messages to a sockd daemon")]
struct Args {
    /// Message payload to send
    message: String,

    /// TCP address of the daemon, e.g. 127.0.0.1:3495
    #[arg(long, conflicts_with = "unix")]
    tcp: Option<String>,

    /// Unix socket path of the daemon
    #[arg(long)]
    unix: Option<String>,

    /// How many times to send the payload
    #[arg(long, default_value_t = 1)]
    count: u32,

    /// Pause between sends, in milliseconds
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,

    /// How long to wait for each echo, in milliseconds
    #[arg(long, default_value_t = 2000)]
    reply_timeout_ms: u64,
}

fn run(args: Args) -> io::Result<()> {
    let (kind, target) = match (args.unix, args.tcp) {
        (Some(path), _) => (SocketKind::Unix, path),
        (None, Some(address)) => (SocketKind::Tcp, address),
        (None, None) => (SocketKind::Tcp, DEFAULT_TCP_ADDRESS.to_string()),
    };

    let mut connection = Connection::open(kind, &target)?;
    println!("connected to {}", connection.reference());

    let mut buf = vec![0u8; 4096];
    for number in 0..args.count {
        let sent = connection.send(args.message.as_bytes())?;
        if !connection.wait_data(Duration::from_millis(args.reply_timeout_ms)) {
            eprintln!("no reply for message {} within timeout", number);
            if !connection.is_connected() {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "daemon went away",
                ));
            }
            continue;
        }
        let received = connection.recv(&mut buf)?;
        let now = chrono::Local::now();
        println!(
            "{} #{} sent {} bytes, echoed {}: {}",
            now.format("%Y/%m/%d %H:%M:%S%.3f"),
            number,
            sent,
            received,
            String::from_utf8_lossy(&buf[..received])
        );
        if args.delay_ms > 0 {
            thread::sleep(Duration::from_millis(args.delay_ms));
        }
    }

    connection.close();
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("sock-send: {}", e);
            ExitCode::FAILURE
        }
    }
}
