//! Fixture binary for `session::backend`'s busy-port integration test.
//!
//! Mimics just enough of a real agent backend's boot behavior to exercise
//! `session::port::probe` end to end: reads `--port <N>` off argv, and if
//! `FAKE_BACKEND_BUSY_PORT` names that same port, prints a port-busy-shaped
//! error to stderr and exits non-zero the way a backend that lost a bind
//! race would. Otherwise it prints a ready line to stdout and idles until
//! killed.

use std::env;
use std::thread;
use std::time::Duration;

fn main() {
    let args: Vec<String> = env::args().collect();
    let port = args
        .iter()
        .position(|arg| arg == "--port")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .unwrap_or_default();

    if let Ok(busy_port) = env::var("FAKE_BACKEND_BUSY_PORT") {
        if busy_port == port {
            eprintln!("EADDRINUSE: address already in use, port {port}");
            std::process::exit(1);
        }
    }

    println!("server listening on 127.0.0.1:{port}");
    loop {
        thread::sleep(Duration::from_secs(3600));
    }
}
