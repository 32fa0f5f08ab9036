//! TCP server integration tests over real sockets.

use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use dsp::error::Result;
use dsp::tcp::{ConnectionInfo, Handler, HandlerFactory, NetConfig, Server};

/// Consumes 2-byte-length-prefixed frames and records them in shared state.
struct FrameCounter {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
    invocations: Arc<AtomicUsize>,
    eofs: Arc<AtomicUsize>,
}

impl Handler for FrameCounter {
    fn process(&mut self, data: &[u8]) -> Result<usize> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if data.len() < 2 {
            return Ok(0);
        }
        let length = u16::from_le_bytes([data[0], data[1]]) as usize;
        if data.len() < length {
            return Ok(0);
        }
        self.frames.lock().push(data[..length].to_vec());
        Ok(length)
    }

    fn on_eof(&mut self, _info: &ConnectionInfo) {
        self.eofs.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FrameCounterFactory {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
    invocations: Arc<AtomicUsize>,
    eofs: Arc<AtomicUsize>,
}

impl HandlerFactory for FrameCounterFactory {
    fn create(&self) -> Box<dyn Handler> {
        Box::new(FrameCounter {
            frames: self.frames.clone(),
            invocations: self.invocations.clone(),
            eofs: self.eofs.clone(),
        })
    }
}

fn frame(body: &[u8]) -> Vec<u8> {
    let length = (body.len() + 2) as u16;
    let mut out = length.to_le_bytes().to_vec();
    out.extend_from_slice(body);
    out
}

fn connect_with_retry(port: u16) -> TcpStream {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(stream) => return stream,
            Err(_) if Instant::now() < deadline => {
                thread::sleep(Duration::from_millis(20));
            }
            Err(e) => panic!("server did not come up: {}", e),
        }
    }
}

fn wait_until(deadline: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let until = Instant::now() + deadline;
    while Instant::now() < until {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    predicate()
}

struct Fixture {
    server: Arc<Server>,
    factory: Arc<FrameCounterFactory>,
    worker: thread::JoinHandle<()>,
    port: u16,
}

fn start_server(port: u16) -> Fixture {
    let factory = Arc::new(FrameCounterFactory::default());
    let server = Arc::new(Server::new(
        NetConfig {
            host: "127.0.0.1".to_string(),
            port,
        },
        factory.clone(),
    ));
    let run_server = server.clone();
    let worker = thread::spawn(move || {
        run_server.run().expect("server run failed");
    });
    Fixture {
        server,
        factory,
        worker,
        port,
    }
}

#[test]
fn test_concatenated_frames_arrive_individually() {
    let fixture = start_server(17210);

    let mut stream = connect_with_retry(fixture.port);
    let mut payload = frame(b"one");
    payload.extend_from_slice(&frame(b"two"));
    payload.extend_from_slice(&frame(b"three"));
    stream.write_all(&payload).unwrap();

    assert!(wait_until(Duration::from_secs(3), || {
        fixture.factory.frames.lock().len() == 3
    }));

    let frames = fixture.factory.frames.lock().clone();
    assert_eq!(frames[0], frame(b"one"));
    assert_eq!(frames[1], frame(b"two"));
    assert_eq!(frames[2], frame(b"three"));

    drop(stream);
    assert!(wait_until(Duration::from_secs(3), || {
        fixture.factory.eofs.load(Ordering::SeqCst) == 1
    }));

    fixture.server.stop();
    fixture.worker.join().unwrap();
}

#[test]
fn test_partial_frame_is_completed_by_next_read() {
    let fixture = start_server(17211);

    let mut stream = connect_with_retry(fixture.port);
    let full = frame(b"01234567");

    stream.write_all(&full[..1]).unwrap();
    thread::sleep(Duration::from_millis(50));
    stream.write_all(&full[1..]).unwrap();

    assert!(wait_until(Duration::from_secs(3), || {
        fixture.factory.frames.lock().len() == 1
    }));
    assert_eq!(fixture.factory.frames.lock()[0], full);

    // The short first read produced at most one zero-consuming invocation.
    let invocations = fixture.factory.invocations.load(Ordering::SeqCst);
    assert!(
        (1..=2).contains(&invocations),
        "unexpected invocation count: {}",
        invocations
    );

    fixture.server.stop();
    fixture.worker.join().unwrap();
}

#[test]
fn test_connection_count_tracks_open_sockets() {
    let fixture = start_server(17212);

    let first = connect_with_retry(fixture.port);
    let second = connect_with_retry(fixture.port);

    assert!(wait_until(Duration::from_secs(3), || {
        fixture.server.metrics().connections.load(Ordering::Relaxed) == 2
    }));

    drop(first);
    drop(second);

    assert!(wait_until(Duration::from_secs(3), || {
        fixture.server.metrics().connections.load(Ordering::Relaxed) == 0
    }));

    fixture.server.stop();
    fixture.worker.join().unwrap();
}

#[test]
fn test_stop_makes_run_return() {
    let fixture = start_server(17213);
    let _stream = connect_with_retry(fixture.port);

    fixture.server.stop();

    let start = Instant::now();
    fixture.worker.join().unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));

    // Stop is idempotent.
    fixture.server.stop();
}
