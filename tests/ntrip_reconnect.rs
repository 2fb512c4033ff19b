//! Scenario 5 (spec.md §8): an NTRIP caster that closes the connection
//! after each kilobyte. The client is expected to reconnect after its
//! backoff interval, resume byte counting, and end up with exactly
//! `reconnects * 1 KiB` delivered, having passed through `Waiting` in
//! between `Open` periods.

use gnss_rt::stream::ntrip::NtripClientStream;
use gnss_rt::stream::{Stream, StreamState};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::time::{Duration, Instant};

const RECONNECTS: usize = 2;
const CHUNK_BYTES: usize = 1024;

#[test]
fn ntrip_client_reconnects_and_resumes_byte_counting() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    // Simulated caster: accept `RECONNECTS` connections, each answering
    // the handshake, delivering exactly one 1 KiB chunk, then hanging up.
    let server = std::thread::spawn(move || {
        for _ in 0..RECONNECTS {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            loop {
                let mut line = String::new();
                let n = reader.read_line(&mut line).unwrap();
                if n == 0 || line == "\r\n" || line == "\n" {
                    break;
                }
            }
            let mut stream = reader.into_inner();
            stream.write_all(b"ICY 200 OK\r\n\r\n").unwrap();
            stream.flush().unwrap();
            // Give the client's handshake reader a chance to see EOF-of-
            // headers before the body chunk lands on the same socket.
            std::thread::sleep(Duration::from_millis(50));
            stream.write_all(&vec![0xAAu8; CHUNK_BYTES]).unwrap();
            stream.flush().unwrap();
            // Dropping `stream` here closes the connection, which is what
            // drives the client's reconnect path.
        }
    });

    let mut client = NtripClientStream::new(addr, "MNT", None, None, Duration::from_secs(10));

    let mut total_read = 0usize;
    let mut saw_open = false;
    let mut saw_waiting = false;
    let deadline = Instant::now() + Duration::from_secs(30);
    while total_read < RECONNECTS * CHUNK_BYTES && Instant::now() < deadline {
        let mut buf = [0u8; 4096];
        let n = client.read(&mut buf).unwrap();
        total_read += n;
        match client.state() {
            StreamState::Open => saw_open = true,
            StreamState::Waiting => saw_waiting = true,
            _ => {},
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    server.join().unwrap();

    assert_eq!(total_read, RECONNECTS * CHUNK_BYTES);
    assert!(saw_open, "client should have reached Open at least once");
    assert!(saw_waiting, "client should have observed Waiting between reconnects");

    let stat = client.stat();
    assert_eq!(stat.in_bytes, (RECONNECTS * CHUNK_BYTES) as u64);
}
