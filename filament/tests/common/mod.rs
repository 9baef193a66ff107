#![allow(dead_code)]

use filament::net::Connection;
use filament::{Runtime, RuntimeBuilder};

use std::io::{BufRead, BufReader, Read};
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Mutex, Once};
use std::time::Duration;

pub fn init_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

pub fn runtime() -> Runtime {
    init_tracing();
    RuntimeBuilder::new()
        .worker_threads(2)
        .build()
        .expect("runtime should start")
}

/// Accept callback that queues connections for the test thread.
pub fn accept_queue() -> (impl Fn(Connection) + Send + Sync + 'static, Receiver<Connection>) {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);

    let callback = move |connection: Connection| {
        let _ = tx.lock().unwrap().send(connection);
    };

    (callback, rx)
}

pub fn next_connection(rx: &Receiver<Connection>) -> Connection {
    rx.recv_timeout(Duration::from_secs(5))
        .expect("a connection should be accepted")
}

pub fn client(addr: std::net::SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("client should connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

/// Waits until `condition` holds, for at most five seconds.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

/// A response as seen on the wire.
#[derive(Debug)]
pub struct RawResponse {
    pub status_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn status(&self) -> u16 {
        self.status_line
            .split(' ')
            .nth(1)
            .and_then(|code| code.parse().ok())
            .expect("status line should carry a code")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Reads one HTTP response. `head_only` skips the body, as for `HEAD`.
pub fn read_response(reader: &mut BufReader<TcpStream>, head_only: bool) -> RawResponse {
    let status_line = read_line(reader);
    let mut headers = Vec::new();

    loop {
        let line = read_line(reader);
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':').expect("header line");
        headers.push((name.to_owned(), value.trim().to_owned()));
    }

    let mut response = RawResponse {
        status_line,
        headers,
        body: Vec::new(),
    };

    let code = response.status();
    if head_only || code == 204 || code == 304 || (100..200).contains(&code) {
        return response;
    }

    if let Some(length) = response.header("content-length") {
        let mut body = vec![0; length.parse().unwrap()];
        reader.read_exact(&mut body).unwrap();
        response.body = body;
    } else if response.header("transfer-encoding") == Some("chunked") {
        loop {
            let size = usize::from_str_radix(&read_line(reader), 16).unwrap();
            if size == 0 {
                assert_eq!(read_line(reader), "");
                break;
            }
            let mut chunk = vec![0; size];
            reader.read_exact(&mut chunk).unwrap();
            response.body.extend_from_slice(&chunk);
            assert_eq!(read_line(reader), "");
        }
    } else {
        reader.read_to_end(&mut response.body).unwrap();
    }

    response
}

/// Reads a CRLF-terminated line without its terminator.
pub fn read_line(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    line.trim_end_matches(['\r', '\n']).to_owned()
}
