mod common;

use common::{RawResponse, client, read_response, runtime};
use filament::Runtime;
use filament::http::{Handler, HttpConfig, HttpError, HttpProtocol, Request, Response, Router};
use filament::net::Listener;
use filament::server::{Server, ServerConfig, server_listen_on};

use std::io::{BufReader, Read, Write};
use std::net::TcpStream;

struct Site;

impl Handler for Site {
    async fn handle(&self, request: &mut Request<'_>, response: &mut Response) -> Result<(), HttpError> {
        let path = request.path().to_owned();

        match path.as_str() {
            "/stream" => {
                response.start(None)?;
                response.write(b"hello ").await?;
                response.write(b"world").await?;
                response.finish().await
            }
            "/fail" => Err(HttpError::Handler("boom".into())),
            "/silent" => Ok(()),
            _ => response.simple_reply("<html></html>").await,
        }
    }
}

struct Echo;

impl Handler for Echo {
    async fn handle(&self, request: &mut Request<'_>, response: &mut Response) -> Result<(), HttpError> {
        let body = request.read_to_end(1024 * 1024).await?;
        response.simple_reply(body).await
    }
}

// Fields drop in order: the runtime goes last.
struct Fixture {
    listener: Listener,
    _server: Server<HttpProtocol>,
    _runtime: Runtime,
}

impl Fixture {
    fn start(config: HttpConfig) -> Self {
        let runtime = runtime();
        let router = Router::new().get(Site).post(Echo);
        let server = Server::new(
            runtime.handle(),
            HttpProtocol::with_config(router, config),
            ServerConfig::new(),
        );
        let listener = server_listen_on(&server, "127.0.0.1:0".parse().unwrap()).unwrap();

        Self {
            listener,
            _server: server,
            _runtime: runtime,
        }
    }

    fn connect(&self) -> (TcpStream, BufReader<TcpStream>) {
        let stream = client(self.listener.local_addr());
        let reader = BufReader::new(stream.try_clone().unwrap());
        (stream, reader)
    }
}

fn exchange(stream: &mut TcpStream, reader: &mut BufReader<TcpStream>, request: &str) -> RawResponse {
    stream.write_all(request.as_bytes()).unwrap();
    read_response(reader, false)
}

fn assert_eof(reader: &mut BufReader<TcpStream>) {
    let mut rest = Vec::new();
    let n = reader.read_to_end(&mut rest).unwrap_or(0);
    assert_eq!(n, 0, "no bytes expected after the last response");
}

#[test]
fn test_simple_reply_keeps_the_connection_open() {
    let fixture = Fixture::start(HttpConfig::new());
    let (mut stream, mut reader) = fixture.connect();

    stream.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
    let response = read_response(&mut reader, false);

    assert_eq!(response.status_line, "HTTP/1.1 200 OK");
    assert_eq!(response.header("content-length"), Some("13"));
    assert_eq!(response.header("server"), Some("filament"));
    assert!(response.header("date").unwrap().ends_with(" GMT"));
    assert_eq!(response.header("connection"), None);
    assert_eq!(response.body, b"<html></html>");

    let second = exchange(&mut stream, &mut reader, "GET /again HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(second.status(), 200);
    assert_eq!(second.body, b"<html></html>");
}

#[test]
fn test_http10_echo_closes_the_connection() {
    let fixture = Fixture::start(HttpConfig::new());
    let (mut stream, mut reader) = fixture.connect();

    let response = exchange(
        &mut stream,
        &mut reader,
        "POST /x HTTP/1.0\r\nContent-Length: 5\r\n\r\nhello",
    );

    assert_eq!(response.status(), 200);
    assert_eq!(response.body, b"hello");
    assert_eq!(response.header("connection"), Some("close"));
    assert_eof(&mut reader);
}

#[test]
fn test_http10_keep_alive_is_honoured() {
    let fixture = Fixture::start(HttpConfig::new());
    let (mut stream, mut reader) = fixture.connect();

    let request = "GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n";
    let first = exchange(&mut stream, &mut reader, request);
    assert_eq!(first.header("connection"), Some("keep-alive"));

    let second = exchange(&mut stream, &mut reader, request);
    assert_eq!(second.status(), 200);
}

#[test]
fn test_chunked_request_and_response_bodies() {
    let fixture = Fixture::start(HttpConfig::new());
    let (mut stream, mut reader) = fixture.connect();

    let echoed = exchange(
        &mut stream,
        &mut reader,
        "POST /echo HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n\
         5;ext=1\r\nhello\r\n6\r\n world\r\n0\r\nX-Trailer: yes\r\n\r\n",
    );
    assert_eq!(echoed.status(), 200);
    assert_eq!(echoed.body, b"hello world");

    let streamed = exchange(&mut stream, &mut reader, "GET /stream HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(streamed.header("transfer-encoding"), Some("chunked"));
    assert_eq!(streamed.header("content-length"), None);
    assert_eq!(streamed.body, b"hello world");
}

#[test]
fn test_http10_never_receives_chunks() {
    let fixture = Fixture::start(HttpConfig::new());
    let (mut stream, mut reader) = fixture.connect();

    let response = exchange(&mut stream, &mut reader, "GET /stream HTTP/1.0\r\n\r\n");
    assert_eq!(response.header("transfer-encoding"), None);
    assert_eq!(response.header("connection"), Some("close"));
    assert_eq!(response.body, b"hello world");
}

#[test]
fn test_head_sends_headers_only() {
    let fixture = Fixture::start(HttpConfig::new());
    let (mut stream, mut reader) = fixture.connect();

    stream.write_all(b"HEAD / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
    let head = read_response(&mut reader, true);
    assert_eq!(head.status(), 200);
    assert_eq!(head.header("content-length"), Some("13"));

    let get = exchange(&mut stream, &mut reader, "GET / HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(get.status_line, "HTTP/1.1 200 OK");
    assert_eq!(get.body, b"<html></html>");
}

#[test]
fn test_method_dispatch_failures_list_allowed_methods() {
    let fixture = Fixture::start(HttpConfig::new());
    let (mut stream, mut reader) = fixture.connect();

    let unknown = exchange(&mut stream, &mut reader, "BREW / HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(unknown.status(), 501);
    assert_eq!(unknown.header("allow"), Some("GET, POST, HEAD, OPTIONS"));

    let unregistered = exchange(&mut stream, &mut reader, "DELETE / HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(unregistered.status(), 405);
    assert!(unregistered.header("allow").unwrap().contains("POST"));

    let options = exchange(&mut stream, &mut reader, "OPTIONS * HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(options.status(), 200);
    assert_eq!(options.header("allow"), Some("GET, POST, HEAD, OPTIONS"));
    assert_eq!(options.header("content-length"), Some("0"));

    let resource = exchange(&mut stream, &mut reader, "OPTIONS /index HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(resource.status(), 200);
    assert_eq!(resource.header("allow"), Some("GET, POST, HEAD, OPTIONS"));
}

#[test]
fn test_malformed_request_gets_400_and_close() {
    let fixture = Fixture::start(HttpConfig::new());
    let (mut stream, mut reader) = fixture.connect();

    let response = exchange(&mut stream, &mut reader, "GARBAGE\r\n\r\n");
    assert_eq!(response.status(), 400);
    assert_eq!(response.header("connection"), Some("close"));
    assert_eof(&mut reader);
}

#[test]
fn test_header_limit_is_enforced() {
    let fixture = Fixture::start(HttpConfig::new().max_headers(2));
    let (mut stream, mut reader) = fixture.connect();

    let response = exchange(
        &mut stream,
        &mut reader,
        "GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n",
    );
    assert_eq!(response.status(), 400);
}

#[test]
fn test_handler_outcomes_without_a_reply() {
    let fixture = Fixture::start(HttpConfig::new());
    let (mut stream, mut reader) = fixture.connect();

    let silent = exchange(&mut stream, &mut reader, "GET /silent HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(silent.status(), 204);
    assert!(silent.body.is_empty());

    let failed = exchange(&mut stream, &mut reader, "GET /fail HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(failed.status(), 500);
    assert_eq!(failed.header("connection"), Some("close"));
    assert_eof(&mut reader);
}

#[test]
fn test_expect_continue() {
    let fixture = Fixture::start(HttpConfig::new());
    let (mut stream, mut reader) = fixture.connect();

    stream
        .write_all(b"POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\nExpect: 100-continue\r\n\r\n")
        .unwrap();
    let interim = read_response(&mut reader, false);
    assert_eq!(interim.status_line, "HTTP/1.1 100 Continue");

    stream.write_all(b"hello").unwrap();
    let response = read_response(&mut reader, false);
    assert_eq!(response.status(), 200);
    assert_eq!(response.body, b"hello");
}

#[test]
fn test_pipelined_requests_are_answered_in_order() {
    let fixture = Fixture::start(HttpConfig::new());
    let (mut stream, mut reader) = fixture.connect();

    stream
        .write_all(
            b"POST /a HTTP/1.1\r\nHost: x\r\nContent-Length: 3\r\n\r\none\
              POST /b HTTP/1.1\r\nHost: x\r\nContent-Length: 3\r\n\r\ntwo",
        )
        .unwrap();

    assert_eq!(read_response(&mut reader, false).body, b"one");
    assert_eq!(read_response(&mut reader, false).body, b"two");
}

#[test]
fn test_unread_body_is_drained_before_reuse() {
    let fixture = Fixture::start(HttpConfig::new());
    let (mut stream, mut reader) = fixture.connect();

    let ignored = exchange(
        &mut stream,
        &mut reader,
        "GET / HTTP/1.1\r\nHost: x\r\nContent-Length: 7\r\n\r\nignored",
    );
    assert_eq!(ignored.status(), 200);

    let next = exchange(&mut stream, &mut reader, "GET / HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(next.status(), 200);
}
