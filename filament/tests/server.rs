mod common;

use common::{client, eventually, read_line, runtime};
use filament::server::{
    Disposition, ExchangeState, Protocol, Server, ServerConfig, ServerConnection, Source,
    server_listen_on,
};

use bytes::Bytes;
use std::io::{BufReader, Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Echoes each line back; `bye` closes the connection and `lazy`
/// replies without completing its exchange.
struct LineEcho;

impl LineEcho {
    async fn reply(exchange: &Arc<ExchangeState>, line: &[u8], complete: bool) -> bool {
        let mut reply = line.to_vec();
        reply.extend_from_slice(b"\r\n");

        exchange.begin_response();
        if !write_to(exchange, Bytes::from(reply)).await {
            return false;
        }
        if complete {
            exchange.complete();
        }
        true
    }
}

impl Protocol for LineEcho {
    type Session = ();

    fn session(&self, _connection: &Arc<ServerConnection>) -> Self::Session {}

    async fn exchange(
        &self,
        _session: &mut (),
        source: &mut Source,
        exchange: &Arc<ExchangeState>,
    ) -> Disposition {
        let mut transaction = source.transaction();
        let line = match transaction.read_line(1024).await {
            Ok(line) => line,
            Err(_) => return Disposition::Close,
        };
        transaction.commit();
        exchange.dispatch();

        let complete = &line[..] != b"lazy";
        if !LineEcho::reply(exchange, &line, complete).await {
            return Disposition::Abort;
        }

        if &line[..] == b"bye" {
            return Disposition::Close;
        }
        Disposition::Reuse
    }
}

async fn write_to(exchange: &ExchangeState, data: Bytes) -> bool {
    !exchange.connection().connection().write(data).await.closed
}

fn server(runtime: &filament::Runtime, config: ServerConfig) -> Server<LineEcho> {
    Server::new(runtime.handle(), LineEcho, config)
}

#[test]
fn test_idle_connection_times_out() {
    let runtime = runtime();
    let server = server(
        &runtime,
        ServerConfig::new().inactivity_timeout(Some(Duration::from_millis(100))),
    );
    let listener = server_listen_on(&server, "127.0.0.1:0".parse().unwrap()).unwrap();

    let mut stream = client(listener.local_addr());
    assert!(eventually(|| server.connection_count() == 1));
    assert!(eventually(|| server.connection_count() == 0));

    let mut rest = Vec::new();
    assert_eq!(stream.read_to_end(&mut rest).unwrap_or(0), 0);
}

#[test]
fn test_activity_keeps_connection_alive() {
    let runtime = runtime();
    let server = server(
        &runtime,
        ServerConfig::new().inactivity_timeout(Some(Duration::from_millis(200))),
    );
    let listener = server_listen_on(&server, "127.0.0.1:0".parse().unwrap()).unwrap();

    let mut stream = client(listener.local_addr());
    let mut reader = BufReader::new(stream.try_clone().unwrap());

    for i in 0..8 {
        thread::sleep(Duration::from_millis(60));
        writeln!(stream, "ping {i}").unwrap();
        assert_eq!(read_line(&mut reader), format!("ping {i}"));
    }

    assert_eq!(server.connection_count(), 1);
}

#[test]
fn test_close_disposition_releases_connection() {
    let runtime = runtime();
    let server = server(&runtime, ServerConfig::new());
    let listener = server_listen_on(&server, "127.0.0.1:0".parse().unwrap()).unwrap();

    let mut stream = client(listener.local_addr());
    stream.write_all(b"hello\r\nbye\r\nignored\r\n").unwrap();

    let mut reader = BufReader::new(stream);
    assert_eq!(read_line(&mut reader), "hello");
    assert_eq!(read_line(&mut reader), "bye");

    let mut rest = Vec::new();
    assert_eq!(reader.read_to_end(&mut rest).unwrap_or(0), 0);
    assert!(eventually(|| server.connection_count() == 0));
}

#[test]
fn test_shutdown_aborts_every_connection() {
    let runtime = runtime();
    let server = server(&runtime, ServerConfig::new());
    let listener = server_listen_on(&server, "127.0.0.1:0".parse().unwrap()).unwrap();

    let streams: Vec<_> = (0..3).map(|_| client(listener.local_addr())).collect();
    assert!(eventually(|| server.connection_count() == 3));

    server.shutdown();
    assert_eq!(server.connection_count(), 0);

    for mut stream in streams {
        let mut rest = Vec::new();
        assert_eq!(stream.read_to_end(&mut rest).unwrap_or(0), 0);
    }
}

#[test]
fn test_unfinished_exchange_is_not_reused() {
    let runtime = runtime();
    let server = server(&runtime, ServerConfig::new());
    let listener = server_listen_on(&server, "127.0.0.1:0".parse().unwrap()).unwrap();

    let mut stream = client(listener.local_addr());
    stream.write_all(b"lazy\r\nnext\r\n").unwrap();

    let mut reader = BufReader::new(stream);
    assert_eq!(read_line(&mut reader), "lazy");

    let mut rest = Vec::new();
    assert_eq!(reader.read_to_end(&mut rest).unwrap_or(0), 0);
    assert!(rest.is_empty());
    assert!(eventually(|| server.connection_count() == 0));
}
