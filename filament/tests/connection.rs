mod common;

use common::{accept_queue, client, next_connection, runtime};
use filament::net::{ReadMode, listen_on};

use bytes::{Bytes, BytesMut};
use std::io::{Read, Write};
use std::time::Duration;

#[test]
fn test_read_modes() {
    let runtime = runtime();
    let (callback, rx) = accept_queue();
    let listener = listen_on(runtime.handle(), callback, "127.0.0.1:0".parse().unwrap()).unwrap();

    let mut peer = client(listener.local_addr());
    let connection = next_connection(&rx);

    // Nothing buffered: a `Now` read returns at once without closing.
    let conn = connection.clone();
    let outcome = runtime.block_on(async move { conn.read(BytesMut::new(), 16, ReadMode::Now).await });
    assert_eq!(outcome.transferred, 0);
    assert!(!outcome.closed);

    // `Some` completes with whatever arrives first.
    peer.write_all(b"abc").unwrap();
    let conn = connection.clone();
    let outcome = runtime.block_on(async move { conn.read(BytesMut::new(), 16, ReadMode::Some).await });
    assert!(outcome.transferred >= 1);
    assert!(!outcome.closed);
    assert_eq!(&outcome.buffer[..], &b"abc"[..outcome.transferred]);

    // `All` waits for the full length even when it arrives in pieces. Any
    // of "abc" left unread by the `Some` read comes first.
    let conn = connection.clone();
    let read = runtime.spawn(async move { conn.read(BytesMut::from(&b">"[..]), 6, ReadMode::All).await });
    peer.write_all(b"123").unwrap();
    std::thread::sleep(Duration::from_millis(20));
    peer.write_all(b"456").unwrap();

    let outcome = runtime.block_on(read);
    assert_eq!(outcome.transferred, 6);
    assert_eq!(outcome.buffer.len(), 7);
    assert!(outcome.buffer.starts_with(b">"));

    listener.close();
}

#[test]
fn test_large_write_arrives_in_order() {
    let runtime = runtime();
    let (callback, rx) = accept_queue();
    let listener = listen_on(runtime.handle(), callback, "127.0.0.1:0".parse().unwrap()).unwrap();

    let mut peer = client(listener.local_addr());
    let connection = next_connection(&rx);

    let payload: Vec<u8> = (0..4 * 1024 * 1024u32).map(|i| (i % 253) as u8).collect();
    let expected = payload.clone();

    let reader = std::thread::spawn(move || {
        let mut received = vec![0; expected.len()];
        peer.read_exact(&mut received).unwrap();
        assert!(received == expected, "bytes must arrive unchanged and in order");
    });

    let conn = connection.clone();
    let outcome = runtime.block_on(async move { conn.write(Bytes::from(payload)).await });
    assert_eq!(outcome.transferred, 4 * 1024 * 1024);
    assert!(!outcome.closed);

    reader.join().unwrap();
    listener.close();
}

#[test]
fn test_end_of_stream_is_a_closed_empty_read() {
    let runtime = runtime();
    let (callback, rx) = accept_queue();
    let listener = listen_on(runtime.handle(), callback, "127.0.0.1:0".parse().unwrap()).unwrap();

    let peer = client(listener.local_addr());
    let connection = next_connection(&rx);
    peer.shutdown(std::net::Shutdown::Write).unwrap();

    let conn = connection.clone();
    let outcome = runtime.block_on(async move { conn.read(BytesMut::new(), 16, ReadMode::Some).await });
    assert_eq!(outcome.transferred, 0);
    assert!(outcome.closed);
    assert!(connection.is_source_closed());
    assert!(!connection.is_sink_closed());

    listener.close();
}

#[test]
fn test_abort_resolves_a_pending_read_once() {
    let runtime = runtime();
    let (callback, rx) = accept_queue();
    let listener = listen_on(runtime.handle(), callback, "127.0.0.1:0".parse().unwrap()).unwrap();

    let _peer = client(listener.local_addr());
    let connection = next_connection(&rx);

    let conn = connection.clone();
    let pending = runtime.spawn(async move { conn.read(BytesMut::new(), 16, ReadMode::All).await });

    std::thread::sleep(Duration::from_millis(20));
    connection.abort();

    let outcome = runtime.block_on(pending);
    assert!(outcome.closed);
    assert!(connection.is_closed());

    // Further requests complete immediately as closed.
    let conn = connection.clone();
    let outcome = runtime.block_on(async move { conn.write(Bytes::from_static(b"late")).await });
    assert!(outcome.closed);
    assert_eq!(outcome.transferred, 0);

    listener.close();
}

#[test]
fn test_abort_racing_reads_never_hangs() {
    let runtime = runtime();
    let (callback, rx) = accept_queue();
    let listener = listen_on(runtime.handle(), callback, "127.0.0.1:0".parse().unwrap()).unwrap();

    for _ in 0..20 {
        let mut peer = client(listener.local_addr());
        let connection = next_connection(&rx);
        peer.write_all(b"x").unwrap();

        let conn = connection.clone();
        let read = runtime.spawn(async move { conn.read(BytesMut::new(), 1, ReadMode::All).await });
        connection.abort_source();

        let outcome = runtime.block_on(read);
        assert!(outcome.transferred <= 1);
        if outcome.transferred == 0 {
            assert!(outcome.closed);
        }
    }

    listener.close();
}

#[test]
fn test_second_concurrent_read_is_rejected() {
    let runtime = runtime();
    let (callback, rx) = accept_queue();
    let listener = listen_on(runtime.handle(), callback, "127.0.0.1:0".parse().unwrap()).unwrap();

    let mut peer = client(listener.local_addr());
    let connection = next_connection(&rx);

    let conn = connection.clone();
    let first = runtime.spawn(async move { conn.read(BytesMut::new(), 2, ReadMode::All).await });
    std::thread::sleep(Duration::from_millis(20));

    let conn = connection.clone();
    let second = runtime.block_on(async move { conn.read(BytesMut::new(), 2, ReadMode::All).await });
    assert!(second.closed);
    assert_eq!(second.transferred, 0);

    peer.write_all(b"ok").unwrap();
    let first = runtime.block_on(first);
    assert_eq!(&first.buffer[..], b"ok");
    assert!(!first.closed);

    listener.close();
}

#[test]
fn test_sink_abort_resolves_a_blocked_write() {
    let runtime = runtime();
    let (callback, rx) = accept_queue();
    let listener = listen_on(runtime.handle(), callback, "127.0.0.1:0".parse().unwrap()).unwrap();

    // The peer never reads, so the write stalls once the socket buffers fill.
    let _peer = client(listener.local_addr());
    let connection = next_connection(&rx);

    let payload = Bytes::from(vec![0x5a; 64 * 1024 * 1024]);
    let conn = connection.clone();
    let pending = runtime.spawn(async move { conn.write(payload).await });

    std::thread::sleep(Duration::from_millis(100));
    connection.abort_sink();

    let outcome = runtime.block_on(pending);
    assert!(outcome.closed);
    assert!(outcome.transferred < 64 * 1024 * 1024);
    assert!(connection.is_sink_closed());
    assert!(!connection.is_source_closed());

    listener.close();
}

#[test]
fn test_half_close_keeps_the_source_open() {
    let runtime = runtime();
    let (callback, rx) = accept_queue();
    let listener = listen_on(runtime.handle(), callback, "127.0.0.1:0".parse().unwrap()).unwrap();

    let mut peer = client(listener.local_addr());
    let connection = next_connection(&rx);

    connection.abort_sink();
    assert!(connection.is_sink_closed());
    assert!(!connection.is_closed());

    // The peer sees end-of-stream but can still send.
    let mut rest = Vec::new();
    assert_eq!(peer.read_to_end(&mut rest).unwrap(), 0);
    peer.write_all(b"hi").unwrap();

    let conn = connection.clone();
    let outcome = runtime.block_on(async move { conn.read(BytesMut::new(), 2, ReadMode::All).await });
    assert_eq!(&outcome.buffer[..], b"hi");
    assert!(!outcome.closed);

    // Only the second direction releases the socket.
    connection.abort_source();
    assert!(connection.is_closed());

    let conn = connection.clone();
    let outcome = runtime.block_on(async move { conn.read(BytesMut::new(), 2, ReadMode::Some).await });
    assert!(outcome.closed);
    assert_eq!(outcome.transferred, 0);

    listener.close();
}
