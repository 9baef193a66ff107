mod common;

use common::{accept_queue, client, next_connection, runtime};
use filament::net::{Family, ReadMode, listen, listen_on};
use filament::time::timeout_with;

use bytes::BytesMut;
use std::io::Write;
use std::time::Duration;

#[test]
fn test_delivers_every_accepted_connection() {
    let runtime = runtime();
    let (callback, rx) = accept_queue();
    let listener = listen_on(runtime.handle(), callback, "127.0.0.1:0".parse().unwrap()).unwrap();
    assert_eq!(listener.family(), Family::V4);

    let mut clients: Vec<_> = (0..5).map(|_| client(listener.local_addr())).collect();
    let connections: Vec<_> = (0..5).map(|_| next_connection(&rx)).collect();

    for (index, peer) in clients.iter_mut().enumerate() {
        peer.write_all(&[index as u8]).unwrap();
    }

    let mut seen = Vec::new();
    for connection in connections {
        let outcome = runtime.block_on(async move { connection.read(BytesMut::new(), 1, ReadMode::All).await });
        seen.push(outcome.buffer[0]);
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2, 3, 4]);

    listener.close();
}

#[test]
fn test_close_fires_the_closed_event() {
    let runtime = runtime();
    let (callback, _rx) = accept_queue();
    let listener = listen(runtime.handle(), callback, 0, Family::V4).unwrap();
    assert_ne!(listener.local_addr().port(), 0);
    assert!(!listener.is_closed());

    let closed = listener.closed();
    listener.close();
    listener.close();

    let fired = runtime.block_on(timeout_with(runtime.handle(), Duration::from_secs(2), closed));
    assert!(fired.is_ok());
    assert!(listener.is_closed());
}
