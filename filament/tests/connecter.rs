mod common;

use common::runtime;
use filament::net::{Address, connect, connect_one};

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener};
use std::time::Duration;

fn reachable() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn v4() -> Address {
    Address::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
}

/// Nothing listens on the IPv6 loopback at the port the test listener
/// took on IPv4.
fn v6() -> Address {
    Address::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 0)
}

#[test]
fn test_connects_to_the_reachable_candidate_wherever_it_is() {
    let runtime = runtime();
    let (_listener, port) = reachable();

    for candidates in [vec![v4(), v6()], vec![v6(), v4()]] {
        let handle = runtime.handle().clone();
        let (connection, attempts) = runtime.block_on(async move {
            let mut connecter = connect(&handle, &candidates, port);
            let connection = (&mut connecter).await;
            (connection, connecter.attempts())
        });

        let connection = connection.expect("the IPv4 candidate accepts");
        assert_eq!(
            connection.peer_addr(),
            Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port))
        );
        assert!(attempts >= 1 && attempts <= 2);
    }
}

#[test]
fn test_first_reachable_candidate_stops_the_search() {
    let runtime = runtime();
    let (_listener, port) = reachable();

    let handle = runtime.handle().clone();
    let attempts = runtime.block_on(async move {
        let mut connecter = connect(&handle, &[v4(), v6()], port);
        assert!((&mut connecter).await.is_some());
        connecter.attempts()
    });

    assert_eq!(attempts, 1);
}

#[test]
fn test_unreachable_candidates_are_each_tried_once() {
    let runtime = runtime();
    let port = {
        let (listener, port) = reachable();
        drop(listener);
        port
    };

    let handle = runtime.handle().clone();
    let (connection, attempts) = runtime.block_on(async move {
        let mut connecter = connect(&handle, &[v4(), v6()], port);
        let connection = (&mut connecter).await;
        (connection, connecter.attempts())
    });

    assert!(connection.is_none());
    assert_eq!(attempts, 2);
}

#[test]
fn test_empty_candidate_list_completes_empty() {
    let runtime = runtime();

    let handle = runtime.handle().clone();
    let connection = runtime.block_on(async move { connect(&handle, &[], 80).await });
    assert!(connection.is_none());
}

#[test]
fn test_cancel_completes_with_nothing() {
    let runtime = runtime();

    let handle = runtime.handle().clone();
    let connection = runtime.block_on(async move {
        // Non-routable: the attempt stays pending or fails, never connects.
        let target = Address::new(IpAddr::V4(Ipv4Addr::new(10, 255, 255, 1)), 0);
        let connecter = connect_one(&handle, target, 9);
        connecter.cancel();

        filament::time::timeout(Duration::from_secs(2), connecter).await
    });

    assert!(matches!(connection, Ok(None)));
}
