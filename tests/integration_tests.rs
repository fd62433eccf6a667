//! Integration tests for the server socket, the game loop and the client
//!
//! Every test runs a real server on a loopback port and talks to it over TCP.

use client::game::RemotePlayers;
use client::socket::{ClientSocket, ReceiveStatus};
use server::config::ServerConfig;
use server::event::{ClientId, EventKind, ReceivedEvent, SendOutcome};
use server::socket::ServerSocket;
use shared::{LineBuffer, Message};
use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn start_server(capacity: usize) -> ServerSocket {
    init_logging();
    let config = ServerConfig::default()
        .with_capacity(capacity)
        .with_bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .with_poll_timeout(Duration::from_millis(200))
        .with_write_timeout(Duration::from_secs(2));
    let mut server = ServerSocket::new(config);
    server.initialize(0).expect("server should start");
    server
}

fn server_addr(server: &ServerSocket) -> SocketAddr {
    server.local_addr().expect("server should be running")
}

fn connect(server: &ServerSocket) -> TcpStream {
    let stream = TcpStream::connect(server_addr(server)).expect("connect should succeed");
    stream.set_read_timeout(Some(TIMEOUT)).unwrap();
    stream
}

/// Drains events until `count` have arrived or the timeout expires.
fn collect_events(server: &ServerSocket, count: usize) -> Vec<ReceivedEvent> {
    let deadline = Instant::now() + TIMEOUT;
    let mut events = Vec::new();
    while events.len() < count && Instant::now() < deadline {
        events.extend(server.drain_received());
        thread::sleep(Duration::from_millis(5));
    }
    events
}

/// Connects a client and returns it with the identifier the server gave it.
fn connect_client(server: &ServerSocket) -> (TcpStream, ClientId) {
    let stream = connect(server);
    let events = collect_events(server, 1);
    assert_eq!(events.len(), 1, "expected one connect event, got {:?}", events);
    assert_eq!(events[0].kind, EventKind::Connected);
    (stream, events[0].client_id)
}

/// Reads until the peer closes, returning whatever arrived first.
fn read_until_closed(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return Some(received),
            Ok(n) => received.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => return Some(received),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // Read timeout: the connection is still open
            Err(_) => return None,
        }
    }
}

/// CONNECTION LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// Identifiers are handed out smallest first
    #[test]
    fn identifiers_are_distinct_and_ascending() {
        let server = start_server(4);
        let (_a, a) = connect_client(&server);
        let (_b, b) = connect_client(&server);
        let (_c, c) = connect_client(&server);

        assert_eq!((a, b, c), (0, 1, 2));
        assert_eq!(server.connected_clients(), vec![0, 1, 2]);
    }

    /// Connections beyond capacity are closed, and a freed identifier is reused
    #[test]
    fn capacity_is_enforced_and_identifiers_reused() {
        let server = start_server(2);
        let (a_stream, a) = connect_client(&server);
        let (_b_stream, b) = connect_client(&server);
        assert_eq!((a, b), (0, 1));

        let mut c_stream = connect(&server);
        assert!(
            read_until_closed(&mut c_stream).is_some(),
            "connection over capacity should be closed"
        );
        assert!(server.drain_received().is_empty());
        assert_eq!(server.connected_clients(), vec![0, 1]);

        drop(a_stream);
        let events = collect_events(&server, 1);
        assert_eq!(events, vec![ReceivedEvent::disconnected(0)]);

        let (_d_stream, d) = connect_client(&server);
        assert_eq!(d, 0);
        assert_eq!(server.connected_clients(), vec![0, 1]);
    }

    /// Closing the client side produces a disconnect event
    #[test]
    fn peer_close_produces_disconnect_event() {
        let server = start_server(2);
        let (stream, id) = connect_client(&server);

        stream.shutdown(std::net::Shutdown::Both).unwrap();
        drop(stream);

        let events = collect_events(&server, 1);
        assert_eq!(events, vec![ReceivedEvent::disconnected(id)]);
        assert!(server.connected_clients().is_empty());
    }

    /// Terminate stops both pipelines and closes every client
    #[test]
    fn terminate_closes_clients() {
        let mut server = start_server(2);
        let (mut a, _) = connect_client(&server);
        let (mut b, _) = connect_client(&server);

        server.terminate();
        assert!(!server.is_running());
        assert!(!server.status().receive_running);
        assert!(!server.status().transmit_running);
        assert!(server.drain_received().is_empty());

        assert!(read_until_closed(&mut a).is_some());
        assert!(read_until_closed(&mut b).is_some());
    }

    /// The listening port is released by terminate
    #[test]
    fn port_is_reusable_after_terminate() {
        let mut server = start_server(1);
        let addr = server_addr(&server);
        server.terminate();

        let config = ServerConfig::default().with_bind_ip(addr.ip());
        let mut again = ServerSocket::new(config);
        again.initialize(addr.port()).expect("port should be free again");
        assert_eq!(again.local_addr(), Some(addr));
    }
}

/// RECEIVE PATH TESTS
mod receive_tests {
    use super::*;

    /// Bytes are passed through without framing
    #[test]
    fn data_arrives_unframed() {
        let server = start_server(2);
        let (mut stream, id) = connect_client(&server);

        stream.write_all(b"1:Alice\n2:259\n").unwrap();
        let events = collect_events(&server, 1);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].client_id, id);
        assert_eq!(events[0].kind, EventKind::DataReceived);
        assert_eq!(events[0].payload, b"1:Alice\n2:259\n");
    }

    /// Draining twice returns nothing the second time
    #[test]
    fn drain_empties_the_queue() {
        let server = start_server(2);
        let (mut stream, _) = connect_client(&server);
        stream.write_all(b"2:32\n").unwrap();

        assert_eq!(collect_events(&server, 1).len(), 1);
        assert!(server.drain_received().is_empty());
    }

    /// Events of one client keep their order
    #[test]
    fn events_keep_arrival_order() {
        let server = start_server(2);
        let mut stream = connect(&server);
        stream.write_all(b"1:Bob\n").unwrap();
        // Let the first payload land before the close
        thread::sleep(Duration::from_millis(50));
        drop(stream);

        let events = collect_events(&server, 3);
        let kinds: Vec<EventKind> = events.iter().map(|event| event.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Connected,
                EventKind::DataReceived,
                EventKind::Disconnected
            ]
        );
    }
}

/// TRANSMIT PATH TESTS
mod transmit_tests {
    use super::*;

    #[test]
    fn empty_requests_fail_immediately() {
        let server = start_server(2);
        let (_stream, id) = connect_client(&server);

        let mut no_targets = server.submit(Vec::new(), "3:a:1,1\n");
        assert_eq!(no_targets.try_outcome(), Some(SendOutcome::Error));

        let mut no_payload = server.submit(vec![id], Vec::new());
        assert_eq!(no_payload.try_outcome(), Some(SendOutcome::Error));
    }

    #[test]
    fn payload_reaches_all_targets() {
        let server = start_server(2);
        let (mut a, a_id) = connect_client(&server);
        let (mut b, b_id) = connect_client(&server);

        let payload = b"3:Alice:2,18\n3:Bob:12,18\n";
        let handle = server.submit(vec![a_id, b_id], payload.to_vec());
        assert_eq!(handle.wait(), SendOutcome::Success);

        for stream in [&mut a, &mut b] {
            let mut buf = vec![0u8; payload.len()];
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(buf, payload);
        }
    }

    /// An unknown target fails the request; earlier targets keep their data
    #[test]
    fn partial_delivery_is_reported_as_error() {
        let server = start_server(4);
        let (mut a, a_id) = connect_client(&server);

        let handle = server.submit(vec![a_id, 3], "4:Carol\n");
        assert_eq!(handle.wait(), SendOutcome::Error);

        let mut buf = [0u8; 8];
        a.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"4:Carol\n");
    }

    /// Requests from several producers each arrive in submission order
    #[test]
    fn requests_are_written_in_submission_order() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 50;

        let server = start_server(1);
        let (mut stream, id) = connect_client(&server);

        thread::scope(|scope| {
            for producer in 0..PRODUCERS {
                let server = &server;
                scope.spawn(move || {
                    let handles: Vec<_> = (0..PER_PRODUCER)
                        .map(|seq| server.submit(vec![id], format!("{}:{}\n", producer, seq)))
                        .collect();
                    for handle in handles {
                        assert_eq!(handle.wait(), SendOutcome::Success);
                    }
                });
            }
        });

        let mut lines = LineBuffer::new();
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        while received.len() < PRODUCERS * PER_PRODUCER {
            let n = stream.read(&mut buf).unwrap();
            assert!(n > 0, "server closed the connection early");
            received.extend(lines.push(&buf[..n]));
        }

        let mut next_seq = [0usize; PRODUCERS];
        for line in received {
            let (producer, seq) = line.split_once(':').unwrap();
            let producer: usize = producer.parse().unwrap();
            let seq: usize = seq.parse().unwrap();
            assert_eq!(seq, next_seq[producer], "producer {} out of order", producer);
            next_seq[producer] += 1;
        }
    }

    /// Terminate returns promptly with sends still queued
    #[test]
    fn terminate_with_queued_sends() {
        let mut server = start_server(2);
        let (mut stream, id) = connect_client(&server);

        let chunk = vec![b'x'; 64 * 1024];
        let handles: Vec<_> = (0..32).map(|_| server.submit(vec![id], chunk.clone())).collect();

        let started = Instant::now();
        server.terminate();
        assert!(started.elapsed() < TIMEOUT);

        for mut handle in handles {
            // Every request is settled one way or another
            assert!(handle.wait_timeout(TIMEOUT).is_some());
        }
        assert!(read_until_closed(&mut stream).is_some());

        let mut late = server.submit(vec![id], "2:32\n");
        assert_eq!(late.try_outcome(), Some(SendOutcome::Error));
    }

    #[tokio::test]
    async fn completion_handle_can_be_awaited() {
        let server = start_server(1);
        let (mut stream, id) = connect_client(&server);

        assert_eq!(server.submit(vec![id], "4:x\n").await, SendOutcome::Success);

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"4:x\n");
    }
}

/// CLIENT AND GAME TESTS
mod game_tests {
    use super::*;
    use server::game::{GameServer, SPAWN_Y};

    fn receive_lines(socket: &mut ClientSocket, lines: &mut LineBuffer, count: usize) -> Vec<String> {
        let deadline = Instant::now() + TIMEOUT;
        let mut received = Vec::new();
        while received.len() < count && Instant::now() < deadline {
            let batch = socket.receive();
            assert_eq!(batch.status, ReceiveStatus::Data);
            for chunk in batch.chunks {
                received.extend(lines.push(&chunk));
            }
            thread::sleep(Duration::from_millis(5));
        }
        received
    }

    #[test]
    fn client_socket_round_trip() {
        let server = start_server(1);
        let mut socket = ClientSocket::connect(&server_addr(&server).to_string()).unwrap();
        let id = collect_events(&server, 1)[0].client_id;

        socket
            .send_message(&Message::PlayerName {
                name: "Alice".to_string(),
            })
            .unwrap();
        let events = collect_events(&server, 1);
        assert_eq!(events[0].payload, b"1:Alice\n");

        let handle = server.submit(vec![id], "3:Alice:2,18\n3:Bob:12,18\n");
        assert_eq!(handle.wait(), SendOutcome::Success);

        let mut lines = LineBuffer::new();
        let mut players = RemotePlayers::new();
        for line in receive_lines(&mut socket, &mut lines, 2) {
            players.apply_line(&line).unwrap();
        }
        assert_eq!(players.position("Alice"), Some((2, 18)));
        assert_eq!(players.position("Bob"), Some((12, 18)));
    }

    /// A jump sent by a client shows up in the positions it receives
    #[test]
    fn game_tick_applies_input_and_broadcasts() {
        let config = ServerConfig::default()
            .with_capacity(2)
            .with_bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_poll_timeout(Duration::from_millis(200));
        let mut game = GameServer::new(config);
        game.start(0).unwrap();

        let addr = game.local_addr().unwrap().to_string();
        let mut socket = ClientSocket::connect(&addr).unwrap();
        socket.transmit(b"1:Alice\n2:259\n").unwrap();

        let mut lines = LineBuffer::new();
        let mut players = RemotePlayers::new();
        let deadline = Instant::now() + TIMEOUT;
        while players.position("Alice").map_or(true, |(_, y)| y >= SPAWN_Y) {
            assert!(Instant::now() < deadline, "jump never observed");
            for handle in game.tick() {
                handle.wait();
            }
            for chunk in socket.receive().chunks {
                for line in lines.push(&chunk) {
                    players.apply_line(&line).unwrap();
                }
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(game.player(0).map(|player| player.name.as_str()), Some("Alice"));

        game.shutdown();
        assert!(!game.socket().is_running());
    }
}
