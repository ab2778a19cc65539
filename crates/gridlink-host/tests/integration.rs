//! End-to-end scenarios over real loopback sockets.

use std::{
    net::SocketAddr,
    thread,
    time::{Duration, Instant},
};

use gridlink_core::{
    bits::BitBuffer,
    config::{Config, SimulatedConditions},
};
use gridlink_host::{Client, Endpoint, NetEvent, Peer, Server};
use gridlink_protocol::channel::Channel;

fn config() -> Config {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let mut config = Config::new("Game");
    // Keep retries fast so lossy scenarios converge quickly.
    config.handshake_interval = Duration::from_millis(250);
    config.handshake_attempts = 40;
    config
}

fn lossy(loss: f32, duplicate: f32, min_ms: u64, variance_ms: u64) -> SimulatedConditions {
    SimulatedConditions {
        loss_chance: loss,
        duplicate_chance: duplicate,
        min_latency: Duration::from_millis(min_ms),
        latency_variance: Duration::from_millis(variance_ms),
    }
}

fn connect_pair(server_config: Config, client_config: Config) -> (Server, Client, SocketAddr) {
    let mut server = Server::bind("127.0.0.1:0", server_config).unwrap();
    let server_addr = server.local_addr().unwrap();
    let mut client =
        Client::connect("127.0.0.1:0", server_addr, client_config, b"hail".to_vec()).unwrap();

    let deadline = Instant::now() + Duration::from_secs(20);
    let (mut client_up, mut server_up) = (false, false);
    while Instant::now() < deadline && !(client_up && server_up) {
        let now = Instant::now();
        client.manual_poll(now);
        server.manual_poll(now);
        while let Some(event) = client.recv() {
            if matches!(event, NetEvent::Connected { .. }) {
                client_up = true;
            }
        }
        while let Some(event) = server.recv() {
            if matches!(event, NetEvent::Connected { .. }) {
                server_up = true;
            }
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert!(client_up && server_up, "handshake did not complete in time");
    (server, client, server_addr)
}

fn bytes(payload: &[u8]) -> BitBuffer {
    let mut buf = BitBuffer::new();
    buf.write_bytes(payload);
    buf
}

#[test]
fn handshake_completes_within_window() {
    let (_server, _client, _) = connect_pair(config(), config());
}

#[test]
fn handshake_carries_hail_both_ways() {
    let mut server_config = config();
    server_config.require_approval = true;
    let mut server = Server::bind("127.0.0.1:0", server_config).unwrap();
    let server_addr = server.local_addr().unwrap();
    let mut client =
        Client::connect("127.0.0.1:0", server_addr, config(), b"player-one".to_vec()).unwrap();

    let deadline = Instant::now() + Duration::from_secs(20);
    let mut client_hail = None;
    let mut server_hail = None;
    while Instant::now() < deadline && (client_hail.is_none() || server_hail.is_none()) {
        let now = Instant::now();
        client.manual_poll(now);
        server.manual_poll(now);
        while let Some(event) = server.recv() {
            match event {
                NetEvent::ConnectionRequested { addr, hail } => {
                    assert_eq!(hail, b"player-one");
                    server.approve(addr, b"welcome-in".to_vec()).unwrap();
                }
                NetEvent::Connected { hail, .. } => server_hail = Some(hail),
                _ => {}
            }
        }
        while let Some(event) = client.recv() {
            if let NetEvent::Connected { hail, .. } = event {
                client_hail = Some(hail);
            }
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(server_hail.as_deref(), Some(&b"player-one"[..]));
    assert_eq!(client_hail.as_deref(), Some(&b"welcome-in"[..]));
}

#[test]
fn wrong_application_identifier_is_rejected() {
    let mut server = Server::bind("127.0.0.1:0", config()).unwrap();
    let server_addr = server.local_addr().unwrap();
    let mut client =
        Client::connect("127.0.0.1:0", server_addr, Config::new("OtherGame"), vec![]).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut rejection = None;
    while Instant::now() < deadline && rejection.is_none() {
        let now = Instant::now();
        client.manual_poll(now);
        server.manual_poll(now);
        while let Some(event) = client.recv() {
            if let NetEvent::Rejected { reason, .. } = event {
                rejection = Some(reason);
            }
        }
        thread::sleep(Duration::from_millis(1));
    }
    let reason = rejection.expect("client never saw the rejection");
    assert!(reason.contains("identifier"), "unexpected reason: {reason}");
}

#[test]
fn approval_rejection_reaches_the_client() {
    let mut server_config = config();
    server_config.require_approval = true;
    let mut server = Server::bind("127.0.0.1:0", server_config).unwrap();
    let server_addr = server.local_addr().unwrap();
    let mut client = Client::connect("127.0.0.1:0", server_addr, config(), vec![]).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut rejection = None;
    while Instant::now() < deadline && rejection.is_none() {
        let now = Instant::now();
        client.manual_poll(now);
        server.manual_poll(now);
        while let Some(event) = server.recv() {
            if let NetEvent::ConnectionRequested { addr, .. } = event {
                server.reject(addr, "not today").unwrap();
            }
        }
        while let Some(event) = client.recv() {
            if let NetEvent::Rejected { reason, .. } = event {
                rejection = Some(reason);
            }
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(rejection.as_deref(), Some("not today"));
}

#[test]
fn server_at_capacity_rejects_with_reason() {
    let mut server_config = config();
    server_config.max_connections = 1;
    let mut server = Server::bind("127.0.0.1:0", server_config).unwrap();
    let server_addr = server.local_addr().unwrap();

    let mut first = Client::connect("127.0.0.1:0", server_addr, config(), vec![]).unwrap();
    // Fill the single slot first.
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut first_up = false;
    while Instant::now() < deadline && !first_up {
        let now = Instant::now();
        first.manual_poll(now);
        server.manual_poll(now);
        while let Some(event) = first.recv() {
            if matches!(event, NetEvent::Connected { .. }) {
                first_up = true;
            }
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert!(first_up);

    let mut second = Client::connect("127.0.0.1:0", server_addr, config(), vec![]).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut rejection = None;
    while Instant::now() < deadline && rejection.is_none() {
        let now = Instant::now();
        first.manual_poll(now);
        second.manual_poll(now);
        server.manual_poll(now);
        while let Some(event) = second.recv() {
            if let NetEvent::Rejected { reason, .. } = event {
                rejection = Some(reason);
            }
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(rejection.as_deref(), Some("server full"));
}

#[test]
fn hundred_ordered_messages_survive_loss_and_latency() {
    let mut server_config = config();
    server_config.simulation = Some(lossy(0.2, 0.05, 50, 100));
    let mut client_config = config();
    client_config.simulation = Some(lossy(0.2, 0.05, 50, 100));

    let (mut server, mut client, _) = connect_pair(server_config, client_config);

    for i in 0u32..100 {
        let mut payload = BitBuffer::new();
        payload.write_u32(i);
        client.send(Channel::ReliableOrdered(1), payload).unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(90);
    let mut received = Vec::new();
    while Instant::now() < deadline && received.len() < 100 {
        let now = Instant::now();
        client.manual_poll(now);
        server.manual_poll(now);
        while let Some(event) = server.recv() {
            if let NetEvent::Message(mut message) = event {
                assert_eq!(message.channel, Channel::ReliableOrdered(1));
                received.push(message.payload.read_u32().unwrap());
            }
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(received.len(), 100, "not all messages arrived in time");
    let expected: Vec<u32> = (0..100).collect();
    assert_eq!(received, expected, "messages arrived out of order");

    // Keep polling: duplication must never produce an extra delivery.
    let settle = Instant::now() + Duration::from_millis(750);
    while Instant::now() < settle {
        let now = Instant::now();
        client.manual_poll(now);
        server.manual_poll(now);
        if let Some(NetEvent::Message(_)) = server.recv() {
            panic!("duplicate delivery after all messages were received");
        }
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn duplicated_datagrams_deliver_at_most_once() {
    let mut client_config = config();
    client_config.simulation = Some(lossy(0.0, 1.0, 0, 0));
    let (mut server, mut client, _) = connect_pair(config(), client_config);

    for i in 0u32..20 {
        let mut payload = BitBuffer::new();
        payload.write_u32(i);
        client.send(Channel::ReliableUnordered, payload).unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut received = Vec::new();
    while Instant::now() < deadline && received.len() < 20 {
        let now = Instant::now();
        client.manual_poll(now);
        server.manual_poll(now);
        while let Some(event) = server.recv() {
            if let NetEvent::Message(mut message) = event {
                received.push(message.payload.read_u32().unwrap());
            }
        }
        thread::sleep(Duration::from_millis(1));
    }

    // Every datagram was duplicated; give stragglers time to prove no
    // message is delivered twice.
    let settle = Instant::now() + Duration::from_millis(500);
    while Instant::now() < settle {
        let now = Instant::now();
        client.manual_poll(now);
        server.manual_poll(now);
        while let Some(event) = server.recv() {
            assert!(
                !matches!(event, NetEvent::Message(_)),
                "duplicate delivery on a reliable channel"
            );
        }
        thread::sleep(Duration::from_millis(1));
    }
    received.sort_unstable();
    let expected: Vec<u32> = (0..20).collect();
    assert_eq!(received, expected, "every message exactly once, any order");
}

#[test]
fn large_message_reassembles_byte_identical() {
    let (mut server, mut client, _) = connect_pair(config(), config());
    let blob: Vec<u8> = (0u8..=255).cycle().take(100_000).collect();
    client.send(Channel::ReliableOrdered(2), bytes(&blob)).unwrap();

    let deadline = Instant::now() + Duration::from_secs(30);
    let mut received = None;
    while Instant::now() < deadline && received.is_none() {
        let now = Instant::now();
        client.manual_poll(now);
        server.manual_poll(now);
        while let Some(event) = server.recv() {
            if let NetEvent::Message(mut message) = event {
                let len = message.payload.remaining_bits() / 8;
                received = Some(message.payload.read_bytes(len).unwrap());
            }
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(received.as_deref(), Some(&blob[..]));
}

#[test]
fn receipt_fires_despite_loss() {
    let mut client_config = config();
    client_config.simulation = Some(lossy(0.3, 0.0, 0, 0));
    let (mut server, mut client, _) = connect_pair(config(), client_config);

    client
        .send_with_receipt(Channel::ReliableOrdered(1), bytes(b"tracked"), 99)
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(30);
    let mut receipt = None;
    while Instant::now() < deadline && receipt.is_none() {
        let now = Instant::now();
        client.manual_poll(now);
        server.manual_poll(now);
        while let Some(event) = client.recv() {
            if let NetEvent::Receipt { token, .. } = event {
                receipt = Some(token);
            }
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(receipt, Some(99));
}

#[test]
fn graceful_disconnect_reaches_both_sides() {
    let (mut server, mut client, _) = connect_pair(config(), config());
    client.disconnect("leaving").unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut server_reason = None;
    let mut client_reason = None;
    while Instant::now() < deadline && (server_reason.is_none() || client_reason.is_none()) {
        let now = Instant::now();
        client.manual_poll(now);
        server.manual_poll(now);
        while let Some(event) = server.recv() {
            if let NetEvent::Disconnected { reason, .. } = event {
                server_reason = Some(reason);
            }
        }
        while let Some(event) = client.recv() {
            if let NetEvent::Disconnected { reason, .. } = event {
                client_reason = Some(reason);
            }
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(server_reason.as_deref(), Some("leaving"));
    assert_eq!(client_reason.as_deref(), Some("leaving"));
}

#[test]
fn discovery_answers_foreign_probes_only() {
    let mut peer_config = config();
    peer_config.respond_to_discovery = true;
    let mut a = Peer::bind("127.0.0.1:0", peer_config.clone()).unwrap();
    let mut b = Peer::bind("127.0.0.1:0", peer_config).unwrap();
    let a_addr = a.local_addr().unwrap();
    let b_addr = b.local_addr().unwrap();

    // A probes B, and also probes itself (which must go unanswered).
    a.discover(b_addr).unwrap();
    a.discover(a_addr).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut discovered = Vec::new();
    let mut b_saw_probe = false;
    while Instant::now() < deadline {
        let now = Instant::now();
        a.manual_poll(now);
        b.manual_poll(now);
        while let Some(event) = a.recv() {
            if let NetEvent::Discovered { addr, .. } = event {
                discovered.push(addr);
            }
        }
        while let Some(event) = b.recv() {
            if matches!(event, NetEvent::DiscoveryRequested { .. }) {
                b_saw_probe = true;
            }
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(discovered, vec![b_addr], "exactly one response, never from self");
    assert!(b_saw_probe);
}

#[test]
fn nat_introduction_punches_both_ways() {
    let mut a = Peer::bind("127.0.0.1:0", config()).unwrap();
    let mut b = Peer::bind("127.0.0.1:0", config()).unwrap();
    let mut introducer = Endpoint::bind("127.0.0.1:0", config()).unwrap();
    let a_addr = a.local_addr().unwrap();
    let b_addr = b.local_addr().unwrap();

    introducer.introduce(a_addr, b_addr).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let (mut a_introduced, mut b_introduced) = (None, None);
    let (mut a_punched, mut b_punched) = (None, None);
    while Instant::now() < deadline
        && (a_punched.is_none() || b_punched.is_none())
    {
        let now = Instant::now();
        introducer.manual_poll(now);
        a.manual_poll(now);
        b.manual_poll(now);
        while let Some(event) = a.recv() {
            match event {
                NetEvent::NatIntroduced { addr } => a_introduced = Some(addr),
                NetEvent::NatPunchSucceeded { addr } => a_punched = Some(addr),
                _ => {}
            }
        }
        while let Some(event) = b.recv() {
            match event {
                NetEvent::NatIntroduced { addr } => b_introduced = Some(addr),
                NetEvent::NatPunchSucceeded { addr } => b_punched = Some(addr),
                _ => {}
            }
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(a_introduced, Some(b_addr));
    assert_eq!(b_introduced, Some(a_addr));
    assert_eq!(a_punched, Some(b_addr));
    assert_eq!(b_punched, Some(a_addr));
}

#[test]
fn background_workers_connect_and_shut_down() {
    let server = Server::bind("127.0.0.1:0", config()).unwrap();
    let server_addr = server.local_addr().unwrap();
    let server_handle = server.spawn().unwrap();

    let client = Client::connect("127.0.0.1:0", server_addr, config(), vec![]).unwrap();
    let client_handle = client.spawn().unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut connected = false;
    while Instant::now() < deadline && !connected {
        if let Some(NetEvent::Connected { .. }) = client_handle.recv_timeout(Duration::from_millis(100)) {
            connected = true;
        }
    }
    assert!(connected, "worker-thread handshake did not complete");

    client_handle
        .send(server_addr, Channel::ReliableOrdered(1), bytes(b"from-thread"))
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut got_message = false;
    while Instant::now() < deadline && !got_message {
        match server_handle.recv_timeout(Duration::from_millis(100)) {
            Some(NetEvent::Message(mut message)) => {
                let len = message.payload.remaining_bits() / 8;
                assert_eq!(message.payload.read_bytes(len).unwrap(), b"from-thread");
                got_message = true;
            }
            _ => {}
        }
    }
    assert!(got_message);

    client_handle.shutdown();
    server_handle.shutdown();
}
