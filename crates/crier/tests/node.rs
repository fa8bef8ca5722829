//! End-to-end node tests: election, delivery, restart, and timeout
//! behavior over real sockets on loopback.

use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use crier::{Node, NodeOptions, Payload, WaitOptions};
use serde_json::json;

fn free_port_pair() -> u16 {
    loop {
        let probe = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = probe.local_addr().unwrap().port();
        if port == u16::MAX {
            continue;
        }
        if TcpListener::bind(("127.0.0.1", port + 1)).is_ok() {
            drop(probe);
            return port;
        }
    }
}

fn node_on(port: u16, id: &str, server: bool) -> Node {
    let node = Node::new();
    node.configure(
        NodeOptions::new()
            .address("127.0.0.1")
            .port(port)
            .id(id)
            .server(server),
    );
    node
}

fn wait_until(budget: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + budget;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn server_lifecycle_is_restartable() {
    let port = free_port_pair();
    let node = node_on(port, "lifecycle", true);

    assert!(!node.is_server());
    node.start_server(None, None).unwrap();
    assert!(node.is_server());

    node.stop();
    assert!(!node.is_server());

    // A stopped instance is replaced, so starting again works.
    node.start_server(None, None).unwrap();
    assert!(node.is_server());
    node.stop();
    assert!(!node.is_server());
}

#[test]
fn connect_elects_and_delivers_locally() {
    let port = free_port_pair();
    let node = node_on(port, "local", true);
    assert!(!node.is_server());

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    node.connect("test", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    // Subscribing lazily started both roles; this process won its own
    // election.
    assert!(node.is_server());
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    std::thread::sleep(Duration::from_millis(100));

    assert!(node.send("test", Payload::new()).unwrap());
    assert!(wait_until(Duration::from_secs(1), || {
        hits.load(Ordering::SeqCst) == 1
    }));

    node.stop();
}

#[test]
fn event_crosses_nodes_with_sender_attribution() {
    let port = free_port_pair();

    let node_a = node_on(port, "node-a", true);
    let (tx, rx) = mpsc::channel();
    node_a.connect("ping", move |payload: &Payload| {
        let _ = tx.send(payload.clone());
    });
    assert!(node_a.is_server());
    std::thread::sleep(Duration::from_millis(100));

    let node_b = node_on(port, "node-b", false);
    let mut payload = Payload::new();
    payload.insert("n".to_string(), json!(7));
    assert!(node_b.send("ping", payload).unwrap());
    assert!(!node_b.is_server());

    let received = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(received.get("n"), Some(&json!(7)));
    assert_eq!(received.get("sender"), Some(&json!("node-b")));

    // Exactly one fire.
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    node_b.stop();
    node_a.stop();
}

#[test]
fn exactly_one_node_wins_the_election() {
    let port = free_port_pair();

    let first = node_on(port, "first", true);
    let second = node_on(port, "second", true);

    first.try_start();
    second.try_start();

    assert!(first.is_server() ^ second.is_server());
    assert!(first.is_server());

    second.stop();
    first.stop();
}

#[test]
fn new_node_takes_over_after_server_stops() {
    let port = free_port_pair();

    let first = node_on(port, "first", true);
    assert!(first.send("test", Payload::new()).unwrap());
    assert!(first.is_server());

    let second = node_on(port, "second", true);
    assert!(second.send("test", Payload::new()).unwrap());
    assert!(!second.is_server());

    drop(first); // teardown stops both roles

    let third = node_on(port, "third", true);
    third.send("test", Payload::new()).unwrap();
    assert!(third.is_server());

    second.stop();
    third.stop();
}

#[test]
fn wait_for_times_out_in_roughly_the_window() {
    let port = free_port_pair();
    let node = node_on(port, "waiter", true);

    let started = Instant::now();
    let result = node
        .wait_for(
            "never-sent",
            WaitOptions::default().timeout(Duration::from_millis(300)),
        )
        .unwrap();
    let elapsed = started.elapsed();

    assert!(result.is_none());
    assert!(elapsed >= Duration::from_millis(250), "returned too early");
    assert!(elapsed < Duration::from_secs(3), "returned too late");

    node.stop();
}

#[test]
fn wait_for_captures_a_triggered_reply() {
    let port = free_port_pair();

    let responder = Arc::new(node_on(port, "responder", true));
    let responder_handle = Arc::clone(&responder);
    responder.connect("ping", move |_| {
        let mut reply = Payload::new();
        reply.insert("answer".to_string(), json!(42));
        let _ = responder_handle.send("pong", reply);
    });
    assert!(responder.is_server());
    std::thread::sleep(Duration::from_millis(100));

    let requester = node_on(port, "requester", false);
    let reply = requester
        .wait_for(
            "pong",
            WaitOptions::default()
                .timeout(Duration::from_secs(2))
                .send("ping", Payload::new()),
        )
        .unwrap()
        .expect("reply should arrive before the timeout");

    assert_eq!(reply.get("answer"), Some(&json!(42)));
    assert_eq!(reply.get("sender"), Some(&json!("responder")));

    requester.stop();
    responder.stop();
}

#[test]
fn send_without_any_broadcaster_fails_fast() {
    let port = free_port_pair();
    let node = node_on(port, "loner", false);

    let started = Instant::now();
    let delivered = node.send("test", Payload::new()).unwrap();

    assert!(!delivered);
    assert!(started.elapsed() < Duration::from_secs(5));

    node.stop();
}

#[test]
fn sender_filter_limits_delivery() {
    let port = free_port_pair();
    let node = node_on(port, "node-me", true);

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    node.on("evt").sender("node-x").connect(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    std::thread::sleep(Duration::from_millis(100));

    // Stamped with this node's own id: filtered out.
    assert!(node.send("evt", Payload::new()).unwrap());
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    // Explicit matching sender: delivered.
    let mut payload = Payload::new();
    payload.insert("sender".to_string(), json!("node-x"));
    assert!(node.send("evt", payload).unwrap());
    assert!(wait_until(Duration::from_secs(1), || {
        hits.load(Ordering::SeqCst) == 1
    }));

    node.stop();
}

#[test]
fn weak_subscription_dies_with_its_owner() {
    let port = free_port_pair();
    let node = node_on(port, "weak", true);

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let owned = Arc::new(move |_: &Payload| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    node.on("evt").connect_weak(&owned);
    std::thread::sleep(Duration::from_millis(100));

    assert!(node.send("evt", Payload::new()).unwrap());
    assert!(wait_until(Duration::from_secs(1), || {
        hits.load(Ordering::SeqCst) == 1
    }));

    drop(owned);
    assert!(node.send("evt", Payload::new()).unwrap());
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    node.stop();
}

#[test]
fn unsubscribe_stops_delivery() {
    let port = free_port_pair();
    let node = node_on(port, "unsub", true);

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let handle = node.connect("evt", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    std::thread::sleep(Duration::from_millis(100));

    assert!(node.send("evt", Payload::new()).unwrap());
    assert!(wait_until(Duration::from_secs(1), || {
        hits.load(Ordering::SeqCst) == 1
    }));

    node.disconnect(handle);
    node.disconnect(handle); // idempotent

    assert!(node.send("evt", Payload::new()).unwrap());
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    node.stop();
}

#[test]
fn global_node_round_trip() {
    let port = free_port_pair();
    crier::configure(
        NodeOptions::new()
            .address("127.0.0.1")
            .port(port)
            .id("global"),
    );

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    crier::connect("global-evt", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(crier::is_server());
    std::thread::sleep(Duration::from_millis(100));

    assert!(crier::send("global-evt", Payload::new()).unwrap());
    assert!(wait_until(Duration::from_secs(1), || {
        hits.load(Ordering::SeqCst) == 1
    }));

    crier::stop();
    assert!(!crier::is_server());
}
